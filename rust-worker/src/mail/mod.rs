//! Outbound mail.
//!
//! ```text
//! MessageProcessor → EmailSender (MailSender) → MailTransport (HTTP provider)
//! ```

pub mod sender;
pub mod transport;

pub use sender::{EmailSender, MailSender, SendError, SendOutcome};
pub use transport::{HttpMailTransport, MailTransport, TransportError};
