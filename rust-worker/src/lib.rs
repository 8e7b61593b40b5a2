//! Courier - queue-driven login email worker.
//!
//! The worker drains a message queue of email requests, sends one email per
//! request through an HTTP mail provider, and deletes each message it is
//! done with. Messages whose send faulted in an unclassified way are left in
//! the queue for redelivery.
//!
//! ## Architecture
//!
//! ```text
//! Queue → Poller → MessageProcessor → codec → MailSender → MailTransport
//!                        └──────────────→ QueueClient::delete_message
//! ```

pub mod codec;
pub mod config;
pub mod consumer;
pub mod mail;
pub mod metrics;
pub mod processor;
pub mod queue;
pub mod web;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use codec::{decode, DecodeError, EmailRequest};
pub use config::{Config, ConfigError};
pub use consumer::{PollSettings, Poller};
pub use mail::{EmailSender, HttpMailTransport, MailSender, MailTransport, SendOutcome};
pub use metrics::Metrics;
pub use processor::{MessageProcessor, ProcessingVerdict};
pub use queue::{AmqpQueue, QueueClient, QueueError, QueueMessage};
