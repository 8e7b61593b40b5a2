//! Login notification sender.
//!
//! Wraps a [`MailTransport`] and folds every transport fault into a
//! [`SendOutcome`], so callers only ever see a classified result.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{error, info};

use super::transport::MailTransport;
use crate::config::{DEFAULT_FROM_ADDRESS, DEFAULT_SUBJECT};

/// Result of one send attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The provider accepted the message.
    Sent { provider_message_id: String },
    /// The provider or transport reported a failure.
    Failed { error_description: String },
}

impl SendOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self, SendOutcome::Sent { .. })
    }

    pub fn provider_message_id(&self) -> Option<&str> {
        match self {
            SendOutcome::Sent { provider_message_id } => Some(provider_message_id),
            SendOutcome::Failed { .. } => None,
        }
    }

    pub fn error_description(&self) -> Option<&str> {
        match self {
            SendOutcome::Sent { .. } => None,
            SendOutcome::Failed { error_description } => Some(error_description),
        }
    }
}

/// A send attempt that ended without a classified outcome.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("send fault: {0}")]
    Fault(String),

    #[error("send panicked: {0}")]
    Panicked(String),
}

/// Sends the login email for one recipient.
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, address: &str) -> Result<SendOutcome, SendError>;
}

/// [`EmailSender`] that delivers through a [`MailTransport`].
#[derive(Clone)]
pub struct MailSender {
    transport: Arc<dyn MailTransport>,
    from_address: String,
    subject: String,
}

impl MailSender {
    pub fn new(transport: Arc<dyn MailTransport>, from_address: String, subject: String) -> Self {
        Self {
            transport,
            from_address,
            subject,
        }
    }

    /// Sender with the built-in from address and subject.
    pub fn with_defaults(transport: Arc<dyn MailTransport>) -> Self {
        Self::new(
            transport,
            DEFAULT_FROM_ADDRESS.to_string(),
            DEFAULT_SUBJECT.to_string(),
        )
    }

    /// Send the login email and classify the result.
    pub async fn send_login_email(&self, address: &str) -> SendOutcome {
        let body = login_body(Utc::now());

        match self
            .transport
            .send_email(&self.from_address, address, &self.subject, &body)
            .await
        {
            Ok(message_id) => {
                info!(email = %address, message_id = %message_id, "email_sent");
                SendOutcome::Sent {
                    provider_message_id: message_id,
                }
            }
            Err(e) => {
                error!(email = %address, error = %e, "email_send_failed");
                SendOutcome::Failed {
                    error_description: e.to_string(),
                }
            }
        }
    }
}

#[async_trait]
impl EmailSender for MailSender {
    async fn send(&self, address: &str) -> Result<SendOutcome, SendError> {
        Ok(self.send_login_email(address).await)
    }
}

/// Plain-text body stamped with the send time.
fn login_body(sent_at: DateTime<Utc>) -> String {
    format!(
        "Hello! You signed in to the system successfully at {} UTC",
        sent_at.format("%Y-%m-%d %H:%M:%S")
    )
}
