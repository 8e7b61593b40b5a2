//! Contract between the worker and the message broker.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use super::types::QueueMessage;

/// Errors raised by queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("broker error: {0}")]
    Amqp(#[from] lapin::Error),

    #[error("consumer stream closed")]
    ConsumerClosed,

    #[error("invalid receipt handle: {0}")]
    InvalidReceiptHandle(String),

    #[error("queue transport error: {0}")]
    Transport(String),
}

/// Receive and delete operations against the broker.
///
/// Both calls are cancel-safe: dropping the returned future abandons the
/// operation.
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Long-poll for up to `max_messages`, waiting at most `wait` for the first.
    async fn receive_batch(
        &self,
        max_messages: usize,
        wait: Duration,
    ) -> Result<Vec<QueueMessage>, QueueError>;

    /// Delete one delivery so it is never redelivered.
    async fn delete_message(&self, receipt_handle: &str) -> Result<(), QueueError>;
}
