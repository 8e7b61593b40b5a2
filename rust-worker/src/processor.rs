//! Message processing - decode, send, acknowledge.
//!
//! This module decides the fate of every delivery. Each message runs
//! through:
//!
//! ```text
//! Received → Decoding ─┬─ Invalid ───────────────────→ Acknowledging
//!                      └─ Valid → Sending ─┬─ Sent ───→ Acknowledging
//!                                          ├─ Failed ─→ Acknowledging
//!                                          └─ Fault ──→ Retaining
//! ```
//!
//! Acknowledging deletes the delivery from the queue. Retaining makes no
//! queue call, so the broker redelivers the message once its visibility
//! timeout lapses.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use tracing::{debug, error, info, warn};

use crate::codec::{self, DecodeError};
use crate::mail::{EmailSender, SendError, SendOutcome};
use crate::metrics::{action, status, Metrics};
use crate::queue::{QueueClient, QueueMessage};

/// What happens to a delivery once processing finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingVerdict {
    /// Delete from the queue; the payload is never redelivered to this worker.
    Acknowledge,
    /// Leave in the queue for broker redelivery.
    Retain,
}

/// Processes one queue message at a time.
#[derive(Clone)]
pub struct MessageProcessor {
    queue: Arc<dyn QueueClient>,
    sender: Arc<dyn EmailSender>,
    metrics: Metrics,
}

impl MessageProcessor {
    pub fn new(queue: Arc<dyn QueueClient>, sender: Arc<dyn EmailSender>, metrics: Metrics) -> Self {
        Self {
            queue,
            sender,
            metrics,
        }
    }

    /// Process a single delivery and return its verdict.
    ///
    /// Never fails: every fault is logged, counted and folded into the verdict.
    pub async fn process(&self, message: QueueMessage) -> ProcessingVerdict {
        let request = match codec::decode(&message.body) {
            Ok(request) => request,
            Err(e) => {
                match &e {
                    DecodeError::Malformed(_) | DecodeError::NotAnObject(_) => warn!(
                        message_id = %message.id,
                        error = %e,
                        body_preview = %message.body_preview(),
                        "message_malformed"
                    ),
                    DecodeError::MissingEmail => warn!(
                        message_id = %message.id,
                        body_preview = %message.body_preview(),
                        "message_invalid"
                    ),
                }
                self.metrics.record_processed(status::INVALID);
                self.acknowledge(&message).await;
                return ProcessingVerdict::Acknowledge;
            }
        };

        info!(
            message_id = %message.id,
            email = %request.email,
            kind = %request.kind,
            enqueued_at = %request.enqueued_at,
            "email_processing"
        );

        let started = Instant::now();

        let result = AssertUnwindSafe(self.sender.send(&request.email))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(SendError::Panicked(panic_message(panic.as_ref()))));

        let verdict = match result {
            Ok(SendOutcome::Sent {
                provider_message_id,
            }) => {
                info!(
                    message_id = %message.id,
                    email = %request.email,
                    provider_message_id = %provider_message_id,
                    "email_delivered"
                );
                self.metrics.record_processed(status::SUCCESS);
                self.metrics.record_mail_op(true);
                ProcessingVerdict::Acknowledge
            }
            Ok(SendOutcome::Failed { error_description }) => {
                // Classified failures are dropped rather than retried so a
                // permanently bad address cannot loop forever.
                error!(
                    message_id = %message.id,
                    email = %request.email,
                    error = %error_description,
                    "email_delivery_failed"
                );
                self.metrics.record_processed(status::FAILED);
                self.metrics.record_mail_op(false);
                ProcessingVerdict::Acknowledge
            }
            Err(e) => {
                error!(
                    message_id = %message.id,
                    email = %request.email,
                    error = %e,
                    "email_send_fault"
                );
                self.metrics.record_processed(status::ERROR);
                ProcessingVerdict::Retain
            }
        };

        match verdict {
            ProcessingVerdict::Acknowledge => self.acknowledge(&message).await,
            ProcessingVerdict::Retain => debug!(
                message_id = %message.id,
                "message_retained_for_redelivery"
            ),
        }

        self.metrics
            .processing_duration
            .observe(started.elapsed().as_secs_f64());

        verdict
    }

    /// Delete the delivery. Failures are logged and counted, never retried.
    async fn acknowledge(&self, message: &QueueMessage) {
        match self.queue.delete_message(&message.receipt_handle).await {
            Ok(()) => {
                self.metrics.record_queue_op(action::DELETE, true);
                debug!(message_id = %message.id, "queue_message_deleted");
            }
            Err(e) => {
                self.metrics.record_queue_op(action::DELETE, false);
                error!(
                    message_id = %message.id,
                    receipt_handle = %message.receipt_handle,
                    error = %e,
                    "queue_delete_failed"
                );
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
