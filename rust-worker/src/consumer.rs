//! Queue polling loop.
//!
//! This module long-polls the queue for batches, hands each message to the
//! [`MessageProcessor`] one at a time, and keeps running through receive
//! failures until the shutdown token is cancelled.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::metrics::{action, Metrics};
use crate::processor::MessageProcessor;
use crate::queue::QueueClient;

/// Maximum messages requested per receive.
pub const BATCH_SIZE: usize = 10;

/// Long-poll wait per receive.
pub const RECEIVE_WAIT: Duration = Duration::from_secs(20);

/// Pause after a failed receive.
pub const ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Timing knobs for the polling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub batch_size: usize,
    pub receive_wait: Duration,
    pub error_backoff: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            batch_size: BATCH_SIZE,
            receive_wait: RECEIVE_WAIT,
            error_backoff: ERROR_BACKOFF,
        }
    }
}

/// The worker's top-level loop.
pub struct Poller {
    queue: Arc<dyn QueueClient>,
    processor: MessageProcessor,
    metrics: Metrics,
    settings: PollSettings,
}

impl Poller {
    pub fn new(
        queue: Arc<dyn QueueClient>,
        processor: MessageProcessor,
        metrics: Metrics,
        settings: PollSettings,
    ) -> Self {
        Self {
            queue,
            processor,
            metrics,
            settings,
        }
    }

    /// Run until `shutdown` is cancelled.
    ///
    /// Cancellation aborts an in-progress receive or backoff but never a
    /// message already being processed.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            batch_size = self.settings.batch_size,
            receive_wait_secs = self.settings.receive_wait.as_secs(),
            "worker_started"
        );
        self.metrics.set_healthy(true);

        while !shutdown.is_cancelled() {
            let started = Instant::now();

            let received = tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("worker_stopping");
                    break;
                }

                result = self
                    .queue
                    .receive_batch(self.settings.batch_size, self.settings.receive_wait) => result,
            };

            match received {
                Ok(batch) => {
                    self.metrics.record_queue_op(action::RECEIVE, true);
                    self.metrics.queue_size.set(batch.len() as i64);

                    if batch.is_empty() {
                        debug!("queue_empty");
                    } else {
                        info!(count = batch.len(), "queue_batch_received");
                    }

                    for message in batch {
                        self.processor.process(message).await;
                    }
                }
                Err(e) => {
                    error!(
                        error = %e,
                        backoff_secs = self.settings.error_backoff.as_secs_f64(),
                        "poll_error"
                    );
                    self.metrics.record_queue_op(action::RECEIVE, false);
                    self.metrics.set_healthy(false);

                    let interrupted = tokio::select! {
                        _ = shutdown.cancelled() => true,
                        _ = tokio::time::sleep(self.settings.error_backoff) => false,
                    };

                    if interrupted {
                        info!("worker_stopping");
                        break;
                    }

                    self.metrics.set_healthy(true);
                }
            }

            self.metrics
                .polling_duration
                .observe(started.elapsed().as_secs_f64());
        }

        info!("worker_stopped");
    }
}
