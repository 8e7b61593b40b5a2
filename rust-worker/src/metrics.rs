//! Prometheus metrics for the worker.
//!
//! All metrics register against a caller-supplied [`Registry`] so that the
//! process owns exactly one registry and tests can build isolated ones.

use prometheus::{
    register_histogram_with_registry, register_int_counter_vec_with_registry,
    register_int_gauge_with_registry, Encoder, Histogram, IntCounterVec, IntGauge, Registry,
    TextEncoder,
};

/// Label values for `email_worker_emails_processed_total`.
pub mod status {
    pub const SUCCESS: &str = "success";
    pub const FAILED: &str = "failed";
    pub const ERROR: &str = "error";
    pub const INVALID: &str = "invalid";
}

/// Label values for the `action` label of `email_worker_queue_messages_total`.
pub mod action {
    pub const RECEIVE: &str = "receive";
    pub const DELETE: &str = "delete";
}

/// Metric handles shared by the polling loop and message processor.
#[derive(Clone)]
pub struct Metrics {
    /// Messages by final status (success, failed, error, invalid)
    pub emails_processed: IntCounterVec,
    /// Queue calls by action and status
    pub queue_messages: IntCounterVec,
    /// Mail provider calls by status
    pub mail_operations: IntCounterVec,

    pub processing_duration: Histogram,
    pub polling_duration: Histogram,

    /// Size of the most recently received batch
    pub queue_size: IntGauge,
    /// 1 while the loop is healthy, 0 while it is backing off after an error
    pub worker_health: IntGauge,
}

impl Metrics {
    /// Create the worker metrics and register them with `registry`.
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        Ok(Self {
            emails_processed: register_int_counter_vec_with_registry!(
                "email_worker_emails_processed_total",
                "Total emails processed",
                &["status"],
                registry
            )?,
            queue_messages: register_int_counter_vec_with_registry!(
                "email_worker_queue_messages_total",
                "Queue operations",
                &["action", "status"],
                registry
            )?,
            mail_operations: register_int_counter_vec_with_registry!(
                "email_worker_mail_operations_total",
                "Mail provider operations",
                &["status"],
                registry
            )?,
            processing_duration: register_histogram_with_registry!(
                "email_worker_processing_duration_seconds",
                "Email processing duration",
                registry
            )?,
            polling_duration: register_histogram_with_registry!(
                "email_worker_polling_duration_seconds",
                "Queue polling duration",
                registry
            )?,
            queue_size: register_int_gauge_with_registry!(
                "email_worker_queue_size",
                "Number of messages in the last received batch",
                registry
            )?,
            worker_health: register_int_gauge_with_registry!(
                "email_worker_health",
                "Worker health status (1=healthy, 0=unhealthy)",
                registry
            )?,
        })
    }

    pub fn record_processed(&self, status: &str) {
        self.emails_processed.with_label_values(&[status]).inc();
    }

    pub fn record_queue_op(&self, action: &str, ok: bool) {
        let status = if ok { "success" } else { "error" };
        self.queue_messages.with_label_values(&[action, status]).inc();
    }

    pub fn record_mail_op(&self, succeeded: bool) {
        let status = if succeeded { "success" } else { "failed" };
        self.mail_operations.with_label_values(&[status]).inc();
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.worker_health.set(i64::from(healthy));
    }

    pub fn is_healthy(&self) -> bool {
        self.worker_health.get() == 1
    }
}

/// Render every metric in `registry` in the Prometheus text format.
pub fn render(registry: &Registry) -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;

    Ok(String::from_utf8_lossy(&buffer).to_string())
}
