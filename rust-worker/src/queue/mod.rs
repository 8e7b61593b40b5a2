//! Queue module for broker operations.
//!
//! This module provides:
//! - The [`QueueMessage`] delivery type
//! - The [`QueueClient`] contract the worker drains through
//! - A RabbitMQ implementation of that contract
//!
//! ## Architecture
//!
//! ```text
//! Producer → email_requests queue → Poller → MessageProcessor → ack
//! ```

pub mod amqp;
pub mod client;
pub mod types;

pub use amqp::AmqpQueue;
pub use client::{QueueClient, QueueError};
pub use types::QueueMessage;
