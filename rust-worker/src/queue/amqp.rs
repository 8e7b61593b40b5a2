//! RabbitMQ queue client using lapin.
//!
//! RabbitMQ pushes deliveries to a consumer rather than serving receive
//! calls, so this client buffers the consumer stream and shapes it into
//! long-poll batches. The receipt handle is the delivery tag.
//!
//! RabbitMQ only redelivers an unacknowledged message when its channel
//! closes. To give retained messages the redelivery behaviour of a
//! visibility timeout, deliveries left unacknowledged for longer than the
//! configured timeout are rejected with requeue on the next receive.
//!
//! A lost connection is rebuilt on the next receive. Delivery tags are
//! scoped to their channel, so every tag from the old session is forgotten.

use std::collections::HashMap;
use std::future::Future;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::{FutureExt, StreamExt};
use lapin::{
    message::Delivery,
    options::{BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions, QueueDeclareOptions},
    types::FieldTable,
    Channel, Connection, ConnectionProperties, Consumer,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::client::{QueueClient, QueueError};
use super::types::QueueMessage;

/// Connection, channel and consumer of one broker session.
struct Session {
    connection: Connection,
    channel: Channel,
    consumer: Consumer,
}

impl Session {
    async fn open(url: &str, queue_name: &str, prefetch: u16) -> Result<Self, QueueError> {
        info!(url_length = url.len(), "rabbitmq_connecting");

        let connection = Connection::connect(url, ConnectionProperties::default()).await?;

        info!("rabbitmq_connected");

        let channel = connection.create_channel().await?;

        channel
            .basic_qos(prefetch, BasicQosOptions::default())
            .await?;

        info!(prefetch_count = prefetch, "rabbitmq_qos_set");

        channel
            .queue_declare(
                queue_name,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        info!(queue = queue_name, "rabbitmq_queue_declared");

        let consumer = channel
            .basic_consume(
                queue_name,
                "courier-worker",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        info!(queue = queue_name, "rabbitmq_consumer_started");

        Ok(Self {
            connection,
            channel,
            consumer,
        })
    }

    fn is_open(&self) -> bool {
        self.connection.status().connected() && self.channel.status().connected()
    }
}

/// Deliveries received but not yet acknowledged or released.
#[derive(Debug, Default)]
struct InFlight {
    received: HashMap<u64, Instant>,
}

impl InFlight {
    fn track(&mut self, tag: u64) {
        self.received.insert(tag, Instant::now());
    }

    fn contains(&self, tag: u64) -> bool {
        self.received.contains_key(&tag)
    }

    fn settle(&mut self, tag: u64) {
        self.received.remove(&tag);
    }

    /// Remove and return every tag held for at least `timeout`.
    fn take_expired(&mut self, timeout: Duration) -> Vec<u64> {
        let expired: Vec<u64> = self
            .received
            .iter()
            .filter(|(_, received)| received.elapsed() >= timeout)
            .map(|(tag, _)| *tag)
            .collect();
        for tag in &expired {
            self.received.remove(tag);
        }
        expired
    }

    fn clear(&mut self) {
        self.received.clear();
    }

    fn len(&self) -> usize {
        self.received.len()
    }
}

/// Whether `error` means the session is unusable and must be rebuilt.
fn is_session_fatal(error: &QueueError) -> bool {
    matches!(error, QueueError::ConsumerClosed | QueueError::Amqp(_))
}

/// Acknowledge a tracked delivery, forgetting it only once `ack` succeeds.
async fn ack_tracked<F, Fut>(in_flight: &Mutex<InFlight>, tag: u64, ack: F) -> Result<(), QueueError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<(), QueueError>>,
{
    // A released delivery has been requeued; acking its tag would close the channel.
    if !in_flight.lock().await.contains(tag) {
        return Err(QueueError::InvalidReceiptHandle(format!(
            "delivery {tag} is no longer in flight"
        )));
    }

    ack().await?;

    in_flight.lock().await.settle(tag);
    Ok(())
}

/// Queue client backed by a RabbitMQ consumer.
pub struct AmqpQueue {
    url: String,
    queue_name: String,
    prefetch: u16,
    visibility_timeout: Duration,
    session: Mutex<Option<Session>>,
    in_flight: Mutex<InFlight>,
}

impl AmqpQueue {
    /// Connect, declare the queue and start consuming.
    ///
    /// `prefetch` bounds how many deliveries the broker hands out before
    /// any are acknowledged.
    pub async fn connect(
        url: &str,
        queue_name: &str,
        prefetch: u16,
        visibility_timeout: Duration,
    ) -> Result<Self, QueueError> {
        let session = Session::open(url, queue_name, prefetch).await?;

        Ok(Self {
            url: url.to_string(),
            queue_name: queue_name.to_string(),
            prefetch,
            visibility_timeout,
            session: Mutex::new(Some(session)),
            in_flight: Mutex::new(InFlight::default()),
        })
    }

    /// Channel and consumer of a live session, reconnecting if needed.
    async fn ensure_session(&self) -> Result<(Channel, Consumer), QueueError> {
        let mut session = self.session.lock().await;

        if let Some(current) = session.as_ref() {
            if current.is_open() {
                return Ok((current.channel.clone(), current.consumer.clone()));
            }
            warn!(queue = %self.queue_name, "rabbitmq_session_lost");
        }

        *session = None;
        self.forget_deliveries().await;

        let fresh = Session::open(&self.url, &self.queue_name, self.prefetch).await?;
        let handles = (fresh.channel.clone(), fresh.consumer.clone());
        *session = Some(fresh);

        info!(queue = %self.queue_name, "rabbitmq_session_reestablished");

        Ok(handles)
    }

    /// Drop the session after a fatal error so the next receive reconnects.
    async fn reset_session(&self, error: &QueueError) {
        warn!(queue = %self.queue_name, error = %error, "rabbitmq_session_reset");
        *self.session.lock().await = None;
        self.forget_deliveries().await;
    }

    async fn forget_deliveries(&self) {
        let mut in_flight = self.in_flight.lock().await;
        if in_flight.len() > 0 {
            debug!(count = in_flight.len(), "rabbitmq_in_flight_forgotten");
        }
        in_flight.clear();
    }

    /// Convert a delivery into a [`QueueMessage`] and start its visibility clock.
    async fn track(&self, delivery: Delivery) -> QueueMessage {
        let tag = delivery.delivery_tag;
        let id = delivery
            .properties
            .message_id()
            .as_ref()
            .map(|s| s.to_string())
            .unwrap_or_else(|| format!("delivery-{tag}"));

        self.in_flight.lock().await.track(tag);

        QueueMessage::new(id, delivery.data, tag.to_string())
    }

    /// Requeue deliveries whose visibility timeout has lapsed.
    async fn release_expired(&self, channel: &Channel) {
        let expired = self
            .in_flight
            .lock()
            .await
            .take_expired(self.visibility_timeout);

        for tag in expired {
            match channel
                .basic_nack(
                    tag,
                    BasicNackOptions {
                        requeue: true,
                        ..Default::default()
                    },
                )
                .await
            {
                Ok(()) => debug!(delivery_tag = tag, "rabbitmq_delivery_released"),
                Err(e) => warn!(delivery_tag = tag, error = %e, "rabbitmq_release_failed"),
            }
        }
    }

    async fn receive_from(
        &self,
        mut consumer: Consumer,
        max_messages: usize,
        wait: Duration,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        let first = match tokio::time::timeout(wait, consumer.next()).await {
            Err(_) => return Ok(Vec::new()),
            Ok(None) => return Err(QueueError::ConsumerClosed),
            Ok(Some(delivery)) => delivery?,
        };

        let mut batch = vec![self.track(first).await];

        // Drain what is already buffered without waiting again.
        while batch.len() < max_messages {
            match consumer.next().now_or_never() {
                Some(Some(Ok(delivery))) => batch.push(self.track(delivery).await),
                Some(Some(Err(e))) => {
                    warn!(error = %e, "rabbitmq_delivery_error");
                    break;
                }
                _ => break,
            }
        }

        Ok(batch)
    }

    /// Close the channel and connection.
    pub async fn close(&self) {
        let Some(session) = self.session.lock().await.take() else {
            return;
        };

        if let Err(e) = session.channel.close(200, "Normal shutdown").await {
            warn!(error = %e, "rabbitmq_channel_close_error");
        }

        if let Err(e) = session.connection.close(200, "Normal shutdown").await {
            warn!(error = %e, "rabbitmq_connection_close_error");
        }

        info!(queue = %self.queue_name, "rabbitmq_queue_closed");
    }
}

#[async_trait]
impl QueueClient for AmqpQueue {
    async fn receive_batch(
        &self,
        max_messages: usize,
        wait: Duration,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        let (channel, consumer) = self.ensure_session().await?;

        self.release_expired(&channel).await;

        let result = self.receive_from(consumer, max_messages, wait).await;

        if let Err(e) = &result {
            if is_session_fatal(e) {
                self.reset_session(e).await;
            }
        }

        result
    }

    async fn delete_message(&self, receipt_handle: &str) -> Result<(), QueueError> {
        let tag = parse_receipt_handle(receipt_handle)?;

        let channel = match self.session.lock().await.as_ref() {
            Some(session) => session.channel.clone(),
            None => {
                return Err(QueueError::InvalidReceiptHandle(format!(
                    "delivery {tag} belongs to a closed session"
                )))
            }
        };

        ack_tracked(&self.in_flight, tag, || async move {
            channel
                .basic_ack(tag, BasicAckOptions::default())
                .await
                .map_err(QueueError::from)
        })
        .await
    }
}

fn parse_receipt_handle(receipt_handle: &str) -> Result<u64, QueueError> {
    receipt_handle
        .parse()
        .map_err(|_| QueueError::InvalidReceiptHandle(receipt_handle.to_string()))
}
