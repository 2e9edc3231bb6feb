//! Kafka-compatible message bus for rxflow.
//!
//! Production [`MessageBus`] implementation over rdkafka. Works against
//! Redpanda, Apache Kafka, or any Kafka-protocol broker.
//!
//! # Delivery semantics
//!
//! **At-least-once, one unsettled delivery per subscription**:
//!
//! - auto-commit is disabled; an offset is committed only when the handler
//!   settles the delivery with `Ack`, so a crash between processing and
//!   settlement redelivers the message
//! - a `Requeue` settlement (or a dropped delivery) seeks the consumer back
//!   to the message's own offset after a short delay, which is how
//!   "do not acknowledge, let the transport redeliver" maps onto a
//!   log-based broker
//! - the consumer task does not poll the next message until the current
//!   delivery is settled (prefetch of one); scale out by running more
//!   service instances in the same consumer group
//!
//! # Example
//!
//! ```no_run
//! use rxflow_redpanda::RedpandaBus;
//! use rxflow_core::bus::MessageBus;
//! use rxflow_core::message::SerializedMessage;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = RedpandaBus::builder()
//!     .brokers("localhost:9092")
//!     .consumer_group("prescription-service")
//!     .build()?;
//!
//! let message = SerializedMessage::new("prescription.create.v1".to_string(), vec![1], None);
//! bus.publish("prescription-commands", &message).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message as KafkaMessage;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use rdkafka::Offset;
use rxflow_core::bus::{BusError, Delivery, DeliveryStream, Disposition, MessageBus};
use rxflow_core::message::SerializedMessage;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::oneshot;

/// Wire representation of a [`SerializedMessage`].
///
/// Metadata travels as JSON *text* rather than a JSON value: bincode is not
/// self-describing, so a dynamic value cannot round-trip through it.
#[derive(Serialize, Deserialize)]
struct WireMessage {
    message_type: String,
    data: Vec<u8>,
    metadata: Option<String>,
}

impl WireMessage {
    fn encode(message: &SerializedMessage) -> Result<Vec<u8>, String> {
        let metadata = message
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| format!("failed to encode metadata: {e}"))?;
        let wire = Self {
            message_type: message.message_type.clone(),
            data: message.data.clone(),
            metadata,
        };
        bincode::serialize(&wire).map_err(|e| format!("failed to encode message: {e}"))
    }

    fn decode(payload: &[u8]) -> Result<SerializedMessage, String> {
        let wire: Self =
            bincode::deserialize(payload).map_err(|e| format!("failed to decode message: {e}"))?;
        let metadata = wire
            .metadata
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| format!("failed to decode metadata: {e}"))?;
        Ok(SerializedMessage::new(wire.message_type, wire.data, metadata))
    }
}

/// Kafka-compatible message bus.
pub struct RedpandaBus {
    /// Producer for publishing messages.
    producer: FutureProducer,
    /// Broker addresses (for creating consumers).
    brokers: String,
    /// Producer send timeout.
    timeout: Duration,
    /// Consumer group id (if explicitly set).
    consumer_group: Option<String>,
    /// Where new consumer groups start reading.
    auto_offset_reset: String,
    /// Delay before a requeued message is redelivered.
    redelivery_delay: Duration,
}

impl RedpandaBus {
    /// Create a bus with default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::ConnectionFailed`] if the producer cannot be
    /// created.
    pub fn new(brokers: &str) -> Result<Self, BusError> {
        Self::builder().brokers(brokers).build()
    }

    /// Create a builder for configuring the bus.
    #[must_use]
    pub fn builder() -> RedpandaBusBuilder {
        RedpandaBusBuilder::default()
    }

    /// The configured broker addresses.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }
}

/// Builder for [`RedpandaBus`].
#[derive(Default)]
pub struct RedpandaBusBuilder {
    brokers: Option<String>,
    producer_acks: Option<String>,
    timeout: Option<Duration>,
    consumer_group: Option<String>,
    auto_offset_reset: Option<String>,
    redelivery_delay: Option<Duration>,
}

impl RedpandaBusBuilder {
    /// Set the broker addresses (comma-separated).
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the producer acknowledgment mode: `"0"`, `"1"`, or `"all"`.
    ///
    /// Default: `"1"`.
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Set the producer send timeout. Default: 5 seconds.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the consumer group id for subscriptions.
    ///
    /// Service instances sharing a group share the workload; without an
    /// explicit group, one is derived from the subscribed topics.
    #[must_use]
    pub fn consumer_group(mut self, consumer_group: impl Into<String>) -> Self {
        self.consumer_group = Some(consumer_group.into());
        self
    }

    /// Set where new consumer groups start reading: `"earliest"` or
    /// `"latest"` (default).
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Set the delay before a requeued message is redelivered.
    ///
    /// Default: 1 second.
    #[must_use]
    pub const fn redelivery_delay(mut self, delay: Duration) -> Self {
        self.redelivery_delay = Some(delay);
        self
    }

    /// Build the bus.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::ConnectionFailed`] if brokers are not set or the
    /// producer cannot be created.
    pub fn build(self) -> Result<RedpandaBus, BusError> {
        let brokers = self
            .brokers
            .ok_or_else(|| BusError::ConnectionFailed("brokers not configured".to_string()))?;

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", "5000")
            .set("acks", self.producer_acks.as_deref().unwrap_or("1"))
            .create()
            .map_err(|e| {
                BusError::ConnectionFailed(format!("failed to create producer: {e}"))
            })?;

        tracing::info!(
            brokers = %brokers,
            acks = self.producer_acks.as_deref().unwrap_or("1"),
            "redpanda bus created"
        );

        Ok(RedpandaBus {
            producer,
            brokers,
            timeout: self.timeout.unwrap_or(Duration::from_secs(5)),
            consumer_group: self.consumer_group,
            auto_offset_reset: self
                .auto_offset_reset
                .unwrap_or_else(|| "latest".to_string()),
            redelivery_delay: self.redelivery_delay.unwrap_or(Duration::from_secs(1)),
        })
    }
}

impl MessageBus for RedpandaBus {
    fn publish(
        &self,
        topic: &str,
        message: &SerializedMessage,
    ) -> Pin<Box<dyn Future<Output = Result<(), BusError>> + Send + '_>> {
        let topic = topic.to_string();
        let message = message.clone();
        let timeout = self.timeout;

        Box::pin(async move {
            let payload =
                WireMessage::encode(&message).map_err(|reason| BusError::PublishFailed {
                    topic: topic.clone(),
                    reason,
                })?;

            // Key by message type: messages of the same type share a
            // partition, which keeps per-type ordering.
            let record = FutureRecord::to(&topic)
                .payload(&payload)
                .key(message.message_type.as_bytes());

            match self.producer.send(record, Timeout::After(timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        topic = %topic,
                        partition,
                        offset,
                        message_type = %message.message_type,
                        "message published"
                    );
                    Ok(())
                }
                Err((kafka_error, _)) => {
                    tracing::error!(topic = %topic, error = %kafka_error, "publish failed");
                    Err(BusError::PublishFailed {
                        topic,
                        reason: kafka_error.to_string(),
                    })
                }
            }
        })
    }

    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<DeliveryStream, BusError>> + Send + '_>> {
        let topics: Vec<String> = topics.iter().map(|s| (*s).to_string()).collect();
        let brokers = self.brokers.clone();
        let consumer_group = self.consumer_group.clone();
        let auto_offset_reset = self.auto_offset_reset.clone();
        let redelivery_delay = self.redelivery_delay;

        Box::pin(async move {
            let consumer_group_id = consumer_group.unwrap_or_else(|| {
                let mut sorted = topics.clone();
                sorted.sort();
                format!("rxflow-{}", sorted.join("-"))
            });

            // Manual commit only: an offset moves forward when the handler
            // settles with Ack, never before.
            let consumer: StreamConsumer = ClientConfig::new()
                .set("bootstrap.servers", &brokers)
                .set("group.id", &consumer_group_id)
                .set("enable.auto.commit", "false")
                .set("auto.offset.reset", &auto_offset_reset)
                .set("session.timeout.ms", "6000")
                .set("enable.partition.eof", "false")
                .create()
                .map_err(|e| BusError::SubscriptionFailed {
                    topics: topics.clone(),
                    reason: format!("failed to create consumer: {e}"),
                })?;

            let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
            consumer
                .subscribe(&topic_refs)
                .map_err(|e| BusError::SubscriptionFailed {
                    topics: topics.clone(),
                    reason: format!("failed to subscribe: {e}"),
                })?;

            tracing::info!(
                topics = ?topics,
                consumer_group = %consumer_group_id,
                "subscribed with manual commits"
            );

            let (tx, rx) = tokio::sync::mpsc::channel::<Result<Delivery, BusError>>(1);

            tokio::spawn(async move {
                use futures::StreamExt;

                let mut stream = consumer.stream();
                while let Some(next) = stream.next().await {
                    match next {
                        Ok(kafka_message) => {
                            let Some(payload) = kafka_message.payload() else {
                                tracing::warn!(
                                    topic = kafka_message.topic(),
                                    offset = kafka_message.offset(),
                                    "skipping message with no payload"
                                );
                                if let Err(e) =
                                    consumer.commit_message(&kafka_message, CommitMode::Async)
                                {
                                    tracing::warn!(error = %e, "failed to commit empty message");
                                }
                                continue;
                            };

                            let message = match WireMessage::decode(payload) {
                                Ok(message) => message,
                                Err(reason) => {
                                    // Poison message: surface the error and
                                    // commit so it does not wedge the
                                    // partition.
                                    if tx.send(Err(BusError::Transport(reason))).await.is_err() {
                                        break;
                                    }
                                    if let Err(e) =
                                        consumer.commit_message(&kafka_message, CommitMode::Async)
                                    {
                                        tracing::warn!(error = %e, "failed to commit poison message");
                                    }
                                    continue;
                                }
                            };

                            let (receipt_tx, receipt_rx) = oneshot::channel();
                            if tx
                                .send(Ok(Delivery::new(message, receipt_tx)))
                                .await
                                .is_err()
                            {
                                // Receiver dropped; exit without committing
                                // so the message is redelivered elsewhere.
                                break;
                            }

                            // Hold here until the delivery is settled: this
                            // is the prefetch-of-one discipline.
                            match receipt_rx.await {
                                Ok(Disposition::Ack) => {
                                    if let Err(e) = consumer
                                        .commit_message(&kafka_message, CommitMode::Async)
                                    {
                                        tracing::warn!(
                                            topic = kafka_message.topic(),
                                            offset = kafka_message.offset(),
                                            error = %e,
                                            "failed to commit offset, message may be redelivered"
                                        );
                                    }
                                }
                                Ok(Disposition::Requeue) | Err(_) => {
                                    tokio::time::sleep(redelivery_delay).await;
                                    if let Err(e) = consumer.seek(
                                        kafka_message.topic(),
                                        kafka_message.partition(),
                                        Offset::Offset(kafka_message.offset()),
                                        Timeout::After(Duration::from_secs(5)),
                                    ) {
                                        tracing::error!(
                                            topic = kafka_message.topic(),
                                            offset = kafka_message.offset(),
                                            error = %e,
                                            "failed to seek back for redelivery"
                                        );
                                    }
                                }
                            }
                        }
                        Err(e) => {
                            let err = BusError::Transport(format!("failed to receive: {e}"));
                            if tx.send(Err(err)).await.is_err() {
                                break;
                            }
                        }
                    }
                }

                tracing::debug!("consumer task exiting");
            });

            let stream = async_stream::stream! {
                let mut rx = rx;
                while let Some(result) = rx.recv().await {
                    yield result;
                }
            };

            Ok(Box::pin(stream) as DeliveryStream)
        })
    }
}
