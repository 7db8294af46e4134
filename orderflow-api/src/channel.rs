//! Kafka-backed message channel.
//!
//! Publishing waits for the broker acknowledgement (`acks=all`, idempotent
//! producer). Consuming commits offsets explicitly, one message at a time, so
//! an unacknowledged message is redelivered after a restart.

use async_trait::async_trait;
use orderflow_core::{ChannelError, ChannelResult};
use orderflow_storage::{InboundMessage, MessageSource, OrderChannel};
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::{ClientConfig, Message, Offset, TopicPartitionList};
use std::time::Duration;

use crate::config::KafkaConfig;

fn map_kafka_error(operation: &'static str, timeout: Duration, err: KafkaError) -> ChannelError {
    match err {
        KafkaError::MessageProduction(RDKafkaErrorCode::MessageTimedOut) => {
            ChannelError::Timeout { operation, timeout }
        }
        KafkaError::Canceled => ChannelError::Closed,
        other => ChannelError::Unavailable {
            reason: format!("{}: {}", operation, other),
        },
    }
}

// ============================================================================
// PRODUCER
// ============================================================================

/// Build the shared producer. Cloning it is cheap.
pub fn create_producer(config: &KafkaConfig) -> ChannelResult<FutureProducer> {
    ClientConfig::new()
        .set("bootstrap.servers", config.bootstrap_servers())
        .set("acks", "all")
        .set("enable.idempotence", "true")
        .set(
            "message.timeout.ms",
            config.message_timeout.as_millis().to_string(),
        )
        .create()
        .map_err(|e| map_kafka_error("create producer", config.message_timeout, e))
}

/// Publisher bound to one topic.
#[derive(Clone)]
pub struct KafkaPublisher {
    producer: FutureProducer,
    topic: String,
    message_timeout: Duration,
}

impl KafkaPublisher {
    pub fn new(producer: FutureProducer, topic: impl Into<String>, message_timeout: Duration) -> Self {
        Self {
            producer,
            topic: topic.into(),
            message_timeout,
        }
    }
}

#[async_trait]
impl OrderChannel for KafkaPublisher {
    async fn publish(&self, key: &str, payload: &[u8]) -> ChannelResult<()> {
        let record = FutureRecord::to(&self.topic).key(key).payload(payload);
        match self.producer.send(record, self.message_timeout).await {
            Ok(_) => {
                tracing::debug!(topic = %self.topic, key, "Message delivered");
                Ok(())
            }
            Err((err, _)) => {
                tracing::warn!(topic = %self.topic, key, error = %err, "Message delivery failed");
                Err(map_kafka_error("publish", self.message_timeout, err))
            }
        }
    }
}

// ============================================================================
// CONSUMER
// ============================================================================

/// Consumer-group member on the order topic.
pub struct KafkaSubscription {
    consumer: StreamConsumer,
    timeout: Duration,
}

impl KafkaSubscription {
    pub fn subscribe(config: &KafkaConfig) -> ChannelResult<Self> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", config.bootstrap_servers())
            .set("group.id", &config.group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .create()
            .map_err(|e| map_kafka_error("create consumer", config.message_timeout, e))?;

        consumer
            .subscribe(&[config.topic.as_str()])
            .map_err(|e| map_kafka_error("subscribe", config.message_timeout, e))?;

        tracing::info!(topic = %config.topic, group_id = %config.group_id, "Subscribed to order topic");
        Ok(Self {
            consumer,
            timeout: config.message_timeout,
        })
    }
}

#[async_trait]
impl MessageSource for KafkaSubscription {
    async fn fetch(&self) -> ChannelResult<InboundMessage> {
        let message = self
            .consumer
            .recv()
            .await
            .map_err(|e| map_kafka_error("fetch", self.timeout, e))?;

        Ok(InboundMessage {
            key: message
                .key()
                .map(|k| String::from_utf8_lossy(k).into_owned()),
            payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
        })
    }

    async fn ack(&self, message: &InboundMessage) -> ChannelResult<()> {
        let mut offsets = TopicPartitionList::new();
        offsets
            .add_partition_offset(
                &message.topic,
                message.partition,
                Offset::Offset(message.offset + 1),
            )
            .map_err(|e| map_kafka_error("ack", self.timeout, e))?;
        self.consumer
            .commit(&offsets, CommitMode::Async)
            .map_err(|e| map_kafka_error("ack", self.timeout, e))
    }
}
