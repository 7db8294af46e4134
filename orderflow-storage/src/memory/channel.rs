//! In-memory message broker with per-topic logs and acknowledgements.

use async_trait::async_trait;
use orderflow_core::{ChannelError, ChannelResult};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};

use crate::traits::{InboundMessage, MessageSource, OrderChannel};

#[derive(Debug, Default)]
struct TopicLog {
    messages: Vec<InboundMessage>,
    acked: BTreeSet<i64>,
}

#[derive(Debug, Default)]
struct BrokerState {
    topics: HashMap<String, TopicLog>,
    unavailable: bool,
}

/// Single-partition broker shared by publishers and subscriptions.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    notify: Arc<Notify>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publisher(&self, topic: impl Into<String>) -> InMemoryPublisher {
        InMemoryPublisher {
            broker: self.clone(),
            topic: topic.into(),
        }
    }

    /// Subscribe from the first unacknowledged offset, as a restarted
    /// consumer group would.
    pub async fn subscribe(&self, topic: impl Into<String>) -> InMemorySubscription {
        let topic = topic.into();
        let state = self.state.lock().await;
        let cursor = state
            .topics
            .get(&topic)
            .map(|log| {
                (0..log.messages.len() as i64)
                    .find(|offset| !log.acked.contains(offset))
                    .unwrap_or(log.messages.len() as i64)
            })
            .unwrap_or(0);
        InMemorySubscription {
            broker: self.clone(),
            topic,
            cursor: Arc::new(Mutex::new(cursor)),
        }
    }

    /// Make publishing fail with `ChannelError::Unavailable`.
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().await.unavailable = unavailable;
    }

    /// Append a message without going through a publisher, e.g. raw garbage.
    pub async fn inject(&self, topic: &str, key: Option<&str>, payload: &[u8]) -> i64 {
        let offset = {
            let mut state = self.state.lock().await;
            let log = state.topics.entry(topic.to_string()).or_default();
            let offset = log.messages.len() as i64;
            log.messages.push(InboundMessage {
                key: key.map(str::to_string),
                payload: payload.to_vec(),
                topic: topic.to_string(),
                partition: 0,
                offset,
            });
            offset
        };
        self.notify.notify_waiters();
        offset
    }

    pub async fn messages(&self, topic: &str) -> Vec<InboundMessage> {
        self.state
            .lock()
            .await
            .topics
            .get(topic)
            .map(|log| log.messages.clone())
            .unwrap_or_default()
    }

    pub async fn acked_offsets(&self, topic: &str) -> Vec<i64> {
        self.state
            .lock()
            .await
            .topics
            .get(topic)
            .map(|log| log.acked.iter().copied().collect())
            .unwrap_or_default()
    }
}

/// Publisher bound to one topic.
#[derive(Debug, Clone)]
pub struct InMemoryPublisher {
    broker: InMemoryBroker,
    topic: String,
}

#[async_trait]
impl OrderChannel for InMemoryPublisher {
    async fn publish(&self, key: &str, payload: &[u8]) -> ChannelResult<()> {
        if self.broker.state.lock().await.unavailable {
            return Err(ChannelError::Unavailable {
                reason: format!("broker refused publish to {}", self.topic),
            });
        }
        self.broker.inject(&self.topic, Some(key), payload).await;
        Ok(())
    }
}

/// Sequential reader over one topic.
#[derive(Debug, Clone)]
pub struct InMemorySubscription {
    broker: InMemoryBroker,
    topic: String,
    cursor: Arc<Mutex<i64>>,
}

impl InMemorySubscription {
    async fn try_next(&self) -> Option<InboundMessage> {
        let mut cursor = self.cursor.lock().await;
        let state = self.broker.state.lock().await;
        let message = state
            .topics
            .get(&self.topic)
            .and_then(|log| log.messages.get(*cursor as usize))
            .cloned()?;
        *cursor += 1;
        Some(message)
    }
}

#[async_trait]
impl MessageSource for InMemorySubscription {
    async fn fetch(&self) -> ChannelResult<InboundMessage> {
        loop {
            let notified = self.broker.notify.notified();
            if let Some(message) = self.try_next().await {
                return Ok(message);
            }
            notified.await;
        }
    }

    async fn ack(&self, message: &InboundMessage) -> ChannelResult<()> {
        let mut state = self.broker.state.lock().await;
        let log = state
            .topics
            .get_mut(&message.topic)
            .ok_or_else(|| ChannelError::Unavailable {
                reason: format!("unknown topic {}", message.topic),
            })?;
        log.acked.insert(message.offset);
        Ok(())
    }
}
