//! Ingestion Worker
//!
//! Consumes order messages one at a time and drives each through
//! decode, dedupe check, persist and cache refresh before acknowledging it.
//! Messages that cannot be persisted are forwarded to the dead-letter topic.
//!
//! # Usage
//!
//! ```ignore
//! let (shutdown_tx, shutdown_rx) = watch::channel(false);
//! let handle = tokio::spawn(async move { worker.run(shutdown_rx).await });
//!
//! // On shutdown
//! let _ = shutdown_tx.send(true);
//! let summary = handle.await?;
//! ```

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::Utc;
use orderflow_core::{Order, OrderflowError, StoreError, Timestamp, DEFAULT_CACHE_TTL};
use orderflow_storage::{
    InboundMessage, InsertOutcome, MessageSource, OrderCache, OrderChannel, OrderRepository,
    RetryPolicy, DEFAULT_RETRY_DELAY,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::Instrument;

use crate::telemetry::OrderflowMetrics;

// ============================================================================
// OUTCOMES
// ============================================================================

/// Terminal state of one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Written to the store and acknowledged.
    Persisted,
    /// Already stored; acknowledged without writing.
    Skipped,
    /// Forwarded to the dead-letter topic and acknowledged.
    DeadLettered,
    /// Shutdown arrived mid-message. Not acknowledged, so it is redelivered.
    Interrupted,
}

impl IngestOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestOutcome::Persisted => "persisted",
            IngestOutcome::Skipped => "skipped",
            IngestOutcome::DeadLettered => "dead_lettered",
            IngestOutcome::Interrupted => "interrupted",
        }
    }
}

/// Message counts over the lifetime of one `run`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub persisted: u64,
    pub skipped: u64,
    pub dead_lettered: u64,
    pub fetch_errors: u64,
}

impl IngestSummary {
    fn record(&mut self, outcome: IngestOutcome) {
        match outcome {
            IngestOutcome::Persisted => self.persisted += 1,
            IngestOutcome::Skipped => self.skipped += 1,
            IngestOutcome::DeadLettered => self.dead_lettered += 1,
            IngestOutcome::Interrupted => {}
        }
    }
}

// ============================================================================
// DEAD-LETTER ENVELOPE
// ============================================================================

/// Value published to the dead-letter topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterEnvelope {
    pub key: String,
    /// Base64 of the original message value, byte for byte.
    pub payload: String,
    pub error: DeadLetterError,
    /// Persist attempts made; 0 when the payload never decoded.
    pub attempts: u32,
    pub source: DeadLetterSource,
    pub failed_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterError {
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterSource {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

impl DeadLetterEnvelope {
    fn new(message: &InboundMessage, error: &OrderflowError, attempts: u32) -> Self {
        Self {
            key: message.key_str().to_string(),
            payload: BASE64.encode(&message.payload),
            error: DeadLetterError {
                kind: error.kind().to_string(),
                message: error.to_string(),
            },
            attempts,
            source: DeadLetterSource {
                topic: message.topic.clone(),
                partition: message.partition,
                offset: message.offset,
            },
            failed_at: Utc::now(),
        }
    }

    /// Original message value.
    pub fn original_payload(&self) -> Result<Vec<u8>, base64::DecodeError> {
        BASE64.decode(&self.payload)
    }
}

// ============================================================================
// WORKER
// ============================================================================

/// Resolves once shutdown is requested or the sender is gone.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Sleep for `delay`. Returns `true` if shutdown cut the sleep short.
async fn pause(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        biased;
        _ = shutdown_requested(shutdown) => true,
        _ = tokio::time::sleep(delay) => false,
    }
}

enum PersistResult {
    Stored(InsertOutcome),
    Failed { error: StoreError, attempts: u32 },
    Interrupted,
}

/// Sequential consumer of the order topic.
pub struct IngestionWorker {
    source: Arc<dyn MessageSource>,
    repo: Arc<dyn OrderRepository>,
    cache: Arc<dyn OrderCache>,
    dead_letter: Arc<dyn OrderChannel>,
    policy: RetryPolicy,
    fetch_retry_delay: Duration,
    metrics: Arc<OrderflowMetrics>,
}

impl IngestionWorker {
    pub fn new(
        source: Arc<dyn MessageSource>,
        repo: Arc<dyn OrderRepository>,
        cache: Arc<dyn OrderCache>,
        dead_letter: Arc<dyn OrderChannel>,
        metrics: Arc<OrderflowMetrics>,
    ) -> Self {
        Self {
            source,
            repo,
            cache,
            dead_letter,
            policy: RetryPolicy::default(),
            fetch_retry_delay: DEFAULT_RETRY_DELAY,
            metrics,
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_fetch_retry_delay(mut self, delay: Duration) -> Self {
        self.fetch_retry_delay = delay;
        self
    }

    /// Consume until shutdown is signalled.
    ///
    /// A message being handled when the signal arrives is finished, unless
    /// the worker is waiting out a retry delay, in which case it is left
    /// unacknowledged.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> IngestSummary {
        let mut summary = IngestSummary::default();

        tracing::info!(
            max_attempts = self.policy.max_attempts,
            retry_delay_ms = self.policy.base_delay.as_millis() as u64,
            "Ingestion worker started"
        );

        loop {
            let fetched = tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown) => break,
                fetched = self.source.fetch() => fetched,
            };

            let message = match fetched {
                Ok(message) => message,
                Err(err) => {
                    tracing::warn!(error = %err, "Failed to fetch message");
                    summary.fetch_errors += 1;
                    if pause(self.fetch_retry_delay, &mut shutdown).await {
                        break;
                    }
                    continue;
                }
            };

            let outcome = self.process(&message, &mut shutdown).await;
            summary.record(outcome);
            if outcome == IngestOutcome::Interrupted {
                break;
            }
        }

        tracing::info!(
            persisted = summary.persisted,
            skipped = summary.skipped,
            dead_lettered = summary.dead_lettered,
            fetch_errors = summary.fetch_errors,
            "Ingestion worker stopped"
        );
        summary
    }

    /// Drive one message to a terminal state and acknowledge it.
    pub async fn process(
        &self,
        message: &InboundMessage,
        shutdown: &mut watch::Receiver<bool>,
    ) -> IngestOutcome {
        let span = tracing::info_span!(
            "ingest",
            key = message.key_str(),
            partition = message.partition,
            offset = message.offset,
        );
        let outcome = self.handle(message, shutdown).instrument(span).await;
        self.metrics.record_ingest_outcome(outcome.as_str());

        if outcome != IngestOutcome::Interrupted {
            if let Err(err) = self.source.ack(message).await {
                tracing::error!(
                    partition = message.partition,
                    offset = message.offset,
                    error = %err,
                    "Failed to acknowledge message"
                );
            }
        }
        outcome
    }

    async fn handle(
        &self,
        message: &InboundMessage,
        shutdown: &mut watch::Receiver<bool>,
    ) -> IngestOutcome {
        let order = match Order::from_json_bytes(&message.payload) {
            Ok(order) => order,
            Err(err) => {
                tracing::warn!(
                    partition = message.partition,
                    offset = message.offset,
                    error = %err,
                    "Undecodable order message"
                );
                let envelope = DeadLetterEnvelope::new(message, &err.into(), 0);
                return self.dead_letter(message, envelope, shutdown).await;
            }
        };

        match self.repo.get_by_id(&order.order_uid).await {
            Ok(_) => {
                tracing::info!(order_uid = %order.order_uid, "Order already stored, skipping");
                return IngestOutcome::Skipped;
            }
            Err(err) if err.is_not_found() => {}
            Err(err) => {
                tracing::warn!(
                    order_uid = %order.order_uid,
                    error = %err,
                    "Dedupe check failed, relying on conflict-safe insert"
                );
            }
        }

        match self.persist(&order, shutdown).await {
            PersistResult::Stored(InsertOutcome::Inserted) => {
                tracing::info!(order_uid = %order.order_uid, items = order.items.len(), "Order stored");
                self.refresh_cache(&order).await;
                IngestOutcome::Persisted
            }
            PersistResult::Stored(InsertOutcome::AlreadyPresent) => {
                tracing::info!(order_uid = %order.order_uid, "Order stored concurrently, skipping");
                IngestOutcome::Skipped
            }
            PersistResult::Failed { error, attempts } => {
                tracing::error!(
                    order_uid = %order.order_uid,
                    attempts,
                    error = %error,
                    "Giving up on order"
                );
                let envelope = DeadLetterEnvelope::new(message, &error.into(), attempts);
                self.dead_letter(message, envelope, shutdown).await
            }
            PersistResult::Interrupted => {
                tracing::info!(
                    order_uid = %order.order_uid,
                    "Shutdown during retry, leaving message for redelivery"
                );
                IngestOutcome::Interrupted
            }
        }
    }

    async fn persist(&self, order: &Order, shutdown: &mut watch::Receiver<bool>) -> PersistResult {
        let mut attempt = 1;
        loop {
            match self.repo.insert(order).await {
                Ok(outcome) => {
                    self.metrics.record_persist_attempt("success");
                    return PersistResult::Stored(outcome);
                }
                Err(error) if error.is_transient() && self.policy.should_retry(attempt) => {
                    self.metrics.record_persist_attempt("transient");
                    let delay = self.policy.delay_after(attempt);
                    tracing::warn!(
                        order_uid = %order.order_uid,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Persist failed, retrying"
                    );
                    if pause(delay, shutdown).await {
                        return PersistResult::Interrupted;
                    }
                    attempt += 1;
                }
                Err(error) => {
                    let result = if error.is_transient() { "transient" } else { "permanent" };
                    self.metrics.record_persist_attempt(result);
                    return PersistResult::Failed {
                        error,
                        attempts: attempt,
                    };
                }
            }
        }
    }

    async fn refresh_cache(&self, order: &Order) {
        let payload = match order.to_json_bytes() {
            Ok(payload) => payload,
            Err(err) => {
                tracing::warn!(order_uid = %order.order_uid, error = %err, "Failed to encode order for cache");
                return;
            }
        };
        if let Err(err) = self.cache.set(order.key(), &payload, DEFAULT_CACHE_TTL).await {
            tracing::warn!(order_uid = %order.order_uid, error = %err, "Cache refresh failed");
        }
    }

    /// Publish to the dead-letter topic, retrying until it is accepted.
    ///
    /// The source message is only acknowledged once its envelope is out, so
    /// a dead-letter outage stalls the worker instead of losing the message.
    async fn dead_letter(
        &self,
        message: &InboundMessage,
        envelope: DeadLetterEnvelope,
        shutdown: &mut watch::Receiver<bool>,
    ) -> IngestOutcome {
        let value = match serde_json::to_vec(&envelope) {
            Ok(value) => value,
            Err(err) => {
                tracing::error!(error = %err, "Failed to encode dead-letter envelope");
                return IngestOutcome::Interrupted;
            }
        };

        loop {
            match self.dead_letter.publish(message.key_str(), &value).await {
                Ok(()) => {
                    tracing::warn!(
                        partition = message.partition,
                        offset = message.offset,
                        kind = %envelope.error.kind,
                        "Message dead-lettered"
                    );
                    return IngestOutcome::DeadLettered;
                }
                Err(err) => {
                    self.metrics.record_dead_letter_publish_failure();
                    tracing::error!(
                        partition = message.partition,
                        offset = message.offset,
                        error = %err,
                        "Dead-letter publish failed"
                    );
                    if pause(self.fetch_retry_delay, shutdown).await {
                        return IngestOutcome::Interrupted;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orderflow_storage::{InMemoryBroker, InMemoryCache, InMemoryOrderRepository, InsertStage};
    use orderflow_test_utils::sample_order;

    const TOPIC: &str = "orders";
    const DLQ: &str = "orders.dead-letter";

    struct Harness {
        broker: InMemoryBroker,
        repo: InMemoryOrderRepository,
        cache: InMemoryCache,
        worker: IngestionWorker,
    }

    async fn harness(policy: RetryPolicy) -> Harness {
        let broker = InMemoryBroker::new();
        let repo = InMemoryOrderRepository::new();
        let cache = InMemoryCache::new();
        let worker = IngestionWorker::new(
            Arc::new(broker.subscribe(TOPIC).await),
            Arc::new(repo.clone()),
            Arc::new(cache.clone()),
            Arc::new(broker.publisher(DLQ)),
            Arc::new(OrderflowMetrics::new().unwrap()),
        )
        .with_retry_policy(policy)
        .with_fetch_retry_delay(Duration::from_millis(10));
        Harness {
            broker,
            repo,
            cache,
            worker,
        }
    }

    async fn next(h: &Harness) -> InboundMessage {
        h.worker.source.fetch().await.unwrap()
    }

    fn unavailable() -> StoreError {
        StoreError::Unavailable {
            reason: "connection reset".into(),
        }
    }

    #[tokio::test]
    async fn test_new_order_is_persisted_cached_and_acked() {
        let h = harness(RetryPolicy::default()).await;
        let order = sample_order("ing-1");
        h.broker
            .inject(TOPIC, Some("ing-1"), &order.to_json_bytes().unwrap())
            .await;
        let (_tx, mut rx) = watch::channel(false);

        let msg = next(&h).await;
        let outcome = h.worker.process(&msg, &mut rx).await;

        assert_eq!(outcome, IngestOutcome::Persisted);
        assert_eq!(h.repo.get_by_id("ing-1").await.unwrap(), order);
        assert!(h.cache.contains("ing-1").await);
        assert_eq!(h.cache.ttl_of("ing-1").await, Some(DEFAULT_CACHE_TTL));
        assert_eq!(h.broker.acked_offsets(TOPIC).await, vec![0]);
    }

    #[tokio::test]
    async fn test_nanosecond_timestamp_is_cached_as_stored() {
        let h = harness(RetryPolicy::default()).await;
        let mut value = serde_json::to_value(sample_order("ing-ns")).unwrap();
        value["date_created"] = "2021-11-26T06:22:19.123456789Z".into();
        h.broker
            .inject(TOPIC, Some("ing-ns"), &serde_json::to_vec(&value).unwrap())
            .await;
        let (_tx, mut rx) = watch::channel(false);

        let msg = next(&h).await;
        assert_eq!(h.worker.process(&msg, &mut rx).await, IngestOutcome::Persisted);

        let stored = h.repo.get_by_id("ing-ns").await.unwrap();
        let cached = h.cache.get("ing-ns").await.unwrap().unwrap();
        assert_eq!(Order::from_json_bytes(&cached).unwrap(), stored);
        assert_eq!(
            stored.date_created.to_rfc3339(),
            "2021-11-26T06:22:19.123456+00:00"
        );
    }

    #[tokio::test]
    async fn test_duplicate_is_skipped_without_insert() {
        let h = harness(RetryPolicy::default()).await;
        let order = sample_order("ing-2");
        h.repo.insert(&order).await.unwrap();
        h.broker
            .inject(TOPIC, Some("ing-2"), &order.to_json_bytes().unwrap())
            .await;
        let (_tx, mut rx) = watch::channel(false);

        let msg = next(&h).await;
        assert_eq!(h.worker.process(&msg, &mut rx).await, IngestOutcome::Skipped);
        assert_eq!(h.repo.insert_calls().await, 1);
        assert_eq!(h.broker.acked_offsets(TOPIC).await, vec![0]);
    }

    #[tokio::test]
    async fn test_failed_dedupe_check_still_persists() {
        let h = harness(RetryPolicy::default()).await;
        let order = sample_order("ing-3");
        h.broker
            .inject(TOPIC, Some("ing-3"), &order.to_json_bytes().unwrap())
            .await;
        h.repo.fail_next_get(unavailable()).await;
        let (_tx, mut rx) = watch::channel(false);

        let msg = next(&h).await;
        assert_eq!(h.worker.process(&msg, &mut rx).await, IngestOutcome::Persisted);
        assert_eq!(h.repo.row_counts().await, (1, 1, 1, 1));
    }

    #[tokio::test]
    async fn test_garbage_goes_to_dead_letter_with_raw_bytes() {
        let h = harness(RetryPolicy::default()).await;
        h.broker.inject(TOPIC, Some("junk"), b"\x00not an order").await;
        let (_tx, mut rx) = watch::channel(false);

        let msg = next(&h).await;
        assert_eq!(h.worker.process(&msg, &mut rx).await, IngestOutcome::DeadLettered);

        let dead = h.broker.messages(DLQ).await;
        assert_eq!(dead.len(), 1);
        let envelope: DeadLetterEnvelope = serde_json::from_slice(&dead[0].payload).unwrap();
        assert_eq!(envelope.key, "junk");
        assert_eq!(envelope.error.kind, "decode");
        assert!(envelope.error.message.starts_with("Malformed order payload"));
        assert_eq!(envelope.attempts, 0);
        assert_eq!(envelope.original_payload().unwrap(), b"\x00not an order".to_vec());
        assert_eq!(envelope.source.topic, TOPIC);
        assert_eq!(envelope.source.offset, 0);
        assert_eq!(h.repo.insert_calls().await, 0);
        assert_eq!(h.broker.acked_offsets(TOPIC).await, vec![0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_recovers_within_budget() {
        let h = harness(RetryPolicy::fixed(3, Duration::from_secs(5))).await;
        let order = sample_order("ing-4");
        h.broker
            .inject(TOPIC, Some("ing-4"), &order.to_json_bytes().unwrap())
            .await;
        h.repo.fail_insert_at(InsertStage::Order, unavailable()).await;
        h.repo.fail_insert_at(InsertStage::Items, unavailable()).await;
        let (_tx, mut rx) = watch::channel(false);

        let msg = next(&h).await;
        assert_eq!(h.worker.process(&msg, &mut rx).await, IngestOutcome::Persisted);
        assert_eq!(h.repo.insert_calls().await, 3);
        assert_eq!(h.repo.row_counts().await, (1, 1, 1, 1));
        assert!(h.broker.messages(DLQ).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_dead_letter_and_ack() {
        let h = harness(RetryPolicy::fixed(3, Duration::from_secs(5))).await;
        let order = sample_order("ing-5");
        h.broker
            .inject(TOPIC, Some("ing-5"), &order.to_json_bytes().unwrap())
            .await;
        for _ in 0..3 {
            h.repo.fail_insert_at(InsertStage::Payment, unavailable()).await;
        }
        let (_tx, mut rx) = watch::channel(false);

        let msg = next(&h).await;
        assert_eq!(h.worker.process(&msg, &mut rx).await, IngestOutcome::DeadLettered);
        assert_eq!(h.repo.insert_calls().await, 3);
        assert_eq!(h.repo.row_counts().await, (0, 0, 0, 0));

        let dead = h.broker.messages(DLQ).await;
        let envelope: DeadLetterEnvelope = serde_json::from_slice(&dead[0].payload).unwrap();
        assert_eq!(envelope.error.kind, "unavailable");
        assert_eq!(envelope.attempts, 3);
        assert_eq!(h.broker.acked_offsets(TOPIC).await, vec![0]);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let h = harness(RetryPolicy::fixed(3, Duration::from_secs(5))).await;
        let order = sample_order("ing-6");
        h.broker
            .inject(TOPIC, Some("ing-6"), &order.to_json_bytes().unwrap())
            .await;
        h.repo
            .fail_insert_at(
                InsertStage::Items,
                StoreError::Rejected {
                    stage: "insert items".into(),
                    reason: "value too long".into(),
                },
            )
            .await;
        let (_tx, mut rx) = watch::channel(false);

        let msg = next(&h).await;
        assert_eq!(h.worker.process(&msg, &mut rx).await, IngestOutcome::DeadLettered);
        assert_eq!(h.repo.insert_calls().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_during_retry_leaves_message_unacked() {
        let h = harness(RetryPolicy::fixed(3, Duration::from_secs(5))).await;
        let order = sample_order("ing-7");
        h.broker
            .inject(TOPIC, Some("ing-7"), &order.to_json_bytes().unwrap())
            .await;
        h.repo.fail_insert_at(InsertStage::Delivery, unavailable()).await;
        let (tx, mut rx) = watch::channel(false);

        let msg = next(&h).await;
        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            let _ = tx.send(true);
        });

        assert_eq!(h.worker.process(&msg, &mut rx).await, IngestOutcome::Interrupted);
        stopper.await.unwrap();
        assert!(h.broker.acked_offsets(TOPIC).await.is_empty());
        assert!(h.broker.messages(DLQ).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dead_letter_outage_blocks_ack() {
        let h = harness(RetryPolicy::default()).await;
        h.broker.inject(TOPIC, Some("junk"), b"{").await;
        h.broker.set_unavailable(true).await;
        let (tx, mut rx) = watch::channel(false);

        let msg = next(&h).await;
        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            let _ = tx.send(true);
        });

        assert_eq!(h.worker.process(&msg, &mut rx).await, IngestOutcome::Interrupted);
        stopper.await.unwrap();
        assert!(h.broker.acked_offsets(TOPIC).await.is_empty());
        assert!(h.worker.metrics.dead_letter_publish_failures_total.get() > 1.0);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let h = harness(RetryPolicy::default()).await;
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();

        let summary = h.worker.run(rx).await;
        assert_eq!(summary, IngestSummary::default());
    }
}
