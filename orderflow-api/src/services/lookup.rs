//! Lookup Service
//!
//! Cache-aside reads over the durable store. The cache is never
//! authoritative: unreadable entries are evicted and rebuilt from the store,
//! and cache failures only cost latency.

use orderflow_core::{LookupError, Order, DEFAULT_CACHE_TTL};
use orderflow_storage::{OrderCache, OrderRepository};
use std::sync::Arc;

use crate::telemetry::{CacheLookup, OrderflowMetrics};

pub struct LookupService {
    repo: Arc<dyn OrderRepository>,
    cache: Arc<dyn OrderCache>,
    metrics: Arc<OrderflowMetrics>,
}

impl LookupService {
    pub fn new(
        repo: Arc<dyn OrderRepository>,
        cache: Arc<dyn OrderCache>,
        metrics: Arc<OrderflowMetrics>,
    ) -> Self {
        Self {
            repo,
            cache,
            metrics,
        }
    }

    /// Fetch an order by identifier.
    ///
    /// # Errors
    /// `LookupError::NotFound` when the store has no such order, and
    /// `LookupError::Store` for any other store failure.
    pub async fn get_order(&self, order_uid: &str) -> Result<Order, LookupError> {
        if let Some(order) = self.read_cache(order_uid).await {
            return Ok(order);
        }

        let order = self.repo.get_by_id(order_uid).await.map_err(|err| {
            if !err.is_not_found() {
                tracing::error!(order_uid, error = %err, "Order lookup failed");
            }
            LookupError::from(err)
        })?;

        self.refill_cache(&order).await;
        Ok(order)
    }

    async fn read_cache(&self, order_uid: &str) -> Option<Order> {
        let bytes = match self.cache.get(order_uid).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                self.metrics.record_cache_lookup(CacheLookup::Miss);
                return None;
            }
            Err(err) => {
                tracing::warn!(order_uid, error = %err, "Cache read failed, using store");
                self.metrics.record_cache_lookup(CacheLookup::Error);
                return None;
            }
        };

        match Order::from_json_bytes(&bytes) {
            Ok(order) => {
                self.metrics.record_cache_lookup(CacheLookup::Hit);
                Some(order)
            }
            Err(err) => {
                tracing::warn!(order_uid, error = %err, "Evicting corrupt cache entry");
                self.metrics.record_cache_lookup(CacheLookup::Corrupt);
                if let Err(err) = self.cache.delete(order_uid).await {
                    tracing::warn!(order_uid, error = %err, "Failed to evict corrupt cache entry");
                }
                None
            }
        }
    }

    async fn refill_cache(&self, order: &Order) {
        let payload = match order.to_json_bytes() {
            Ok(payload) => payload,
            Err(err) => {
                tracing::warn!(order_uid = %order.order_uid, error = %err, "Failed to encode order for cache");
                return;
            }
        };
        if let Err(err) = self.cache.set(order.key(), &payload, DEFAULT_CACHE_TTL).await {
            tracing::warn!(order_uid = %order.order_uid, error = %err, "Cache refill failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orderflow_core::StoreError;
    use orderflow_storage::{InMemoryCache, InMemoryOrderRepository};
    use orderflow_test_utils::sample_order;

    struct Harness {
        repo: InMemoryOrderRepository,
        cache: InMemoryCache,
        service: LookupService,
    }

    fn harness() -> Harness {
        let repo = InMemoryOrderRepository::new();
        let cache = InMemoryCache::new();
        let service = LookupService::new(
            Arc::new(repo.clone()),
            Arc::new(cache.clone()),
            Arc::new(OrderflowMetrics::new().unwrap()),
        );
        Harness {
            repo,
            cache,
            service,
        }
    }

    #[tokio::test]
    async fn test_miss_reads_store_and_refills_cache() {
        let h = harness();
        let order = sample_order("look-1");
        h.repo.insert(&order).await.unwrap();

        let found = h.service.get_order("look-1").await.unwrap();
        assert_eq!(found, order);
        assert!(h.cache.contains("look-1").await);
        assert_eq!(h.cache.ttl_of("look-1").await, Some(DEFAULT_CACHE_TTL));
    }

    #[tokio::test]
    async fn test_hit_skips_store() {
        let h = harness();
        let order = sample_order("look-2");
        h.cache
            .seed("look-2", &order.to_json_bytes().unwrap(), DEFAULT_CACHE_TTL)
            .await;

        let found = h.service.get_order("look-2").await.unwrap();
        assert_eq!(found, order);
        assert_eq!(h.repo.get_calls().await, 0);
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_replaced() {
        let h = harness();
        let order = sample_order("look-3");
        h.repo.insert(&order).await.unwrap();
        h.cache.seed("look-3", b"{not json", DEFAULT_CACHE_TTL).await;

        let found = h.service.get_order("look-3").await.unwrap();
        assert_eq!(found, order);
        assert_eq!(h.cache.deleted_keys().await, vec!["look-3".to_string()]);

        let cached = h.cache.get("look-3").await.unwrap().unwrap();
        assert_eq!(Order::from_json_bytes(&cached).unwrap(), order);
    }

    #[tokio::test]
    async fn test_not_found_is_distinct() {
        let h = harness();
        let err = h.service.get_order("missing").await.unwrap_err();
        assert_eq!(
            err,
            LookupError::NotFound {
                order_uid: "missing".into()
            }
        );
        assert!(!h.cache.contains("missing").await);
    }

    #[tokio::test]
    async fn test_store_failure_surfaces_as_lookup_error() {
        let h = harness();
        h.repo
            .fail_next_get(StoreError::Unavailable {
                reason: "pool timed out".into(),
            })
            .await;

        let err = h.service.get_order("look-4").await.unwrap_err();
        assert!(matches!(err, LookupError::Store(StoreError::Unavailable { .. })));
    }

    #[tokio::test]
    async fn test_cache_outage_falls_back_to_store() {
        let h = harness();
        let order = sample_order("look-5");
        h.repo.insert(&order).await.unwrap();
        h.cache.set_unavailable(true).await;

        let found = h.service.get_order("look-5").await.unwrap();
        assert_eq!(found, order);
        assert_eq!(h.repo.get_calls().await, 1);
    }
}
