//! Submission Service
//!
//! Validates an order and hands it to the message channel. Persistence
//! happens later, on the ingestion side.

use orderflow_core::{Order, OrderValidator, SubmitError};
use orderflow_storage::OrderChannel;
use std::sync::Arc;

use crate::telemetry::OrderflowMetrics;

pub struct SubmissionService {
    validator: OrderValidator,
    channel: Arc<dyn OrderChannel>,
    metrics: Arc<OrderflowMetrics>,
}

impl SubmissionService {
    pub fn new(
        validator: OrderValidator,
        channel: Arc<dyn OrderChannel>,
        metrics: Arc<OrderflowMetrics>,
    ) -> Self {
        Self {
            validator,
            channel,
            metrics,
        }
    }

    /// Validate and publish one order, keyed by its `order_uid`.
    ///
    /// Returns once the broker acknowledged the message. On any error nothing
    /// has been published.
    pub async fn create_order(&self, order: &Order) -> Result<(), SubmitError> {
        if let Err(err) = self.validator.validate(order) {
            tracing::debug!(
                order_uid = %order.order_uid,
                violations = err.violations.len(),
                "Rejected invalid order"
            );
            self.metrics.record_submission("invalid");
            return Err(err.into());
        }

        let payload = order.to_json_bytes().map_err(|e| {
            self.metrics.record_submission("error");
            SubmitError::Encode {
                reason: e.to_string(),
            }
        })?;

        if let Err(err) = self.channel.publish(order.key(), &payload).await {
            tracing::warn!(
                order_uid = %order.order_uid,
                error = %err,
                "Failed to publish order"
            );
            self.metrics.record_submission("unavailable");
            return Err(SubmitError::ChannelUnavailable(err));
        }

        tracing::info!(order_uid = %order.order_uid, "Order accepted");
        self.metrics.record_submission("accepted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orderflow_storage::InMemoryBroker;
    use orderflow_test_utils::sample_order;

    const TOPIC: &str = "orders";

    fn service(broker: &InMemoryBroker) -> SubmissionService {
        SubmissionService::new(
            OrderValidator::new().unwrap(),
            Arc::new(broker.publisher(TOPIC)),
            Arc::new(OrderflowMetrics::new().unwrap()),
        )
    }

    #[tokio::test]
    async fn test_valid_order_published_once_keyed_by_uid() {
        let broker = InMemoryBroker::new();
        let order = sample_order("sub-1");

        service(&broker).create_order(&order).await.unwrap();

        let messages = broker.messages(TOPIC).await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].key.as_deref(), Some("sub-1"));
        assert_eq!(Order::from_json_bytes(&messages[0].payload).unwrap(), order);
    }

    #[tokio::test]
    async fn test_invalid_order_is_not_published() {
        let broker = InMemoryBroker::new();
        let mut order = sample_order("sub-2");
        order.delivery.email = "testgmail.com".to_string();
        order.items.clear();

        let err = service(&broker).create_order(&order).await.unwrap_err();
        match err {
            SubmitError::Validation(v) => {
                assert!(v.has_field("delivery.email"));
                assert!(v.has_field("items"));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
        assert!(broker.messages(TOPIC).await.is_empty());
    }

    #[tokio::test]
    async fn test_unavailable_channel_rejects_submission() {
        let broker = InMemoryBroker::new();
        broker.set_unavailable(true).await;

        let err = service(&broker)
            .create_order(&sample_order("sub-3"))
            .await
            .unwrap_err();
        assert!(matches!(err, SubmitError::ChannelUnavailable(_)));

        broker.set_unavailable(false).await;
        assert!(broker.messages(TOPIC).await.is_empty());
    }
}
