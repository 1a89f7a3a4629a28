//! Per-message handler: validate, retry the upsert, keep the breaker informed
//!
//! The handler never commits offsets; the consumer treats any error here as
//! "do not commit" and relies on redelivery.

use std::sync::Arc;

use rdkafka::message::{Message, OwnedMessage};
use shared::Order;
use tokio_util::sync::CancellationToken;

use crate::breaker::CircuitBreaker;
use crate::error::HandleError;
use crate::retry::{retry, RetryPolicy};
use crate::service::OrderService;

pub struct MessageHandler {
    service: Arc<OrderService>,
    breaker: Arc<CircuitBreaker>,
    retry_policy: RetryPolicy,
}

impl MessageHandler {
    pub fn new(
        service: Arc<OrderService>,
        breaker: Arc<CircuitBreaker>,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            service,
            breaker,
            retry_policy,
        }
    }

    pub async fn handle(
        &self,
        msg: &OwnedMessage,
        cancel: &CancellationToken,
    ) -> Result<(), HandleError> {
        let partition = msg.partition();
        let offset = msg.offset();

        if self.breaker.allow().is_err() {
            tracing::warn!(partition, offset, "circuit breaker open, skipping message");
            return Err(HandleError::CircuitOpen);
        }

        let payload = msg.payload().unwrap_or_default();
        let order: Order = match serde_json::from_slice(payload) {
            Ok(order) => order,
            Err(err) => {
                tracing::error!(partition, offset, error = %err, "bad json payload");
                self.breaker.failure();
                return Err(HandleError::BadJson);
            }
        };
        if let Err(err) = order.validate() {
            tracing::error!(partition, offset, error = %err, "invalid order payload");
            self.breaker.failure();
            return Err(HandleError::BadJson);
        }

        match retry(&self.retry_policy, cancel, || self.service.upsert(&order)).await {
            Ok(()) => {
                self.breaker.success();
                tracing::info!(
                    order_uid = %order.order_uid,
                    partition,
                    offset,
                    value_bytes = payload.len(),
                    "order processed"
                );
                Ok(())
            }
            Err(err) => {
                tracing::error!(
                    order_uid = %order.order_uid,
                    partition,
                    offset,
                    error = %err,
                    "upsert failed after retries"
                );
                self.breaker.failure();
                Err(HandleError::UpsertFailed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use rdkafka::message::OwnedMessage;
    use rdkafka::Timestamp;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use crate::breaker::BreakerState;
    use crate::cache::OrderCache;
    use crate::db::OrderStore;
    use crate::error::StoreError;
    use crate::observability::NoopMetrics;

    /// Store that fails the first `failures` upserts, then succeeds
    #[derive(Default)]
    struct FlakyStore {
        failures: AtomicU32,
        orders: Mutex<HashMap<String, Order>>,
    }

    #[async_trait]
    impl OrderStore for FlakyStore {
        async fn upsert(&self, order: &Order) -> Result<(), StoreError> {
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(StoreError::Db(sqlx::Error::PoolClosed));
            }
            self.orders
                .lock()
                .insert(order.order_uid.clone(), order.clone());
            Ok(())
        }

        async fn get_by_uid(&self, uid: &str) -> Result<Order, StoreError> {
            self.orders
                .lock()
                .get(uid)
                .cloned()
                .ok_or(StoreError::NotFound)
        }

        async fn recent_order_ids(&self, _limit: i64) -> Result<Vec<String>, StoreError> {
            Ok(Vec::new())
        }
    }

    fn message(value: &[u8]) -> OwnedMessage {
        OwnedMessage::new(
            Some(value.to_vec()),
            None,
            "orders".to_string(),
            Timestamp::NotAvailable,
            0,
            1,
            None,
        )
    }

    fn policy(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            base: Duration::from_millis(1),
            max: Duration::from_millis(2),
            jitter_factor: 0.0,
        }
    }

    fn handler_with(
        store: Arc<FlakyStore>,
        breaker: Arc<CircuitBreaker>,
        attempts: u32,
    ) -> MessageHandler {
        let service = Arc::new(OrderService::new(
            Arc::new(OrderCache::new(8)),
            store as Arc<dyn OrderStore>,
            Arc::new(NoopMetrics),
        ));
        MessageHandler::new(service, breaker, policy(attempts))
    }

    #[tokio::test]
    async fn well_formed_message_is_upserted() {
        let store = Arc::new(FlakyStore::default());
        let breaker = Arc::new(CircuitBreaker::new(5, Duration::from_secs(10), 3));
        let handler = handler_with(Arc::clone(&store), breaker, 1);

        let msg = message(br#"{"order_uid":"A","items":[{"chrt_id":1}]}"#);
        let cancel = CancellationToken::new();
        handler.handle(&msg, &cancel).await.unwrap();

        assert!(store.orders.lock().contains_key("A"));
    }

    #[tokio::test]
    async fn malformed_json_records_breaker_failure() {
        let store = Arc::new(FlakyStore::default());
        let breaker = Arc::new(CircuitBreaker::new(2, Duration::from_secs(10), 1));
        let handler = handler_with(store, Arc::clone(&breaker), 1);
        let cancel = CancellationToken::new();

        let result = handler.handle(&message(br#"{"bad":"#), &cancel).await;
        assert_eq!(result, Err(HandleError::BadJson));

        // Second bad payload trips the threshold of 2.
        let _ = handler.handle(&message(br#"{"bad":"#), &cancel).await;
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[tokio::test]
    async fn missing_order_uid_is_rejected_like_bad_json() {
        let store = Arc::new(FlakyStore::default());
        let breaker = Arc::new(CircuitBreaker::new(5, Duration::from_secs(10), 1));
        let handler = handler_with(Arc::clone(&store), breaker, 1);
        let cancel = CancellationToken::new();

        let result = handler
            .handle(&message(br#"{"track_number":"T"}"#), &cancel)
            .await;
        assert_eq!(result, Err(HandleError::BadJson));
        assert!(store.orders.lock().is_empty());
    }

    #[tokio::test]
    async fn open_breaker_rejects_without_decoding() {
        let store = Arc::new(FlakyStore::default());
        let breaker = Arc::new(CircuitBreaker::new(1, Duration::from_secs(60), 1));
        breaker.failure();
        let handler = handler_with(Arc::clone(&store), breaker, 1);
        let cancel = CancellationToken::new();

        let result = handler.handle(&message(br#"{"order_uid":"A"}"#), &cancel).await;
        assert_eq!(result, Err(HandleError::CircuitOpen));
        assert!(store.orders.lock().is_empty());
    }

    #[tokio::test]
    async fn upsert_flake_recovers_within_retry_budget() {
        let store = Arc::new(FlakyStore::default());
        store.failures.store(2, Ordering::SeqCst);
        let breaker = Arc::new(CircuitBreaker::new(5, Duration::from_secs(10), 3));
        let handler = handler_with(Arc::clone(&store), Arc::clone(&breaker), 5);
        let cancel = CancellationToken::new();

        handler
            .handle(&message(br#"{"order_uid":"A"}"#), &cancel)
            .await
            .unwrap();
        assert!(store.orders.lock().contains_key("A"));
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn exhausted_retries_surface_upsert_failed() {
        let store = Arc::new(FlakyStore::default());
        store.failures.store(10, Ordering::SeqCst);
        let breaker = Arc::new(CircuitBreaker::new(5, Duration::from_secs(10), 3));
        let handler = handler_with(Arc::clone(&store), Arc::clone(&breaker), 2);
        let cancel = CancellationToken::new();

        let result = handler.handle(&message(br#"{"order_uid":"A"}"#), &cancel).await;
        assert_eq!(result, Err(HandleError::UpsertFailed));
        assert!(store.orders.lock().is_empty());
    }

    #[tokio::test]
    async fn breaker_trips_after_consecutive_upsert_failures() {
        let store = Arc::new(FlakyStore::default());
        store.failures.store(100, Ordering::SeqCst);
        let breaker = Arc::new(CircuitBreaker::new(5, Duration::from_secs(60), 3));
        let handler = handler_with(store, Arc::clone(&breaker), 1);
        let cancel = CancellationToken::new();

        for _ in 0..5 {
            let result = handler.handle(&message(br#"{"order_uid":"A"}"#), &cancel).await;
            assert_eq!(result, Err(HandleError::UpsertFailed));
        }
        assert_eq!(breaker.state(), BreakerState::Open);

        // Subsequent messages are rejected before decoding.
        let result = handler.handle(&message(br#"{"order_uid":"B"}"#), &cancel).await;
        assert_eq!(result, Err(HandleError::CircuitOpen));
    }
}
