//! Worker pool: bounded job channel feeding a fixed set of handler tasks
//!
//! The channel holds `2 * workers` jobs; submission applies backpressure by
//! blocking on a full channel and is interruptible by cancellation. Workers
//! finish the job they are holding before reacting to shutdown.

use std::sync::Arc;
use std::time::Instant;

use rdkafka::message::OwnedMessage;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::HandleError;
use crate::kafka::handler::MessageHandler;
use crate::observability::Metrics;
use crate::service::elapsed_ms;

/// One message plus the channel its outcome is reported on
pub struct Job {
    pub msg: OwnedMessage,
    pub result: oneshot::Sender<Result<(), HandleError>>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubmitError {
    #[error("worker pool is closed")]
    Closed,
    #[error("cancelled while submitting")]
    Cancelled,
}

pub struct WorkerPool {
    jobs: mpsc::Sender<Job>,
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn spawn(
        workers: usize,
        handler: Arc<MessageHandler>,
        metrics: Arc<dyn Metrics>,
        cancel: CancellationToken,
    ) -> Self {
        let workers = workers.max(1);
        let (jobs, rx) = mpsc::channel(workers * 2);
        let rx = Arc::new(Mutex::new(rx));

        let handles = (0..workers)
            .map(|id| {
                tokio::spawn(worker_loop(
                    id,
                    Arc::clone(&rx),
                    Arc::clone(&handler),
                    Arc::clone(&metrics),
                    cancel.clone(),
                ))
            })
            .collect();

        Self {
            jobs,
            cancel,
            handles,
        }
    }

    /// Queue a job, waiting if the pool is saturated
    pub async fn submit(&self, job: Job) -> Result<(), SubmitError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(SubmitError::Cancelled),
            sent = self.jobs.send(job) => sent.map_err(|_| SubmitError::Closed),
        }
    }

    /// Stop accepting jobs and wait for the workers to drain
    pub async fn close(self) {
        drop(self.jobs);
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

async fn worker_loop(
    id: usize,
    rx: Arc<Mutex<mpsc::Receiver<Job>>>,
    handler: Arc<MessageHandler>,
    metrics: Arc<dyn Metrics>,
    cancel: CancellationToken,
) {
    loop {
        let job = {
            let mut rx = rx.lock().await;
            tokio::select! {
                _ = cancel.cancelled() => None,
                job = rx.recv() => job,
            }
        };
        let Some(job) = job else { break };

        let start = Instant::now();
        let result = handler.handle(&job.msg, &cancel).await;
        let dur_ms = elapsed_ms(start);
        metrics.observe_kafka(dur_ms, result.is_ok());
        if let Err(err) = &result {
            tracing::error!(worker = id, error = %err, dur_ms, "message handling failed");
        } else {
            tracing::debug!(worker = id, dur_ms, "message handled");
        }

        // The driver may have given up on this message; nothing to do then.
        let _ = job.result.send(result);
    }
    tracing::debug!(worker = id, "worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex as SyncMutex;
    use rdkafka::Timestamp;
    use std::collections::HashMap;
    use std::time::Duration;

    use crate::breaker::CircuitBreaker;
    use crate::cache::OrderCache;
    use crate::db::OrderStore;
    use crate::error::StoreError;
    use crate::observability::{InMemMetrics, Observation};
    use crate::retry::RetryPolicy;
    use crate::service::OrderService;
    use shared::Order;

    #[derive(Default)]
    struct MemStore {
        orders: SyncMutex<HashMap<String, Order>>,
    }

    #[async_trait]
    impl OrderStore for MemStore {
        async fn upsert(&self, order: &Order) -> Result<(), StoreError> {
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

    fn handler(store: Arc<MemStore>) -> Arc<MessageHandler> {
        let service = Arc::new(OrderService::new(
            Arc::new(OrderCache::new(8)),
            store as Arc<dyn OrderStore>,
            Arc::new(crate::observability::NoopMetrics),
        ));
        let breaker = Arc::new(CircuitBreaker::new(100, Duration::from_secs(10), 3));
        Arc::new(MessageHandler::new(
            service,
            breaker,
            RetryPolicy {
                attempts: 1,
                base: Duration::from_millis(1),
                max: Duration::from_millis(1),
                jitter_factor: 0.0,
            },
        ))
    }

    fn message(uid: &str, offset: i64) -> OwnedMessage {
        OwnedMessage::new(
            Some(format!(r#"{{"order_uid":"{uid}"}}"#).into_bytes()),
            None,
            "orders".to_string(),
            Timestamp::NotAvailable,
            0,
            offset,
            None,
        )
    }

    #[tokio::test]
    async fn jobs_are_processed_and_results_delivered() {
        let store = Arc::new(MemStore::default());
        let metrics = Arc::new(InMemMetrics::new(32));
        let cancel = CancellationToken::new();
        let pool = WorkerPool::spawn(
            2,
            handler(Arc::clone(&store)),
            Arc::clone(&metrics) as Arc<dyn Metrics>,
            cancel.clone(),
        );

        for i in 0..5 {
            let (tx, rx) = oneshot::channel();
            pool.submit(Job {
                msg: message(&format!("order-{i}"), i),
                result: tx,
            })
            .await
            .unwrap();
            assert_eq!(rx.await.unwrap(), Ok(()));
        }

        assert_eq!(store.orders.lock().len(), 5);
        let kafka_obs = metrics
            .recent()
            .into_iter()
            .filter(|o| matches!(o, Observation::Kafka { ok: true, .. }))
            .count();
        assert_eq!(kafka_obs, 5);

        pool.close().await;
    }

    #[tokio::test]
    async fn close_drains_queued_jobs() {
        let store = Arc::new(MemStore::default());
        let cancel = CancellationToken::new();
        let pool = WorkerPool::spawn(
            1,
            handler(Arc::clone(&store)),
            Arc::new(crate::observability::NoopMetrics),
            cancel,
        );

        let mut results = Vec::new();
        for i in 0..3 {
            let (tx, rx) = oneshot::channel();
            pool.submit(Job {
                msg: message(&format!("order-{i}"), i),
                result: tx,
            })
            .await
            .unwrap();
            results.push(rx);
        }

        pool.close().await;
        for rx in results {
            assert_eq!(rx.await.unwrap(), Ok(()));
        }
        assert_eq!(store.orders.lock().len(), 3);
    }

    #[tokio::test]
    async fn cancelled_pool_rejects_submission() {
        let store = Arc::new(MemStore::default());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let pool = WorkerPool::spawn(
            1,
            handler(store),
            Arc::new(crate::observability::NoopMetrics),
            cancel,
        );

        let (tx, _rx) = oneshot::channel();
        let result = pool
            .submit(Job {
                msg: message("x", 0),
                result: tx,
            })
            .await;
        assert_eq!(result, Err(SubmitError::Cancelled));
    }
}
