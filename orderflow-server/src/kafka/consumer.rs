//! Consumer driver: fetch, dispatch to the pool, await, commit
//!
//! The driver awaits each message's outcome before fetching the next one, so
//! offsets are committed strictly in fetch order per partition. Auto-commit is
//! disabled; a message is committed only after its handler reported success.

use std::sync::Arc;
use std::time::Duration;

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer as _, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::Message;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::config::KafkaConfig;
use crate::kafka::handler::MessageHandler;
use crate::kafka::pool::{Job, WorkerPool};
use crate::observability::Metrics;

/// How long a single fetch may sit idle before we treat it as "no traffic"
const FETCH_IDLE_WINDOW: Duration = Duration::from_secs(10);
/// Backoff after an idle fetch window
const IDLE_BACKOFF: Duration = Duration::from_secs(10);
/// Backoff after a transient fetch error (rebalance, coordinator move, ...)
const FETCH_ERROR_BACKOFF: Duration = Duration::from_millis(500);
/// Backoff after a failed handle or a failed commit
const RESULT_BACKOFF: Duration = Duration::from_millis(200);

pub struct Consumer {
    consumer: StreamConsumer,
    pool: WorkerPool,
    cancel: CancellationToken,
}

impl Consumer {
    pub fn new(
        cfg: &KafkaConfig,
        handler: Arc<MessageHandler>,
        metrics: Arc<dyn Metrics>,
        cancel: CancellationToken,
    ) -> Result<Self, KafkaError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", cfg.brokers.join(","))
            .set("group.id", &cfg.group)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .create()?;
        consumer.subscribe(&[&cfg.topic])?;

        let pool = WorkerPool::spawn(cfg.workers, handler, metrics, cancel.clone());

        Ok(Self {
            consumer,
            pool,
            cancel,
        })
    }

    /// Run the fetch/dispatch/commit loop until cancellation
    pub async fn run(self) {
        tracing::info!("starting kafka consumer");

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let fetched = tokio::select! {
                _ = self.cancel.cancelled() => break,
                fetched = tokio::time::timeout(FETCH_IDLE_WINDOW, self.consumer.recv()) => fetched,
            };
            let msg = match fetched {
                Err(_idle) => {
                    tracing::debug!("no messages within fetch window, backing off");
                    if !self.backoff(IDLE_BACKOFF).await {
                        break;
                    }
                    continue;
                }
                Ok(Err(err)) => {
                    tracing::warn!(error = %err, "fetch error, backing off");
                    if !self.backoff(FETCH_ERROR_BACKOFF).await {
                        break;
                    }
                    continue;
                }
                Ok(Ok(msg)) => msg,
            };
            let partition = msg.partition();
            let offset = msg.offset();

            // Hand the message to the pool and wait for this message's own
            // outcome; that await is what keeps commits in fetch order.
            let (result_tx, result_rx) = oneshot::channel();
            let job = Job {
                msg: msg.detach(),
                result: result_tx,
            };
            if self.pool.submit(job).await.is_err() {
                break;
            }

            let outcome = tokio::select! {
                _ = self.cancel.cancelled() => break,
                outcome = result_rx => outcome,
            };
            // A dropped result channel means the pool is shutting down.
            let Ok(outcome) = outcome else { break };

            if let Err(err) = outcome {
                tracing::error!(
                    error = %err,
                    partition,
                    offset,
                    "handler failed, message will not be committed"
                );
                if !self.backoff(RESULT_BACKOFF).await {
                    break;
                }
                continue;
            }

            if let Err(err) = self.consumer.commit_message(&msg, CommitMode::Sync) {
                // The next successful commit subsumes this offset.
                tracing::warn!(error = %err, partition, offset, "commit failed");
                if !self.backoff(RESULT_BACKOFF).await {
                    break;
                }
                continue;
            }
            tracing::debug!(partition, offset, "message committed");
        }

        tracing::info!("kafka consumer stopping, draining workers");
        self.pool.close().await;
    }

    /// Cancellable sleep; returns false when cancelled
    async fn backoff(&self, wait: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(wait) => true,
        }
    }
}
