//! orderflow-server — order ingestion and lookup service
//!
//! Long-running binary that:
//! - Consumes order records from Kafka with per-partition commit ordering
//! - Persists each order via a transactional multi-table upsert in Postgres
//! - Serves orders over HTTP from a warm LRU cache

use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;

use orderflow_server::api;
use orderflow_server::breaker::CircuitBreaker;
use orderflow_server::cache::OrderCache;
use orderflow_server::config::Config;
use orderflow_server::db::{OrderRepo, OrderStore};
use orderflow_server::kafka::{self, Consumer, MessageHandler};
use orderflow_server::observability::{InMemMetrics, Metrics};
use orderflow_server::service::OrderService;
use orderflow_server::state::AppState;

/// Topic layout used when the topic has to be created at bootstrap
const TOPIC_PARTITIONS: i32 = 3;
const TOPIC_REPLICATION: i32 = 1;
/// Observation ring size
const METRICS_CAPACITY: usize = 1024;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    // Load .env file
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "orderflow_server=info,tower_http=info".into()),
        )
        .init();

    let config = Config::from_env()?;
    tracing::info!("starting orderflow-server");

    // Postgres pool; an unreachable database is a bootstrap failure
    let pool = PgPoolOptions::new()
        .connect_with(config.pg.connect_options())
        .await?;

    let store: Arc<dyn OrderStore> =
        Arc::new(OrderRepo::new(pool.clone(), config.tables.clone()));
    let metrics: Arc<dyn Metrics> = Arc::new(InMemMetrics::new(METRICS_CAPACITY));

    // Warm the cache from storage before the consumer starts
    let cache = Arc::new(OrderCache::new(config.cache_cap));
    cache.warm(store.as_ref()).await;

    kafka::topic::ensure_topic(
        &config.kafka.brokers,
        &config.kafka.topic,
        TOPIC_PARTITIONS,
        TOPIC_REPLICATION,
    )
    .await?;

    let service = Arc::new(OrderService::new(
        Arc::clone(&cache),
        Arc::clone(&store),
        Arc::clone(&metrics),
    ));
    let breaker = Arc::new(CircuitBreaker::new(
        config.breaker.threshold,
        config.breaker.open_timeout,
        config.breaker.max_half_open,
    ));
    let handler = Arc::new(MessageHandler::new(
        Arc::clone(&service),
        breaker,
        config.retry.clone(),
    ));

    let cancel = CancellationToken::new();
    let consumer = Consumer::new(
        &config.kafka,
        handler,
        Arc::clone(&metrics),
        cancel.clone(),
    )?;
    let consumer_task = tokio::spawn(consumer.run());

    let state = AppState::new(service, metrics);
    let app = api::create_router(state);

    let addr = config.listen_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "http server listening");

    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("shutdown signal received");
        signal_cancel.cancel();
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(cancel.clone().cancelled_owned())
        .await?;

    // The token also unwinds the consumer; wait for it to drain
    cancel.cancel();
    consumer_task.await?;
    pool.close().await;

    tracing::info!("shutdown complete");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
