//! Order service: cache-fronted reads and write-through upserts
//!
//! The service is the only component that touches both the cache and the
//! store, which keeps the "cache is a subset of storage" invariant in one
//! place: entries are written to the cache only after storage accepted them.

use std::sync::Arc;
use std::time::Instant;

use shared::Order;

use crate::cache::OrderCache;
use crate::db::OrderStore;
use crate::error::StoreError;
use crate::observability::Metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Cache,
    Db,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Cache => "cache",
            Source::Db => "db",
        }
    }
}

/// Timings gathered during a read
#[derive(Debug, Clone, Copy)]
pub struct LookupStats {
    pub source: Source,
    pub cache_ms: f64,
    pub db_ms: f64,
}

/// Timings gathered during a write
#[derive(Debug, Clone, Copy, Default)]
pub struct UpsertStats {
    pub db_write_ms: f64,
}

pub struct OrderService {
    cache: Arc<OrderCache>,
    store: Arc<dyn OrderStore>,
    metrics: Arc<dyn Metrics>,
}

impl OrderService {
    pub fn new(
        cache: Arc<OrderCache>,
        store: Arc<dyn OrderStore>,
        metrics: Arc<dyn Metrics>,
    ) -> Self {
        Self {
            cache,
            store,
            metrics,
        }
    }

    pub async fn upsert(&self, order: &Order) -> Result<(), StoreError> {
        self.upsert_with_stats(order).await.map(|_| ())
    }

    pub async fn upsert_with_stats(&self, order: &Order) -> Result<UpsertStats, StoreError> {
        let start = Instant::now();
        self.store.upsert(order).await.map_err(|err| {
            tracing::error!(order_uid = %order.order_uid, error = %err, "order upsert failed");
            err
        })?;
        let stats = UpsertStats {
            db_write_ms: elapsed_ms(start),
        };

        self.cache.set(order);

        self.metrics.observe_upsert(stats.db_write_ms);
        tracing::info!(
            order_uid = %order.order_uid,
            db_write_ms = stats.db_write_ms,
            "order upserted"
        );
        Ok(stats)
    }

    pub async fn get_by_uid(&self, uid: &str) -> Result<Order, StoreError> {
        self.get_by_uid_with_stats(uid).await.map(|(order, _)| order)
    }

    pub async fn get_by_uid_with_stats(
        &self,
        uid: &str,
    ) -> Result<(Order, LookupStats), StoreError> {
        let cache_start = Instant::now();
        if let Some(order) = self.cache.get(uid) {
            let stats = LookupStats {
                source: Source::Cache,
                cache_ms: elapsed_ms(cache_start),
                db_ms: 0.0,
            };
            self.metrics.inc_cache_hit();
            self.metrics
                .observe_lookup(stats.source.as_str(), stats.cache_ms, 0.0);
            tracing::debug!(order_uid = %uid, cache_ms = stats.cache_ms, "order fetched from cache");
            return Ok((order, stats));
        }

        self.metrics.inc_cache_miss();
        let cache_ms = elapsed_ms(cache_start);

        let db_start = Instant::now();
        let order = self.store.get_by_uid(uid).await?;
        let stats = LookupStats {
            source: Source::Db,
            cache_ms,
            db_ms: elapsed_ms(db_start),
        };

        self.cache.set(&order);

        self.metrics
            .observe_lookup(stats.source.as_str(), stats.cache_ms, stats.db_ms);
        tracing::debug!(
            order_uid = %uid,
            cache_ms = stats.cache_ms,
            db_ms = stats.db_ms,
            "order fetched from db"
        );
        Ok((order, stats))
    }
}

pub(crate) fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}
