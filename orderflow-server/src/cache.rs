//! Bounded LRU cache over the order aggregate
//!
//! The cache is a strict subset of storage and never authoritative: entries
//! appear on read-miss fill, warm-up, and successful upsert, and are evicted
//! by capacity pressure only.

use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;
use shared::Order;

use crate::db::OrderStore;

pub struct OrderCache {
    capacity: usize,
    // Both reads and writes reorder the LRU list, so a single lock guards it.
    inner: Mutex<LruCache<String, Order>>,
}

impl OrderCache {
    /// Capacity is clamped to at least 1; config validation rejects
    /// non-positive capacities before this is reached.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let bound = NonZeroUsize::new(capacity).expect("capacity clamped to at least 1");
        Self {
            capacity,
            inner: Mutex::new(LruCache::new(bound)),
        }
    }

    /// Lookup by uid; a hit promotes the entry to most-recently-used
    pub fn get(&self, uid: &str) -> Option<Order> {
        self.inner.lock().get(uid).cloned()
    }

    /// Insert or overwrite by `order.order_uid`, evicting the LRU entry on
    /// capacity pressure
    pub fn set(&self, order: &Order) {
        self.inner
            .lock()
            .put(order.order_uid.clone(), order.clone());
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Pre-populate with the most recent orders from storage.
    ///
    /// Individual lookup failures are logged and skipped; a failure of the id
    /// query aborts warm-up without failing bootstrap.
    pub async fn warm(&self, store: &dyn OrderStore) {
        let ids = match store.recent_order_ids(self.capacity as i64).await {
            Ok(ids) => ids,
            Err(err) => {
                tracing::warn!(error = %err, "cache warm-up skipped");
                return;
            }
        };
        for id in ids {
            match store.get_by_uid(&id).await {
                Ok(order) => self.set(&order),
                Err(err) => {
                    tracing::warn!(order_uid = %id, error = %err, "skipping order during warm-up")
                }
            }
        }
        tracing::info!(entries = self.len(), "cache warmed");
    }
}
