//! In-memory rolling metrics and Server-Timing helpers
//!
//! The sink keeps a bounded ring of recent observations plus cache hit/miss
//! counters. It is intentionally process-local; anything that needs to leave
//! the process goes through logs instead.

use std::collections::VecDeque;

use axum::http::{HeaderMap, HeaderValue};
use parking_lot::Mutex;

/// Narrow capability set the rest of the service records through
pub trait Metrics: Send + Sync {
    fn observe_lookup(&self, source: &str, cache_ms: f64, db_ms: f64);
    fn observe_upsert(&self, db_write_ms: f64);
    fn observe_http(&self, method: &str, route: &str, status: u16, dur_ms: f64);
    fn observe_kafka(&self, dur_ms: f64, ok: bool);
    fn inc_cache_hit(&self);
    fn inc_cache_miss(&self);
}

/// One recorded event
#[derive(Debug, Clone, PartialEq)]
pub enum Observation {
    Lookup {
        source: String,
        cache_ms: f64,
        db_ms: f64,
    },
    Upsert {
        db_write_ms: f64,
    },
    Http {
        method: String,
        route: String,
        status: u16,
        dur_ms: f64,
    },
    Kafka {
        dur_ms: f64,
        ok: bool,
    },
}

#[derive(Default)]
struct Inner {
    last: VecDeque<Observation>,
    cache_hits: u64,
    cache_misses: u64,
}

/// Bounded ring of recent observations; overflow discards the oldest
pub struct InMemMetrics {
    max: usize,
    inner: Mutex<Inner>,
}

impl InMemMetrics {
    pub fn new(max: usize) -> Self {
        Self {
            max: max.max(1),
            inner: Mutex::new(Inner::default()),
        }
    }

    fn push(&self, observation: Observation) {
        let mut inner = self.inner.lock();
        if inner.last.len() == self.max {
            inner.last.pop_front();
        }
        inner.last.push_back(observation);
    }

    /// Snapshot of the ring, oldest first
    pub fn recent(&self) -> Vec<Observation> {
        self.inner.lock().last.iter().cloned().collect()
    }

    /// (hits, misses)
    pub fn cache_counters(&self) -> (u64, u64) {
        let inner = self.inner.lock();
        (inner.cache_hits, inner.cache_misses)
    }
}

impl Metrics for InMemMetrics {
    fn observe_lookup(&self, source: &str, cache_ms: f64, db_ms: f64) {
        self.push(Observation::Lookup {
            source: source.to_string(),
            cache_ms,
            db_ms,
        });
    }

    fn observe_upsert(&self, db_write_ms: f64) {
        self.push(Observation::Upsert { db_write_ms });
    }

    fn observe_http(&self, method: &str, route: &str, status: u16, dur_ms: f64) {
        self.push(Observation::Http {
            method: method.to_string(),
            route: route.to_string(),
            status,
            dur_ms,
        });
    }

    fn observe_kafka(&self, dur_ms: f64, ok: bool) {
        self.push(Observation::Kafka { dur_ms, ok });
    }

    fn inc_cache_hit(&self) {
        self.inner.lock().cache_hits += 1;
    }

    fn inc_cache_miss(&self) {
        self.inner.lock().cache_misses += 1;
    }
}

/// Discards everything; used in tests
pub struct NoopMetrics;

impl Metrics for NoopMetrics {
    fn observe_lookup(&self, _source: &str, _cache_ms: f64, _db_ms: f64) {}
    fn observe_upsert(&self, _db_write_ms: f64) {}
    fn observe_http(&self, _method: &str, _route: &str, _status: u16, _dur_ms: f64) {}
    fn observe_kafka(&self, _dur_ms: f64, _ok: bool) {}
    fn inc_cache_hit(&self) {}
    fn inc_cache_miss(&self) {}
}

/// Append a `Server-Timing` entry; entries with neither a positive duration
/// nor a description are dropped.
pub fn append_server_timing(headers: &mut HeaderMap, name: &str, dur_ms: f64, desc: &str) {
    let value = if dur_ms > 0.0 && !desc.is_empty() {
        format!("{name};dur={dur_ms:.2};desc=\"{desc}\"")
    } else if dur_ms > 0.0 {
        format!("{name};dur={dur_ms:.2}")
    } else if !desc.is_empty() {
        format!("{name};desc=\"{desc}\"")
    } else {
        return;
    };
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.append("Server-Timing", value);
    }
}

/// Set a millisecond header only when the duration is positive
pub fn set_if_pos(headers: &mut HeaderMap, key: &'static str, ms: f64) {
    if ms > 0.0 {
        if let Ok(value) = HeaderValue::from_str(&format!("{ms:.2}")) {
            headers.insert(key, value);
        }
    }
}
