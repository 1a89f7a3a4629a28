//! orderflow-server — order ingestion and lookup service
//!
//! Long-running service that:
//! - Consumes order records from a partitioned Kafka topic with per-partition
//!   offset commit ordering
//! - Persists each order through a transactional multi-table upsert
//! - Serves orders over HTTP from a bounded LRU cache backed by Postgres

pub mod api;
pub mod breaker;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod kafka;
pub mod observability;
pub mod retry;
pub mod service;
pub mod state;
