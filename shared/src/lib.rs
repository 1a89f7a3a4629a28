//! Shared domain types for the orderflow services.
//!
//! The `Order` aggregate and its sub-entities as they appear on the wire
//! (Kafka payloads and the HTTP API) and in storage.

pub mod models;

// Re-exports
pub use models::order::{Delivery, Item, Order, Payment, ValidationError};
