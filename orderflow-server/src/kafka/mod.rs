//! Kafka ingestion stack: consumer driver, worker pool, message handler,
//! and the bootstrap topic-ensure helper

pub mod consumer;
pub mod handler;
pub mod pool;
pub mod topic;

pub use consumer::Consumer;
pub use handler::MessageHandler;
pub use pool::{Job, WorkerPool};
