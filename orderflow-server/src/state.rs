//! Application state shared by the HTTP layer

use std::sync::Arc;

use crate::observability::Metrics;
use crate::service::OrderService;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<OrderService>,
    pub metrics: Arc<dyn Metrics>,
}

impl AppState {
    pub fn new(service: Arc<OrderService>, metrics: Arc<dyn Metrics>) -> Self {
        Self { service, metrics }
    }
}
