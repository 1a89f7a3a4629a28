//! HTTP API for order lookup and submission

pub mod health;
pub mod middleware;
pub mod order;

use std::path::PathBuf;

use axum::middleware as axum_middleware;
use axum::routing::get;
use axum::Router;
use tower_http::services::ServeDir;

use crate::state::AppState;

/// Build the router: the order API plus static file fallback
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route(
            "/order/",
            get(order::missing_order_id).post(order::upsert_order),
        )
        .route("/order/{uid}", get(order::get_order))
        .fallback_service(ServeDir::new(static_dir()))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::server_timing,
        ))
        .with_state(state)
}

/// Static assets live in a `static` directory next to the executable
fn static_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join("static")))
        .unwrap_or_else(|| PathBuf::from("static"))
}
