//! Request timing middleware
//!
//! Wraps every request, stamps `Server-Timing: app;dur=…` on the response,
//! and publishes an HTTP observation keyed by the matched route.

use std::time::Instant;

use axum::extract::{MatchedPath, Request, State};
use axum::middleware::Next;
use axum::response::Response;

use crate::observability::append_server_timing;
use crate::service::elapsed_ms;
use crate::state::AppState;

pub async fn server_timing(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());

    let mut response = next.run(req).await;

    let dur_ms = elapsed_ms(start);
    append_server_timing(response.headers_mut(), "app", dur_ms, "");
    state
        .metrics
        .observe_http(method.as_str(), &route, response.status().as_u16(), dur_ms);
    response
}
