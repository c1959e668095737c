pub mod health;

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

use crate::AppState;

/// Operational routes: liveness of the stores and the acquisition cycle
pub fn ops_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::get_health))
        .route("/status", get(health::get_status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
