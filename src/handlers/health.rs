use axum::{extract::State, http::StatusCode, Json};

use crate::{
    models::ops::{HealthResponse, StatusResponse, StoreHealthEntry},
    AppState,
};

/// Handler for GET /health
/// Reports reachability of the primary store and every shard
pub async fn get_health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let stores = state.store.health().await;

    let all_healthy = stores.iter().all(|s| s.healthy);
    if !all_healthy {
        tracing::warn!(
            unhealthy = ?stores.iter().filter(|s| !s.healthy).map(|s| s.name.as_str()).collect::<Vec<_>>(),
            "Health check found unreachable stores"
        );
    }

    let status = if all_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(HealthResponse {
            status: if all_healthy { "ok" } else { "degraded" }.to_string(),
            stores: stores
                .into_iter()
                .map(|s| StoreHealthEntry {
                    name: s.name,
                    healthy: s.healthy,
                })
                .collect(),
        }),
    )
}

/// Handler for GET /status
pub async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        cycle_running: state.engine.is_running(),
        last_cycle: state.engine.last_report(),
    })
}
