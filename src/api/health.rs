//! Health check endpoints
//!
//! Provides health check endpoints for monitoring and load balancers.

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::AppState;

/// Basic health response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Detailed health response with hub status
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailedHealthResponse {
    pub status: String,
    pub version: String,
    pub online_users: usize,
    pub shutting_down: bool,
}

/// Simple health check endpoint (for load balancers)
///
/// Returns 200 OK if the service is running.
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Detailed health check endpoint
///
/// Returns 503 once the hub has started shutting down.
pub async fn health_check_detailed(
    State(state): State<AppState>,
) -> (StatusCode, Json<DetailedHealthResponse>) {
    let shutting_down = state.chat.is_shutting_down();

    let (status_code, status) = if shutting_down {
        (StatusCode::SERVICE_UNAVAILABLE, "shutting_down")
    } else {
        (StatusCode::OK, "healthy")
    };

    let response = DetailedHealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        online_users: state.chat.online_user_count(),
        shutting_down,
    };

    (status_code, Json(response))
}

/// Liveness check (for Kubernetes)
///
/// Returns 200 OK if the process is alive.
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

/// Readiness check (for Kubernetes)
///
/// Returns 200 OK while the hub accepts new connections.
pub async fn readiness(State(state): State<AppState>) -> StatusCode {
    if state.chat.is_shutting_down() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    }
}
