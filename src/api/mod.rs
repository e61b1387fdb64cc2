//! API routes and handlers
//!
//! This module defines the HTTP endpoints and the WebSocket upgrade handler.

use axum::{routing::get, Router};

use crate::AppState;

mod health;
mod users;
pub mod ws;

pub use health::*;
pub use users::{AnnouncementRequest, AnnouncementResponse, OnlineUsersResponse};

/// HTTP API routes, nested under `/api/v1`
pub fn routes() -> Router<AppState> {
    Router::new()
        // Health check endpoints
        .route("/health", get(health::health_check))
        .route("/health/detailed", get(health::health_check_detailed))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        // Presence and announcements
        .merge(users::routes())
}
