//! Chathub Library
//!
//! This crate provides a real-time chat hub: a WebSocket endpoint that keeps a
//! registry of connected users and fans chat messages and presence events out
//! to all of them, plus a reconnecting client for the same protocol.

use std::sync::Arc;

use axum::{routing::get, Router};
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, Level};

pub mod api;
pub mod client;
pub mod config;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

pub use config::AppConfig;
pub use services::ChatService;

use middleware::{RateLimitConfig, RateLimitState};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: AppConfig,
    /// Connection registry and fan-out
    pub chat: Arc<ChatService>,
    /// Per-IP WebSocket handshake limiter
    pub rate_limit: RateLimitState,
    /// Cancelled when the server begins shutting down
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        let rate_limit = RateLimitState::new(RateLimitConfig::from(&config.rate_limit));
        Self {
            config,
            chat: Arc::new(ChatService::new()),
            rate_limit,
            shutdown: CancellationToken::new(),
        }
    }

    /// Stop accepting chat traffic and close every connection
    pub fn begin_shutdown(&self) {
        info!("Shutting down chat hub");
        // Close frames must be queued before receive loops wake up and unregister
        self.chat.cleanup_all_connections();
        self.shutdown.cancel();
    }
}

/// Create the application router with all routes and middleware
pub fn create_router(state: AppState) -> Router {
    // Browser clients are often served from another origin
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    let mut ws_router = Router::new().route(&state.config.server.ws_path, get(api::ws::ws_handler));
    if state.config.rate_limit.enabled {
        ws_router = ws_router.layer(axum::middleware::from_fn_with_state(
            state.rate_limit.clone(),
            middleware::rate_limit_middleware,
        ));
    }

    Router::new()
        .nest("/api/v1", api::routes())
        .merge(ws_router)
        .with_state(state)
        .layer(trace_layer)
        .layer(cors)
}
