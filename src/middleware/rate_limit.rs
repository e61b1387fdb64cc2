//! Rate limiting middleware
//!
//! Limits how fast a single client IP can open WebSocket connections.
//! Uses the governor crate with a keyed rate limiter.

use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use std::{
    net::{IpAddr, SocketAddr},
    num::NonZeroU32,
    sync::Arc,
    time::Duration,
};
use tracing::{debug, warn};

use crate::config::RateLimitSettings;
use crate::utils::AppError;

/// Rate limiter configuration
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Sustained handshakes allowed per second
    pub requests_per_second: u32,
    /// Burst capacity (maximum handshakes allowed at once)
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 5,
            burst_size: 20,
        }
    }
}

impl From<&RateLimitSettings> for RateLimitConfig {
    fn from(settings: &RateLimitSettings) -> Self {
        Self {
            requests_per_second: settings.connections_per_second,
            burst_size: settings.burst_size,
        }
    }
}

/// Shared per-IP limiter
#[derive(Clone)]
pub struct RateLimitState {
    limiter: Arc<DefaultKeyedRateLimiter<IpAddr>>,
}

impl RateLimitState {
    /// Create a new rate limit state with the given configuration
    pub fn new(config: RateLimitConfig) -> Self {
        let quota = Quota::per_second(
            NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN),
        )
        .allow_burst(NonZeroU32::new(config.burst_size).unwrap_or(NonZeroU32::MIN));

        Self {
            limiter: Arc::new(RateLimiter::keyed(quota)),
        }
    }

    /// Whether another handshake from `ip` is allowed right now
    pub fn check(&self, ip: IpAddr) -> bool {
        self.limiter.check_key(&ip).is_ok()
    }

    /// Forget IPs whose quota has fully replenished
    pub fn cleanup(&self) {
        let before = self.limiter.len();
        self.limiter.retain_recent();
        self.limiter.shrink_to_fit();
        debug!(
            "Rate limiter cleanup: {} -> {} entries",
            before,
            self.limiter.len()
        );
    }
}

/// Rate limiting middleware for Axum
///
/// Requests without connection info (for example in-process tests) pass through.
pub async fn rate_limit_middleware(
    State(rate_limit): State<RateLimitState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());

    let Some(ip) = ip else {
        return next.run(request).await;
    };

    if rate_limit.check(ip) {
        debug!(ip = %ip, "Rate limit check passed");
        next.run(request).await
    } else {
        warn!(ip = %ip, "Connection rate limit exceeded");
        AppError::TooManyRequests("Too many connection attempts, try again later".to_string())
            .into_response()
    }
}

/// Spawn a background task to periodically clean up rate limiters
pub fn spawn_rate_limit_cleanup(state: RateLimitState) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(600));
        loop {
            interval.tick().await;
            state.cleanup();
        }
    })
}
