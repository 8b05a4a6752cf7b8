mod handlers;
mod ws;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    http::{header, HeaderValue, Method},
    routing::get,
    Router,
};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::dispatch::Dispatcher;
use crate::session::SessionRegistry;

use handlers::*;

/// WebSocket transport limits.
#[derive(Debug, Clone, Copy)]
pub struct TransportConfig {
    /// How often the writer pings an otherwise quiet client.
    pub ping_interval: Duration,
    /// A client that sends nothing (pongs included) for this long is dropped.
    pub pong_timeout: Duration,
    /// Budget for a single frame write.
    pub write_timeout: Duration,
    pub max_message_bytes: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(54),
            pong_timeout: Duration::from_secs(60),
            write_timeout: Duration::from_secs(10),
            max_message_bytes: 10 * 1024,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub sessions: SessionRegistry,
    pub dispatcher: Arc<Dispatcher>,
    pub transport: TransportConfig,
    /// Cancelled when the server begins shutting down.
    pub shutdown: CancellationToken,
}

/// Configuration for the HTTP/WS router.
///
/// Use `RouterConfig::default()` in tests for a setup without CORS.
#[derive(Debug, Clone, Default)]
pub struct RouterConfig {
    pub cors_origins: Vec<String>,
}

pub fn router(state: AppState, config: RouterConfig) -> Router {
    let router = Router::new()
        .route("/ws", get(ws_upgrade))
        .route("/api/status", get(status))
        .route("/health", get(health))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    // Conditionally apply CORS if origins are configured.
    if config.cors_origins.is_empty() {
        router
    } else {
        let origins: Vec<HeaderValue> = config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        router.layer(
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods([Method::GET, Method::OPTIONS])
                .allow_headers([header::CONTENT_TYPE]),
        )
    }
}
