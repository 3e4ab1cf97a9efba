//! HTTP server implementation.

use axum::{extract::State, middleware, routing::get, Json, Router};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::middleware::throttle;
use crate::error::Result;
use crate::ratelimit::FixedWindowLimiter;

/// Limiter snapshot served on `/status`.
#[derive(Debug, Serialize)]
struct StatusBody {
    window_ms: u64,
    max_requests: u64,
    tracked_keys: usize,
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn status(State(limiter): State<Arc<FixedWindowLimiter>>) -> Json<StatusBody> {
    let config = limiter.config();
    Json(StatusBody {
        window_ms: config.window_ms,
        max_requests: config.max_requests,
        tracked_keys: limiter.len(),
    })
}

/// Build the service router with every route behind the admission layer.
pub fn router(limiter: Arc<FixedWindowLimiter>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .layer(middleware::from_fn_with_state(limiter.clone(), throttle))
        .with_state(limiter)
}

/// HTTP server fronted by the rate limiter.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// The rate limiter instance
    limiter: Arc<FixedWindowLimiter>,
}

impl HttpServer {
    /// Create a new HTTP server.
    pub fn new(addr: SocketAddr, limiter: Arc<FixedWindowLimiter>) -> Self {
        Self { addr, limiter }
    }

    /// Serve until the provided signal resolves.
    ///
    /// The limiter's lifecycle is owned by the caller; this only routes
    /// requests through it.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await.map_err(|e| {
            error!(addr = %self.addr, error = %e, "Failed to bind HTTP listener");
            e
        })?;

        info!(addr = %listener.local_addr()?, "Starting HTTP server with graceful shutdown");

        axum::serve(
            listener,
            router(self.limiter).into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            e.into()
        })
    }
}
