//! Admission middleware guarding every inbound request.

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tracing::warn;

use crate::error::TurnstileError;
use crate::ratelimit::{ClientIdentity, Decision, FixedWindowLimiter};

const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Client address resolved by an upstream layer (e.g. a trusted proxy
/// resolver). Takes precedence over the connection address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientIp(pub IpAddr);

/// Collect the origin information carried by a request.
///
/// The connection address fills `direct`, so `X-Forwarded-For` is only
/// consulted when the request carries no connection info at all.
pub fn client_identity<B>(request: &axum::http::Request<B>) -> ClientIdentity {
    let socket = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);

    ClientIdentity {
        direct: request
            .extensions()
            .get::<ClientIp>()
            .map(|ip| ip.0)
            .or_else(|| socket.map(|addr| addr.ip())),
        forwarded_for: request
            .headers()
            .get(X_FORWARDED_FOR)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string),
        socket,
    }
}

/// Count the request against its client's window, short-circuiting with
/// `429 Too Many Requests` once the window is exhausted.
pub async fn throttle(
    State(limiter): State<Arc<FixedWindowLimiter>>,
    request: Request,
    next: Next,
) -> Result<Response, TurnstileError> {
    let key = client_identity(&request).client_key();

    match limiter.admit(&key) {
        Decision::Admit => Ok(next.run(request).await),
        Decision::Reject { retry_after } => {
            warn!(
                client = %key,
                path = %request.uri().path(),
                retry_after = ?retry_after,
                "Rate limit exceeded"
            );
            Err(TurnstileError::RateLimitExceeded { retry_after })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::{LimiterConfig, ManualClock, UNKNOWN_CLIENT_KEY};
    use axum::body::Body;
    use axum::http::{header, StatusCode};
    use axum::routing::get;
    use axum::Router;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tower::ServiceExt;

    fn create_test_limiter(max_requests: u64) -> Arc<FixedWindowLimiter> {
        let config = LimiterConfig {
            window_ms: 1_000,
            max_requests,
            sweep_interval: Duration::from_secs(300),
        };
        Arc::new(FixedWindowLimiter::with_clock(config, Arc::new(ManualClock::new(0))))
    }

    fn guarded_app(limiter: Arc<FixedWindowLimiter>, hits: Arc<AtomicUsize>) -> Router {
        Router::new()
            .route(
                "/",
                get(move || {
                    let hits = hits.clone();
                    async move {
                        hits.fetch_add(1, Ordering::SeqCst);
                        "ok"
                    }
                }),
            )
            .layer(axum::middleware::from_fn_with_state(limiter, throttle))
    }

    fn request_from(socket: Option<&str>, forwarded: Option<&str>) -> Request {
        let mut builder = axum::http::Request::builder().uri("/");
        if let Some(forwarded) = forwarded {
            builder = builder.header(X_FORWARDED_FOR, forwarded);
        }
        let mut request = builder.body(Body::empty()).unwrap();
        if let Some(socket) = socket {
            let addr: SocketAddr = socket.parse().unwrap();
            request.extensions_mut().insert(ConnectInfo(addr));
        }
        request
    }

    #[test]
    fn test_client_identity_extraction() {
        let mut request = request_from(Some("192.168.0.7:40000"), Some("203.0.113.5, 10.0.0.1"));
        request
            .extensions_mut()
            .insert(ClientIp("10.1.1.1".parse().unwrap()));

        let identity = client_identity(&request);
        assert_eq!(identity.direct, Some("10.1.1.1".parse().unwrap()));
        assert_eq!(identity.forwarded_for.as_deref(), Some("203.0.113.5, 10.0.0.1"));
        assert_eq!(identity.socket, Some("192.168.0.7:40000".parse().unwrap()));
    }

    #[tokio::test]
    async fn test_admitted_request_reaches_handler() {
        let limiter = create_test_limiter(2);
        let hits = Arc::new(AtomicUsize::new(0));
        let app = guarded_app(limiter.clone(), hits.clone());

        let response = app
            .oneshot(request_from(Some("192.168.0.7:40000"), None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(limiter.count_for("192.168.0.7"), Some(1));
    }

    #[tokio::test]
    async fn test_rejected_request_skips_handler() {
        let limiter = create_test_limiter(1);
        let hits = Arc::new(AtomicUsize::new(0));
        let app = guarded_app(limiter, hits.clone());

        let first = app
            .clone()
            .oneshot(request_from(Some("192.168.0.7:40000"), None))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = app
            .oneshot(request_from(Some("192.168.0.7:40001"), None))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(second.headers().get(header::RETRY_AFTER).unwrap(), "1");
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        let body = axum::body::to_bytes(second.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "rate_limit_exceeded");
    }

    #[test]
    fn test_connection_address_fills_direct() {
        let request = request_from(Some("192.168.0.7:40000"), Some("203.0.113.5"));

        let identity = client_identity(&request);
        assert_eq!(identity.direct, Some("192.168.0.7".parse().unwrap()));
        assert_eq!(identity.client_key(), "192.168.0.7");
    }

    #[tokio::test]
    async fn test_rotating_forwarded_header_shares_socket_window() {
        let limiter = create_test_limiter(1);
        let hits = Arc::new(AtomicUsize::new(0));
        let app = guarded_app(limiter.clone(), hits.clone());

        let mut admitted = 0;
        for i in 0..5 {
            let forwarded = format!("1.2.3.{}", i);
            let response = app
                .clone()
                .oneshot(request_from(Some("198.51.100.4:1000"), Some(&forwarded)))
                .await
                .unwrap();
            if response.status() == StatusCode::OK {
                admitted += 1;
            }
        }

        assert_eq!(admitted, 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(limiter.count_for("198.51.100.4"), Some(1));
        assert_eq!(limiter.count_for("1.2.3.0"), None);
    }

    #[tokio::test]
    async fn test_forwarded_header_used_without_connection_info() {
        let limiter = create_test_limiter(1);
        let hits = Arc::new(AtomicUsize::new(0));
        let app = guarded_app(limiter.clone(), hits.clone());

        for client in ["203.0.113.5", "203.0.113.6"] {
            let response = app
                .clone()
                .oneshot(request_from(None, Some(client)))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(limiter.count_for("203.0.113.5"), Some(1));
        assert_eq!(limiter.count_for(UNKNOWN_CLIENT_KEY), None);
    }

    #[tokio::test]
    async fn test_unidentified_callers_share_counter() {
        let limiter = create_test_limiter(1);
        let hits = Arc::new(AtomicUsize::new(0));
        let app = guarded_app(limiter.clone(), hits.clone());

        let first = app.clone().oneshot(request_from(None, None)).await.unwrap();
        let second = app.oneshot(request_from(None, None)).await.unwrap();

        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(limiter.count_for(UNKNOWN_CLIENT_KEY), Some(1));
    }
}
