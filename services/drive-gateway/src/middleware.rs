//! Request logging and rate limiting
//!
//! Both sit in front of the core handlers and stay out of their way: the
//! credential layer behaves identically when called directly. The rate
//! limiter state is owned by the service and injected through the router —
//! no ambient globals.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tokio::sync::Mutex;
use tracing::info;

use crate::AppState;
use crate::metrics;

/// Fixed-window request counter, keyed by client IP.
///
/// The first request from an IP starts its window; requests beyond
/// `max_requests` inside the window are rejected until the window rolls
/// over. Stale windows are pruned on every check, so the map never grows
/// past the set of IPs seen within one window.
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    windows: Mutex<HashMap<IpAddr, Window>>,
}

struct Window {
    started_at: Instant,
    count: u32,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Record one request from `ip`. Returns false when the window is full.
    pub async fn check(&self, ip: IpAddr) -> bool {
        let now = Instant::now();
        let mut windows = self.windows.lock().await;
        windows.retain(|_, w| now.duration_since(w.started_at) < self.window);

        match windows.get_mut(&ip) {
            Some(w) if w.count >= self.max_requests => false,
            Some(w) => {
                w.count += 1;
                true
            }
            None => {
                windows.insert(
                    ip,
                    Window {
                        started_at: now,
                        count: 1,
                    },
                );
                true
            }
        }
    }
}

/// Client IP for rate limiting. Requests served without connect info (e.g.
/// direct service calls in tests) all share the loopback bucket.
fn client_ip(request: &Request) -> IpAddr {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

/// Rate-limit middleware for the core routes.
pub async fn rate_limit(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let ip = client_ip(&request);
    if !state.limiter.check(ip).await {
        info!(client_ip = %ip, path = request.uri().path(), "rate limit exceeded");
        metrics::record_rate_limited();
        return (
            StatusCode::TOO_MANY_REQUESTS,
            axum::Json(serde_json::json!({
                "error": "Rate limit exceeded. Try again later."
            })),
        )
            .into_response();
    }
    next.run(request).await
}

/// Request logging middleware: one structured line per request with a
/// generated request id, plus the Prometheus request counters.
pub async fn request_log(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let request_id = format!("req_{}", uuid::Uuid::new_v4().as_simple());
    let method = request.method().clone();
    let path = request.uri().path().to_owned();

    let start = Instant::now();
    let response = next.run(request).await;
    let elapsed = start.elapsed();

    state.requests_total.fetch_add(1, Ordering::Relaxed);
    metrics::record_request(response.status().as_u16(), method.as_str(), elapsed.as_secs_f64());

    info!(
        request_id,
        method = %method,
        path,
        status = response.status().as_u16(),
        duration_ms = elapsed.as_secs_f64() * 1000.0,
        "request"
    );

    response
}
