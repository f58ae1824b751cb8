// Fixed-ceiling sliding window per client for /api and /ws.

use axum::{
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

use super::AppState;

/// Idle clients are swept once the table grows past this.
const SWEEP_THRESHOLD: usize = 1024;

pub struct RateLimiter {
    window: Duration,
    max_requests: usize,
    hits: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(window: Duration, max_requests: usize) -> Self {
        Self {
            window,
            max_requests,
            hits: Mutex::new(HashMap::new()),
        }
    }

    /// Records a request from `client`. False when `client` already made
    /// `max_requests` requests inside the window; rejected requests are not counted.
    pub fn check(&self, client: &str) -> bool {
        let now = Instant::now();
        let mut hits = self.hits.lock().unwrap_or_else(PoisonError::into_inner);
        if hits.len() > SWEEP_THRESHOLD {
            hits.retain(|_, times| {
                times
                    .back()
                    .is_some_and(|last| now.duration_since(*last) < self.window)
            });
        }
        let times = hits.entry(client.to_string()).or_default();
        while times
            .front()
            .is_some_and(|first| now.duration_since(*first) >= self.window)
        {
            times.pop_front();
        }
        if times.len() >= self.max_requests {
            return false;
        }
        times.push_back(now);
        true
    }
}

pub(super) async fn limit_requests(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let client = client_key(&req);
    if state.rate_limiter.check(&client) {
        return next.run(req).await;
    }
    tracing::warn!(client = %client, path = %req.uri().path(), "rate limit exceeded");
    (
        StatusCode::TOO_MANY_REQUESTS,
        axum::Json(serde_json::json!({
            "success": false,
            "error": { "kind": "rate_limited", "message": "too many requests, try again later" },
        })),
    )
        .into_response()
}

/// First `X-Forwarded-For` hop when behind a proxy, else the peer address.
fn client_key(req: &Request) -> String {
    let forwarded = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = forwarded {
        return ip.to_string();
    }
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".into())
}
