// HTTP + WebSocket routes

mod auth;
mod http;
mod rate_limit;
mod ws;

pub use rate_limit::RateLimiter;

use axum::{
    Router, middleware,
    routing::{get, patch, post},
};
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};

use crate::config::AppConfig;
use crate::orchestrator::Orchestrator;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) orchestrator: Arc<Orchestrator>,
    pub(crate) api_token: Option<Arc<str>>,
    pub(crate) ws_connections: Arc<AtomicUsize>,
    pub(crate) rate_limiter: Arc<RateLimiter>,
}

pub fn app(orchestrator: Arc<Orchestrator>, config: &AppConfig) -> Router {
    let state = AppState {
        orchestrator,
        api_token: config.server.api_token.as_deref().map(Arc::from),
        ws_connections: Arc::new(AtomicUsize::new(0)),
        rate_limiter: Arc::new(RateLimiter::new(
            Duration::from_secs(config.server.rate_limit_window_secs),
            config.server.rate_limit_max,
        )),
    };

    let protected = Router::new()
        .route("/api/system/stats", get(http::stats_handler)) // GET /api/system/stats
        .route(
            "/api/hosting/sites",
            get(http::list_sites_handler).post(http::create_site_handler),
        ) // GET, POST /api/hosting/sites
        .route(
            "/api/hosting/sites/{name}",
            patch(http::toggle_site_handler).delete(http::delete_site_handler),
        ) // PATCH, DELETE /api/hosting/sites/{name}
        .route("/api/ssl/obtain", post(http::obtain_certificate_handler)) // POST /api/ssl/obtain
        .route("/ws", get(ws::ws_events)) // WS /ws
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_token,
        ))
        // Outermost, so requests with a bad token count too.
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::limit_requests,
        ));

    Router::new()
        .route("/health", get(http::health_handler)) // GET /health
        .route("/version", get(http::version_handler)) // GET /version
        .merge(protected)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
