// JSON handlers. Errors keep the {success, error} body; the status code follows the error kind.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::orchestrator::{ApiResponse, CreateSiteRequest, ObtainCertificateRequest};

const NAME: &str = env!("CARGO_PKG_NAME");
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Deserialize)]
pub(super) struct ToggleRequest {
    enabled: bool,
}

fn status_for(kind: &str) -> StatusCode {
    match kind {
        "validation_error" => StatusCode::BAD_REQUEST,
        "conflict_error" => StatusCode::CONFLICT,
        "not_found" => StatusCode::NOT_FOUND,
        "external_command_error" => StatusCode::BAD_GATEWAY,
        "timeout" => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn respond<T: Serialize>(success_status: StatusCode, resp: ApiResponse<T>) -> Response {
    let status = resp.error_kind().map(status_for).unwrap_or(success_status);
    (status, Json(resp)).into_response()
}

/// GET /health
pub(super) async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now(),
    }))
}

/// GET /version
pub(super) async fn version_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "name": NAME,
        "version": VERSION,
    }))
}

/// GET /api/system/stats
pub(super) async fn stats_handler(State(state): State<AppState>) -> Response {
    respond(StatusCode::OK, state.orchestrator.get_stats().await)
}

/// GET /api/hosting/sites
pub(super) async fn list_sites_handler(State(state): State<AppState>) -> Response {
    respond(StatusCode::OK, state.orchestrator.list_sites().await)
}

/// POST /api/hosting/sites
pub(super) async fn create_site_handler(
    State(state): State<AppState>,
    Json(req): Json<CreateSiteRequest>,
) -> Response {
    respond(StatusCode::CREATED, state.orchestrator.create_site(req).await)
}

/// PATCH /api/hosting/sites/{name}
pub(super) async fn toggle_site_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<ToggleRequest>,
) -> Response {
    respond(
        StatusCode::OK,
        state.orchestrator.toggle_site(&name, req.enabled).await,
    )
}

/// DELETE /api/hosting/sites/{name}
pub(super) async fn delete_site_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Response {
    respond(StatusCode::OK, state.orchestrator.delete_site(&name).await)
}

/// POST /api/ssl/obtain
pub(super) async fn obtain_certificate_handler(
    State(state): State<AppState>,
    Json(req): Json<ObtainCertificateRequest>,
) -> Response {
    respond(
        StatusCode::OK,
        state.orchestrator.obtain_certificate(req).await,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kinds_map_to_statuses() {
        assert_eq!(status_for("validation_error"), StatusCode::BAD_REQUEST);
        assert_eq!(status_for("conflict_error"), StatusCode::CONFLICT);
        assert_eq!(status_for("not_found"), StatusCode::NOT_FOUND);
        assert_eq!(status_for("external_command_error"), StatusCode::BAD_GATEWAY);
        assert_eq!(status_for("timeout"), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(status_for("store_error"), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
