// Integration tests: HTTP and WebSocket endpoints

mod common;

use axum::http::StatusCode;
use axum_test::TestServer;
use common::{Panel, TestEnv, panel, test_env};
use hostpanel::models::NotificationKind;
use hostpanel::routes;
use serde_json::{Value, json};

async fn test_app(env: &TestEnv) -> (axum::Router, Panel) {
    let panel = panel(&env.config).await;
    let app = routes::app(panel.orchestrator.clone(), &env.config);
    (app, panel)
}

/// Build TestServer with http_transport (required for WebSocket tests).
async fn test_server_with_http(env: &TestEnv) -> (TestServer, Panel) {
    let (app, panel) = test_app(env).await;
    let server = TestServer::builder().http_transport().try_build(app).unwrap();
    (server, panel)
}

/// Reads text frames until one parses as JSON and satisfies `pred`.
async fn receive_json_where(
    ws: &mut axum_test::TestWebSocket,
    pred: impl Fn(&Value) -> bool,
) -> Value {
    let deadline = tokio::time::Instant::now() + tokio::time::Duration::from_secs(3);
    loop {
        let text = ws.receive_text().await;
        if let Ok(v) = serde_json::from_str::<Value>(&text)
            && pred(&v)
        {
            return v;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for JSON"
        );
    }
}

#[tokio::test]
async fn test_health_endpoint() {
    let env = test_env();
    let (app, _) = test_app(&env).await;
    let server = TestServer::try_new(app).unwrap();
    let response = server.get("/health").await;
    response.assert_status_ok();
    let json: Value = response.json();
    assert_eq!(json["status"], "healthy");
}

#[tokio::test]
async fn test_version_endpoint() {
    let env = test_env();
    let (app, _) = test_app(&env).await;
    let server = TestServer::try_new(app).unwrap();
    let response = server.get("/version").await;
    response.assert_status_ok();
    let json: Value = response.json();
    assert_eq!(json.get("name").and_then(|v| v.as_str()), Some("hostpanel"));
    assert!(json.get("version").and_then(|v| v.as_str()).is_some());
}

#[tokio::test]
async fn test_site_lifecycle_over_http() {
    let env = test_env();
    let (app, _) = test_app(&env).await;
    let server = TestServer::try_new(app).unwrap();

    let listed: Value = server.get("/api/hosting/sites").await.json();
    assert_eq!(listed, json!({ "success": true, "data": [] }));

    let created = server
        .post("/api/hosting/sites")
        .json(&json!({ "domain": "example.com", "php": false, "ssl": false }))
        .await;
    created.assert_status(StatusCode::CREATED);
    let body: Value = created.json();
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["site"]["domain"], "example.com");
    assert_eq!(body["data"]["site"]["enabled"], true);

    let conflict = server
        .post("/api/hosting/sites")
        .json(&json!({ "domain": "example.com" }))
        .await;
    conflict.assert_status(StatusCode::CONFLICT);
    let body: Value = conflict.json();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["kind"], "conflict_error");

    let toggled = server
        .patch("/api/hosting/sites/example.com")
        .json(&json!({ "enabled": false }))
        .await;
    toggled.assert_status_ok();
    let body: Value = toggled.json();
    assert_eq!(body["data"]["enabled"], false);

    let listed: Value = server.get("/api/hosting/sites").await.json();
    assert_eq!(listed["data"][0]["enabled"], false);

    let deleted = server.delete("/api/hosting/sites/example.com").await;
    deleted.assert_status_ok();
    let listed: Value = server.get("/api/hosting/sites").await.json();
    assert_eq!(listed["data"], json!([]));
}

#[tokio::test]
async fn test_invalid_domain_is_bad_request() {
    let env = test_env();
    let (app, _) = test_app(&env).await;
    let server = TestServer::try_new(app).unwrap();
    let response = server
        .post("/api/hosting/sites")
        .json(&json!({ "domain": "bad domain; include /etc/passwd" }))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["error"]["kind"], "validation_error");
}

#[tokio::test]
async fn test_validation_failure_is_bad_gateway() {
    let mut env = test_env();
    env.config.commands.validate = common::argv(&["false"]);
    let (app, _) = test_app(&env).await;
    let server = TestServer::try_new(app).unwrap();
    let response = server
        .post("/api/hosting/sites")
        .json(&json!({ "domain": "example.com" }))
        .await;
    response.assert_status(StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_toggle_unknown_site_is_not_found() {
    let env = test_env();
    let (app, _) = test_app(&env).await;
    let server = TestServer::try_new(app).unwrap();
    server
        .patch("/api/hosting/sites/missing.example")
        .json(&json!({ "enabled": true }))
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_stats_endpoint() {
    let env = test_env();
    let (app, _) = test_app(&env).await;
    let server = TestServer::try_new(app).unwrap();
    let response = server.get("/api/system/stats").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["sites"]["total"], 0);
    assert!(body["data"]["system"]["uptimeSecs"].is_u64());
}

#[tokio::test]
async fn test_api_token_guards_api_but_not_health() {
    let mut env = test_env();
    env.config.server.api_token = Some("s3cret".into());
    let (app, _) = test_app(&env).await;
    let server = TestServer::try_new(app).unwrap();

    server.get("/health").await.assert_status_ok();
    server
        .get("/api/hosting/sites")
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
    server
        .get("/api/hosting/sites")
        .authorization_bearer("wrong")
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
    server
        .get("/api/hosting/sites")
        .authorization_bearer("s3cret")
        .await
        .assert_status_ok();
    server
        .get("/api/hosting/sites")
        .add_query_param("token", "s3cret")
        .await
        .assert_status_ok();
}

#[tokio::test]
async fn test_ws_sends_initial_state_first() {
    let env = test_env();
    let (server, panel) = test_server_with_http(&env).await;
    panel.sampler.tick().await;

    let mut ws = server.get_websocket("/ws").await.into_websocket().await;
    let first: Value = serde_json::from_str(&ws.receive_text().await).unwrap();
    assert_eq!(first["type"], "initial");
    assert_eq!(first["data"]["services"].as_object().map(|m| m.len()), Some(2));
    assert!(first["data"]["lastUpdate"].is_string());
}

#[tokio::test]
async fn test_ws_forwards_notifications_and_stats() {
    let env = test_env();
    let (server, panel) = test_server_with_http(&env).await;

    let mut ws = server.get_websocket("/ws").await.into_websocket().await;
    let _initial = receive_json_where(&mut ws, |v| v["type"] == "initial").await;

    panel
        .notifier
        .emit(
            NotificationKind::Error,
            "High CPU usage detected",
            json!({ "usage": "97.0" }),
        )
        .await;
    let n = receive_json_where(&mut ws, |v| v.get("kind").is_some()).await;
    assert_eq!(n["kind"], "error");
    assert_eq!(n["message"], "High CPU usage detected");
    assert_eq!(n["details"]["usage"], "97.0");
    assert!(n["id"].is_string());
    assert!(n["timestamp"].is_string());

    panel.sampler.tick().await;
    let stats = receive_json_where(&mut ws, |v| v["type"] == "stats").await;
    assert!(stats["data"]["timestamp"].is_string());
    let services = receive_json_where(&mut ws, |v| v["type"] == "service_status").await;
    assert_eq!(services["data"]["nginx"]["running"], true);
}

#[tokio::test]
async fn test_ws_requires_token_when_configured() {
    let mut env = test_env();
    env.config.server.api_token = Some("s3cret".into());
    let (server, _) = test_server_with_http(&env).await;

    let mut ws = server
        .get_websocket("/ws")
        .add_query_param("token", "s3cret")
        .await
        .into_websocket()
        .await;
    let first: Value = serde_json::from_str(&ws.receive_text().await).unwrap();
    assert_eq!(first["type"], "initial");
}

#[tokio::test]
async fn test_api_requests_over_ceiling_get_429() {
    let mut env = test_env();
    env.config.server.rate_limit_max = 3;
    let (app, _) = test_app(&env).await;
    let server = TestServer::try_new(app).unwrap();

    for _ in 0..3 {
        server.get("/api/hosting/sites").await.assert_status_ok();
    }
    let limited = server.get("/api/system/stats").await;
    limited.assert_status(StatusCode::TOO_MANY_REQUESTS);
    let body: Value = limited.json();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["kind"], "rate_limited");

    // Public endpoints and other clients are unaffected.
    server.get("/health").await.assert_status_ok();
    server
        .get("/api/hosting/sites")
        .add_header(
            axum::http::HeaderName::from_static("x-forwarded-for"),
            axum::http::HeaderValue::from_static("10.0.0.2"),
        )
        .await
        .assert_status_ok();
}
