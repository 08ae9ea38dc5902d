//! HTTP surface and full application runs.

mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use imbi::app::{self, AppError};
use imbi::config::ImbiConfig;
use imbi::http::build_router;
use imbi::lifecycle::{ManagedService, Shutdown, StartupError};
use imbi::services::Services;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower::ServiceExt;

fn router(config: &ImbiConfig) -> Router {
    let services = Arc::new(Services::from_config(config));
    build_router(config, services).unwrap()
}

async fn get(router: &Router, uri: &str) -> (StatusCode, axum::http::HeaderMap, Value) {
    let response = router
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = to_bytes(response.into_body(), 64 * 1024).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, headers, body)
}

#[tokio::test]
async fn test_root_reports_service_and_version() {
    let router = router(&ImbiConfig::default());

    let (status, headers, body) = get(&router, "/").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["service"], "imbi");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    assert!(headers.contains_key("x-request-id"));
    assert_eq!(
        headers[header::SERVER],
        concat!("imbi/", env!("CARGO_PKG_VERSION"))
    );
}

#[tokio::test]
async fn test_status_degraded_before_startup() {
    let router = router(&ImbiConfig::default());

    let (status, _, body) = get(&router, "/status").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["services"]["neo4j"], false);
    assert_eq!(body["services"]["clickhouse"], false);
    assert_eq!(body["services"]["email"], false);
}

#[tokio::test]
async fn test_rate_limit_rejects_excess_requests() {
    let mut config = ImbiConfig::default();
    config.rate_limit.default_limit = "2/minute".to_string();
    let router = router(&config);

    assert_eq!(get(&router, "/").await.0, StatusCode::OK);
    assert_eq!(get(&router, "/").await.0, StatusCode::OK);
    let (status, headers, _) = get(&router, "/").await;

    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert!(headers.contains_key(header::RETRY_AFTER));
}

#[tokio::test]
async fn test_rate_limit_disabled() {
    let mut config = ImbiConfig::default();
    config.rate_limit.enabled = false;
    config.rate_limit.default_limit = "1/minute".to_string();
    let router = router(&config);

    for _ in 0..3 {
        assert_eq!(get(&router, "/").await.0, StatusCode::OK);
    }
}

#[tokio::test]
async fn test_unknown_route_is_not_found() {
    let router = router(&ImbiConfig::default());
    assert_eq!(get(&router, "/nope").await.0, StatusCode::NOT_FOUND);
}

/// Router over a graph store backed by a Neo4j mock holding one organization and two roles.
async fn router_with_graph() -> Router {
    let neo4j = common::start_programmable_backend(|request| {
        let body: Value = serde_json::from_str(&request.body).unwrap_or(Value::Null);
        let statement = body["statements"][0]["statement"].as_str().unwrap_or_default();

        let response = if statement.starts_with("MATCH (o:Organization)") {
            common::tx_result(
                &["slug", "name", "description"],
                vec![json!(["default", "Default", "Default organization"])],
            )
        } else if statement.starts_with("MATCH (r:Role)") {
            common::tx_result(
                &["slug", "name", "description", "priority", "is_system", "permissions"],
                vec![
                    json!(["admin", "Administrator", "Full access", 1000, true, ["project:read", "project:write"]]),
                    json!(["readonly", "Read Only", null, 10, true, []]),
                ],
            )
        } else if statement.starts_with("MATCH (g:Group)") {
            common::tx_result(
                &["slug", "name", "description", "organization"],
                vec![json!(["default-group", "Default Group", null, "default"])],
            )
        } else {
            common::tx_result(&[], vec![])
        };
        (200, response)
    })
    .await;

    let mut config = ImbiConfig::default();
    config.neo4j = common::neo4j_config(neo4j);
    let services = Arc::new(Services::from_config(&config));
    services.graph.initialize().await.unwrap();
    build_router(&config, services).unwrap()
}

#[tokio::test]
async fn test_list_organizations() {
    let router = router_with_graph().await;

    let (status, _, body) = get(&router, "/organizations").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!([{"slug": "default", "name": "Default", "description": "Default organization"}])
    );
}

#[tokio::test]
async fn test_list_roles_with_permissions() {
    let router = router_with_graph().await;

    let (status, _, body) = get(&router, "/roles").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 2);
    assert_eq!(body[0]["slug"], "admin");
    assert_eq!(body[0]["priority"], 1000);
    assert_eq!(body[0]["permissions"], json!(["project:read", "project:write"]));
    assert_eq!(body[1]["description"], Value::Null);
    assert_eq!(body[1]["permissions"], json!([]));
}

#[tokio::test]
async fn test_list_groups_names_organization() {
    let router = router_with_graph().await;

    let (status, _, body) = get(&router, "/groups").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["slug"], "default-group");
    assert_eq!(body[0]["organization"], "default");
}

#[tokio::test]
async fn test_listing_unavailable_before_graph_connects() {
    let router = router(&ImbiConfig::default());

    for uri in ["/organizations", "/roles", "/groups"] {
        let (status, _, body) = get(&router, uri).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE, "{}", uri);
        assert_eq!(body["error"], "graph store unavailable");
    }
}

#[tokio::test]
async fn test_listing_reports_graph_errors_as_bad_gateway() {
    let neo4j = common::start_programmable_backend(|request| {
        let body = if request.body.contains("Organization") && request.body.contains("RETURN o.slug") {
            json!({
                "results": [],
                "errors": [{"code": "Neo.ClientError.Statement.SyntaxError", "message": "bad"}]
            })
        } else {
            json!({"results": [{"columns": [], "data": []}], "errors": []})
        };
        (200, body.to_string())
    })
    .await;
    let mut config = ImbiConfig::default();
    config.neo4j = common::neo4j_config(neo4j);
    let services = Arc::new(Services::from_config(&config));
    services.graph.initialize().await.unwrap();
    let router = build_router(&config, services).unwrap();

    let (status, _, body) = get(&router, "/organizations").await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(body["error"].as_str().unwrap().contains("SyntaxError"));
}

#[tokio::test]
async fn test_app_serves_until_shutdown() {
    let neo4j = common::start_mock_neo4j().await;
    let clickhouse = common::start_mock_clickhouse().await;
    let smtp = common::start_mock_smtp("220 ready\r\n").await.addr;
    let config = common::config_for(neo4j, clickhouse, smtp);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let handle = tokio::spawn(app::run(config, listener, shutdown.clone()));

    let client = reqwest::Client::new();
    let mut ready = false;
    for _ in 0..50 {
        if let Ok(response) = client.get(format!("http://{}/status", addr)).send().await {
            if response.status() == reqwest::StatusCode::OK {
                let body: Value = response.json().await.unwrap();
                assert_eq!(body["status"], "ok");
                ready = true;
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(ready, "server never reported ready");

    shutdown.trigger();
    let report = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(report.is_clean());
}

#[tokio::test]
async fn test_shutdown_requested_during_startup_is_honored() {
    let neo4j = common::start_mock_neo4j().await;
    let clickhouse = common::start_mock_clickhouse().await;
    let smtp = common::start_mock_smtp("220 ready\r\n").await.addr;
    let config = common::config_for(neo4j, clickhouse, smtp);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let shutdown = Shutdown::new();
    shutdown.trigger();

    let report = tokio::time::timeout(Duration::from_secs(5), app::run(config, listener, shutdown))
        .await
        .expect("server ignored a shutdown requested before it started")
        .unwrap();
    assert!(report.is_clean());
}

#[tokio::test]
async fn test_app_refuses_to_serve_when_analytics_unavailable() {
    let neo4j = common::start_mock_neo4j().await;
    let clickhouse = common::closed_port().await;
    let smtp = common::start_mock_smtp("220 ready\r\n").await.addr;
    let config = common::config_for(neo4j, clickhouse, smtp);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let result = app::run(config, listener, Shutdown::new()).await;

    assert!(matches!(
        result,
        Err(AppError::Startup(StartupError::Unavailable { service: "clickhouse" }))
    ));
}

#[tokio::test]
async fn test_app_rejects_invalid_rate_limit_before_startup() {
    let mut config = ImbiConfig::default();
    config.rate_limit.default_limit = "lots".to_string();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let result = app::run(config, listener, Shutdown::new()).await;

    assert!(matches!(result, Err(AppError::RateLimit(_))));
}
