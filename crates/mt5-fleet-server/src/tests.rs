use crate::{create_app, resolve_instance, AppState};
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use mt5_fleet::common::{FleetError, InstanceRecord, InstanceStatus};
use mt5_fleet::gateway::GatewayError;
use mt5_fleet::test_utils::{MockContainer, MockGateway};
use mt5_fleet::{FleetConfig, FleetManager};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

fn create_test_app(gateway: &Arc<MockGateway>) -> Router {
    create_test_app_with_api_host(gateway, "127.0.0.1")
}

fn create_test_app_with_api_host(gateway: &Arc<MockGateway>, api_host: &str) -> Router {
    let state = AppState {
        fleet: FleetManager::with_gateway(gateway.clone(), FleetConfig::default()),
        http: mt5_api_client::build_http_client(std::time::Duration::from_secs(2)).unwrap(),
        api_host: api_host.to_string(),
    };
    create_app(state)
}

async fn send(app: &Router, method: &str, uri: &str, body: Body) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .header("content-type", "application/json")
                .body(body)
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    send(app, "GET", uri, Body::empty()).await
}

async fn post(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    send(app, "POST", uri, Body::from(body.to_string())).await
}

#[tokio::test]
async fn test_health_endpoint() {
    let gateway = Arc::new(MockGateway::new());
    let app = create_test_app(&gateway);

    let (status, json) = get(&app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["docker_connected"], true);
    assert!(json["timestamp"].is_string());

    gateway.set_offline(true);
    let (_, json) = get(&app, "/health").await;
    assert_eq!(json["status"], "degraded");
}

#[tokio::test]
async fn test_create_list_and_summary() {
    let gateway = Arc::new(MockGateway::new());
    gateway.add(MockContainer::exited("trading_mt5_old").with_ports(3000, 8001));
    let app = create_test_app(&gateway);

    let (status, ports) = get(&app, "/api/v1/ports/next").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ports, json!({"vnc": 3001, "api": 8002}));

    let (status, created) = post(&app, "/api/v1/instances", json!({"account": "demo"})).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["name"], "trading_mt5_demo");
    assert_eq!(created["vnc_port"], 3001);
    assert_eq!(created["api_port"], 8002);

    let (_, listed) = get(&app, "/api/v1/instances").await;
    assert_eq!(listed.as_array().unwrap().len(), 2);

    let (_, filtered) = get(&app, "/api/v1/instances?q=DEMO").await;
    assert_eq!(filtered.as_array().unwrap().len(), 1);
    assert_eq!(filtered[0]["status"], "running");

    let (_, summary) = get(&app, "/api/v1/summary").await;
    assert_eq!(summary, json!({"total": 2, "running": 1, "stopped": 1}));
}

#[tokio::test]
async fn test_create_error_mapping() {
    let gateway = Arc::new(MockGateway::new());
    let app = create_test_app(&gateway);

    let (status, body) = post(&app, "/api/v1/instances", json!({"account": "bad name"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("invalid character"));

    let (status, _) = post(
        &app,
        "/api/v1/instances",
        json!({"account": "demo", "vnc_port": 3100}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, created) = post(
        &app,
        "/api/v1/instances",
        json!({"account": "demo", "vnc_port": 3100, "api_port": 8100}),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["vnc_port"], 3100);

    let (status, body) = post(&app, "/api/v1/instances", json!({"account": "demo"})).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].as_str().unwrap().contains("already in use"));
}

#[tokio::test]
async fn test_lifecycle_endpoints() {
    let gateway = Arc::new(MockGateway::new());
    let id = gateway.add(MockContainer::running("trading_mt5_demo"));
    let app = create_test_app(&gateway);

    let (status, body) = post(&app, &format!("/api/v1/instances/{id}/stop"), json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"error": null}));

    let (status, _) = post(&app, &format!("/api/v1/instances/{id}/start"), json!({})).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = post(&app, &format!("/api/v1/instances/{id}/restart"), json!({})).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(&app, "DELETE", &format!("/api/v1/instances/{id}"), Body::empty()).await;
    assert_eq!(status, StatusCode::OK);
    assert!(gateway.status_of("trading_mt5_demo").is_none());

    let (status, body) = post(&app, &format!("/api/v1/instances/{id}/start"), json!({})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().starts_with("Instance Not Found"));
}

#[tokio::test]
async fn test_offline_runtime_is_unavailable() {
    let gateway = Arc::new(MockGateway::new());
    let id = gateway.add(MockContainer::running("trading_mt5_demo"));
    gateway.set_offline(true);
    let app = create_test_app(&gateway);

    let (status, _) = post(&app, &format!("/api/v1/instances/{id}/stop"), json!({})).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let (status, listed) = get(&app, "/api/v1/instances").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed, json!([]));
}

#[tokio::test]
async fn test_kill_switch_endpoint() {
    let gateway = Arc::new(MockGateway::new());
    gateway.add(MockContainer::running("trading_mt5_a"));
    gateway.add(MockContainer::running("trading_mt5_b"));
    gateway.fail("kill", "trading_mt5_b", GatewayError::Api("permission denied".to_string()));
    let app = create_test_app(&gateway);

    let (status, report) = post(&app, "/api/v1/kill-switch", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["succeeded"], json!(["trading_mt5_a"]));
    assert_eq!(report["errors"].as_array().unwrap().len(), 1);
    assert!(report["errors"][0].as_str().unwrap().contains("trading_mt5_b"));
}

#[tokio::test]
async fn test_stats_endpoint_never_fails() {
    let gateway = Arc::new(MockGateway::new());
    let id = gateway.add(MockContainer::exited("trading_mt5_demo"));
    let app = create_test_app(&gateway);

    let (status, stats) = get(&app, &format!("/api/v1/instances/{id}/stats")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["uptime"], "Stopped");
    assert!(stats.get("error").is_none());

    let (status, stats) = get(&app, "/api/v1/instances/ffffffffffff/stats").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["uptime"], "Error");
    assert!(stats["error"].is_string());
}

#[tokio::test]
async fn test_log_endpoints() {
    let gateway = Arc::new(MockGateway::new());
    let id = gateway.add(
        MockContainer::running("trading_mt5_demo")
            .with_exec(&["ls", "-1", "/config/MQL5/Logs/"], 0, b"20240101.log\n20240105.log\n")
            .with_exec(&["cat", "/config/MQL5/Logs/20240105.log"], 0, b"OnInit ok"),
    );
    let app = create_test_app(&gateway);

    let (status, files) = get(&app, &format!("/api/v1/instances/{id}/logs/Experts")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(files, json!({"files": ["20240105.log", "20240101.log"]}));

    let (status, content) =
        get(&app, &format!("/api/v1/instances/{id}/logs/experts/20240105.log")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(content["content"], "OnInit ok");

    let (status, _) = get(&app, &format!("/api/v1/instances/{id}/logs/tester")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = get(&app, &format!("/api/v1/instances/{id}/logs/journal/notes.txt")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_upload_endpoints() {
    let gateway = Arc::new(MockGateway::new());
    let id = gateway.add(MockContainer::running("trading_mt5_a"));
    gateway.add(MockContainer::running("trading_mt5_b"));
    gateway.add(MockContainer::exited("trading_mt5_c"));
    let app = create_test_app(&gateway);

    let (status, body) = send(
        &app,
        "POST",
        &format!("/api/v1/instances/{id}/experts?filename=Grid.ex5"),
        Body::from(vec![0u8, 1, 2, 3]),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"error": null}));

    let (status, _) = send(
        &app,
        "POST",
        &format!("/api/v1/instances/{id}/experts?filename=Grid.dll"),
        Body::from(vec![0u8]),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, report) = send(
        &app,
        "POST",
        "/api/v1/experts?filename=Grid.mq5",
        Body::from("input int Lots = 1;"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["succeeded"], json!(["trading_mt5_a", "trading_mt5_b"]));
    assert_eq!(report["errors"], json!([]));
    assert_eq!(gateway.uploads().len(), 3);
}

#[tokio::test]
async fn test_trading_proxy() {
    let mut server = mockito::Server::new_async().await;
    let api_port: u16 = server
        .host_with_port()
        .rsplit_once(':')
        .and_then(|(_, port)| port.parse().ok())
        .unwrap();
    server
        .mock("GET", "/account_info")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!({"balance": 5000, "equity": 5010.5}).to_string())
        .create_async()
        .await;
    server
        .mock("GET", "/history")
        .match_query(mockito::Matcher::UrlEncoded("days".into(), "7".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!([{"entry": 1, "profit": 4.0}]).to_string())
        .create_async()
        .await;
    server
        .mock("GET", "/positions")
        .with_status(500)
        .with_body("terminal busy")
        .create_async()
        .await;

    let gateway = Arc::new(MockGateway::new());
    gateway.add(MockContainer::running("trading_mt5_demo").with_ports(3000, api_port));
    gateway.add(MockContainer::running("trading_mt5_noapi").with_vnc_port(3001));
    let app = create_test_app(&gateway);

    let (status, account) = get(&app, "/api/v1/instances/trading_mt5_demo/trading/account").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(account["success"], true);
    assert_eq!(account["balance"], 5000.0);
    assert_eq!(account["currency"], "USD");

    let (_, history) = get(&app, "/api/v1/instances/trading_mt5_demo/trading/history").await;
    assert_eq!(history["success"], true);
    assert_eq!(history["summary"]["wins"], 1);
    assert_eq!(history["summary"]["win_rate"], 100.0);

    let (status, positions) =
        get(&app, "/api/v1/instances/trading_mt5_demo/trading/positions").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        positions,
        json!({"success": false, "error": "HTTP 500: terminal busy"})
    );

    let (status, _) = get(&app, "/api/v1/instances/trading_mt5_noapi/trading/orders").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = get(&app, "/api/v1/instances/trading_mt5_ghost/trading/orders").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

fn record(id: &str, name: &str) -> InstanceRecord {
    InstanceRecord {
        id: id.to_string(),
        name: name.to_string(),
        status: InstanceStatus::Running,
        vnc_port: Some(3000),
        api_port: Some(8001),
    }
}

#[test]
fn test_resolve_instance_accepts_short_prefixes() {
    let records = || {
        vec![
            record("0a1b2c3d4e5f", "trading_mt5_alpha"),
            record("0a1b99999999", "trading_mt5_beta"),
        ]
    };

    assert_eq!(resolve_instance(records(), "trading_mt5_beta").unwrap().id, "0a1b99999999");
    assert_eq!(resolve_instance(records(), "0a1b2c3d4e5f").unwrap().name, "trading_mt5_alpha");
    assert_eq!(
        resolve_instance(records(), "0a1b2c3d4e5f0000ffff").unwrap().name,
        "trading_mt5_alpha"
    );
    assert_eq!(resolve_instance(records(), "0a1b2").unwrap().name, "trading_mt5_alpha");

    assert!(matches!(
        resolve_instance(records(), "0a1b"),
        Err(FleetError::InvalidInput(ref m)) if m.contains("more than one")
    ));
    assert!(matches!(resolve_instance(records(), "ffff"), Err(FleetError::NotFound(_))));
    assert!(matches!(resolve_instance(records(), "  "), Err(FleetError::InvalidInput(_))));
}
