pub mod config;
pub mod types;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use mt5_api_client::{
    AccountInfo, ApiResponse, HistoryReport, OrdersReport, PositionsReport, TradingApiClient,
};
use mt5_fleet::common::{
    BulkReport, FleetError, FleetSummary, InstanceRecord, LogCategory, PortPair, StatsSnapshot,
};
use mt5_fleet::FleetManager;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use types::{
    ApiFailure, CreateInstanceRequest, CreateInstanceResponse, HistoryQuery, ListQuery,
    LogContentResponse, LogFilesResponse, OperationResult, UploadQuery,
};

/// Largest accepted Expert Advisor upload.
const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;
const DEFAULT_HISTORY_DAYS: u32 = 7;

#[derive(Clone)]
pub struct AppState {
    pub fleet: FleetManager,
    /// Shared client for instance automation APIs, carrying the request timeout.
    pub http: reqwest::Client,
    pub api_host: String,
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        // Fleet
        .route(
            "/api/v1/instances",
            get(list_instances_handler).post(create_instance_handler),
        )
        .route("/api/v1/summary", get(summary_handler))
        .route("/api/v1/ports/next", get(next_ports_handler))
        .route("/api/v1/kill-switch", post(kill_switch_handler))
        .route("/api/v1/experts", post(upload_all_handler))
        // Single instance
        .route("/api/v1/instances/:id", delete(remove_instance_handler))
        .route("/api/v1/instances/:id/start", post(start_instance_handler))
        .route("/api/v1/instances/:id/stop", post(stop_instance_handler))
        .route("/api/v1/instances/:id/restart", post(restart_instance_handler))
        .route("/api/v1/instances/:id/stats", get(stats_handler))
        .route("/api/v1/instances/:id/experts", post(upload_handler))
        .route("/api/v1/instances/:id/logs/:category", get(log_files_handler))
        .route(
            "/api/v1/instances/:id/logs/:category/:filename",
            get(log_content_handler),
        )
        // Trading data from the instance's own API
        .route("/api/v1/instances/:id/trading/account", get(account_handler))
        .route("/api/v1/instances/:id/trading/positions", get(positions_handler))
        .route("/api/v1/instances/:id/trading/orders", get(orders_handler))
        .route("/api/v1/instances/:id/trading/history", get(history_handler))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let connected = state.fleet.is_connected().await;
    Json(serde_json::json!({
        "status": if connected { "healthy" } else { "degraded" },
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "docker_connected": connected,
    }))
}

async fn list_instances_handler(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Json<Vec<InstanceRecord>> {
    let records = match query.q {
        Some(q) => state.fleet.filter_by_name(&q).await,
        None => state.fleet.list().await,
    };
    Json(records)
}

async fn summary_handler(State(state): State<AppState>) -> Json<FleetSummary> {
    Json(state.fleet.summary().await)
}

async fn next_ports_handler(
    State(state): State<AppState>,
) -> Result<Json<PortPair>, ApiFailure> {
    Ok(Json(state.fleet.next_available_ports().await?))
}

async fn create_instance_handler(
    State(state): State<AppState>,
    Json(req): Json<CreateInstanceRequest>,
) -> Result<(StatusCode, Json<CreateInstanceResponse>), ApiFailure> {
    let created = match (req.vnc_port, req.api_port) {
        (Some(vnc), Some(api)) => {
            let id = state.fleet.create(&req.account, vnc, api).await?;
            CreateInstanceResponse {
                id,
                name: mt5_fleet::naming::container_name(req.account.trim()),
                vnc_port: vnc,
                api_port: api,
            }
        }
        (None, None) => {
            let created = state.fleet.create_instance(&req.account).await?;
            CreateInstanceResponse {
                id: created.id,
                name: created.name,
                vnc_port: created.ports.vnc,
                api_port: created.ports.api,
            }
        }
        _ => {
            return Err(FleetError::InvalidInput(
                "give both vnc_port and api_port, or neither".to_string(),
            )
            .into())
        }
    };
    info!(name = %created.name, "Instance created via API");
    Ok((StatusCode::CREATED, Json(created)))
}

async fn start_instance_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<OperationResult>, ApiFailure> {
    state.fleet.start(&id).await?;
    Ok(Json(OperationResult::ok()))
}

async fn stop_instance_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<OperationResult>, ApiFailure> {
    state.fleet.stop(&id).await?;
    Ok(Json(OperationResult::ok()))
}

async fn restart_instance_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<OperationResult>, ApiFailure> {
    state.fleet.restart(&id).await?;
    Ok(Json(OperationResult::ok()))
}

async fn remove_instance_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<OperationResult>, ApiFailure> {
    state.fleet.remove(&id).await?;
    Ok(Json(OperationResult::ok()))
}

async fn kill_switch_handler(State(state): State<AppState>) -> Json<BulkReport> {
    let report = state.fleet.kill_all().await;
    if !report.is_success() {
        warn!(failures = report.errors.len(), "Kill switch partially failed");
    }
    Json(report)
}

async fn stats_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Json<StatsSnapshot> {
    Json(state.fleet.stats(&id).await)
}

async fn log_files_handler(
    State(state): State<AppState>,
    Path((id, category)): Path<(String, String)>,
) -> Result<Json<LogFilesResponse>, ApiFailure> {
    let category: LogCategory = category.parse()?;
    let files = state.fleet.list_log_files(&id, category).await;
    Ok(Json(LogFilesResponse { files }))
}

async fn log_content_handler(
    State(state): State<AppState>,
    Path((id, category, filename)): Path<(String, String, String)>,
) -> Result<Json<LogContentResponse>, ApiFailure> {
    let category: LogCategory = category.parse()?;
    let content = state.fleet.read_log_file(&id, category, &filename).await?;
    Ok(Json(LogContentResponse { content }))
}

async fn upload_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<UploadQuery>,
    body: Bytes,
) -> Result<Json<OperationResult>, ApiFailure> {
    state.fleet.upload_bytes(&id, &query.filename, &body).await?;
    Ok(Json(OperationResult::ok()))
}

async fn upload_all_handler(
    State(state): State<AppState>,
    Query(query): Query<UploadQuery>,
    body: Bytes,
) -> Json<BulkReport> {
    Json(state.fleet.upload_to_running(&query.filename, &body).await)
}

/// Finds the record for `id` the way the daemon resolves references: exact
/// name, full or short id, or an unambiguous id prefix.
fn resolve_instance(
    records: Vec<InstanceRecord>,
    id: &str,
) -> Result<InstanceRecord, FleetError> {
    let id = id.trim();
    if id.is_empty() {
        return Err(FleetError::InvalidInput(
            "instance id must not be empty".to_string(),
        ));
    }
    if let Some(exact) = records
        .iter()
        .find(|r| r.name == id || r.id == id || id.starts_with(&r.id))
    {
        return Ok(exact.clone());
    }

    let mut matches = records.into_iter().filter(|r| r.id.starts_with(id));
    match (matches.next(), matches.next()) {
        (Some(record), None) => Ok(record),
        (Some(_), Some(_)) => Err(FleetError::InvalidInput(format!(
            "id prefix '{id}' matches more than one instance"
        ))),
        (None, _) => Err(FleetError::NotFound(format!("No such instance: {id}"))),
    }
}

/// Client for the automation API of the instance named or identified by `id`.
async fn trading_client(state: &AppState, id: &str) -> Result<TradingApiClient, ApiFailure> {
    let record = resolve_instance(state.fleet.try_list().await?, id)?;
    let port = record.api_port.ok_or_else(|| {
        FleetError::InvalidInput(format!("{} has no published API port", record.name))
    })?;
    Ok(TradingApiClient::with_client(
        state.http.clone(),
        format!("http://{}:{}", state.api_host, port),
    ))
}

async fn account_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<AccountInfo>>, ApiFailure> {
    let client = trading_client(&state, &id).await?;
    Ok(Json(client.account_info().await.into()))
}

async fn positions_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<PositionsReport>>, ApiFailure> {
    let client = trading_client(&state, &id).await?;
    Ok(Json(client.positions().await.into()))
}

async fn orders_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<OrdersReport>>, ApiFailure> {
    let client = trading_client(&state, &id).await?;
    Ok(Json(client.orders().await.into()))
}

async fn history_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<ApiResponse<HistoryReport>>, ApiFailure> {
    let client = trading_client(&state, &id).await?;
    let days = query.days.unwrap_or(DEFAULT_HISTORY_DAYS);
    Ok(Json(client.history(days).await.into()))
}

#[cfg(test)]
mod tests;
