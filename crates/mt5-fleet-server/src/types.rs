use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use mt5_fleet::common::FleetError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateInstanceRequest {
    pub account: String,
    /// Both ports must be given to bypass allocation.
    pub vnc_port: Option<u16>,
    pub api_port: Option<u16>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateInstanceResponse {
    pub id: String,
    pub name: String,
    pub vnc_port: u16,
    pub api_port: u16,
}

/// Body of single-instance operations: `{"error": null}` on success.
#[derive(Debug, Serialize, Deserialize)]
pub struct OperationResult {
    pub error: Option<String>,
}

impl OperationResult {
    pub fn ok() -> Self {
        Self { error: None }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub q: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    pub filename: String,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub days: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LogFilesResponse {
    pub files: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LogContentResponse {
    pub content: String,
}

/// A [`FleetError`] rendered as a status code and an [`OperationResult`].
#[derive(Debug)]
pub struct ApiFailure(pub FleetError);

impl From<FleetError> for ApiFailure {
    fn from(err: FleetError) -> Self {
        Self(err)
    }
}

impl ApiFailure {
    pub fn status(&self) -> StatusCode {
        match self.0 {
            FleetError::NotFound(_) => StatusCode::NOT_FOUND,
            FleetError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            FleetError::Connectivity(_) => StatusCode::SERVICE_UNAVAILABLE,
            FleetError::PortsExhausted { .. } => StatusCode::CONFLICT,
            FleetError::Runtime(_) | FleetError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiFailure {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = OperationResult {
            error: Some(self.0.to_string()),
        };
        (status, Json(body)).into_response()
    }
}
