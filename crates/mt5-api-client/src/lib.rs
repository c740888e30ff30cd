//! # MT5 automation API client
//!
//! Every fleet instance serves a small REST API on its automation port
//! (container port 8001, published on the host port recorded for the
//! instance). This crate reads account state, open positions, pending orders
//! and deal history from it.
//!
//! ```no_run
//! use mt5_api_client::TradingApiClient;
//!
//! # async fn demo() -> Result<(), mt5_api_client::ApiError> {
//! let client = TradingApiClient::for_instance("localhost", 8002)?;
//! let account = client.account_info().await?;
//! println!("{} {}", account.balance, account.currency);
//! # Ok(())
//! # }
//! ```
//!
//! Failures are normalized into a handful of messages so dashboards can show
//! them as-is; [`ApiResponse`] wraps any result into the `{success, error}`
//! shape front-ends expect.

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Request timeout used unless the caller picks another.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Connection refused - MT5 API may not be running")]
    ConnectionRefused,
    #[error("Request timed out")]
    Timeout,
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Invalid response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("{0}")]
    Request(String),
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        // a connect timeout is reported as a refused connection
        if err.is_connect() {
            ApiError::ConnectionRefused
        } else if err.is_timeout() {
            ApiError::Timeout
        } else if err.is_decode() {
            ApiError::Request(format!("Invalid response: {err}"))
        } else {
            ApiError::Request(err.to_string())
        }
    }
}

/// `{ "success": true, ...data }` or `{ "success": false, "error": "..." }`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(flatten)]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> From<Result<T, ApiError>> for ApiResponse<T> {
    fn from(result: Result<T, ApiError>) -> Self {
        match result {
            Ok(data) => Self {
                success: true,
                data: Some(data),
                error: None,
            },
            Err(e) => Self {
                success: false,
                data: None,
                error: Some(e.to_string()),
            },
        }
    }
}

fn unknown() -> String {
    "Unknown".to_string()
}

fn usd() -> String {
    "USD".to_string()
}

fn one() -> i64 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountInfo {
    #[serde(default)]
    pub balance: f64,
    #[serde(default)]
    pub equity: f64,
    #[serde(default)]
    pub profit: f64,
    #[serde(default)]
    pub margin: f64,
    #[serde(default)]
    pub free_margin: f64,
    #[serde(default = "one")]
    pub leverage: i64,
    #[serde(default = "usd")]
    pub currency: String,
    #[serde(default = "unknown")]
    pub name: String,
    #[serde(default = "unknown")]
    pub server: String,
    #[serde(default = "unknown")]
    pub company: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionSide {
    Buy,
    Sell,
}

impl PositionSide {
    /// Terminal position type: 0 is a buy, anything else a sell.
    pub fn from_code(code: i64) -> Self {
        if code == 0 {
            PositionSide::Buy
        } else {
            PositionSide::Sell
        }
    }
}

/// Position as the terminal reports it.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct RawPosition {
    ticket: u64,
    symbol: String,
    #[serde(rename = "type")]
    kind: i64,
    volume: f64,
    price_open: f64,
    price_current: f64,
    profit: f64,
    swap: f64,
    sl: f64,
    tp: f64,
    time: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Position {
    pub ticket: u64,
    pub symbol: String,
    #[serde(rename = "type")]
    pub side: PositionSide,
    pub volume: f64,
    pub price_open: f64,
    pub price_current: f64,
    pub profit: f64,
    pub swap: f64,
    pub sl: f64,
    pub tp: f64,
    /// Opening time, passed through in whatever form the terminal sent.
    pub time: Value,
}

impl RawPosition {
    fn normalize(self) -> Position {
        Position {
            ticket: self.ticket,
            symbol: self.symbol,
            side: PositionSide::from_code(self.kind),
            volume: self.volume,
            price_open: self.price_open,
            price_current: self.price_current,
            profit: self.profit,
            swap: self.swap,
            sl: self.sl,
            tp: self.tp,
            time: match self.time {
                Value::Null => Value::String(String::new()),
                other => other,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionsReport {
    pub positions: Vec<Position>,
    pub total_profit: f64,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrdersReport {
    pub orders: Vec<Value>,
    pub count: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HistorySummary {
    pub total_profit: f64,
    pub total_trades: usize,
    pub wins: usize,
    pub losses: usize,
    pub win_rate: f64,
}

impl HistorySummary {
    /// Summarizes exit deals (`entry == 1`); entry deals carry no result.
    pub fn from_deals(deals: &[Value]) -> Self {
        let mut summary = Self::default();
        let mut total_profit = 0.0;
        for deal in deals {
            if deal.get("entry").and_then(Value::as_f64) != Some(1.0) {
                continue;
            }
            let profit = deal.get("profit").and_then(Value::as_f64).unwrap_or(0.0);
            total_profit += profit;
            summary.total_trades += 1;
            if profit > 0.0 {
                summary.wins += 1;
            } else if profit < 0.0 {
                summary.losses += 1;
            }
        }
        summary.total_profit = round_to(total_profit, 2);
        if summary.total_trades > 0 {
            summary.win_rate = round_to(
                summary.wins as f64 / summary.total_trades as f64 * 100.0,
                1,
            );
        }
        summary
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryReport {
    pub deals: Vec<Value>,
    pub summary: HistorySummary,
}

/// Client bound to one instance's automation API.
#[derive(Debug, Clone)]
pub struct TradingApiClient {
    client: Client,
    base_url: String,
}

impl TradingApiClient {
    /// Client for `base_url` (e.g. `http://localhost:8002`) with the default timeout.
    pub fn new(base_url: impl Into<String>) -> Result<Self, ApiError> {
        Ok(Self::with_client(build_http_client(DEFAULT_TIMEOUT)?, base_url))
    }

    pub fn for_instance(host: &str, port: u16) -> Result<Self, ApiError> {
        Self::new(format!("http://{host}:{port}"))
    }

    /// Reuses a configured `reqwest` client; its timeout applies.
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get(&self, endpoint: &str) -> Result<Value, ApiError> {
        let url = format!("{}/{}", self.base_url, endpoint);
        debug!(%url, "MT5 API request");
        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json().await?)
    }

    pub async fn account_info(&self) -> Result<AccountInfo, ApiError> {
        let data = self.get("account_info").await?;
        Ok(serde_json::from_value(data)?)
    }

    pub async fn positions(&self) -> Result<PositionsReport, ApiError> {
        let data = self.get("positions").await?;
        let positions = unwrap_listing(data, "positions")
            .into_iter()
            .map(|item| serde_json::from_value::<RawPosition>(item).map(RawPosition::normalize))
            .collect::<Result<Vec<_>, _>>()?;
        let total_profit: f64 = positions.iter().map(|p| p.profit).sum();
        Ok(PositionsReport {
            count: positions.len(),
            positions,
            total_profit,
        })
    }

    pub async fn orders(&self) -> Result<OrdersReport, ApiError> {
        let orders = unwrap_listing(self.get("orders").await?, "orders");
        Ok(OrdersReport {
            count: orders.len(),
            orders,
        })
    }

    /// Deals of the last `days` days plus a win/loss summary.
    pub async fn history(&self, days: u32) -> Result<HistoryReport, ApiError> {
        let data = self.get(&format!("history?days={days}")).await?;
        let deals = unwrap_listing(data, "deals");
        Ok(HistoryReport {
            summary: HistorySummary::from_deals(&deals),
            deals,
        })
    }

    /// Whether the API answers its ping endpoint with 200.
    pub async fn ping(&self) -> bool {
        self.get("ping").await.is_ok()
    }
}

pub fn build_http_client(timeout: Duration) -> Result<Client, ApiError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ApiError::Request(e.to_string()))
}

/// Accepts a bare list or an object holding the list under `key`.
fn unwrap_listing(data: Value, key: &str) -> Vec<Value> {
    match data {
        Value::Array(items) => items,
        Value::Object(mut fields) => match fields.remove(key) {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
