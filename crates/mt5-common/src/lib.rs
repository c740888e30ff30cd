// Shared data model for the MT5 fleet: instance records, stats, log categories
// and the error taxonomy every component reports through.

use std::fmt::Display;
use std::str::FromStr;

pub use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FleetError {
    #[error("Docker client not connected: {0}")]
    Connectivity(String),

    #[error("Instance Not Found: {0}")]
    NotFound(String),

    /// The daemon rejected or failed the operation; the message is its own.
    #[error("Docker API Error: {0}")]
    Runtime(String),

    #[error("Invalid Input: {0}")]
    InvalidInput(String),

    #[error("No free port at or above {base}")]
    PortsExhausted { base: u16 },

    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
}

// Define the primary Result type for fleet operations
pub type Result<T> = std::result::Result<T, FleetError>;

/// Runtime status of an instance, as reported by the container daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    Created,
    Running,
    Paused,
    Restarting,
    Exited,
    Dead,
    Unknown,
}

impl InstanceStatus {
    pub fn is_running(self) -> bool {
        self == InstanceStatus::Running
    }

    pub fn as_str(self) -> &'static str {
        match self {
            InstanceStatus::Created => "created",
            InstanceStatus::Running => "running",
            InstanceStatus::Paused => "paused",
            InstanceStatus::Restarting => "restarting",
            InstanceStatus::Exited => "exited",
            InstanceStatus::Dead => "dead",
            InstanceStatus::Unknown => "unknown",
        }
    }
}

impl From<&str> for InstanceStatus {
    fn from(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "created" => InstanceStatus::Created,
            "running" => InstanceStatus::Running,
            "paused" => InstanceStatus::Paused,
            "restarting" => InstanceStatus::Restarting,
            "exited" => InstanceStatus::Exited,
            "dead" => InstanceStatus::Dead,
            _ => InstanceStatus::Unknown,
        }
    }
}

impl Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One fleet member, projected from the runtime on every registry query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRecord {
    /// Short (12 hex chars) container id.
    pub id: String,
    pub name: String,
    pub status: InstanceStatus,
    pub vnc_port: Option<u16>,
    pub api_port: Option<u16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortPair {
    pub vnc: u16,
    pub api: u16,
}

/// Uptime tag used for instances that are not running.
pub const UPTIME_STOPPED: &str = "Stopped";
/// Uptime tag used when sampling failed.
pub const UPTIME_ERROR: &str = "Error";
/// Uptime tag used when the start timestamp cannot be parsed.
pub const UPTIME_UNAVAILABLE: &str = "N/A";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub cpu_percent: f64,
    pub memory_bytes: u64,
    pub memory_mb: u64,
    pub memory_percent: f64,
    pub uptime: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StatsSnapshot {
    pub fn stopped() -> Self {
        Self::zeroed(UPTIME_STOPPED, None)
    }

    pub fn failed(detail: impl Into<String>) -> Self {
        Self::zeroed(UPTIME_ERROR, Some(detail.into()))
    }

    fn zeroed(uptime: &str, error: Option<String>) -> Self {
        Self {
            cpu_percent: 0.0,
            memory_bytes: 0,
            memory_mb: 0,
            memory_percent: 0.0,
            uptime: uptime.to_string(),
            error,
        }
    }
}

/// The two log families an instance writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogCategory {
    /// Output of running Expert Advisors.
    Experts,
    /// Terminal journal.
    Journal,
}

impl FromStr for LogCategory {
    type Err = FleetError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "experts" => Ok(LogCategory::Experts),
            "journal" => Ok(LogCategory::Journal),
            other => Err(FleetError::InvalidInput(format!(
                "unknown log category '{other}'"
            ))),
        }
    }
}

impl Display for LogCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogCategory::Experts => f.write_str("experts"),
            LogCategory::Journal => f.write_str("journal"),
        }
    }
}

/// Uploadable Expert Advisor artifact kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArtifactKind {
    /// `.ex5`
    Compiled,
    /// `.mq5`
    Source,
}

impl ArtifactKind {
    /// Classifies a file name by extension (case-insensitive).
    pub fn from_file_name(name: &str) -> Option<Self> {
        let (_, ext) = name.rsplit_once('.')?;
        if ext.eq_ignore_ascii_case("ex5") {
            Some(ArtifactKind::Compiled)
        } else if ext.eq_ignore_ascii_case("mq5") {
            Some(ArtifactKind::Source)
        } else {
            None
        }
    }
}

/// Outcome of an operation applied independently to many instances.
///
/// An empty `errors` list means every target succeeded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkReport {
    pub succeeded: Vec<String>,
    pub errors: Vec<String>,
}

impl BulkReport {
    /// Folds per-instance results into one report. `action` reads as
    /// "Failed to {action} {name}: {error}".
    pub fn collect<I>(action: &str, results: I) -> Self
    where
        I: IntoIterator<Item = (String, Result<()>)>,
    {
        results
            .into_iter()
            .fold(Self::default(), |mut report, (name, result)| {
                match result {
                    Ok(()) => report.succeeded.push(name),
                    Err(e) => report.errors.push(format!("Failed to {action} {name}: {e}")),
                }
                report
            })
    }

    /// A report for a bulk call that could not even enumerate its targets.
    pub fn aborted(err: &FleetError) -> Self {
        Self {
            succeeded: Vec::new(),
            errors: vec![err.to_string()],
        }
    }

    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Counts shown on dashboards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FleetSummary {
    pub total: usize,
    pub running: usize,
    pub stopped: usize,
}

impl FleetSummary {
    pub fn from_records(records: &[InstanceRecord]) -> Self {
        let running = records.iter().filter(|r| r.status.is_running()).count();
        Self {
            total: records.len(),
            running,
            stopped: records.len() - running,
        }
    }
}
