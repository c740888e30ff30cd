//! Normalized resource figures for one instance.

use crate::gateway::{ResourceSample, RuntimeGateway};
use chrono::{DateTime, Utc};
use mt5_common::{Result, StatsSnapshot, UPTIME_UNAVAILABLE};
use std::sync::Arc;
use tracing::{instrument, warn};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

#[derive(Clone)]
pub struct StatsCollector {
    gateway: Arc<dyn RuntimeGateway>,
}

impl StatsCollector {
    pub fn new(gateway: Arc<dyn RuntimeGateway>) -> Self {
        Self { gateway }
    }

    /// Never fails: a stopped instance gives the zeroed "Stopped" snapshot and
    /// any sampling failure gives the zeroed "Error" snapshot with its detail.
    #[instrument(skip(self))]
    pub async fn snapshot(&self, id: &str) -> StatsSnapshot {
        match self.sample(id).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, "Stats sampling failed");
                StatsSnapshot::failed(e.to_string())
            }
        }
    }

    async fn sample(&self, id: &str) -> Result<StatsSnapshot> {
        let details = self.gateway.inspect(id).await?;
        if !details.status.is_running() {
            return Ok(StatsSnapshot::stopped());
        }
        let sample = self.gateway.stats(id).await?;

        let uptime = match details.started_at.as_deref() {
            Some(started_at) => format_uptime(started_at, Utc::now()),
            None => UPTIME_UNAVAILABLE.to_string(),
        };
        Ok(StatsSnapshot {
            cpu_percent: cpu_percent(&sample),
            memory_bytes: sample.memory_usage,
            memory_mb: memory_mb(sample.memory_usage),
            memory_percent: memory_percent(&sample),
            uptime,
            error: None,
        })
    }
}

/// CPU share since the previous sample, scaled by core count, one decimal.
pub fn cpu_percent(sample: &ResourceSample) -> f64 {
    let cpu_delta = sample.cpu_total.saturating_sub(sample.precpu_total) as f64;
    let system_delta = sample.system_cpu.saturating_sub(sample.presystem_cpu) as f64;
    if system_delta <= 0.0 {
        return 0.0;
    }
    let cpus = sample.online_cpus.max(1) as f64;
    round1(cpu_delta / system_delta * cpus * 100.0)
}

pub fn memory_mb(bytes: u64) -> u64 {
    (bytes as f64 / BYTES_PER_MB).round() as u64
}

pub fn memory_percent(sample: &ResourceSample) -> f64 {
    if sample.memory_limit == 0 {
        return 0.0;
    }
    round1(sample.memory_usage as f64 / sample.memory_limit as f64 * 100.0)
}

/// `"{d}d {h}h"`, `"{h}h {m}m"` or `"{m}m"`; `"N/A"` when `started_at` is not
/// RFC 3339. A start time in the future counts as zero.
pub fn format_uptime(started_at: &str, now: DateTime<Utc>) -> String {
    let started = match DateTime::parse_from_rfc3339(started_at.trim()) {
        Ok(started) => started.with_timezone(&Utc),
        Err(_) => return UPTIME_UNAVAILABLE.to_string(),
    };
    let minutes_total = (now - started).num_minutes().max(0);
    let days = minutes_total / (24 * 60);
    let hours = (minutes_total / 60) % 24;
    let minutes = minutes_total % 60;

    if days > 0 {
        format!("{days}d {hours}h")
    } else if hours > 0 {
        format!("{hours}h {minutes}m")
    } else {
        format!("{minutes}m")
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
