//! Fixed naming conventions shared with instances that already exist on a host.
//! Changing any of these orphans running instances.

use mt5_common::{FleetError, LogCategory, Result};

/// Every fleet container name starts with this.
pub const CONTAINER_PREFIX: &str = "trading_mt5_";
/// Every fleet config volume name starts with this.
pub const VOLUME_PREFIX: &str = "mt5_config_";

/// Container-internal port of the remote display.
pub const VNC_CONTAINER_PORT: &str = "3000/tcp";
/// Container-internal port of the automation API.
pub const API_CONTAINER_PORT: &str = "8001/tcp";

/// Mount point of the per-account config volume.
pub const CONFIG_MOUNT: &str = "/config";
/// Destination of uploaded Expert Advisors.
pub const EXPERTS_DIR: &str = "/config/MQL5/Experts/";
pub const EXPERTS_LOG_DIR: &str = "/config/MQL5/Logs/";
pub const JOURNAL_LOG_DIR: &str = "/config/Logs/";

pub fn log_dir(category: LogCategory) -> &'static str {
    match category {
        LogCategory::Experts => EXPERTS_LOG_DIR,
        LogCategory::Journal => JOURNAL_LOG_DIR,
    }
}

pub fn is_fleet_member(name: &str) -> bool {
    name.starts_with(CONTAINER_PREFIX)
}

/// Trims and validates an account name so it can be embedded in container
/// and volume names.
pub fn normalize_account(account: &str) -> Result<&str> {
    let account = account.trim();
    if account.is_empty() {
        return Err(FleetError::InvalidInput(
            "account name must not be empty".to_string(),
        ));
    }
    if let Some(bad) = account
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')))
    {
        return Err(FleetError::InvalidInput(format!(
            "account name '{account}' contains invalid character '{bad}'"
        )));
    }
    Ok(account)
}

pub fn container_name(account: &str) -> String {
    format!("{CONTAINER_PREFIX}{account}")
}

pub fn volume_name(account: &str) -> String {
    format!("{VOLUME_PREFIX}{account}")
}
