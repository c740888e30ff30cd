//! Fleet settings that may differ between hosts. The naming conventions in
//! [`crate::naming`] are deliberately not configurable.

use crate::ports::{DEFAULT_BASE_API, DEFAULT_BASE_VNC};
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FleetConfig {
    /// Application image every instance runs.
    pub image: String,
    /// Network all instances are attached to. Must already exist.
    pub network: String,
    /// Login profile user inside the instance.
    pub user: String,
    /// Grace period for graceful stop and restart.
    pub stop_grace: Duration,
    pub base_vnc_port: u16,
    pub base_api_port: u16,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            image: "gmag11/metatrader5_vnc:latest".to_string(),
            network: "trading_network".to_string(),
            user: "trader".to_string(),
            stop_grace: Duration::from_secs(30),
            base_vnc_port: DEFAULT_BASE_VNC,
            base_api_port: DEFAULT_BASE_API,
        }
    }
}

impl FleetConfig {
    /// Defaults overridden by `MT5_FLEET_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            image: lookup("MT5_FLEET_IMAGE").unwrap_or(defaults.image),
            network: lookup("MT5_FLEET_NETWORK").unwrap_or(defaults.network),
            user: lookup("MT5_FLEET_USER").unwrap_or(defaults.user),
            stop_grace: parsed(&lookup, "MT5_FLEET_STOP_GRACE_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.stop_grace),
            base_vnc_port: parsed(&lookup, "MT5_FLEET_BASE_VNC_PORT")
                .unwrap_or(defaults.base_vnc_port),
            base_api_port: parsed(&lookup, "MT5_FLEET_BASE_API_PORT")
                .unwrap_or(defaults.base_api_port),
        }
    }

    /// Environment of the in-instance login profile.
    pub fn instance_env(&self) -> Vec<(String, String)> {
        vec![
            ("CUSTOM_USER".to_string(), self.user.clone()),
            ("PASSWORD".to_string(), String::new()),
            ("VNCPASSWORD".to_string(), String::new()),
            ("VNC_DISABLE_AUTH".to_string(), "true".to_string()),
        ]
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(%key, value = %raw, "Ignoring unparsable setting");
            None
        }
    }
}
