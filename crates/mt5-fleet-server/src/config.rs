use std::net::SocketAddr;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Host on which instance automation ports are published.
    pub api_host: String,
    pub api_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            api_host: "localhost".to_string(),
            api_timeout: mt5_api_client::DEFAULT_TIMEOUT,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let number = |key: &str| {
            let raw = lookup(key)?;
            match raw.trim().parse::<u64>() {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!(%key, value = %raw, "Ignoring unparsable setting");
                    None
                }
            }
        };

        Self {
            port: number("MT5_SERVER_PORT")
                .and_then(|p| u16::try_from(p).ok())
                .unwrap_or(defaults.port),
            api_timeout: number("MT5_API_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.api_timeout),
            host: lookup("MT5_SERVER_HOST").unwrap_or(defaults.host),
            api_host: lookup("MT5_API_HOST").unwrap_or(defaults.api_host),
        }
    }

    pub fn bind_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }
}
