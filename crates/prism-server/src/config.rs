//! Server configuration.

use serde::{Deserialize, Serialize};

/// Control-plane server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Snapshot file for admin state, loaded on boot and written on
    /// graceful shutdown. Disabled when unset.
    pub snapshot_path: Option<String>,

    /// Seconds without a heartbeat before a proxy or launcher is marked
    /// unhealthy
    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout_seconds: u64,

    /// Seconds without a heartbeat before a proxy is evicted
    #[serde(default = "default_eviction_timeout")]
    pub eviction_timeout_seconds: u64,

    /// Interval of the heartbeat sweep task
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,

    /// Default grace period for drains triggered by revocation or shutdown
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_seconds: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8980
}

fn default_heartbeat_timeout() -> u64 {
    30
}

fn default_eviction_timeout() -> u64 {
    120
}

fn default_sweep_interval() -> u64 {
    10
}

fn default_drain_timeout() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            snapshot_path: None,
            heartbeat_timeout_seconds: default_heartbeat_timeout(),
            eviction_timeout_seconds: default_eviction_timeout(),
            sweep_interval_seconds: default_sweep_interval(),
            drain_timeout_seconds: default_drain_timeout(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &str) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply `PRISM_*` environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("PRISM_HOST") {
            self.host = host;
        }
        if let Ok(port) = std::env::var("PRISM_PORT") {
            if let Ok(port) = port.parse() {
                self.port = port;
            }
        }
        if let Ok(path) = std::env::var("PRISM_SNAPSHOT_PATH") {
            self.snapshot_path = Some(path);
        }
    }

    /// Socket address string to bind.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 8980);
        assert_eq!(config.heartbeat_timeout_seconds, 30);
        assert_eq!(config.drain_timeout_seconds, 30);
    }

    #[test]
    fn test_partial_toml() {
        let config: ServerConfig = toml::from_str("port = 9000").unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.host, "0.0.0.0");
    }
}
