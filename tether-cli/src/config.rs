//! Configuration for the tether CLI.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Daemon endpoint.
    pub daemon: DaemonConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Daemon host address.
    pub host: IpAddr,
    /// Daemon TCP port.
    pub port: u16,
    /// Idle-read timeout in seconds applied to every request.
    pub io_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            daemon: DaemonConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: tether_core::DEFAULT_DAEMON_PORT,
            io_timeout_secs: 30,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl CliConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    pub fn daemon_address(&self) -> SocketAddr {
        SocketAddr::new(self.daemon.host, self.daemon.port)
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let cfg = CliConfig::default();
        let text = toml::to_string_pretty(&cfg).unwrap();
        assert!(text.contains("port"));
        assert!(text.contains("level"));
    }

    #[test]
    fn roundtrip_config() {
        let cfg = CliConfig::default();
        let text = toml::to_string_pretty(&cfg).unwrap();
        let parsed: CliConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.daemon.port, tether_core::DEFAULT_DAEMON_PORT);
    }
}
