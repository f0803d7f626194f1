//! TOML-based configuration for the networking subsystem.
//!
//! The embedding application injects a [`NetworkConfig`]; every field has a
//! default so a missing or partial file still yields a working setup.
//! Timeouts are stored as fractional seconds in the TOML and exposed as
//! [`Duration`]s to the rest of the crate.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level networking configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct NetworkConfig {
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub relay: RelayConfig,
}

/// Settings for the UDP discovery service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiscoveryConfig {
    /// UDP port remote peers listen on; broadcasts target this port.
    #[serde(default = "default_discovery_port")]
    pub port: u16,
    /// Port to bind the local socket on when it must differ from `port`
    /// (two instances on one host, mainly for tests). Defaults to `port`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_port: Option<u16>,
    /// Broadcast addresses announcements are sent to. Empty (the default)
    /// means enumerate the broadcast address of every active non-loopback
    /// interface at startup; a non-empty list overrides the enumeration
    /// (tests pin 127.0.0.1 here).
    #[serde(default = "default_broadcast_addrs")]
    pub broadcast_addrs: Vec<Ipv4Addr>,
    /// Period between keepalive sweeps while liveness checking is enabled.
    #[serde(default = "default_keepalive_period_secs")]
    pub keepalive_period_secs: f64,
    /// How long a peer has to answer a keepalive before it is dropped.
    #[serde(default = "default_ack_timeout_secs")]
    pub ack_timeout_secs: f64,
}

/// Settings for the TCP relay server and session client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RelayConfig {
    /// TCP port the relay host listens on.
    #[serde(default = "default_relay_port")]
    pub port: u16,
    /// Read timeout on the session client's request/reply exchanges. The
    /// client keepalive interval is derived from this (0.75 ×).
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: f64,
}

impl DiscoveryConfig {
    /// The port to bind locally; `bind_port` when set, otherwise `port`.
    pub fn effective_bind_port(&self) -> u16 {
        self.bind_port.unwrap_or(self.port)
    }

    pub fn keepalive_period(&self) -> Duration {
        Duration::from_secs_f64(self.keepalive_period_secs)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.ack_timeout_secs)
    }
}

impl RelayConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.read_timeout_secs)
    }
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_discovery_port() -> u16 {
    10035
}
fn default_relay_port() -> u16 {
    11035
}
fn default_broadcast_addrs() -> Vec<Ipv4Addr> {
    Vec::new()
}
fn default_keepalive_period_secs() -> f64 {
    30.0
}
fn default_ack_timeout_secs() -> f64 {
    5.0
}
fn default_read_timeout_secs() -> f64 {
    5.0
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            port: default_discovery_port(),
            bind_port: None,
            broadcast_addrs: default_broadcast_addrs(),
            keepalive_period_secs: default_keepalive_period_secs(),
            ack_timeout_secs: default_ack_timeout_secs(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            port: default_relay_port(),
            read_timeout_secs: default_read_timeout_secs(),
        }
    }
}

// ── Load / save ───────────────────────────────────────────────────────────────

/// Loads a [`NetworkConfig`] from `path`, returning the defaults when the
/// file does not yet exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: &Path) -> Result<NetworkConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let cfg: NetworkConfig = toml::from_str(&content)?;
            Ok(cfg)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(NetworkConfig::default()),
        Err(e) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Persists `config` to `path`, creating parent directories as needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(path: &Path, config: &NetworkConfig) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_default_config_has_expected_ports() {
        let cfg = NetworkConfig::default();
        assert_eq!(cfg.discovery.port, 10035);
        assert_eq!(cfg.relay.port, 11035);
    }

    #[test]
    fn test_default_config_has_expected_timings() {
        let cfg = NetworkConfig::default();
        assert_eq!(cfg.discovery.keepalive_period(), Duration::from_secs(30));
        assert_eq!(cfg.discovery.ack_timeout(), Duration::from_secs(5));
        assert_eq!(cfg.relay.read_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_default_broadcast_list_requests_enumeration() {
        // Empty list = enumerate interface broadcast addresses at startup.
        let cfg = DiscoveryConfig::default();
        assert!(cfg.broadcast_addrs.is_empty());
    }

    #[test]
    fn test_effective_bind_port_prefers_override() {
        let mut cfg = DiscoveryConfig::default();
        assert_eq!(cfg.effective_bind_port(), 10035);
        cfg.bind_port = Some(10036);
        assert_eq!(cfg.effective_bind_port(), 10036);
    }

    #[test]
    fn test_config_toml_round_trip() {
        // Arrange
        let mut cfg = NetworkConfig::default();
        cfg.discovery.port = 20000;
        cfg.discovery.broadcast_addrs = vec!["192.168.1.255".parse().unwrap()];
        cfg.relay.read_timeout_secs = 2.5;

        // Act
        let toml_str = toml::to_string_pretty(&cfg).expect("serialize");
        let restored: NetworkConfig = toml::from_str(&toml_str).expect("deserialize");

        // Assert
        assert_eq!(cfg, restored);
    }

    #[test]
    fn test_deserialize_empty_toml_uses_defaults() {
        let cfg: NetworkConfig = toml::from_str("").expect("deserialize empty");
        assert_eq!(cfg, NetworkConfig::default());
    }

    #[test]
    fn test_deserialize_partial_section_overrides_only_named_fields() {
        let toml_str = r#"
[discovery]
port = 9999
"#;
        let cfg: NetworkConfig = toml::from_str(toml_str).expect("deserialize partial");
        assert_eq!(cfg.discovery.port, 9999);
        assert_eq!(cfg.discovery.ack_timeout_secs, 5.0);
        assert_eq!(cfg.relay.port, 11035);
    }

    #[test]
    fn test_load_config_returns_default_when_file_absent() {
        let path = Path::new("/nonexistent/lanchess/config.toml");
        let cfg = load_config(path).expect("absent file must yield defaults");
        assert_eq!(cfg, NetworkConfig::default());
    }

    #[test]
    fn test_save_and_load_config_round_trip_via_temp_dir() {
        // Arrange
        let dir = std::env::temp_dir().join(format!("lanchess_test_{}", Uuid::new_v4()));
        let path = dir.join("network.toml");
        let mut cfg = NetworkConfig::default();
        cfg.discovery.bind_port = Some(12345);

        // Act
        save_config(&path, &cfg).expect("save");
        let loaded = load_config(&path).expect("load");

        // Assert
        assert_eq!(loaded, cfg);
        assert_eq!(loaded.discovery.effective_bind_port(), 12345);

        // Cleanup
        std::fs::remove_dir_all(&dir).ok();
    }
}
