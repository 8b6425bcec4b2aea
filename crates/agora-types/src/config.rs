//! Node configuration loading from TOML with defaults.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

/// Which transport backs the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportMode {
    /// Process-local hub; agents in one process share the bus directly.
    InProcess,
    /// TCP relay; agents connect to a shared relay node.
    Relay,
}

/// Transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Transport backing the bus.
    pub mode: TransportMode,
    /// Relay address, used when `mode = "relay"`.
    pub relay_addr: String,
    /// Pre-shared key for relay HMAC authentication.
    /// Required when `mode = "relay"` — the relay refuses unauthenticated clients.
    pub shared_secret: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            mode: TransportMode::InProcess,
            relay_addr: "127.0.0.1:7430".to_string(),
            shared_secret: String::new(),
        }
    }
}

/// Trust policy selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustMode {
    /// Every sender with a known key is trusted.
    Permissive,
    /// Only senders on the allow list are trusted.
    AllowList,
}

/// Admission-control settings applied to every inbound envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Maximum accepted messages per sender within one window.
    pub max_requests: usize,
    /// Sliding window length in seconds.
    pub window_seconds: u64,
    /// Trust policy.
    pub trust: TrustMode,
    /// Allow list, used when `trust = "allow_list"`.
    pub allow: Vec<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_requests: 100,
            window_seconds: 60,
            trust: TrustMode::Permissive,
            allow: Vec::new(),
        }
    }
}

/// HTTP gateway settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Whether to start the gateway alongside the node.
    pub enabled: bool,
    /// Address the gateway binds.
    pub listen_addr: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_addr: "127.0.0.1:7400".to_string(),
        }
    }
}

/// Durable storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Whether to record agents, task results, and observed messages.
    pub enabled: bool,
    /// SQLite database path.
    pub db_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            db_path: "data/agora.db".to_string(),
        }
    }
}

/// Full node configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Human-readable node name.
    pub node_name: String,
    /// Transport settings.
    pub transport: TransportConfig,
    /// Admission-control settings.
    pub security: SecurityConfig,
    /// Gateway settings.
    pub gateway: GatewayConfig,
    /// Storage settings.
    pub storage: StorageConfig,
}

/// Load node configuration from a TOML file, with defaults.
///
/// A missing file is not an error; parse failures are logged and the
/// defaults are used.
pub fn load_config(path: Option<&Path>) -> NodeConfig {
    let Some(config_path) = path else {
        return NodeConfig::default();
    };

    if !config_path.exists() {
        info!(path = %config_path.display(), "Config file not found, using defaults");
        return NodeConfig::default();
    }

    match std::fs::read_to_string(config_path) {
        Ok(contents) => match toml::from_str::<NodeConfig>(&contents) {
            Ok(config) => {
                info!(path = %config_path.display(), "Loaded configuration");
                config
            }
            Err(e) => {
                warn!(
                    error = %e,
                    path = %config_path.display(),
                    "Failed to parse config, using defaults"
                );
                NodeConfig::default()
            }
        },
        Err(e) => {
            warn!(
                error = %e,
                path = %config_path.display(),
                "Failed to read config file, using defaults"
            );
            NodeConfig::default()
        }
    }
}
