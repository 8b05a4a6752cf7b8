use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::api::TransportConfig;
use crate::dispatch::DispatchConfig;

/// Top-level bridge config, loaded from TOML. Every field has a default, so
/// an empty or partial file is valid.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub server: ServerSection,
    pub tool: ToolSection,
    pub session: SessionSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub bind: SocketAddr,
    /// Browser origins allowed to call the HTTP API.
    pub cors_origins: Vec<String>,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 8080)),
            cors_origins: vec![
                "http://localhost:5173".to_string(),
                "http://127.0.0.1:5173".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolSection {
    /// chip-tool binary; a bare name is looked up on `PATH`.
    pub path: PathBuf,
    pub discovery_timeout_secs: u64,
    /// Unset means commands, reads and commissioning have no timeout.
    pub command_timeout_secs: Option<u64>,
    pub commissioning_node_id: String,
    pub default_endpoint: String,
}

impl Default for ToolSection {
    fn default() -> Self {
        Self {
            path: PathBuf::from("chip-tool"),
            discovery_timeout_secs: 60,
            command_timeout_secs: None,
            commissioning_node_id: "112233".to_string(),
            default_endpoint: "1".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    pub outbound_capacity: usize,
    pub max_clients: Option<usize>,
    pub ping_interval_secs: u64,
    pub pong_timeout_secs: u64,
    pub write_timeout_secs: u64,
    pub max_message_bytes: usize,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            outbound_capacity: 256,
            max_clients: Some(256),
            ping_interval_secs: 54,
            pong_timeout_secs: 60,
            write_timeout_secs: 10,
            max_message_bytes: 10 * 1024,
        }
    }
}

impl BridgeConfig {
    /// `<config dir>/chiplink/config.toml`, when the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("chiplink").join("config.toml"))
    }

    /// Load config from a TOML file path. Returns None if file doesn't exist.
    pub fn load(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        let config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?;
        config.validate().map_err(|reason| ConfigError::Invalid(path.to_path_buf(), reason))?;
        Ok(Some(config))
    }

    fn validate(&self) -> Result<(), String> {
        if self.session.ping_interval_secs == 0 {
            return Err("session.ping_interval_secs must be positive".into());
        }
        if self.session.pong_timeout_secs <= self.session.ping_interval_secs {
            return Err("session.pong_timeout_secs must exceed session.ping_interval_secs".into());
        }
        if self.tool.discovery_timeout_secs == 0 {
            return Err("tool.discovery_timeout_secs must be positive".into());
        }
        Ok(())
    }

    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            discovery_timeout: Duration::from_secs(self.tool.discovery_timeout_secs),
            command_timeout: self.tool.command_timeout_secs.map(Duration::from_secs),
            commissioning_node_id: self.tool.commissioning_node_id.clone(),
            default_endpoint: self.tool.default_endpoint.clone(),
        }
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            ping_interval: Duration::from_secs(self.session.ping_interval_secs),
            pong_timeout: Duration::from_secs(self.session.pong_timeout_secs),
            write_timeout: Duration::from_secs(self.session.write_timeout_secs),
            max_message_bytes: self.session.max_message_bytes,
        }
    }
}

/// Errors that can occur when loading config.
#[derive(Debug)]
pub enum ConfigError {
    ReadFailed(PathBuf, std::io::Error),
    ParseFailed(PathBuf, toml::de::Error),
    Invalid(PathBuf, String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReadFailed(path, e) => {
                write!(f, "Failed to read config {}: {}", path.display(), e)
            }
            Self::ParseFailed(path, e) => {
                write!(f, "Failed to parse config {}: {}", path.display(), e)
            }
            Self::Invalid(path, reason) => {
                write!(f, "Invalid config {}: {}", path.display(), reason)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ReadFailed(_, e) => Some(e),
            Self::ParseFailed(_, e) => Some(e),
            Self::Invalid(..) => None,
        }
    }
}
