//! Server configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via KWIRE_CONFIG)
//! 3. Environment variables

use kwire_protocol::{DEFAULT_PORT, MAX_FRAME_SIZE};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Network configuration.
    pub network: NetworkConfig,
    /// Metrics configuration.
    pub metrics: MetricsConfig,
}

impl Config {
    /// Loads configuration from file, then applies environment variable overrides.
    ///
    /// Without `KWIRE_CONFIG` the file step is skipped; overrides are still
    /// applied and validated.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("KWIRE_CONFIG").ok().map(PathBuf::from);
        Self::load_with(path.as_deref(), |key| std::env::var(key).ok())
    }

    /// Loads configuration from an optional file and a variable lookup.
    pub fn load_with<F>(path: Option<&Path>, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        config.apply_overrides(&lookup);
        config.validate()?;

        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    fn apply_overrides(&mut self, lookup: &dyn Fn(&str) -> Option<String>) {
        self.network.apply_overrides(lookup);
        self.metrics.apply_overrides(lookup);
    }

    /// Checks values that deserialize fine but cannot be served.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.network.validate()
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        Ok(())
    }
}

/// How the server answers a request it cannot serve.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorReplyMode {
    /// Write a plain diagnostic text, unframed, then close.
    #[default]
    Legacy,
    /// Write an error response frame, then close.
    Framed,
}

impl FromStr for ErrorReplyMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "legacy" => Ok(ErrorReplyMode::Legacy),
            "framed" => Ok(ErrorReplyMode::Framed),
            other => Err(ConfigError::ValidationError(format!(
                "unknown error reply mode '{}'",
                other
            ))),
        }
    }
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address to bind to.
    #[serde(with = "socket_addr_serde")]
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Largest accepted request payload in bytes.
    pub max_frame_bytes: usize,
    /// Reply style for undecodable or unsupported requests.
    pub error_replies: ErrorReplyMode,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            max_connections: 1000,
            max_frame_bytes: MAX_FRAME_SIZE,
            error_replies: ErrorReplyMode::Legacy,
        }
    }
}

impl NetworkConfig {
    fn apply_overrides(&mut self, lookup: &dyn Fn(&str) -> Option<String>) {
        if let Some(addr) = lookup("KWIRE_BIND") {
            if let Ok(parsed) = addr.parse() {
                self.bind_addr = parsed;
            }
        }

        if let Some(max) = lookup("KWIRE_MAX_CONNECTIONS") {
            if let Ok(n) = max.parse() {
                self.max_connections = n;
            }
        }

        if let Some(max) = lookup("KWIRE_MAX_FRAME_BYTES") {
            if let Ok(n) = max.parse() {
                self.max_frame_bytes = n;
            }
        }

        if let Some(mode) = lookup("KWIRE_ERROR_REPLIES") {
            if let Ok(parsed) = mode.parse() {
                self.error_replies = parsed;
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_frame_bytes == 0 {
            return Err(ConfigError::ValidationError(
                "max_frame_bytes must be greater than 0".to_string(),
            ));
        }
        if self.max_frame_bytes > i32::MAX as usize {
            return Err(ConfigError::ValidationError(format!(
                "max_frame_bytes {} exceeds the int32 length prefix",
                self.max_frame_bytes
            )));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::ValidationError(
                "max_connections must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Enable metrics HTTP server.
    #[serde(default)]
    pub enabled: bool,
    /// Address to bind the metrics server to.
    #[serde(with = "socket_addr_serde")]
    pub bind_addr: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 9090)),
        }
    }
}

impl MetricsConfig {
    fn apply_overrides(&mut self, lookup: &dyn Fn(&str) -> Option<String>) {
        if let Some(enabled) = lookup("KWIRE_METRICS_ENABLED") {
            self.enabled = enabled == "1" || enabled.to_lowercase() == "true";
        }
        if let Some(addr) = lookup("KWIRE_METRICS_BIND") {
            if let Ok(parsed) = addr.parse() {
                self.bind_addr = parsed;
            }
        }
    }
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Custom serde module for SocketAddr (to handle as string in YAML).
mod socket_addr_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::net::SocketAddr;

    pub fn serialize<S>(addr: &SocketAddr, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&addr.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SocketAddr, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
