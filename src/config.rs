//! tpush configuration management.
//!
//! Handles the daemon configuration file at:
//! - Linux: ~/.config/tpush/config.toml
//! - macOS: ~/Library/Application Support/tpush/config.toml
//! - Windows: %APPDATA%\tpush\config.toml
//!
//! Every field has a default, so a missing file or section is fine.

use crate::error::PushError;
use crate::socket_server::router::SelfDelivery;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// tpush configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PushConfig {
    /// Listener settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Ping / timeout settings
    #[serde(default)]
    pub liveness: LivenessConfig,

    /// Delivery settings
    #[serde(default)]
    pub routing: RoutingConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listener configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// URL path the WebSocket endpoint is served on
    pub path: String,
    /// Close the connection when a frame fails to decode
    pub close_on_decode_error: bool,
    /// Upper bound on a single frame write
    pub send_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            path: "/stream".to_string(),
            close_on_decode_error: true,
            send_timeout_ms: 10_000,
        }
    }
}

/// Liveness configuration. The receive timeout is the ping interval plus
/// `receive_margin_ms`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LivenessConfig {
    pub ping_interval_ms: u64,
    pub receive_margin_ms: u64,
    /// 0 disables the login deadline
    pub login_timeout_ms: u64,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            ping_interval_ms: 30_000,
            receive_margin_ms: 10_000,
            login_timeout_ms: 2_000,
        }
    }
}

/// Routing configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RoutingConfig {
    pub self_delivery: SelfDelivery,
    /// First client id handed out at login
    pub first_client_id: i64,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            self_delivery: SelfDelivery::Exclude,
            first_client_id: 1,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl PushConfig {
    /// Default location of the config file
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("tpush").join("config.toml"))
    }

    /// Load configuration from the default path
    pub fn load() -> Result<Self, PushError> {
        match Self::default_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self, PushError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|e| PushError::IoError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        Self::from_toml(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self, PushError> {
        let config: Self = toml::from_str(content).map_err(|e| PushError::ConfigError {
            message: format!("Failed to parse config: {}", e),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that serde alone cannot
    pub fn validate(&self) -> Result<(), PushError> {
        let fail = |message: &str| {
            Err(PushError::ConfigError {
                message: message.to_string(),
            })
        };

        if self.liveness.ping_interval_ms == 0 {
            return fail("liveness.ping_interval_ms must be greater than 0");
        }
        if self.liveness.receive_margin_ms == 0 {
            return fail("liveness.receive_margin_ms must be greater than 0 so the receive timeout outlasts the ping interval");
        }
        if !self.server.path.starts_with('/') {
            return fail("server.path must start with '/'");
        }
        if self.server.send_timeout_ms == 0 {
            return fail("server.send_timeout_ms must be greater than 0");
        }
        if self.routing.first_client_id < 1 {
            return fail("routing.first_client_id must be at least 1");
        }
        Ok(())
    }

    /// Socket address string for the listener
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
