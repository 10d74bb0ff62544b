//! # Configuration Settings
//!
//! Defines the configuration structure for the edgeplane control plane.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::errors::{Error, Result};
use crate::xds::GatewaySpec;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default)]
pub struct Settings {
    /// Logging configuration
    #[validate(nested)]
    pub log: LogSettings,

    /// xDS server configuration
    #[validate(nested)]
    pub xds: XdsSettings,

    /// Path to the gateway spec TOML file. When unset, the built-in default
    /// gateway (catch-all direct response) is assembled.
    pub gateway_file: Option<PathBuf>,
}

impl Settings {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let settings = Self {
            log: LogSettings::from_env()?,
            xds: XdsSettings::from_env()?,
            gateway_file: std::env::var("EDGEPLANE_GATEWAY_FILE").ok().map(PathBuf::from),
        };

        settings.validate().map_err(Error::from)?;
        Ok(settings)
    }

    /// Load the gateway spec named by `gateway_file`, or the default spec
    /// when no file is configured
    pub fn load_gateway(&self) -> Result<GatewaySpec> {
        match &self.gateway_file {
            Some(path) => {
                let raw = std::fs::read_to_string(path)?;
                toml::from_str(&raw).map_err(|e| {
                    Error::config(format!("Invalid gateway spec {}: {}", path.display(), e))
                })
            }
            None => Ok(GatewaySpec::default()),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct LogSettings {
    /// Default log level directive when RUST_LOG is not set
    #[validate(length(min = 1, message = "Log level cannot be empty"))]
    pub level: String,

    /// Emit JSON-formatted log lines
    pub json: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self { level: "info".to_string(), json: false }
    }
}

impl LogSettings {
    fn from_env() -> Result<Self> {
        let level = std::env::var("EDGEPLANE_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let json = std::env::var("EDGEPLANE_LOG_JSON")
            .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        Ok(Self { level, json })
    }
}

/// xDS server configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct XdsSettings {
    /// Discovery server bind address
    #[validate(length(min = 1, message = "Bind address cannot be empty"))]
    pub bind_address: String,

    /// Discovery server port
    #[validate(range(min = 1, message = "Port must be between 1 and 65535"))]
    pub port: u16,

    /// Node identifier whose snapshot this process assembles and serves
    #[validate(length(min = 1, message = "Node id cannot be empty"))]
    pub node_id: String,
}

impl Default for XdsSettings {
    fn default() -> Self {
        Self { bind_address: "0.0.0.0".to_string(), port: 9000, node_id: "test".to_string() }
    }
}

impl XdsSettings {
    fn from_env() -> Result<Self> {
        let port = std::env::var("EDGEPLANE_XDS_PORT")
            .unwrap_or_else(|_| "9000".to_string())
            .parse()
            .map_err(|e| Error::config(format!("Invalid xDS port: {}", e)))?;

        let bind_address =
            std::env::var("EDGEPLANE_XDS_BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0".to_string());

        let node_id = std::env::var("EDGEPLANE_NODE_ID").unwrap_or_else(|_| "test".to_string());

        Ok(Self { bind_address, port, node_id })
    }
}
