//! Runtime configuration
//!
//! Everything has a default so a partial JSON file (or none at all) is valid.
//! Field names are camelCase on the wire to match the dashboard's settings
//! files.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Env var naming the JSON config file
pub const CONFIG_PATH_ENV: &str = "LIVEFEED_CONFIG";
/// Env var overriding `websocket.baseUrl`
pub const WS_URL_ENV: &str = "LIVEFEED_WS_URL";
/// Env var overriding `apiBaseUrl`
pub const API_URL_ENV: &str = "LIVEFEED_API_URL";

// ─── Reconnection ────────────────────────────────────────────────────

/// Reconnection settings for one managed connection
///
/// Supplied on the first connect for a URL and fixed for the lifetime of
/// that connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconnectConfig {
    /// Retries allowed before the connection is abandoned
    pub max_reconnect_attempts: u32,
    /// Delay before the first retry (milliseconds)
    pub base_delay_ms: u64,
    /// Upper bound for the un-jittered delay (milliseconds)
    pub max_delay_ms: u64,
    /// How long a connection may stay in `Connecting` (milliseconds)
    pub connection_timeout_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: 5,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            connection_timeout_ms: 10_000,
        }
    }
}

impl ReconnectConfig {
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.base_delay_ms == 0 {
            return Err(Error::ConfigError("reconnect.baseDelayMs must be > 0".into()));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(Error::ConfigError(format!(
                "reconnect.maxDelayMs ({}) is below baseDelayMs ({})",
                self.max_delay_ms, self.base_delay_ms
            )));
        }
        if self.connection_timeout_ms == 0 {
            return Err(Error::ConfigError(
                "reconnect.connectionTimeoutMs must be > 0".into(),
            ));
        }
        Ok(())
    }
}

// ─── Fallback polling ────────────────────────────────────────────────

/// HTTP polling used once the live connection has been given up
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FallbackConfig {
    /// Interval between fetch cycles (milliseconds)
    pub poll_interval_ms: u64,
    /// Page size requested from list endpoints; large enough to cover every
    /// pending item in one page
    pub page_size: u32,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 30_000,
            page_size: 100,
        }
    }
}

impl FallbackConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(Error::ConfigError("fallback.pollIntervalMs must be > 0".into()));
        }
        if self.page_size == 0 {
            return Err(Error::ConfigError("fallback.pageSize must be > 0".into()));
        }
        Ok(())
    }
}

// ─── Endpoint ────────────────────────────────────────────────────────

/// Where the live socket lives: base address + path + query parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EndpointConfig {
    pub base_url: String,
    pub path: String,
    /// Extra query parameters (channel id, user id, ...)
    pub params: BTreeMap<String, String>,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            base_url: "ws://localhost:8000".to_string(),
            path: "/ws/dashboard/".to_string(),
            params: BTreeMap::new(),
        }
    }
}

// ─── Top level ───────────────────────────────────────────────────────

/// Full configuration for one dashboard feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DashboardConfig {
    pub websocket: EndpointConfig,
    pub api_base_url: String,
    pub reconnect: ReconnectConfig,
    pub fallback: FallbackConfig,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            websocket: EndpointConfig::default(),
            api_base_url: "http://localhost:8000/api".to_string(),
            reconnect: ReconnectConfig::default(),
            fallback: FallbackConfig::default(),
        }
    }
}

impl DashboardConfig {
    /// Parse a JSON config document
    pub fn from_json(raw: &str) -> Result<Self> {
        let config: DashboardConfig = serde_json::from_str(raw)
            .map_err(|e| Error::ConfigError(format!("invalid config JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a JSON config file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::ConfigError(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(&raw)
    }

    /// Load from `LIVEFEED_CONFIG` (or defaults) and apply env overrides
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply URL overrides from a key lookup (normally the process env)
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(ws) = lookup(WS_URL_ENV).filter(|v| !v.is_empty()) {
            self.websocket.base_url = ws;
        }
        if let Some(api) = lookup(API_URL_ENV).filter(|v| !v.is_empty()) {
            self.api_base_url = api;
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.reconnect.validate()?;
        self.fallback.validate()?;
        if self.websocket.base_url.is_empty() || self.api_base_url.is_empty() {
            return Err(Error::ConfigError("websocket and API base URLs are required".into()));
        }
        Ok(())
    }
}
