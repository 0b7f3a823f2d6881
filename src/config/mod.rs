use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::bluetooth::SessionConfig;

/// Application configuration stored as TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Name of the paired earbuds to drive.
    pub device_name: String,
    /// Bluetooth address; takes precedence over the name when set.
    pub device_address: Option<String>,
    /// RFCOMM channels to try, in order.
    pub rfcomm_channels: Vec<u8>,
    pub connect_timeout_ms: u64,
    pub write_timeout_ms: u64,
    pub retry: RetryConfig,
}

/// Reconnect policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            device_name: "HUAWEI FreeBuds 5i".into(),
            device_address: None,
            rfcomm_channels: vec![16, 1],
            connect_timeout_ms: 5000,
            write_timeout_ms: 2000,
            retry: RetryConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff_ms: 250,
            max_backoff_ms: 4000,
        }
    }
}

impl AppConfig {
    /// Config file path: ~/.config/anctoggle/config.toml
    pub fn path() -> PathBuf {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("anctoggle");
        config_dir.join("config.toml")
    }

    /// Load config from disk, or return defaults.
    pub fn load() -> Self {
        let path = Self::path();
        if path.exists() {
            match std::fs::read_to_string(&path) {
                Ok(contents) => match Self::parse(&contents) {
                    Ok(config) => return config,
                    Err(e) => tracing::warn!("Failed to parse config: {}", e),
                },
                Err(e) => tracing::warn!("Failed to read config: {}", e),
            }
        }
        Self::default()
    }

    pub fn parse(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Save config to disk.
    pub fn save(&self) -> Result<PathBuf> {
        let path = Self::path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, self.to_toml()?)?;
        tracing::info!("Config saved to {}", path.display());
        Ok(path)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Identifier handed to the connector: address if configured, else name.
    pub fn device_identifier(&self) -> &str {
        self.device_address.as_deref().unwrap_or(&self.device_name)
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            max_attempts: self.retry.max_attempts,
            initial_backoff: Duration::from_millis(self.retry.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.retry.max_backoff_ms),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            write_timeout: Duration::from_millis(self.write_timeout_ms),
        }
    }
}
