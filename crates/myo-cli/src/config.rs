//! Configuration file management.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tracing::warn;

use myo_types::ModeConfig;

/// Default connection timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 15;

/// Configuration file structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Default device address
    #[serde(default)]
    pub device: Option<String>,

    /// Connection timeout in seconds
    #[serde(default)]
    pub timeout: Option<u64>,

    /// Connection attempts to retry before giving up
    #[serde(default)]
    pub connect_retries: u32,

    /// Modes applied when streaming starts
    #[serde(default)]
    pub mode: ModeConfig,

    #[serde(default)]
    pub stream: StreamConfig,
}

/// Settings for the stream command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Seconds to stream for; unset streams until Ctrl-C
    pub duration: Option<f64>,
    /// Milliseconds between drains of the sample queue
    pub refresh_ms: u64,
    /// Milliseconds between printed channel summaries (0 disables)
    pub summary_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            duration: None,
            refresh_ms: 10,
            summary_ms: 500,
        }
    }
}

impl Config {
    /// Get the config file path
    pub fn path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("myo")
            .join("config.toml")
    }

    /// Load config from the default location, or return defaults if it is
    /// missing or unreadable.
    pub fn load() -> Self {
        let path = Self::path();
        if !path.exists() {
            return Self::default();
        }
        match Self::load_from(&path) {
            Ok(config) => config,
            Err(e) => {
                warn!("{:#}", e);
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.display()))
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write config: {}", path.display()))?;
        Ok(())
    }

    pub fn timeout_secs(&self) -> u64 {
        self.timeout.unwrap_or(DEFAULT_TIMEOUT_SECS)
    }
}

/// Resolve device from arg (or env var, via clap) or config.
pub fn resolve_device(device: Option<String>, config: &Config) -> Option<String> {
    device
        .filter(|d| !d.trim().is_empty())
        .or_else(|| config.device.clone())
}

pub fn require_device(device: Option<String>, config: &Config) -> Result<String> {
    match resolve_device(device, config) {
        Some(address) => Ok(address),
        None => bail!(
            "No device specified. Pass --device, set MYO_DEVICE, or add `device = \"...\"` to {}",
            Config::path().display()
        ),
    }
}
