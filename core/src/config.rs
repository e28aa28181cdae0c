//! Operator configuration (`~/.a3s/pack/config.toml`).
//!
//! ```toml
//! default-builder = "cnbs/builder:bionic"
//! log-level = "info"
//!
//! [[run-images]]
//! image = "cnbs/run:bionic"
//! mirrors = ["registry.example.com/cnbs/run:bionic"]
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{PackError, Result};

/// Environment variable overriding the pack home directory.
pub const PACK_HOME_ENV: &str = "A3S_PACK_HOME";

/// Operator configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PackConfig {
    /// Builder used when a command does not name one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_builder: Option<String>,

    /// Log level used when `RUST_LOG` is unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<LogLevel>,

    /// Locally configured run image mirrors
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub run_images: Vec<RunImageConfig>,
}

/// Mirrors configured by the operator for one run image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunImageConfig {
    pub image: String,
    #[serde(default)]
    pub mirrors: Vec<String>,
}

impl PackConfig {
    /// Load configuration from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let data = std::fs::read_to_string(path).map_err(|e| {
            PackError::Config(format!("failed to read config {}: {}", path.display(), e))
        })?;
        toml::from_str(&data).map_err(|e| {
            PackError::Config(format!("failed to parse config {}: {}", path.display(), e))
        })
    }

    /// Load configuration from the default location.
    pub fn load_default() -> Result<Self> {
        Self::load(&config_path())
    }

    /// Write configuration to `path`, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let data = toml::to_string_pretty(self)?;
        std::fs::write(path, data)?;
        Ok(())
    }

    /// Configured mirrors keyed by primary run image name.
    pub fn mirrors(&self) -> HashMap<String, Vec<String>> {
        self.run_images
            .iter()
            .map(|ri| (ri.image.clone(), ri.mirrors.clone()))
            .collect()
    }
}

/// Root directory for pack state (`$A3S_PACK_HOME` or `~/.a3s/pack`).
pub fn pack_home() -> PathBuf {
    if let Some(home) = std::env::var_os(PACK_HOME_ENV) {
        return PathBuf::from(home);
    }
    dirs::home_dir()
        .map(|h| h.join(".a3s"))
        .unwrap_or_else(|| PathBuf::from(".a3s"))
        .join("pack")
}

/// Path of the operator config file.
pub fn config_path() -> PathBuf {
    pack_home().join("config.toml")
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}
