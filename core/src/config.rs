//! Configuration for the bale CLI and runtime.
//!
//! Loaded from YAML at `$BALE_CONFIG` or `~/.bale/config.yaml`. A missing
//! file yields the defaults; command-line flags override loaded values.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{BaleError, Result};

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "BALE_CONFIG";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BaleConfig {
    /// Default log level when `RUST_LOG` is not set
    pub log_level: LogLevel,

    /// Garbage collection settings
    pub gc: GcConfig,

    /// Bundle unpacking settings
    pub unpack: UnpackConfig,
}

impl BaleConfig {
    /// Default config path (`~/.bale/config.yaml`).
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .map(|h| h.join(".bale"))
            .unwrap_or_else(|| PathBuf::from(".bale"))
            .join("config.yaml")
    }

    /// Load from `$BALE_CONFIG`, falling back to the default path.
    pub fn load_default() -> Result<Self> {
        let path = std::env::var_os(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(Self::default_path);
        Self::load(&path)
    }

    /// Load from a YAML file. A missing file is not an error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            BaleError::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;

        serde_yaml::from_str(&content).map_err(|e| {
            BaleError::ConfigError(format!("Failed to parse {}: {}", path.display(), e))
        })
    }
}

/// Garbage collection configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GcConfig {
    /// Compute the white set without deleting anything
    pub dry_run: bool,
}

/// Bundle unpacking configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UnpackConfig {
    /// Unpack without changing file ownership
    pub rootless: bool,

    /// UID mappings (`container:host:size`)
    pub uid_map: Vec<String>,

    /// GID mappings (`container:host:size`)
    pub gid_map: Vec<String>,
}

/// Log level
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    #[default]
    Warn,
    Error,
}

impl LogLevel {
    /// Directive string usable with an env filter.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
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

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            _ => Err(format!(
                "unknown log level: '{}' (supported: debug, info, warn, error)",
                s
            )),
        }
    }
}
