//! Session configuration file format.
//!
//! Loads [`SessionConfig`] from a TOML file (`clsession.toml`) with
//! environment variable overrides via `CLSESSION_*` prefixed variables.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::discovery::DeviceSelection;

/// Default config file name looked up by the CLI.
pub const CONFIG_FILE_NAME: &str = "clsession.toml";

const LOG_LEVELS: [&str; 6] = ["trace", "debug", "info", "warn", "error", "off"];

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pretty => write!(f, "pretty"),
            Self::Compact => write!(f, "compact"),
            Self::Json => write!(f, "json"),
        }
    }
}

impl FromStr for LogFormat {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

/// Session configuration loaded from TOML with environment overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Platform position; negative selects the first platform.
    /// Override: `CLSESSION_PLATFORM_INDEX`
    pub platform_index: i32,

    /// Device position within the platform; negative selects the first.
    /// Override: `CLSESSION_DEVICE_INDEX`
    pub device_index: i32,

    /// Options passed to every program build, e.g. `-cl-fast-relaxed-math`.
    /// Override: `CLSESSION_BUILD_OPTIONS`
    pub build_options: String,

    /// Default tracing level when `RUST_LOG` is unset.
    /// Override: `CLSESSION_LOG_LEVEL`
    pub log_level: String,

    /// Override: `CLSESSION_LOG_FORMAT`
    pub log_format: LogFormat,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            platform_index: -1,
            device_index: -1,
            build_options: String::new(),
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}

/// Errors that can occur when loading or validating a [`SessionConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize TOML: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("invalid environment override {key}={value}: {reason}")]
    EnvOverride { key: String, value: String, reason: String },
}

impl SessionConfig {
    /// The default configuration as a TOML document.
    pub fn default_toml() -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(&Self::default())?)
    }

    /// Load configuration from a TOML file, falling back to defaults for
    /// missing fields, then apply environment variable overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Like [`load`](Self::load), but a missing file yields the defaults
    /// (still subject to environment overrides).
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            Self::from_env()
        }
    }

    /// Load from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let mut cfg: SessionConfig = toml::from_str(toml_str)?;
        cfg.apply_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load only from environment variables, starting from defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        cfg.apply_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !LOG_LEVELS.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(ConfigError::Validation(format!(
                "log_level must be one of {}, got '{}'",
                LOG_LEVELS.join("/"),
                self.log_level
            )));
        }
        if self.build_options.contains('\0') {
            return Err(ConfigError::Validation("build_options must not contain NUL".into()));
        }
        Ok(())
    }

    /// Device selection described by this configuration.
    pub fn selection(&self, list_only: bool) -> DeviceSelection {
        DeviceSelection::from_raw(self.platform_index, self.device_index, list_only)
    }

    /// Apply `CLSESSION_*` environment variable overrides.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(val) = std::env::var("CLSESSION_PLATFORM_INDEX") {
            self.platform_index = val.parse::<i32>().map_err(|e| ConfigError::EnvOverride {
                key: "CLSESSION_PLATFORM_INDEX".into(),
                value: val.clone(),
                reason: e.to_string(),
            })?;
        }

        if let Ok(val) = std::env::var("CLSESSION_DEVICE_INDEX") {
            self.device_index = val.parse::<i32>().map_err(|e| ConfigError::EnvOverride {
                key: "CLSESSION_DEVICE_INDEX".into(),
                value: val.clone(),
                reason: e.to_string(),
            })?;
        }

        if let Ok(val) = std::env::var("CLSESSION_BUILD_OPTIONS") {
            self.build_options = val;
        }

        if let Ok(val) = std::env::var("CLSESSION_LOG_LEVEL") {
            self.log_level = val;
        }

        if let Ok(val) = std::env::var("CLSESSION_LOG_FORMAT") {
            self.log_format = val.parse::<LogFormat>().map_err(|reason| ConfigError::EnvOverride {
                key: "CLSESSION_LOG_FORMAT".into(),
                value: val.clone(),
                reason,
            })?;
        }

        Ok(())
    }
}
