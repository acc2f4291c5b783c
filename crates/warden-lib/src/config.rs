// ============================
// crates/warden-lib/src/config.rs
// ============================
//! Configuration management.
//!
//! Layers, lowest precedence first: built-in defaults, an optional TOML
//! file, then `WARDEN_*` environment variables. Nested keys use `__`, so
//! `WARDEN_AUTH__SESSION__TTL_HOURS=2` sets `auth.session.ttl_hours`.
use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use warden_common::{AuthSettings, SettingsError};

pub const ENV_PREFIX: &str = "WARDEN_";
pub const DEFAULT_CONFIG_FILE: &str = "warden.toml";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("invalid log level: {0}")]
    LogLevel(String),

    #[error(transparent)]
    Policy(#[from] SettingsError),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        ConfigError::Load(Box::new(err))
    }
}

/// Application settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Data directory path
    pub data_dir: PathBuf,
    /// Log level
    pub log_level: String,
    /// Emit JSON log lines instead of the human-readable format
    pub log_json: bool,
    /// Authorization policies
    pub auth: AuthSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            log_level: "info".to_string(),
            log_json: false,
            auth: AuthSettings::default(),
        }
    }
}

impl Settings {
    /// Load from `warden.toml` in the working directory (if present) and the
    /// environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(Path::new(DEFAULT_CONFIG_FILE))
    }

    /// Load from an explicit file. A missing file is not an error.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        Self::figment(path).extract::<Settings>()?.validated()
    }

    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !LOG_LEVELS.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(ConfigError::LogLevel(self.log_level.clone()));
        }
        self.auth.validate()?;
        Ok(())
    }

    fn validated(self) -> Result<Self, ConfigError> {
        self.validate()?;
        Ok(self)
    }
}
