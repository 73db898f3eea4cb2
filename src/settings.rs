//! Process settings.
//!
//! Resolution order, later wins: built-in defaults, an optional TOML file,
//! then environment variables and command-line flags (clap merges those two
//! into [`SettingsOverrides`] before they reach this module).
//!
//! ```toml
//! data_file = "data/rolls.json"
//! default_window = 15
//! host = "0.0.0.0"
//! port = 8080
//! log_level = "info"
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::chat_config::{ChatConfig, DEFAULT_WINDOW_CAPACITY, MAX_WINDOW_CAPACITY};
use crate::error::{LedgerError, Result};

pub const DEFAULT_DATA_FILE: &str = "data/rolls.json";
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Settings {
    /// JSON document holding every chat.
    pub data_file: PathBuf,
    /// Window capacity for new and migrated chats.
    pub default_window: usize,
    pub host: String,
    pub port: u16,
    /// `tracing` filter directive used when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_file: PathBuf::from(DEFAULT_DATA_FILE),
            default_window: DEFAULT_WINDOW_CAPACITY,
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

/// Optional values from a settings file or from flags/environment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SettingsOverrides {
    pub data_file: Option<PathBuf>,
    pub default_window: Option<usize>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub log_level: Option<String>,
}

impl SettingsOverrides {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| LedgerError::Settings(format!("invalid settings file: {e}")))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| LedgerError::Settings(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }
}

impl Settings {
    /// Resolve settings from an optional file plus flag/env overrides.
    pub fn resolve(file: Option<&Path>, overrides: SettingsOverrides) -> Result<Settings> {
        let mut settings = Settings::default();
        if let Some(path) = file {
            settings.merge(SettingsOverrides::from_file(path)?);
        }
        settings.merge(overrides);
        settings.validate()?;
        Ok(settings)
    }

    fn merge(&mut self, o: SettingsOverrides) {
        if let Some(v) = o.data_file {
            self.data_file = v;
        }
        if let Some(v) = o.default_window {
            self.default_window = v;
        }
        if let Some(v) = o.host {
            self.host = v;
        }
        if let Some(v) = o.port {
            self.port = v;
        }
        if let Some(v) = o.log_level {
            self.log_level = v;
        }
    }

    fn validate(&self) -> Result<()> {
        if !(1..=MAX_WINDOW_CAPACITY).contains(&self.default_window) {
            return Err(LedgerError::invalid_config(
                "default_window",
                format!("{} is outside 1..={MAX_WINDOW_CAPACITY}", self.default_window),
            ));
        }
        if self.data_file.as_os_str().is_empty() {
            return Err(LedgerError::Settings("data_file must not be empty".into()));
        }
        Ok(())
    }

    /// Config for chats created under these settings.
    pub fn chat_defaults(&self) -> ChatConfig {
        ChatConfig::with_capacity(self.default_window)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
