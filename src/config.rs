//! Configuration for the careplan engine, persisted as TOML.
//!
//! Every field has a serde default, so a partial (or empty) file is valid.
//!
//! ```toml
//! data_dir = "/var/lib/careplan"
//! log_filter = "careplan=debug"
//!
//! [window]
//! default_days = 7
//! bound_categories = ["checkup", "questionnaire", "monitoring"]
//!
//! [window.overrides]
//! checkup = 14
//!
//! [[catalog.monitoring]]
//! id = 10
//! code = "M_WEIGHT"
//! name = "Weight"
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::catalog::StaticCatalog;
use crate::error::ConfigError;
use crate::status::WindowPolicy;

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CareConfig {
    /// Directory for the redb file. `None` for memory-only mode.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    /// `tracing_subscriber` filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    #[serde(default)]
    pub window: WindowPolicy,
    #[serde(default)]
    pub catalog: StaticCatalog,
}

fn default_log_filter() -> String {
    "info".into()
}

impl Default for CareConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            log_filter: default_log_filter(),
            window: WindowPolicy::default(),
            catalog: StaticCatalog::default(),
        }
    }
}

impl CareConfig {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::parse(&content, path)
    }

    /// Load config if the file exists, else defaults.
    pub fn load_or_default(path: &Path) -> ConfigResult<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            Ok(Self::default())
        }
    }

    fn parse(content: &str, path: &Path) -> ConfigResult<Self> {
        let mut config: Self = toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        config.validate()?;
        config.catalog = config.catalog.indexed();
        Ok(config)
    }

    /// Reject values that parse but make no sense.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.window.default_days == 0 {
            return Err(ConfigError::Invalid {
                message: "window.default_days must be at least 1".into(),
            });
        }
        if let Some((category, _)) = self.window.overrides.iter().find(|(_, days)| **days == 0) {
            return Err(ConfigError::Invalid {
                message: format!("window.overrides.{category} must be at least 1"),
            });
        }
        Ok(())
    }

    /// Save config to a TOML file.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
        std::fs::write(path, content).map_err(|e| ConfigError::Write {
            path: path.display().to_string(),
            source: e,
        })
    }
}
