//! Configuration management for scanpilot

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{ConfigError, Result};

/// Base delay in seconds when neither the CLI nor the config file sets one.
/// Both the idle threshold and the poll interval derive from it.
pub const DEFAULT_DELAY_SECS: u64 = 30;

/// Defaults and credentials loaded from the optional config file.
///
/// Every field can be overridden per run by its CLI flag or `SCANPILOT_*`
/// environment variable; the file only provides the standing values.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Platform REST endpoint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform_url: Option<String>,

    /// Platform API key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Base delay in seconds for idle detection and job polling
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay_secs: Option<u64>,

    /// Session snapshot restored before a run starts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub baseline_session: Option<PathBuf>,
}

impl Config {
    /// Get the default config file path
    pub fn default_path() -> Result<PathBuf> {
        let home = dirs::home_dir().ok_or(ConfigError::Invalid(
            "Could not determine home directory".to_string(),
        ))?;

        Ok(home.join(".scanpilot").join("config.yaml"))
    }

    /// Load configuration: an explicitly given path must exist; the default
    /// path is optional and silently falls back to defaults when absent.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::load_from(path),
            None => {
                let path = Self::default_path()?;
                if path.exists() {
                    Self::load_from(&path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()).into());
        }
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents).map_err(ConfigError::from)?;
        Ok(config)
    }
}
