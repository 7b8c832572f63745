//! Configuration file resolution and TOML loading
//!
//! Config file lookup follows this priority order:
//! 1. Explicit path (highest priority)
//! 2. Environment variable
//! 3. OS-dependent user config directory (`<config_dir>/icat/<file_name>`)
//! 4. None: callers fall back to built-in defaults

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Logging configuration shared by all icat binaries
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level or filter directive (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Locate the configuration file for a module.
///
/// Returns `None` when no file exists at any of the candidate locations.
/// An explicitly provided path is returned even if it does not exist, so the
/// caller reports a clear error instead of silently using defaults.
pub fn resolve_config_path(
    explicit: Option<&Path>,
    env_var_name: &str,
    file_name: &str,
) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    let user_config = dirs::config_dir().map(|d| d.join("icat").join(file_name));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/icat").join(file_name);
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// Load a TOML config file, or return defaults when `path` is `None`.
pub fn load_toml_config<T>(path: Option<&Path>) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    let Some(path) = path else {
        tracing::info!("No config file found, using built-in defaults");
        return Ok(T::default());
    };

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;

    let config = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;

    tracing::info!(path = %path.display(), "Loaded configuration file");
    Ok(config)
}

/// OS-dependent default data directory (database, logs)
pub fn default_data_dir() -> PathBuf {
    if cfg!(target_os = "linux") {
        // ~/.local/share/icat
        dirs::data_local_dir()
            .map(|d| d.join("icat"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/icat"))
    } else if cfg!(target_os = "macos") {
        // ~/Library/Application Support/icat
        dirs::data_dir()
            .map(|d| d.join("icat"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/icat"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("icat"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\icat"))
    } else {
        PathBuf::from("./icat_data")
    }
}
