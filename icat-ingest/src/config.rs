//! Service configuration for icat-ingest
//!
//! Bootstrap file lookup: explicit path → `ICAT_CONFIG` → `<config_dir>/icat/icat-ingest.toml`
//! → built-in defaults. The extraction API key resolves ENV → TOML.

use crate::extraction::ExtractionConfig;
use crate::fusion::{units, FusionConfig};
use crate::orchestrator::OrchestratorConfig;
use crate::types::{FieldSchema, ValueType};
use icat_common::config::{default_data_dir, load_toml_config, resolve_config_path, LoggingConfig};
use icat_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const CONFIG_ENV_VAR: &str = "ICAT_CONFIG";
pub const CONFIG_FILE_NAME: &str = "icat-ingest.toml";
pub const API_KEY_ENV_VAR: &str = "ICAT_EXTRACTION_API_KEY";

/// Contents of `icat-ingest.toml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// SQLite database file (default: `<data_dir>/icat/icat.db`)
    pub database_path: Option<PathBuf>,
    pub bind_addr: String,
    pub logging: LoggingConfig,
    pub fusion: FusionConfig,
    pub orchestrator: OrchestratorConfig,
    pub extraction: ExtractionConfig,
    /// Replaces the built-in field schema when present
    pub schema: Option<FieldSchema>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            bind_addr: "127.0.0.1:5790".to_string(),
            logging: LoggingConfig::default(),
            fusion: FusionConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            extraction: ExtractionConfig::default(),
            schema: None,
        }
    }
}

impl ServiceConfig {
    /// Locate, parse and validate the configuration, then resolve the API key
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = resolve_config_path(explicit, CONFIG_ENV_VAR, CONFIG_FILE_NAME);
        let mut config: ServiceConfig = load_toml_config(path.as_deref())?;
        config.validate()?;
        config.extraction.api_key = resolve_api_key(config.extraction.api_key.as_deref());
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.fusion.validate().map_err(Error::Config)?;
        self.orchestrator.validate().map_err(Error::Config)?;
        self.extraction.validate().map_err(Error::Config)?;

        if self.bind_addr.parse::<std::net::SocketAddr>().is_err() {
            return Err(Error::Config(format!(
                "bind_addr must be a socket address, got {}",
                self.bind_addr
            )));
        }

        if let Some(schema) = &self.schema {
            validate_schema(schema)?;
        }
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| default_data_dir().join("icat.db"))
    }

    pub fn field_schema(&self) -> FieldSchema {
        self.schema.clone().unwrap_or_default()
    }
}

fn validate_schema(schema: &FieldSchema) -> Result<()> {
    if schema.is_empty() {
        return Err(Error::Config("schema.fields must not be empty".to_string()));
    }

    let mut names = HashSet::new();
    for field in &schema.fields {
        if field.name.trim().is_empty() {
            return Err(Error::Config("schema field name must not be empty".to_string()));
        }
        if !names.insert(field.name.as_str()) {
            return Err(Error::Config(format!("duplicate schema field: {}", field.name)));
        }
        if let Some(unit) = &field.unit {
            if field.value_type != ValueType::Numeric {
                return Err(Error::Config(format!(
                    "schema field {} has a unit but is not numeric",
                    field.name
                )));
            }
            if !units::is_known_unit(unit) {
                return Err(Error::Config(format!(
                    "schema field {} has unknown unit {}",
                    field.name, unit
                )));
            }
        }
    }
    Ok(())
}

/// Resolve the extraction API key
///
/// **Priority:** ENV → TOML. Warns when both are set.
pub fn resolve_api_key(toml_key: Option<&str>) -> Option<String> {
    let env_key = std::env::var(API_KEY_ENV_VAR)
        .ok()
        .filter(|k| is_valid_key(k));
    let toml_key = toml_key.filter(|k| is_valid_key(k));

    match (env_key, toml_key) {
        (Some(env), Some(_)) => {
            warn!(
                "Extraction API key found in environment and TOML. Using environment (highest priority)."
            );
            Some(env)
        }
        (Some(env), None) => {
            info!("Extraction API key loaded from environment variable");
            Some(env)
        }
        (None, Some(toml)) => {
            info!("Extraction API key loaded from TOML config");
            Some(toml.to_string())
        }
        (None, None) => None,
    }
}

/// Non-empty, non-whitespace
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}
