mod database;
mod environment;

pub use database::DatabaseConfig;
pub use environment::Environment;

use once_cell::sync::Lazy;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, StrataError};

static ENV_VAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("env var pattern"));

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").expect("identifier pattern"));

/// Root configuration, usually loaded from `strata.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrataConfig {
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Tracking table configuration.
    #[serde(default)]
    pub tracking: TrackingConfig,

    /// SQL migrations declared by the application.
    #[serde(default)]
    pub migrations: Vec<MigrationSource>,

    /// Directory that relative script paths are resolved against.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

impl StrataConfig {
    /// Load configuration from a TOML file, substituting process environment variables.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_file_with(path, &|key| std::env::var(key).ok())
    }

    /// Load configuration from a TOML file with a custom variable lookup.
    pub fn from_file_with(
        path: impl AsRef<Path>,
        lookup: &dyn Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| StrataError::Config(format!("Failed to read config file: {}", e)))?;

        let mut config = Self::parse_toml_with(&content, lookup)?;
        config.base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse_toml(content: &str) -> Result<Self> {
        Self::parse_toml_with(content, &|key| std::env::var(key).ok())
    }

    /// Parse configuration from a TOML string with a custom variable lookup.
    pub fn parse_toml_with(content: &str, lookup: &dyn Fn(&str) -> Option<String>) -> Result<Self> {
        let content = substitute_env_vars(content, lookup);

        let config: Self = toml::from_str(&content)
            .map_err(|e| StrataError::Config(format!("Failed to parse config: {}", e)))?;
        config.tracking.validate()?;
        Ok(config)
    }

    /// Configuration without a file: database settings come from variables.
    pub fn from_vars(lookup: &dyn Fn(&str) -> Option<String>) -> Result<Self> {
        Ok(Self {
            database: DatabaseConfig::from_vars(lookup)?,
            tracking: TrackingConfig::default(),
            migrations: Vec::new(),
            base_dir: PathBuf::new(),
        })
    }

    /// Resolve a script path declared in the config file.
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }
}

/// Tracking table configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    /// Name of the tracking table.
    #[serde(default = "default_tracking_table")]
    pub table: String,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            table: default_tracking_table(),
        }
    }
}

impl TrackingConfig {
    pub fn validate(&self) -> Result<()> {
        validate_identifier(&self.table)
    }
}

fn default_tracking_table() -> String {
    "_migrations".to_string()
}

/// A SQL migration declared in the config file.
///
/// ```toml
/// [[migrations]]
/// module = "core"
/// version = 0
/// name = "init"
/// up = "sql/core/0000_init.up.sql"
/// down = "sql/core/0000_init.down.sql"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationSource {
    pub module: String,
    pub version: i32,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Script applying the migration.
    pub up: PathBuf,
    /// Script reverting the migration.
    #[serde(default)]
    pub down: Option<PathBuf>,
    /// Script seeding reference data after `up`.
    #[serde(default)]
    pub init_data: Option<PathBuf>,
}

/// Reject anything but a plain, unquoted SQL identifier.
pub fn validate_identifier(name: &str) -> Result<()> {
    if IDENTIFIER.is_match(name) {
        Ok(())
    } else {
        Err(StrataError::Config(format!(
            "Invalid table name '{}': expected letters, digits and underscores",
            name
        )))
    }
}

/// Substitute variables in the format ${VAR_NAME}. Unknown variables are left as-is.
fn substitute_env_vars(content: &str, lookup: &dyn Fn(&str) -> Option<String>) -> String {
    let mut result = content.to_string();

    for cap in ENV_VAR.captures_iter(content) {
        let var_name = &cap[1];
        if let Some(value) = lookup(var_name) {
            result = result.replace(&cap[0], &value);
        }
    }

    result
}
