//! Environment selection, configuration loading and database wiring.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context as _, Result};
use tracing::debug;

use strata_core::config::{Environment, StrataConfig};
use strata_core::migration::MigrationRegistry;
use strata_runtime::{definitions_from_config, Database, MigrationRunner, PgTrackingStore};

use super::{prompt, GlobalArgs};

/// Variables from an environment's dotenv file, falling back to the process
/// environment for anything the file does not set.
///
/// Once a file is loaded, database keys (`DATABASE_URL`, `DB_*`) come only
/// from that file, so a shell export cannot redirect the selected environment.
#[derive(Debug, Default)]
pub struct EnvVars {
    values: HashMap<String, String>,
    from_file: bool,
}

impl EnvVars {
    pub fn load(env: Environment, dir: &Path) -> Result<Self> {
        let path = dir.join(env.env_file());
        if !path.exists() {
            if env.env_file_required() {
                bail!("Environment file not found: {}", path.display());
            }
            debug!(path = %path.display(), "No env file, using process environment");
            return Ok(Self::default());
        }

        let mut values = HashMap::new();
        let iter = dotenvy::from_path_iter(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        for item in iter {
            let (key, value) = item.with_context(|| format!("Failed to parse {}", path.display()))?;
            values.insert(key, value);
        }

        debug!(path = %path.display(), count = values.len(), "Loaded env file");
        Ok(Self {
            values,
            from_file: true,
        })
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.resolve(key, |k| std::env::var(k).ok())
    }

    fn resolve(&self, key: &str, process: impl Fn(&str) -> Option<String>) -> Option<String> {
        if let Some(value) = self.values.get(key) {
            return Some(value.clone());
        }
        if self.from_file && is_database_key(key) {
            return None;
        }
        process(key)
    }
}

fn is_database_key(key: &str) -> bool {
    key == "DATABASE_URL" || key.starts_with("DB_")
}

/// Everything a command needs before touching the database.
pub struct Session {
    pub env: Environment,
    pub config: StrataConfig,
    pub yes: bool,
}

impl Session {
    /// Resolve the environment (prompting if needed) and load its configuration.
    pub fn open(global: &GlobalArgs) -> Result<Self> {
        let env = match global.env {
            Some(env) => env,
            None if global.yes => Environment::Local,
            None => prompt::choose_environment()?,
        };
        Self::for_env(env, global)
    }

    pub fn for_env(env: Environment, global: &GlobalArgs) -> Result<Self> {
        let vars = EnvVars::load(env, Path::new("."))?;
        let config = load_config(&global.config, &vars)?;
        Ok(Self {
            env,
            config,
            yes: global.yes,
        })
    }

    pub async fn connect(&self) -> Result<Database> {
        Database::connect(&self.config.database)
            .await
            .with_context(|| format!("Failed to connect to the {} database", self.env))
    }

    /// Registry of the SQL migrations declared in the config file.
    pub fn registry(&self, db: &Database) -> Result<MigrationRegistry> {
        let mut registry = MigrationRegistry::new();
        registry.register(definitions_from_config(&self.config, db.pool())?);
        Ok(registry)
    }

    pub async fn runner(&self) -> Result<MigrationRunner> {
        let db = self.connect().await?;
        let registry = self.registry(&db)?;
        let store = PgTrackingStore::new(db.pool().clone(), &self.config.tracking.table)?;
        Ok(MigrationRunner::new(Arc::new(store), registry))
    }

    /// Ask before a destructive action, unless running unattended.
    pub fn confirm(&self, question: &str) -> Result<()> {
        if self.yes {
            return Ok(());
        }
        prompt::confirm_or_cancel(question)
    }

    /// After a failed migration: halt when unattended, otherwise ask.
    pub fn continue_after_failure(&self) -> Result<bool> {
        if self.yes {
            return Ok(false);
        }
        prompt::confirm("Continue with the remaining migrations?")
    }
}

/// Load the config file if it exists, otherwise build one from `vars`.
/// A config file without a `[database]` target also falls back to `vars`.
pub fn load_config(path: &Path, vars: &EnvVars) -> Result<StrataConfig> {
    let lookup = |key: &str| vars.get(key);

    if !path.exists() {
        debug!(path = %path.display(), "No config file, using environment variables");
        return Ok(StrataConfig::from_vars(&lookup)?);
    }

    let mut config = StrataConfig::from_file_with(path, &lookup)
        .with_context(|| format!("Failed to load {}", path.display()))?;
    if !config.database.is_configured() {
        config.database = strata_core::config::DatabaseConfig::from_vars(&lookup)?;
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_missing_prod_env_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = EnvVars::load(Environment::Prod, dir.path()).unwrap_err();
        assert!(err.to_string().contains(".env.prod"));
    }

    #[test]
    fn test_missing_local_env_file_is_fine() {
        let dir = tempfile::tempdir().unwrap();
        assert!(EnvVars::load(Environment::Local, dir.path()).is_ok());
    }

    #[test]
    fn test_env_file_values_win() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(".env.prod"),
            "STRATA_TEST_DB_HOST=prod.internal\nSTRATA_TEST_DB_PORT=6543\n",
        )
        .unwrap();

        let vars = EnvVars::load(Environment::Prod, dir.path()).unwrap();
        assert_eq!(vars.get("STRATA_TEST_DB_HOST").as_deref(), Some("prod.internal"));
        assert_eq!(vars.get("STRATA_TEST_DB_PORT").as_deref(), Some("6543"));
    }

    #[test]
    fn test_env_file_shadows_process_database_keys() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(".env.prod"), "DB_HOST=prod.internal\n").unwrap();
        let vars = EnvVars::load(Environment::Prod, dir.path()).unwrap();

        let shell = |key: &str| match key {
            "DATABASE_URL" => Some("postgres://localhost/shop_local".to_string()),
            "DB_DATABASE" => Some("shop_local".to_string()),
            "EDITOR" => Some("vim".to_string()),
            _ => None,
        };

        assert_eq!(vars.resolve("DB_HOST", shell).as_deref(), Some("prod.internal"));
        assert_eq!(vars.resolve("DATABASE_URL", shell), None);
        assert_eq!(vars.resolve("DB_DATABASE", shell), None);
        assert_eq!(vars.resolve("EDITOR", shell).as_deref(), Some("vim"));
    }

    #[test]
    fn test_process_database_keys_used_without_env_file() {
        let dir = tempfile::tempdir().unwrap();
        let vars = EnvVars::load(Environment::Local, dir.path()).unwrap();

        let shell = |key: &str| (key == "DATABASE_URL").then(|| "postgres://ci/shop".to_string());
        assert_eq!(
            vars.resolve("DATABASE_URL", shell).as_deref(),
            Some("postgres://ci/shop")
        );
    }

    #[test]
    fn test_prod_config_ignores_shell_database_url() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(".env.prod"),
            "DB_HOST=prod.internal\nDB_DATABASE=shop\n",
        )
        .unwrap();
        std::env::set_var("DATABASE_URL", "postgres://localhost/shop_local");
        let vars = EnvVars::load(Environment::Prod, dir.path()).unwrap();

        let config = load_config(&dir.path().join("strata.toml"), &vars);
        std::env::remove_var("DATABASE_URL");

        let config = config.unwrap();
        assert_eq!(config.database.url, None);
        assert_eq!(config.database.host.as_deref(), Some("prod.internal"));
        assert_eq!(config.database.database.as_deref(), Some("shop"));
    }

    #[test]
    fn test_load_config_without_file_uses_vars() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(".env"),
            "DATABASE_URL=postgres://localhost/shop\n",
        )
        .unwrap();
        let vars = EnvVars::load(Environment::Local, dir.path()).unwrap();

        let config = load_config(&dir.path().join("strata.toml"), &vars).unwrap();
        assert_eq!(
            config.database.url.as_deref(),
            Some("postgres://localhost/shop")
        );
        assert!(config.migrations.is_empty());
    }

    #[test]
    fn test_load_config_substitutes_env_file_values() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(".env"), "SHOP_DB_URL=postgres://db/shop\n").unwrap();
        let config_path = dir.path().join("strata.toml");
        fs::write(
            &config_path,
            "[database]\nurl = \"${SHOP_DB_URL}\"\n\n[tracking]\ntable = \"schema_versions\"\n",
        )
        .unwrap();
        let vars = EnvVars::load(Environment::Local, dir.path()).unwrap();

        let config = load_config(&config_path, &vars).unwrap();
        assert_eq!(config.database.url.as_deref(), Some("postgres://db/shop"));
        assert_eq!(config.tracking.table, "schema_versions");
    }
}
