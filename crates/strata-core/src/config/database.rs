use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgConnectOptions, PgSslMode};

use crate::error::{Result, StrataError};

/// Database configuration.
///
/// Either `url` is set, or the connection is assembled from the individual
/// `host`/`port`/`user`/`password`/`database` fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Connection URL. Takes precedence over the individual fields.
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default)]
    pub host: Option<String>,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub user: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// Target database name.
    #[serde(default)]
    pub database: Option<String>,

    /// Require TLS.
    #[serde(default)]
    pub ssl: bool,

    /// Connection pool size. One connection is held by the migration lock.
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    /// Pool checkout timeout in seconds.
    #[serde(default = "default_pool_timeout")]
    pub pool_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: None,
            port: default_port(),
            user: None,
            password: None,
            database: None,
            ssl: false,
            pool_size: default_pool_size(),
            pool_timeout_secs: default_pool_timeout(),
        }
    }
}

fn default_port() -> u16 {
    5432
}

fn default_pool_size() -> u32 {
    5
}

fn default_pool_timeout() -> u64 {
    30
}

impl DatabaseConfig {
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Default::default()
        }
    }

    /// Build from `DATABASE_URL`, or from `DB_HOST`, `DB_PORT`, `DB_USER`,
    /// `DB_PASSWORD`, `DB_DATABASE` and `DB_SSL` (`on` enables TLS).
    pub fn from_vars(lookup: &dyn Fn(&str) -> Option<String>) -> Result<Self> {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = non_empty("DATABASE_URL") {
            return Ok(Self::from_url(url));
        }

        let port = match non_empty("DB_PORT") {
            Some(port) => port
                .trim()
                .parse()
                .map_err(|_| StrataError::Config(format!("Invalid DB_PORT: {}", port)))?,
            None => default_port(),
        };

        Ok(Self {
            host: non_empty("DB_HOST"),
            port,
            user: non_empty("DB_USER"),
            password: lookup("DB_PASSWORD"),
            database: non_empty("DB_DATABASE"),
            ssl: non_empty("DB_SSL").is_some_and(|v| v.eq_ignore_ascii_case("on")),
            ..Default::default()
        })
    }

    /// Whether any connection target is configured.
    pub fn is_configured(&self) -> bool {
        self.url.is_some() || self.host.is_some()
    }

    /// Connection options for sqlx.
    pub fn connect_options(&self) -> Result<PgConnectOptions> {
        if let Some(url) = &self.url {
            return PgConnectOptions::from_str(url)
                .map_err(|e| StrataError::Config(format!("Invalid database URL: {}", e)));
        }

        let host = self.host.as_deref().ok_or_else(|| {
            StrataError::Config(
                "No database configured: set DATABASE_URL or DB_HOST, or add a [database] section"
                    .to_string(),
            )
        })?;

        let mut options = PgConnectOptions::new().host(host).port(self.port);
        if let Some(user) = &self.user {
            options = options.username(user);
        }
        if let Some(password) = &self.password {
            options = options.password(password);
        }
        if let Some(database) = &self.database {
            options = options.database(database);
        }
        options = options.ssl_mode(if self.ssl {
            PgSslMode::Require
        } else {
            PgSslMode::Disable
        });

        Ok(options)
    }

    /// Name of the target database, when it can be determined from configuration.
    pub fn database_name(&self) -> Option<String> {
        if let Some(database) = &self.database {
            return Some(database.clone());
        }
        self.connect_options()
            .ok()
            .and_then(|o| o.get_database().map(str::to_string))
    }
}
