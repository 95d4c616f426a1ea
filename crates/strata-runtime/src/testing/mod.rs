//! Throwaway PostgreSQL databases for integration tests.
//!
//! The server is taken from `TEST_DATABASE_URL` only. `DATABASE_URL` and
//! `.env` files are never consulted, so tests cannot touch a real database.

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::debug;

use strata_core::config::DatabaseConfig;
use strata_core::error::{Result, StrataError};

/// Environment variable naming the server used by integration tests.
pub const TEST_DATABASE_URL: &str = "TEST_DATABASE_URL";

/// Administrative connection to the test server.
pub struct TestDatabase {
    pool: PgPool,
    url: String,
}

impl TestDatabase {
    pub async fn from_url(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new().max_connections(2).connect(url).await?;
        Ok(Self {
            pool,
            url: url.to_string(),
        })
    }

    /// Connect to `TEST_DATABASE_URL`, or `None` when it is not set.
    pub async fn from_env() -> Option<Result<Self>> {
        let url = std::env::var(TEST_DATABASE_URL).ok()?;
        Some(Self::from_url(&url).await)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Create a fresh database for one test.
    pub async fn isolated(&self, test_name: &str) -> Result<IsolatedTestDb> {
        let db_name = format!(
            "strata_test_{}_{}",
            sanitize_db_name(test_name),
            uuid::Uuid::new_v4().simple()
        );

        sqlx::query(&format!("CREATE DATABASE \"{}\"", db_name))
            .execute(&self.pool)
            .await?;
        debug!(database = %db_name, "Created test database");

        let url = replace_db_name(&self.url, &db_name);
        let pool = PgPoolOptions::new().max_connections(5).connect(&url).await?;

        Ok(IsolatedTestDb {
            pool,
            url,
            db_name,
            admin: self.pool.clone(),
        })
    }

    /// Configuration pointing at a database that does not exist on the test server.
    pub fn missing_database_config(&self) -> DatabaseConfig {
        let name = format!("strata_missing_{}", uuid::Uuid::new_v4().simple());
        DatabaseConfig::from_url(replace_db_name(&self.url, &name))
    }
}

/// A database that lives for a single test.
pub struct IsolatedTestDb {
    pool: PgPool,
    url: String,
    db_name: String,
    admin: PgPool,
}

impl IsolatedTestDb {
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn db_name(&self) -> &str {
        &self.db_name
    }

    /// Connection settings for this database.
    pub fn config(&self) -> DatabaseConfig {
        DatabaseConfig::from_url(self.url.clone())
    }

    /// Run raw SQL to set up test data or schema.
    pub async fn execute(&self, sql: &str) -> Result<()> {
        sqlx::query(sql).execute(&self.pool).await?;
        Ok(())
    }

    /// Drop the database.
    pub async fn cleanup(self) -> Result<()> {
        self.pool.close().await;

        sqlx::query("SELECT pg_terminate_backend(pid) FROM pg_stat_activity WHERE datname = $1")
            .bind(&self.db_name)
            .execute(&self.admin)
            .await?;

        sqlx::query(&format!("DROP DATABASE IF EXISTS \"{}\"", self.db_name))
            .execute(&self.admin)
            .await
            .map_err(|e| {
                StrataError::Database(format!("Failed to drop {}: {}", self.db_name, e))
            })?;
        Ok(())
    }
}

fn sanitize_db_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .take(24)
        .collect()
}

/// Swap the database component of a connection URL, keeping any query string.
fn replace_db_name(url: &str, db_name: &str) -> String {
    let (base, query) = match url.split_once('?') {
        Some((base, query)) => (base, Some(query)),
        None => (url, None),
    };

    let authority_end = base.find("://").map(|i| i + 3).unwrap_or(0);
    let prefix = match base[authority_end..].find('/') {
        Some(slash) => &base[..authority_end + slash],
        None => base,
    };

    match query {
        Some(query) => format!("{}/{}?{}", prefix, db_name, query),
        None => format!("{}/{}", prefix, db_name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_db_name() {
        assert_eq!(sanitize_db_name("run_pending::Applies"), "run_pending__applies");
        assert_eq!(sanitize_db_name(&"x".repeat(40)).len(), 24);
    }

    #[test]
    fn test_replace_db_name() {
        assert_eq!(
            replace_db_name("postgres://u:p@localhost:5432/postgres", "t1"),
            "postgres://u:p@localhost:5432/t1"
        );
        assert_eq!(
            replace_db_name("postgres://localhost/app?sslmode=disable", "t1"),
            "postgres://localhost/t1?sslmode=disable"
        );
        assert_eq!(replace_db_name("postgres://localhost", "t1"), "postgres://localhost/t1");
    }
}
