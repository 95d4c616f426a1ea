use chrono::{DateTime, Utc};
use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres};
use tokio::sync::Mutex;
use tracing::{debug, info};

use strata_core::config::validate_identifier;
use strata_core::error::{Result, StrataError};
use strata_core::migration::TrackingRecord;

use super::{StoreFuture, TrackingStore};

/// Lock ID for the migration advisory lock.
/// "STRATA" in hex.
const MIGRATION_LOCK_ID: i64 = 0x535452415441;

/// Tracking store backed by a PostgreSQL table.
pub struct PgTrackingStore {
    pool: PgPool,
    table: String,
    /// Connection holding the session-level advisory lock, while locked.
    lock_conn: Mutex<Option<PoolConnection<Postgres>>>,
}

impl PgTrackingStore {
    /// Create a store for `table`, which must be a plain SQL identifier.
    pub fn new(pool: PgPool, table: impl Into<String>) -> Result<Self> {
        let table = table.into();
        validate_identifier(&table)?;
        Ok(Self {
            pool,
            table,
            lock_conn: Mutex::new(None),
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn table_exists(&self) -> Result<bool> {
        // Unquoted identifiers are folded to lower case by PostgreSQL.
        let exists = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM information_schema.tables
                WHERE table_schema = current_schema() AND table_name = $1
            )
            "#,
        )
        .bind(self.table.to_lowercase())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StrataError::Database(format!("Failed to inspect schema: {}", e)))?;

        Ok(exists)
    }

    async fn create_table(&self) -> Result<()> {
        if self.table_exists().await? {
            return Ok(());
        }

        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                module VARCHAR(255) NOT NULL,
                version INTEGER NOT NULL,
                name VARCHAR(255) NOT NULL,
                applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                PRIMARY KEY (module, version)
            )
            "#,
            self.table
        ))
        .execute(&self.pool)
        .await
        .map_err(|e| StrataError::Database(format!("Failed to create tracking table: {}", e)))?;

        info!(table = %self.table, "Created migration tracking table");
        Ok(())
    }

    async fn fetch_applied(&self) -> Result<Vec<TrackingRecord>> {
        let rows: Vec<(String, i32, String, DateTime<Utc>)> = sqlx::query_as(&format!(
            "SELECT module, version, name, applied_at FROM {} ORDER BY module, version",
            self.table
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StrataError::Database(format!("Failed to get applied migrations: {}", e)))?;

        Ok(rows
            .into_iter()
            .map(|(module, version, name, applied_at)| TrackingRecord {
                module,
                version,
                name,
                applied_at,
            })
            .collect())
    }

    async fn insert(&self, module: &str, version: i32, name: &str) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO {} (module, version, name) VALUES ($1, $2, $3)",
            self.table
        ))
        .bind(module)
        .bind(version)
        .bind(name)
        .execute(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => StrataError::Conflict {
                module: module.to_string(),
                version,
            },
            _ => StrataError::Database(format!(
                "Failed to record migration {} v{}: {}",
                module, version, e
            )),
        })?;

        debug!(module, version, name, "Recorded migration");
        Ok(())
    }

    async fn delete(&self, module: &str, version: i32) -> Result<()> {
        let result = sqlx::query(&format!(
            "DELETE FROM {} WHERE module = $1 AND version = $2",
            self.table
        ))
        .bind(module)
        .bind(version)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            StrataError::Database(format!(
                "Failed to remove migration {} v{}: {}",
                module, version, e
            ))
        })?;

        if result.rows_affected() == 0 {
            return Err(StrataError::NotApplied {
                module: module.to_string(),
                version,
            });
        }

        debug!(module, version, "Removed migration record");
        Ok(())
    }

    async fn fetch_tables(&self) -> Result<Vec<String>> {
        let tables = sqlx::query_scalar::<_, String>(
            r#"
            SELECT table_name::text FROM information_schema.tables
            WHERE table_schema = current_schema() AND table_type = 'BASE TABLE'
            ORDER BY table_name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(tables)
    }

    async fn acquire_lock(&self) -> Result<()> {
        let mut held = self.lock_conn.lock().await;
        if held.is_some() {
            return Err(StrataError::Database(
                "Migration lock is already held by this runner".to_string(),
            ));
        }

        debug!("Acquiring migration lock...");
        let mut conn = self.pool.acquire().await?;
        sqlx::query("SELECT pg_advisory_lock($1)")
            .bind(MIGRATION_LOCK_ID)
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                StrataError::Database(format!("Failed to acquire migration lock: {}", e))
            })?;
        debug!("Migration lock acquired");

        *held = Some(conn);
        Ok(())
    }

    async fn release_lock(&self) -> Result<()> {
        let Some(mut conn) = self.lock_conn.lock().await.take() else {
            return Ok(());
        };

        sqlx::query("SELECT pg_advisory_unlock($1)")
            .bind(MIGRATION_LOCK_ID)
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                StrataError::Database(format!("Failed to release migration lock: {}", e))
            })?;
        debug!("Migration lock released");
        Ok(())
    }
}

impl TrackingStore for PgTrackingStore {
    fn ensure_schema(&self) -> StoreFuture<'_, ()> {
        Box::pin(self.create_table())
    }

    fn schema_exists(&self) -> StoreFuture<'_, bool> {
        Box::pin(self.table_exists())
    }

    fn list_applied(&self) -> StoreFuture<'_, Vec<TrackingRecord>> {
        Box::pin(self.fetch_applied())
    }

    fn record_applied<'a>(
        &'a self,
        module: &'a str,
        version: i32,
        name: &'a str,
    ) -> StoreFuture<'a, ()> {
        Box::pin(self.insert(module, version, name))
    }

    fn record_reverted<'a>(&'a self, module: &'a str, version: i32) -> StoreFuture<'a, ()> {
        Box::pin(self.delete(module, version))
    }

    fn list_tables(&self) -> StoreFuture<'_, Vec<String>> {
        Box::pin(self.fetch_tables())
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            sqlx::query("SELECT 1").execute(&self.pool).await?;
            Ok(())
        })
    }

    fn table(&self) -> &str {
        &self.table
    }

    fn lock(&self) -> StoreFuture<'_, ()> {
        Box::pin(self.acquire_lock())
    }

    fn unlock(&self) -> StoreFuture<'_, ()> {
        Box::pin(self.release_lock())
    }
}
