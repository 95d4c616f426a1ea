//! Read-only database diagnostics.
//!
//! Connection problems are reported as data so callers can print a helpful
//! message instead of a raw driver error.

use std::fmt;
use std::io;

use serde::Serialize;
use tracing::debug;

use strata_core::config::{validate_identifier, DatabaseConfig};
use strata_core::error::{Result, StrataError};
use strata_core::migration::TrackingRecord;

use crate::db::Database;
use crate::tracking::{PgTrackingStore, TrackingStore};

/// SQLSTATE raised when the target database does not exist.
const INVALID_CATALOG_NAME: &str = "3D000";

/// Why the database could not be reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConnectionFailure {
    /// The server is up but the database has not been created.
    DatabaseMissing { database: Option<String> },
    /// Connection refused, host lookup failed or the server timed out.
    ServerUnreachable,
    Generic,
}

impl fmt::Display for ConnectionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionFailure::DatabaseMissing {
                database: Some(name),
            } => write!(f, "database \"{}\" does not exist", name),
            ConnectionFailure::DatabaseMissing { database: None } => {
                write!(f, "database does not exist")
            }
            ConnectionFailure::ServerUnreachable => write!(f, "database server is unreachable"),
            ConnectionFailure::Generic => write!(f, "connection failed"),
        }
    }
}

/// What the reporter found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DatabaseState {
    Unavailable {
        failure: ConnectionFailure,
        message: String,
    },
    /// Connected, but the tracking table is missing.
    NotInitialized { reason: String, tables: Vec<String> },
    Initialized {
        records: Vec<TrackingRecord>,
        tables: Vec<String>,
    },
}

impl DatabaseState {
    pub fn is_initialized(&self) -> bool {
        matches!(self, DatabaseState::Initialized { .. })
    }

    pub fn records(&self) -> &[TrackingRecord] {
        match self {
            DatabaseState::Initialized { records, .. } => records,
            _ => &[],
        }
    }
}

/// Inspect a database through an existing tracking store.
///
/// Never fails: every problem is folded into the returned state.
pub async fn inspect(store: &dyn TrackingStore) -> DatabaseState {
    inspect_as(store, None).await
}

/// Connect with `config` and inspect the tracking table `table`.
///
/// Only malformed configuration is returned as an error. Failures of the
/// connection attempt itself are classified like any other.
pub async fn connect_and_inspect(config: &DatabaseConfig, table: &str) -> Result<DatabaseState> {
    validate_identifier(table)?;
    config.connect_options()?;
    let database = config.database_name();

    let db = match Database::connect(config).await {
        Ok(db) => db,
        Err(e) => return Ok(unavailable(&e, database)),
    };

    let store = PgTrackingStore::new(db.pool().clone(), table)?;
    let state = inspect_as(&store, database).await;
    db.close().await;
    Ok(state)
}

async fn inspect_as(store: &dyn TrackingStore, database: Option<String>) -> DatabaseState {
    if let Err(e) = store.ping().await {
        return unavailable(&e, database);
    }

    let tables = match store.list_tables().await {
        Ok(tables) => tables,
        Err(e) => return unavailable(&e, database),
    };

    match store.schema_exists().await {
        Ok(false) => {
            return DatabaseState::NotInitialized {
                reason: format!("relation \"{}\" does not exist", store.table()),
                tables,
            }
        }
        Err(e) => return unavailable(&e, database),
        Ok(true) => {}
    }

    match store.list_applied().await {
        Ok(records) => {
            debug!(count = records.len(), "Read tracking records");
            DatabaseState::Initialized { records, tables }
        }
        Err(e) => unavailable(&e, database),
    }
}

fn unavailable(err: &StrataError, database: Option<String>) -> DatabaseState {
    let failure = match classify(err) {
        ConnectionFailure::DatabaseMissing { database: None } => {
            ConnectionFailure::DatabaseMissing { database }
        }
        other => other,
    };
    debug!(%failure, error = %err, "Database unavailable");
    DatabaseState::Unavailable {
        failure,
        message: err.to_string(),
    }
}

/// Classify a connection error.
pub fn classify(err: &StrataError) -> ConnectionFailure {
    let StrataError::Sql(sql) = err else {
        return classify_parts(None, None, &err.to_string());
    };

    match sql {
        sqlx::Error::Database(db) => classify_parts(db.code().as_deref(), None, db.message()),
        sqlx::Error::Io(io) => classify_parts(None, Some(io.kind()), &io.to_string()),
        sqlx::Error::PoolTimedOut => ConnectionFailure::ServerUnreachable,
        other => classify_parts(None, None, &other.to_string()),
    }
}

/// Classify from the raw parts of an error: SQLSTATE, I/O error kind and message.
pub fn classify_parts(
    code: Option<&str>,
    io_kind: Option<io::ErrorKind>,
    message: &str,
) -> ConnectionFailure {
    if code == Some(INVALID_CATALOG_NAME) {
        return ConnectionFailure::DatabaseMissing { database: None };
    }

    if let Some(
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::NotFound
        | io::ErrorKind::TimedOut
        | io::ErrorKind::AddrNotAvailable,
    ) = io_kind
    {
        return ConnectionFailure::ServerUnreachable;
    }

    let message = message.to_lowercase();
    if message.contains("lookup address")
        || message.contains("could not translate host name")
        || message.contains("connection refused")
    {
        return ConnectionFailure::ServerUnreachable;
    }

    ConnectionFailure::Generic
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::InMemoryTrackingStore;

    #[tokio::test]
    async fn test_missing_tracking_table_is_not_initialized() {
        let store = InMemoryTrackingStore::new().with_tables(["users", "products"]);

        match inspect(&store).await {
            DatabaseState::NotInitialized { reason, tables } => {
                assert!(reason.contains("does not exist"));
                assert_eq!(tables, vec!["products".to_string(), "users".to_string()]);
            }
            other => panic!("unexpected state: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_initialized_lists_records() {
        let store = InMemoryTrackingStore::new();
        store.ensure_schema().await.unwrap();
        store.record_applied("core", 0, "init").await.unwrap();

        let state = inspect(&store).await;
        assert!(state.is_initialized());
        assert_eq!(state.records().len(), 1);
        assert_eq!(state.records()[0].module, "core");
    }

    #[tokio::test]
    async fn test_refused_connection_is_unreachable() {
        let store = InMemoryTrackingStore::unreachable();

        match inspect(&store).await {
            DatabaseState::Unavailable { failure, message } => {
                assert_eq!(failure, ConnectionFailure::ServerUnreachable);
                assert!(!message.is_empty());
            }
            other => panic!("unexpected state: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_connect_rejects_bad_table_name() {
        let config = DatabaseConfig::from_url("postgres://localhost/app");
        let err = connect_and_inspect(&config, "drop table;").await.unwrap_err();
        assert!(matches!(err, StrataError::Config(_)));
    }

    #[test]
    fn test_classify_missing_database() {
        assert_eq!(
            classify_parts(Some("3D000"), None, "database \"shop\" does not exist"),
            ConnectionFailure::DatabaseMissing { database: None }
        );
    }

    #[test]
    fn test_classify_unreachable() {
        assert_eq!(
            classify_parts(None, Some(io::ErrorKind::ConnectionRefused), "refused"),
            ConnectionFailure::ServerUnreachable
        );
        assert_eq!(
            classify_parts(None, None, "failed to lookup address information"),
            ConnectionFailure::ServerUnreachable
        );
        assert_eq!(
            classify(&StrataError::Sql(sqlx::Error::PoolTimedOut)),
            ConnectionFailure::ServerUnreachable
        );
    }

    #[test]
    fn test_classify_generic_keeps_message() {
        let err = StrataError::Database("password authentication failed".into());
        assert_eq!(classify(&err), ConnectionFailure::Generic);

        match unavailable(&err, None) {
            DatabaseState::Unavailable { message, .. } => {
                assert!(message.contains("password authentication failed"))
            }
            other => panic!("unexpected state: {:?}", other),
        }
    }

    #[test]
    fn test_missing_database_carries_name() {
        let failure = ConnectionFailure::DatabaseMissing {
            database: Some("shop".into()),
        };
        assert_eq!(failure.to_string(), "database \"shop\" does not exist");
    }
}
