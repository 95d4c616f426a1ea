pub mod db;
pub mod diff;
pub mod reporter;
pub mod runner;
pub mod sql;
pub mod tracking;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use db::Database;
pub use diff::{fetch_schema, DatabaseSchema, DiffAction, DiffEntry, SchemaDiff};
pub use reporter::{connect_and_inspect, inspect, ConnectionFailure, DatabaseState};
pub use runner::{MigrationRunner, RunReport};
pub use sql::{definitions_from_config, load_sql_migrations, SqlMigration};
pub use tracking::{InMemoryTrackingStore, PgTrackingStore, TrackingStore};
