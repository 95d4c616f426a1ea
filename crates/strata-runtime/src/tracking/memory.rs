use std::io;

use chrono::Utc;
use tokio::sync::Mutex;

use strata_core::error::{Result, StrataError};
use strata_core::migration::TrackingRecord;

use super::{StoreFuture, TrackingStore};

/// Tracking store kept in process memory.
///
/// Behaves like [`super::PgTrackingStore`] with respect to conflicts and
/// missing rows, which makes it suitable for exercising the runner without a
/// database.
pub struct InMemoryTrackingStore {
    table: String,
    state: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    schema: bool,
    schema_creations: usize,
    records: Vec<TrackingRecord>,
    other_tables: Vec<String>,
    unreachable: bool,
}

impl InMemoryTrackingStore {
    pub fn new() -> Self {
        Self::with_table("_migrations")
    }

    pub fn with_table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            state: Mutex::new(MemoryState::default()),
        }
    }

    /// Pretend the database already contains these (non-tracking) tables.
    pub fn with_tables<I, S>(self, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let state = self.state.into_inner();
        Self {
            table: self.table,
            state: Mutex::new(MemoryState {
                other_tables: tables.into_iter().map(Into::into).collect(),
                ..state
            }),
        }
    }

    /// A store whose every operation fails as if the server refused connections.
    pub fn unreachable() -> Self {
        Self {
            table: "_migrations".to_string(),
            state: Mutex::new(MemoryState {
                unreachable: true,
                ..Default::default()
            }),
        }
    }

    /// Number of times the tracking table was actually created.
    pub async fn schema_creations(&self) -> usize {
        self.state.lock().await.schema_creations
    }

    fn check(state: &MemoryState) -> Result<()> {
        if state.unreachable {
            return Err(StrataError::Sql(sqlx::Error::Io(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "connection refused",
            ))));
        }
        Ok(())
    }

    fn check_schema(&self, state: &MemoryState) -> Result<()> {
        Self::check(state)?;
        if !state.schema {
            return Err(StrataError::Database(format!(
                "relation \"{}\" does not exist",
                self.table
            )));
        }
        Ok(())
    }
}

impl Default for InMemoryTrackingStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TrackingStore for InMemoryTrackingStore {
    fn ensure_schema(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            Self::check(&state)?;
            if !state.schema {
                state.schema = true;
                state.schema_creations += 1;
            }
            Ok(())
        })
    }

    fn schema_exists(&self) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let state = self.state.lock().await;
            Self::check(&state)?;
            Ok(state.schema)
        })
    }

    fn list_applied(&self) -> StoreFuture<'_, Vec<TrackingRecord>> {
        Box::pin(async move {
            let state = self.state.lock().await;
            self.check_schema(&state)?;
            let mut records = state.records.clone();
            records.sort_by(|a, b| {
                a.module
                    .cmp(&b.module)
                    .then_with(|| a.version.cmp(&b.version))
            });
            Ok(records)
        })
    }

    fn record_applied<'a>(
        &'a self,
        module: &'a str,
        version: i32,
        name: &'a str,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            self.check_schema(&state)?;
            if state
                .records
                .iter()
                .any(|r| r.module == module && r.version == version)
            {
                return Err(StrataError::Conflict {
                    module: module.to_string(),
                    version,
                });
            }
            state.records.push(TrackingRecord {
                module: module.to_string(),
                version,
                name: name.to_string(),
                applied_at: Utc::now(),
            });
            Ok(())
        })
    }

    fn record_reverted<'a>(&'a self, module: &'a str, version: i32) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            self.check_schema(&state)?;
            let before = state.records.len();
            state
                .records
                .retain(|r| !(r.module == module && r.version == version));
            if state.records.len() == before {
                return Err(StrataError::NotApplied {
                    module: module.to_string(),
                    version,
                });
            }
            Ok(())
        })
    }

    fn list_tables(&self) -> StoreFuture<'_, Vec<String>> {
        Box::pin(async move {
            let state = self.state.lock().await;
            Self::check(&state)?;
            let mut tables = state.other_tables.clone();
            if state.schema {
                tables.push(self.table.clone());
            }
            tables.sort();
            Ok(tables)
        })
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let state = self.state.lock().await;
            Self::check(&state)
        })
    }

    fn table(&self) -> &str {
        &self.table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ensure_schema_is_idempotent() {
        let store = InMemoryTrackingStore::new().with_tables(["users"]);
        for _ in 0..3 {
            store.ensure_schema().await.unwrap();
        }

        assert_eq!(store.schema_creations().await, 1);
        assert_eq!(
            store.list_tables().await.unwrap(),
            vec!["_migrations".to_string(), "users".to_string()]
        );
    }

    #[tokio::test]
    async fn test_record_applied_rejects_duplicates() {
        let store = InMemoryTrackingStore::new();
        store.ensure_schema().await.unwrap();
        store.record_applied("core", 0, "init").await.unwrap();

        let err = store.record_applied("core", 0, "init").await.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(store.list_applied().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_record_reverted_missing_row() {
        let store = InMemoryTrackingStore::new();
        store.ensure_schema().await.unwrap();

        let err = store.record_reverted("core", 0).await.unwrap_err();
        assert!(matches!(err, StrataError::NotApplied { .. }));
    }

    #[tokio::test]
    async fn test_writes_require_schema() {
        let store = InMemoryTrackingStore::new();
        let err = store.record_applied("core", 0, "init").await.unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[tokio::test]
    async fn test_unreachable_store() {
        let store = InMemoryTrackingStore::unreachable();
        assert!(matches!(
            store.ping().await,
            Err(StrataError::Sql(sqlx::Error::Io(_)))
        ));
    }
}
