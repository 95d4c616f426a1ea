//! Persistent record of applied migrations.
//!
//! The runner is the only writer. Every write touches exactly one
//! `(module, version)` row, so the store always reflects the steps that
//! completed, even after a crash mid-run.

mod memory;
mod postgres;

pub use memory::InMemoryTrackingStore;
pub use postgres::PgTrackingStore;

use std::future::Future;
use std::pin::Pin;

use strata_core::error::Result;
use strata_core::migration::TrackingRecord;

/// Future returned by tracking store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Storage backend for tracking rows.
pub trait TrackingStore: Send + Sync {
    /// Create the tracking table if it does not exist. No DDL runs when it does.
    fn ensure_schema(&self) -> StoreFuture<'_, ()>;

    /// Whether the tracking table exists.
    fn schema_exists(&self) -> StoreFuture<'_, bool>;

    /// All rows ordered by `(module, version)`.
    fn list_applied(&self) -> StoreFuture<'_, Vec<TrackingRecord>>;

    /// Insert a row. Fails with `Conflict` if `(module, version)` is already recorded.
    fn record_applied<'a>(
        &'a self,
        module: &'a str,
        version: i32,
        name: &'a str,
    ) -> StoreFuture<'a, ()>;

    /// Delete a row. Fails with `NotApplied` if it does not exist.
    fn record_reverted<'a>(&'a self, module: &'a str, version: i32) -> StoreFuture<'a, ()>;

    /// Names of the tables visible in the current schema.
    fn list_tables(&self) -> StoreFuture<'_, Vec<String>>;

    /// Trivial round-trip to verify connectivity.
    fn ping(&self) -> StoreFuture<'_, ()>;

    /// Name of the tracking table.
    fn table(&self) -> &str;

    /// Take the exclusive migration lock, blocking until it is available.
    fn lock(&self) -> StoreFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }

    /// Release the migration lock.
    fn unlock(&self) -> StoreFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }
}
