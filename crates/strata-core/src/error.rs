use thiserror::Error;

use crate::migration::{MigrationId, MigrationStep};

/// Core error type for strata operations.
#[derive(Error, Debug)]
pub enum StrataError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    /// A tracking row for this `(module, version)` already exists.
    #[error("Migration {module} v{version} is already applied")]
    Conflict { module: String, version: i32 },

    /// No tracking row exists for this `(module, version)`.
    #[error("Migration {module} v{version} is not applied")]
    NotApplied { module: String, version: i32 },

    /// A migration step returned an error. The tracking row for `id` was not written.
    #[error("Migration {id} failed during {step}: {source}")]
    Execution {
        id: MigrationId,
        step: MigrationStep,
        #[source]
        source: Box<StrataError>,
    },
}

impl StrataError {
    /// Wrap an error raised by a migration step.
    pub fn execution(id: MigrationId, step: MigrationStep, source: StrataError) -> Self {
        StrataError::Execution {
            id,
            step,
            source: Box::new(source),
        }
    }

    /// The migration whose step failed, if this is an execution error.
    pub fn failed_migration(&self) -> Option<&MigrationId> {
        match self {
            StrataError::Execution { id, .. } => Some(id),
            _ => None,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StrataError::Conflict { .. })
    }
}

/// Result type alias using StrataError.
pub type Result<T> = std::result::Result<T, StrataError>;
