pub mod config;
pub mod error;
pub mod migration;

pub use config::{DatabaseConfig, Environment, StrataConfig};
pub use error::{Result, StrataError};
pub use migration::{
    Direction, MigrationDefinition, MigrationId, MigrationRegistry, MigrationStep, ModuleStatus,
    Selector, TrackingRecord,
};
