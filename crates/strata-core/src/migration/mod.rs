mod definition;
mod registry;
mod status;

pub use definition::{
    BoxedStepFn, Direction, MigrationDefinition, MigrationId, MigrationStep, StepFuture,
};
pub use registry::{MigrationRegistry, Selector};
pub use status::{is_applied, module_statuses, ModuleStatus, TrackingRecord};
