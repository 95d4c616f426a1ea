use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{Result, StrataError};

/// Future returned by a migration step.
pub type StepFuture = Pin<Box<dyn Future<Output = Result<()>> + Send + 'static>>;

/// Type alias for a boxed migration step.
pub type BoxedStepFn = Arc<dyn Fn() -> StepFuture + Send + Sync>;

/// Direction of a migration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Up,
    Down,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => write!(f, "up"),
            Direction::Down => write!(f, "down"),
        }
    }
}

impl FromStr for Direction {
    type Err = StrataError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "up" => Ok(Direction::Up),
            "down" => Ok(Direction::Down),
            other => Err(StrataError::Config(format!("Invalid direction: {}", other))),
        }
    }
}

/// The individual steps a migration is made of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationStep {
    Up,
    InitData,
    Down,
}

impl fmt::Display for MigrationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationStep::Up => write!(f, "up"),
            MigrationStep::InitData => write!(f, "init_data"),
            MigrationStep::Down => write!(f, "down"),
        }
    }
}

/// Identity of a migration: owning module, version and name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MigrationId {
    pub module: String,
    pub version: i32,
    pub name: String,
}

impl MigrationId {
    pub fn new(module: impl Into<String>, version: i32, name: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            version,
            name: name.into(),
        }
    }
}

impl fmt::Display for MigrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} v{} ({})", self.module, self.version, self.name)
    }
}

/// A single migration contributed by an application module.
///
/// `version` orders migrations within a module and is the value persisted in
/// the tracking table. `init_data` only runs on forward application, after `up`.
#[derive(Clone)]
pub struct MigrationDefinition {
    /// Owning module (e.g. "core", "uac").
    pub module: String,
    /// Version within the module.
    pub version: i32,
    /// Name, unique within the module.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    up: BoxedStepFn,
    down: Option<BoxedStepFn>,
    init_data: Option<BoxedStepFn>,
}

impl MigrationDefinition {
    /// Create a definition whose steps are all no-ops until set.
    pub fn new(module: impl Into<String>, version: i32, name: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            version,
            name: name.into(),
            description: String::new(),
            up: Arc::new(|| Box::pin(async { Ok(()) })),
            down: None,
            init_data: None,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the forward step.
    pub fn up<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.up = boxed(f);
        self
    }

    /// Set the reverting step. Without one the migration cannot be rolled back.
    pub fn down<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.down = Some(boxed(f));
        self
    }

    /// Set the seed-data step.
    pub fn init_data<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.init_data = Some(boxed(f));
        self
    }

    pub fn id(&self) -> MigrationId {
        MigrationId::new(&self.module, self.version, &self.name)
    }

    pub fn has_down(&self) -> bool {
        self.down.is_some()
    }

    pub fn has_init_data(&self) -> bool {
        self.init_data.is_some()
    }

    /// Execute one step. Missing `init_data` is a no-op; missing `down` is an error.
    pub async fn run_step(&self, step: MigrationStep) -> Result<()> {
        match step {
            MigrationStep::Up => (self.up)().await,
            MigrationStep::InitData => match &self.init_data {
                Some(f) => f().await,
                None => Ok(()),
            },
            MigrationStep::Down => match &self.down {
                Some(f) => f().await,
                None => Err(StrataError::Config(format!(
                    "Migration {} has no down step",
                    self.id()
                ))),
            },
        }
    }
}

impl fmt::Debug for MigrationDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationDefinition")
            .field("module", &self.module)
            .field("version", &self.version)
            .field("name", &self.name)
            .field("description", &self.description)
            .field("has_down", &self.has_down())
            .field("has_init_data", &self.has_init_data())
            .finish()
    }
}

fn boxed<F, Fut>(f: F) -> BoxedStepFn
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(move || Box::pin(f()) as StepFuture)
}
