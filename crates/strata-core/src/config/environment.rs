use std::fmt;
use std::str::FromStr;

use crate::error::{Result, StrataError};

/// Deployment environment a command targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Local,
    Prod,
}

impl Environment {
    pub const ALL: [Environment; 2] = [Environment::Local, Environment::Prod];

    /// Dotenv file holding this environment's connection settings.
    pub fn env_file(&self) -> &'static str {
        match self {
            Environment::Local => ".env",
            Environment::Prod => ".env.prod",
        }
    }

    /// Production must never silently fall back to local settings.
    pub fn env_file_required(&self) -> bool {
        matches!(self, Environment::Prod)
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Local => write!(f, "local"),
            Environment::Prod => write!(f, "prod"),
        }
    }
}

impl FromStr for Environment {
    type Err = StrataError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" | "dev" => Ok(Environment::Local),
            "prod" | "production" => Ok(Environment::Prod),
            other => Err(StrataError::Config(format!(
                "Unknown environment '{}', expected local or prod",
                other
            ))),
        }
    }
}
