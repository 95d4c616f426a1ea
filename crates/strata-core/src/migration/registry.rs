use std::collections::{BTreeSet, HashSet};
use std::str::FromStr;

use crate::error::{Result, StrataError};

use super::definition::MigrationDefinition;

/// Which registered migrations a command should act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// Every registered migration.
    All,
    /// 1-based position in [`MigrationRegistry::sorted`].
    Index(usize),
    /// Name, optionally qualified as `module/name`. Matched case-insensitively.
    Name {
        module: Option<String>,
        name: String,
    },
}

impl FromStr for Selector {
    type Err = StrataError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(StrataError::Config("Empty migration selector".into()));
        }
        if s.eq_ignore_ascii_case("all") {
            return Ok(Selector::All);
        }
        if let Ok(index) = s.parse::<usize>() {
            return Ok(Selector::Index(index));
        }
        match s.split_once('/') {
            Some((module, name)) if !module.is_empty() && !name.is_empty() => Ok(Selector::Name {
                module: Some(module.to_string()),
                name: name.to_string(),
            }),
            Some(_) => Err(StrataError::Config(format!(
                "Invalid migration selector: {}",
                s
            ))),
            None => Ok(Selector::Name {
                module: None,
                name: s.to_string(),
            }),
        }
    }
}

/// Explicitly assembled collection of migration definitions.
///
/// Modules contribute definitions at startup; nothing is discovered implicitly.
/// Duplicates are accepted here and rejected by [`MigrationRegistry::validate`].
#[derive(Debug, Clone, Default)]
pub struct MigrationRegistry {
    definitions: Vec<MigrationDefinition>,
}

impl MigrationRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            definitions: Vec::new(),
        }
    }

    /// Append definitions.
    pub fn register(&mut self, definitions: impl IntoIterator<Item = MigrationDefinition>) {
        self.definitions.extend(definitions);
    }

    /// Append the definitions returned by a module's registration function.
    pub fn register_module<F>(&mut self, module: F) -> &mut Self
    where
        F: FnOnce() -> Vec<MigrationDefinition>,
    {
        self.register(module());
        self
    }

    /// All definitions in registration order.
    pub fn all(&self) -> &[MigrationDefinition] {
        &self.definitions
    }

    /// All definitions ordered by `(module, version)`.
    pub fn sorted(&self) -> Vec<&MigrationDefinition> {
        let mut sorted: Vec<&MigrationDefinition> = self.definitions.iter().collect();
        sorted.sort_by(|a, b| {
            a.module
                .cmp(&b.module)
                .then_with(|| a.version.cmp(&b.version))
        });
        sorted
    }

    /// Distinct module names, sorted.
    pub fn modules(&self) -> Vec<&str> {
        self.definitions
            .iter()
            .map(|d| d.module.as_str())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Reject malformed or duplicate definitions.
    pub fn validate(&self) -> Result<()> {
        let mut versions = HashSet::new();
        let mut names = HashSet::new();

        for def in &self.definitions {
            if def.module.trim().is_empty() {
                return Err(StrataError::Config(format!(
                    "Migration '{}' (v{}) has an empty module",
                    def.name, def.version
                )));
            }
            if def.name.trim().is_empty() {
                return Err(StrataError::Config(format!(
                    "Migration {} v{} has an empty name",
                    def.module, def.version
                )));
            }
            if !versions.insert((def.module.as_str(), def.version)) {
                return Err(StrataError::Config(format!(
                    "Duplicate migration version {} in module '{}'",
                    def.version, def.module
                )));
            }
            if !names.insert((def.module.as_str(), def.name.as_str())) {
                return Err(StrataError::Config(format!(
                    "Duplicate migration name '{}' in module '{}'",
                    def.name, def.module
                )));
            }
        }

        Ok(())
    }

    /// Resolve a selector against [`MigrationRegistry::sorted`].
    pub fn select(&self, selector: &Selector) -> Result<Vec<&MigrationDefinition>> {
        let sorted = self.sorted();

        match selector {
            Selector::All => Ok(sorted),
            Selector::Index(index) => {
                if *index >= 1 && *index <= sorted.len() {
                    Ok(vec![sorted[index - 1]])
                } else {
                    Err(StrataError::NotFound(format!(
                        "No migration at position {} ({} registered)",
                        index,
                        sorted.len()
                    )))
                }
            }
            Selector::Name { module, name } => {
                let matches: Vec<&MigrationDefinition> = sorted
                    .into_iter()
                    .filter(|d| d.name.eq_ignore_ascii_case(name))
                    .filter(|d| {
                        module
                            .as_deref()
                            .map_or(true, |m| d.module.eq_ignore_ascii_case(m))
                    })
                    .collect();

                match matches.len() {
                    0 => Err(StrataError::NotFound(format!("Migration not found: {}", name))),
                    1 => Ok(matches),
                    _ => {
                        let candidates: Vec<String> = matches
                            .iter()
                            .map(|d| format!("{}/{}", d.module, d.name))
                            .collect();
                        Err(StrataError::Config(format!(
                            "Migration name '{}' is ambiguous; use one of: {}",
                            name,
                            candidates.join(", ")
                        )))
                    }
                }
            }
        }
    }
}
