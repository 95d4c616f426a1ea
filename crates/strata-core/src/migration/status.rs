//! Applied-migration records and the per-module status derived from them.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::definition::{MigrationDefinition, MigrationId};

/// A row of the tracking table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingRecord {
    pub module: String,
    pub version: i32,
    pub name: String,
    pub applied_at: DateTime<Utc>,
}

impl TrackingRecord {
    pub fn id(&self) -> MigrationId {
        MigrationId::new(&self.module, self.version, &self.name)
    }
}

/// Current vs latest version of one module. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleStatus {
    pub module: String,
    /// Highest applied version among registered definitions.
    pub current_version: Option<i32>,
    /// Highest registered version.
    pub latest_version: i32,
    /// Registered definitions with no tracking row.
    pub pending_count: usize,
}

impl ModuleStatus {
    pub fn is_up_to_date(&self) -> bool {
        self.pending_count == 0
    }
}

/// Project the status of every registered module, sorted by module name.
///
/// Tracking rows for modules or versions that are not registered are ignored.
pub fn module_statuses<'a>(
    definitions: impl IntoIterator<Item = &'a MigrationDefinition>,
    applied: &[TrackingRecord],
) -> Vec<ModuleStatus> {
    let applied: HashSet<(&str, i32)> = applied
        .iter()
        .map(|r| (r.module.as_str(), r.version))
        .collect();

    let mut statuses: BTreeMap<&str, ModuleStatus> = BTreeMap::new();

    for def in definitions {
        let status = statuses
            .entry(def.module.as_str())
            .or_insert_with(|| ModuleStatus {
                module: def.module.clone(),
                current_version: None,
                latest_version: def.version,
                pending_count: 0,
            });

        status.latest_version = status.latest_version.max(def.version);

        if applied.contains(&(def.module.as_str(), def.version)) {
            status.current_version = Some(
                status
                    .current_version
                    .map_or(def.version, |v| v.max(def.version)),
            );
        } else {
            status.pending_count += 1;
        }
    }

    statuses.into_values().collect()
}

/// Whether a definition has a tracking row.
pub fn is_applied(definition: &MigrationDefinition, applied: &[TrackingRecord]) -> bool {
    applied
        .iter()
        .any(|r| r.module == definition.module && r.version == definition.version)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(module: &str, version: i32) -> TrackingRecord {
        TrackingRecord {
            module: module.into(),
            version,
            name: format!("m{}", version),
            applied_at: Utc::now(),
        }
    }

    #[test]
    fn test_status_with_nothing_applied() {
        let defs = vec![
            MigrationDefinition::new("core", 0, "init"),
            MigrationDefinition::new("core", 2, "discounts"),
        ];
        let statuses = module_statuses(&defs, &[]);

        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].current_version, None);
        assert_eq!(statuses[0].latest_version, 2);
        assert_eq!(statuses[0].pending_count, 2);
        assert!(!statuses[0].is_up_to_date());
    }

    #[test]
    fn test_status_per_module() {
        let defs = vec![
            MigrationDefinition::new("uac", 0, "init"),
            MigrationDefinition::new("core", 0, "init"),
            MigrationDefinition::new("core", 1, "discounts"),
            MigrationDefinition::new("core", 2, "coupons"),
        ];
        let applied = vec![record("core", 0), record("core", 1), record("uac", 0)];
        let statuses = module_statuses(&defs, &applied);

        assert_eq!(statuses[0].module, "core");
        assert_eq!(statuses[0].current_version, Some(1));
        assert_eq!(statuses[0].latest_version, 2);
        assert_eq!(statuses[0].pending_count, 1);

        assert_eq!(statuses[1].module, "uac");
        assert_eq!(statuses[1].current_version, Some(0));
        assert!(statuses[1].is_up_to_date());
    }

    #[test]
    fn test_unregistered_rows_are_ignored() {
        let defs = vec![MigrationDefinition::new("core", 0, "init")];
        let applied = vec![record("core", 9), record("billing", 0)];
        let statuses = module_statuses(&defs, &applied);

        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].current_version, None);
        assert_eq!(statuses[0].pending_count, 1);
    }

    #[test]
    fn test_is_applied() {
        let def = MigrationDefinition::new("core", 1, "discounts");
        assert!(is_applied(&def, &[record("core", 1)]));
        assert!(!is_applied(&def, &[record("uac", 1)]));
    }
}
