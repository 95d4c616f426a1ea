//! Migration runner.
//!
//! Computes the delta between the registry and the tracking store and applies
//! or reverts migrations one at a time. Each completed step is recorded before
//! the next one starts; the first failure stops the run and nothing already
//! applied is rolled back.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use strata_core::error::{Result, StrataError};
use strata_core::migration::{
    is_applied, module_statuses, Direction, MigrationDefinition, MigrationId, MigrationRegistry,
    MigrationStep, ModuleStatus, TrackingRecord,
};

use crate::tracking::TrackingStore;

/// Outcome of a batch operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Migrations applied, in execution order.
    pub applied: Vec<MigrationId>,
    /// Migrations reverted, in execution order.
    pub reverted: Vec<MigrationId>,
    /// Selected migrations that were already in the requested state.
    pub skipped: usize,
}

impl RunReport {
    pub fn is_empty(&self) -> bool {
        self.applied.is_empty() && self.reverted.is_empty()
    }
}

/// Applies and reverts registered migrations against a tracking store.
pub struct MigrationRunner {
    store: Arc<dyn TrackingStore>,
    registry: MigrationRegistry,
}

impl MigrationRunner {
    pub fn new(store: Arc<dyn TrackingStore>, registry: MigrationRegistry) -> Self {
        Self { store, registry }
    }

    pub fn registry(&self) -> &MigrationRegistry {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn TrackingStore> {
        &self.store
    }

    /// Current vs latest version of every registered module.
    pub async fn status(&self) -> Result<Vec<ModuleStatus>> {
        self.store.ensure_schema().await?;
        let applied = self.store.list_applied().await?;
        Ok(module_statuses(self.registry.all(), &applied))
    }

    /// Registered migrations without a tracking row, in the order `run_pending` applies them.
    pub async fn pending(&self) -> Result<Vec<&MigrationDefinition>> {
        self.store.ensure_schema().await?;
        let applied = self.store.list_applied().await?;
        Ok(self.pending_in(&applied))
    }

    /// Apply every pending migration, ordered by `(module, version)`.
    pub async fn run_pending(&self) -> Result<RunReport> {
        self.registry.validate()?;
        self.locked(async {
            let mut report = RunReport::default();
            self.apply_pending(&mut report).await?;
            Ok(report)
        })
        .await
    }

    /// Apply or revert one migration.
    ///
    /// Applying a recorded migration fails with `Conflict` before `up` runs.
    /// Reverting fails with `NotApplied` when there is no row, and with a
    /// configuration error when the migration has no down step.
    pub async fn run_single(
        &self,
        definition: &MigrationDefinition,
        direction: Direction,
    ) -> Result<()> {
        self.locked(async {
            self.store.ensure_schema().await?;
            let applied = self.store.list_applied().await?;

            match direction {
                Direction::Up => {
                    if is_applied(definition, &applied) {
                        return Err(StrataError::Conflict {
                            module: definition.module.clone(),
                            version: definition.version,
                        });
                    }
                    self.apply(definition).await
                }
                Direction::Down => {
                    if !is_applied(definition, &applied) {
                        return Err(StrataError::NotApplied {
                            module: definition.module.clone(),
                            version: definition.version,
                        });
                    }
                    self.revert(definition).await
                }
            }
        })
        .await
    }

    /// Apply (ascending `version`) or revert (descending `version`) several migrations.
    ///
    /// Migrations already in the requested state are skipped.
    pub async fn run_many<'a>(
        &self,
        definitions: impl IntoIterator<Item = &'a MigrationDefinition>,
        direction: Direction,
    ) -> Result<RunReport> {
        let mut ordered: Vec<&MigrationDefinition> = definitions.into_iter().collect();
        ordered.sort_by(|a, b| {
            a.version
                .cmp(&b.version)
                .then_with(|| a.module.cmp(&b.module))
        });
        if direction == Direction::Down {
            ordered.reverse();
        }

        self.locked(async {
            self.store.ensure_schema().await?;
            let applied = self.store.list_applied().await?;
            let mut report = RunReport::default();

            for def in ordered {
                let recorded = is_applied(def, &applied);
                match direction {
                    Direction::Up if recorded => {
                        debug!(migration = %def.id(), "Already applied, skipping");
                        report.skipped += 1;
                    }
                    Direction::Up => {
                        self.apply(def).await?;
                        report.applied.push(def.id());
                    }
                    Direction::Down if !recorded => {
                        debug!(migration = %def.id(), "Not applied, skipping");
                        report.skipped += 1;
                    }
                    Direction::Down => {
                        self.revert(def).await?;
                        report.reverted.push(def.id());
                    }
                }
            }

            Ok(report)
        })
        .await
    }

    /// Revert every applied registered migration, most recent first, then apply
    /// everything again.
    ///
    /// Fails with a configuration error, before anything is reverted, when an
    /// applied migration has no down step.
    pub async fn reset(&self) -> Result<RunReport> {
        self.registry.validate()?;
        self.locked(async {
            self.store.ensure_schema().await?;
            let mut applied = self.store.list_applied().await?;
            applied.sort_by(|a, b| {
                b.applied_at
                    .cmp(&a.applied_at)
                    .then_with(|| b.module.cmp(&a.module))
                    .then_with(|| b.version.cmp(&a.version))
            });
            let to_revert: Vec<&MigrationDefinition> =
                applied.iter().filter_map(|r| self.registered(r)).collect();

            if let Some(def) = to_revert.iter().find(|d| !d.has_down()) {
                return Err(StrataError::Config(format!(
                    "Cannot reset: migration {} has no down step",
                    def.id()
                )));
            }

            let mut report = RunReport::default();
            for def in to_revert {
                self.revert(def).await?;
                report.reverted.push(def.id());
            }

            self.apply_pending(&mut report).await?;
            Ok(report)
        })
        .await
    }

    async fn apply_pending(&self, report: &mut RunReport) -> Result<()> {
        self.store.ensure_schema().await?;
        let applied = self.store.list_applied().await?;
        debug!(count = applied.len(), "Already applied migrations");

        let pending = self.pending_in(&applied);
        report.skipped += self.registry.len() - pending.len();

        if pending.is_empty() {
            info!("No pending migrations");
            return Ok(());
        }

        for def in pending {
            self.apply(def).await?;
            report.applied.push(def.id());
        }

        info!(count = report.applied.len(), "Pending migrations applied");
        Ok(())
    }

    fn pending_in(&self, applied: &[TrackingRecord]) -> Vec<&MigrationDefinition> {
        self.registry
            .sorted()
            .into_iter()
            .filter(|d| !is_applied(d, applied))
            .collect()
    }

    fn registered(&self, record: &TrackingRecord) -> Option<&MigrationDefinition> {
        self.registry
            .all()
            .iter()
            .find(|d| d.module == record.module && d.version == record.version)
    }

    async fn apply(&self, def: &MigrationDefinition) -> Result<()> {
        let id = def.id();
        info!(migration = %id, "Applying migration");
        let start = Instant::now();

        for step in [MigrationStep::Up, MigrationStep::InitData] {
            def.run_step(step)
                .await
                .map_err(|e| StrataError::execution(id.clone(), step, e))?;
        }

        self.store
            .record_applied(&def.module, def.version, &def.name)
            .await?;

        info!(
            migration = %id,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Migration applied"
        );
        Ok(())
    }

    async fn revert(&self, def: &MigrationDefinition) -> Result<()> {
        let id = def.id();
        if !def.has_down() {
            return Err(StrataError::Config(format!(
                "Migration {} has no down step",
                id
            )));
        }

        info!(migration = %id, "Reverting migration");
        def.run_step(MigrationStep::Down)
            .await
            .map_err(|e| StrataError::execution(id.clone(), MigrationStep::Down, e))?;

        self.store.record_reverted(&def.module, def.version).await?;
        info!(migration = %id, "Migration reverted");
        Ok(())
    }

    /// Run `operation` while holding the store's migration lock. The lock is
    /// always released, even on error.
    async fn locked<T>(&self, operation: impl Future<Output = Result<T>>) -> Result<T> {
        self.store.lock().await?;

        let result = operation.await;

        if let Err(e) = self.store.unlock().await {
            warn!("Failed to release migration lock: {}", e);
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::InMemoryTrackingStore;
    use std::sync::Mutex;

    type Journal = Arc<Mutex<Vec<String>>>;

    fn journaled(journal: &Journal, module: &str, version: i32, name: &str) -> MigrationDefinition {
        let tag = format!("{}:{}", module, version);
        let (up, seed, down) = (journal.clone(), journal.clone(), journal.clone());
        let (up_tag, seed_tag, down_tag) = (tag.clone(), tag.clone(), tag);

        MigrationDefinition::new(module, version, name)
            .up(move || {
                let journal = up.clone();
                let tag = up_tag.clone();
                async move {
                    journal.lock().unwrap().push(format!("up {}", tag));
                    Ok(())
                }
            })
            .init_data(move || {
                let journal = seed.clone();
                let tag = seed_tag.clone();
                async move {
                    journal.lock().unwrap().push(format!("seed {}", tag));
                    Ok(())
                }
            })
            .down(move || {
                let journal = down.clone();
                let tag = down_tag.clone();
                async move {
                    journal.lock().unwrap().push(format!("down {}", tag));
                    Ok(())
                }
            })
    }

    fn failing(module: &str, version: i32, name: &str) -> MigrationDefinition {
        MigrationDefinition::new(module, version, name).up(|| async {
            Err(StrataError::Database("syntax error at or near \"TABEL\"".into()))
        })
    }

    fn fixture(definitions: Vec<MigrationDefinition>) -> (MigrationRunner, Arc<InMemoryTrackingStore>) {
        let store = Arc::new(InMemoryTrackingStore::new());
        let mut registry = MigrationRegistry::new();
        registry.register(definitions);
        (MigrationRunner::new(store.clone(), registry), store)
    }

    fn entries(journal: &Journal) -> Vec<String> {
        journal.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn test_run_pending_orders_by_version() {
        let journal = Journal::default();
        let (runner, store) = fixture(vec![
            journaled(&journal, "core", 3, "c"),
            journaled(&journal, "core", 1, "a"),
            journaled(&journal, "core", 2, "b"),
        ]);

        let report = runner.run_pending().await.unwrap();

        assert_eq!(
            entries(&journal),
            vec![
                "up core:1", "seed core:1", "up core:2", "seed core:2", "up core:3",
                "seed core:3"
            ]
        );
        assert_eq!(report.applied.len(), 3);
        assert_eq!(store.list_applied().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_run_pending_orders_modules_lexically() {
        let journal = Journal::default();
        let (runner, _) = fixture(vec![
            journaled(&journal, "uac", 0, "init"),
            journaled(&journal, "core", 1, "discounts"),
            journaled(&journal, "core", 0, "init"),
        ]);

        runner.run_pending().await.unwrap();

        let ups: Vec<String> = entries(&journal)
            .into_iter()
            .filter(|e| e.starts_with("up"))
            .collect();
        assert_eq!(ups, vec!["up core:0", "up core:1", "up uac:0"]);
    }

    #[tokio::test]
    async fn test_end_to_end_two_modules() {
        let journal = Journal::default();
        let (runner, store) = fixture(vec![
            journaled(&journal, "core", 0, "init"),
            journaled(&journal, "uac", 0, "init"),
        ]);

        runner.run_pending().await.unwrap();

        let rows = store.list_applied().await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].module, "core");
        assert_eq!(rows[1].module, "uac");

        let statuses = runner.status().await.unwrap();
        assert_eq!(statuses.len(), 2);
        assert!(statuses.iter().all(|s| s.pending_count == 0));
        assert!(statuses.iter().all(|s| s.current_version == Some(0)));
    }

    #[tokio::test]
    async fn test_run_pending_twice_applies_nothing_new() {
        let journal = Journal::default();
        let (runner, _) = fixture(vec![journaled(&journal, "core", 0, "init")]);

        runner.run_pending().await.unwrap();
        let report = runner.run_pending().await.unwrap();

        assert!(report.is_empty());
        assert_eq!(report.skipped, 1);
        assert_eq!(entries(&journal).len(), 2);
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_completed_migrations() {
        let journal = Journal::default();
        let (runner, store) = fixture(vec![
            journaled(&journal, "core", 1, "first"),
            failing("core", 2, "second"),
            journaled(&journal, "core", 3, "third"),
        ]);

        let err = runner.run_pending().await.unwrap_err();

        assert_eq!(
            err.failed_migration(),
            Some(&MigrationId::new("core", 2, "second"))
        );
        assert!(matches!(
            err,
            StrataError::Execution {
                step: MigrationStep::Up,
                ..
            }
        ));

        let rows = store.list_applied().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].version, 1);
        assert!(!entries(&journal).iter().any(|e| e.contains("core:3")));
    }

    #[tokio::test]
    async fn test_init_data_failure_is_not_recorded() {
        let (runner, store) = fixture(vec![MigrationDefinition::new("core", 0, "init")
            .init_data(|| async { Err(StrataError::Database("duplicate key".into())) })]);

        let err = runner.run_pending().await.unwrap_err();
        assert!(matches!(
            err,
            StrataError::Execution {
                step: MigrationStep::InitData,
                ..
            }
        ));
        assert!(store.list_applied().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_definitions_fail_before_running() {
        let journal = Journal::default();
        let (runner, store) = fixture(vec![
            journaled(&journal, "core", 0, "init"),
            journaled(&journal, "core", 0, "init_again"),
        ]);

        let err = runner.run_pending().await.unwrap_err();

        assert!(matches!(err, StrataError::Config(_)));
        assert!(entries(&journal).is_empty());
        assert_eq!(store.schema_creations().await, 0);
    }

    #[tokio::test]
    async fn test_run_single_up_twice_conflicts() {
        let journal = Journal::default();
        let def = journaled(&journal, "core", 0, "init");
        let (runner, _) = fixture(vec![def.clone()]);

        runner.run_single(&def, Direction::Up).await.unwrap();
        let err = runner.run_single(&def, Direction::Up).await.unwrap_err();

        assert!(err.is_conflict());
        assert_eq!(entries(&journal), vec!["up core:0", "seed core:0"]);
    }

    #[tokio::test]
    async fn test_run_single_round_trip() {
        let journal = Journal::default();
        let base = journaled(&journal, "core", 0, "init");
        let def = journaled(&journal, "core", 1, "discounts");
        let (runner, store) = fixture(vec![base.clone(), def.clone()]);

        runner.run_single(&base, Direction::Up).await.unwrap();
        runner.run_single(&def, Direction::Up).await.unwrap();
        runner.run_single(&def, Direction::Down).await.unwrap();

        let rows = store.list_applied().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].version, 0);

        let statuses = runner.status().await.unwrap();
        assert_eq!(statuses[0].current_version, Some(0));
        assert_eq!(statuses[0].pending_count, 1);
        assert_eq!(entries(&journal).last().unwrap(), "down core:1");
    }

    #[tokio::test]
    async fn test_run_single_down_requires_row() {
        let journal = Journal::default();
        let def = journaled(&journal, "core", 0, "init");
        let (runner, _) = fixture(vec![def.clone()]);

        let err = runner.run_single(&def, Direction::Down).await.unwrap_err();
        assert!(matches!(err, StrataError::NotApplied { .. }));
        assert!(entries(&journal).is_empty());
    }

    #[tokio::test]
    async fn test_run_single_down_without_down_step() {
        let def = MigrationDefinition::new("core", 0, "init");
        let (runner, store) = fixture(vec![def.clone()]);

        runner.run_single(&def, Direction::Up).await.unwrap();
        let err = runner.run_single(&def, Direction::Down).await.unwrap_err();

        assert!(matches!(err, StrataError::Config(_)));
        assert_eq!(store.list_applied().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_run_many_down_unwinds_in_reverse() {
        let journal = Journal::default();
        let (runner, store) = fixture(vec![
            journaled(&journal, "core", 2, "c"),
            journaled(&journal, "core", 0, "a"),
            journaled(&journal, "core", 1, "b"),
        ]);
        runner.run_pending().await.unwrap();
        journal.lock().unwrap().clear();

        let report = runner
            .run_many(runner.registry().all(), Direction::Down)
            .await
            .unwrap();

        assert_eq!(entries(&journal), vec!["down core:2", "down core:1", "down core:0"]);
        assert_eq!(report.reverted.len(), 3);
        assert!(store.list_applied().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_many_up_skips_applied() {
        let journal = Journal::default();
        let first = journaled(&journal, "core", 0, "a");
        let (runner, _) = fixture(vec![first.clone(), journaled(&journal, "core", 1, "b")]);
        runner.run_single(&first, Direction::Up).await.unwrap();

        let report = runner
            .run_many(runner.registry().all(), Direction::Up)
            .await
            .unwrap();

        assert_eq!(report.skipped, 1);
        assert_eq!(report.applied, vec![MigrationId::new("core", 1, "b")]);
    }

    #[tokio::test]
    async fn test_run_many_stops_at_first_failure() {
        let journal = Journal::default();
        let (runner, store) = fixture(vec![
            journaled(&journal, "core", 0, "a"),
            failing("core", 1, "b"),
            journaled(&journal, "core", 2, "c"),
        ]);

        let err = runner
            .run_many(runner.registry().all(), Direction::Up)
            .await
            .unwrap_err();

        assert_eq!(err.failed_migration().map(|id| id.version), Some(1));
        assert_eq!(store.list_applied().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_status_is_pure() {
        let journal = Journal::default();
        let (runner, store) = fixture(vec![
            journaled(&journal, "core", 0, "init"),
            journaled(&journal, "core", 1, "discounts"),
        ]);
        runner
            .run_single(&runner.registry().all()[0].clone(), Direction::Up)
            .await
            .unwrap();

        let first = runner.status().await.unwrap();
        let second = runner.status().await.unwrap();

        assert_eq!(first, second);
        assert_eq!(store.schema_creations().await, 1);
        assert_eq!(store.list_applied().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_pending_lists_unapplied_in_order() {
        let journal = Journal::default();
        let (runner, _) = fixture(vec![
            journaled(&journal, "uac", 0, "init"),
            journaled(&journal, "core", 0, "init"),
        ]);

        let pending: Vec<String> = runner
            .pending()
            .await
            .unwrap()
            .iter()
            .map(|d| d.module.clone())
            .collect();
        assert_eq!(pending, vec!["core", "uac"]);
    }

    #[tokio::test]
    async fn test_reset_reverts_then_reapplies() {
        let journal = Journal::default();
        let (runner, store) = fixture(vec![
            journaled(&journal, "core", 0, "init"),
            journaled(&journal, "core", 1, "discounts"),
        ]);
        runner.run_pending().await.unwrap();
        journal.lock().unwrap().clear();

        let report = runner.reset().await.unwrap();

        assert_eq!(report.reverted.len(), 2);
        assert_eq!(report.applied.len(), 2);
        let log = entries(&journal);
        assert_eq!(&log[..2], &["down core:1", "down core:0"]);
        assert_eq!(store.list_applied().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_reset_without_down_step_reverts_nothing() {
        let journal = Journal::default();
        let (runner, store) = fixture(vec![
            MigrationDefinition::new("core", 0, "init"),
            journaled(&journal, "core", 1, "discounts"),
        ]);
        runner.run_pending().await.unwrap();
        journal.lock().unwrap().clear();

        let err = runner.reset().await.unwrap_err();

        assert!(matches!(err, StrataError::Config(ref msg) if msg.contains("core v0")));
        assert!(entries(&journal).is_empty());
        let versions: Vec<i32> = store
            .list_applied()
            .await
            .unwrap()
            .iter()
            .map(|r| r.version)
            .collect();
        assert_eq!(versions, vec![0, 1]);
    }
}
