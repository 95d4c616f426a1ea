//! Migration-at-a-time execution with the continue-after-failure policy.

use anyhow::{bail, Result};

use strata_core::error::StrataError;
use strata_core::migration::{Direction, MigrationDefinition, MigrationId, MigrationRegistry};
use strata_runtime::MigrationRunner;

use super::output;

/// What happened to each migration of a batch.
#[derive(Debug, Default)]
pub struct Tally {
    pub done: Vec<MigrationId>,
    pub skipped: usize,
    pub failed: Vec<MigrationId>,
    pub halted: bool,
}

impl Tally {
    /// Print the totals; fails when any migration failed.
    pub fn finish(&self, direction: Direction) -> Result<()> {
        let verb = match direction {
            Direction::Up => "applied",
            Direction::Down => "reverted",
        };
        println!();
        output::info(format!(
            "{} {}, {} skipped, {} failed",
            self.done.len(),
            verb,
            self.skipped,
            self.failed.len()
        ));
        println!();

        match self.failed.last() {
            Some(id) if self.halted => bail!("Halted after {} failed", id),
            Some(_) => bail!("{} migration(s) failed", self.failed.len()),
            None => Ok(()),
        }
    }
}

/// Run `definitions` one at a time, in order.
///
/// Migrations already in the requested state are skipped. After a failure
/// `keep_going` decides whether the remaining ones still run.
pub async fn run_each(
    runner: &MigrationRunner,
    definitions: &[&MigrationDefinition],
    direction: Direction,
    mut keep_going: impl FnMut(&MigrationId) -> Result<bool>,
) -> Result<Tally> {
    let mut tally = Tally::default();

    for def in definitions {
        let id = def.id();
        match runner.run_single(def, direction).await {
            Ok(()) => {
                let verb = match direction {
                    Direction::Up => "Applied",
                    Direction::Down => "Reverted",
                };
                output::success(format!("{} {}", verb, output::migration(&id)));
                tally.done.push(id);
            }
            Err(StrataError::Conflict { .. }) => {
                output::step(format!("{} already applied", output::migration(&id)));
                tally.skipped += 1;
            }
            Err(StrataError::NotApplied { .. }) => {
                output::step(format!("{} not applied", output::migration(&id)));
                tally.skipped += 1;
            }
            Err(e) => {
                output::failure(format!("{}: {}", output::migration(&id), e));
                tally.failed.push(id.clone());
                if !keep_going(&id)? {
                    tally.halted = true;
                    break;
                }
            }
        }
    }

    Ok(tally)
}

/// Order by `(version, module)`; reversed when reverting.
pub fn by_version<'a>(
    definitions: impl IntoIterator<Item = &'a MigrationDefinition>,
    direction: Direction,
) -> Vec<&'a MigrationDefinition> {
    let mut ordered: Vec<&MigrationDefinition> = definitions.into_iter().collect();
    ordered.sort_by(|a, b| {
        a.version
            .cmp(&b.version)
            .then_with(|| a.module.cmp(&b.module))
    });
    if direction == Direction::Down {
        ordered.reverse();
    }
    ordered
}

/// Every registered migration in setup order.
pub fn setup_order(registry: &MigrationRegistry) -> Vec<&MigrationDefinition> {
    by_version(registry.all(), Direction::Up)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use strata_runtime::{InMemoryTrackingStore, TrackingStore};

    fn fixture() -> (MigrationRunner, Arc<InMemoryTrackingStore>) {
        let mut registry = MigrationRegistry::new();
        registry.register([
            MigrationDefinition::new("core", 0, "init").up(|| async { Ok(()) }),
            MigrationDefinition::new("core", 1, "broken")
                .up(|| async { Err(StrataError::Database("relation \"nope\" does not exist".into())) }),
            MigrationDefinition::new("core", 2, "discounts").up(|| async { Ok(()) }),
        ]);
        let store = Arc::new(InMemoryTrackingStore::new());
        (MigrationRunner::new(store.clone(), registry), store)
    }

    async fn applied_versions(store: &InMemoryTrackingStore) -> Vec<i32> {
        store
            .list_applied()
            .await
            .unwrap()
            .iter()
            .map(|r| r.version)
            .collect()
    }

    #[tokio::test]
    async fn test_halts_when_declined() {
        let (runner, store) = fixture();
        let ordered = setup_order(runner.registry());

        let tally = run_each(&runner, &ordered, Direction::Up, |_| Ok(false))
            .await
            .unwrap();

        assert!(tally.halted);
        assert_eq!(tally.done.len(), 1);
        assert_eq!(tally.failed, vec![MigrationId::new("core", 1, "broken")]);
        assert_eq!(applied_versions(&store).await, vec![0]);
        assert!(tally.finish(Direction::Up).is_err());
    }

    #[tokio::test]
    async fn test_continues_when_accepted() {
        let (runner, store) = fixture();
        let ordered = setup_order(runner.registry());
        let mut asked = Vec::new();

        let tally = run_each(&runner, &ordered, Direction::Up, |id| {
            asked.push(id.version);
            Ok(true)
        })
        .await
        .unwrap();

        assert_eq!(asked, vec![1]);
        assert!(!tally.halted);
        assert_eq!(applied_versions(&store).await, vec![0, 2]);
        assert!(tally.finish(Direction::Up).is_err());
    }

    #[tokio::test]
    async fn test_skips_migrations_in_requested_state() {
        let (runner, _) = fixture();
        let first = &runner.registry().all()[0];
        runner.run_single(first, Direction::Up).await.unwrap();

        let tally = run_each(&runner, &[first], Direction::Up, |_| Ok(false))
            .await
            .unwrap();
        assert_eq!(tally.skipped, 1);
        assert!(tally.finish(Direction::Up).is_ok());

        let third = &runner.registry().all()[2];
        let tally = run_each(&runner, &[third], Direction::Down, |_| Ok(false))
            .await
            .unwrap();
        assert_eq!(tally.skipped, 1);
    }

    #[test]
    fn test_setup_order_interleaves_modules_by_version() {
        let mut registry = MigrationRegistry::new();
        registry.register([
            MigrationDefinition::new("uac", 1, "permissions"),
            MigrationDefinition::new("core", 1, "discounts"),
            MigrationDefinition::new("uac", 0, "init"),
            MigrationDefinition::new("core", 0, "init"),
        ]);

        let order: Vec<String> = setup_order(&registry)
            .iter()
            .map(|d| format!("{}:{}", d.module, d.version))
            .collect();
        assert_eq!(order, vec!["core:0", "uac:0", "core:1", "uac:1"]);
    }

    #[test]
    fn test_by_version_reverses_for_down() {
        let mut registry = MigrationRegistry::new();
        registry.register([
            MigrationDefinition::new("core", 0, "init"),
            MigrationDefinition::new("core", 2, "refunds"),
            MigrationDefinition::new("core", 1, "discounts"),
        ]);

        let versions: Vec<i32> = by_version(registry.all(), Direction::Down)
            .iter()
            .map(|d| d.version)
            .collect();
        assert_eq!(versions, vec![2, 1, 0]);
    }
}
