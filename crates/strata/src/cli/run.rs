use anyhow::{bail, Result};
use clap::Parser;

use strata_core::migration::{Direction, Selector};

use super::batch::{by_version, run_each};
use super::context::Session;
use super::{output, prompt, GlobalArgs};

/// Apply or revert selected migrations.
///
/// Several migrations run in version order (reversed for `--down`). On
/// failure the user is asked whether to continue; with `--yes` the run halts.
#[derive(Parser, Debug)]
pub struct RunCommand {
    /// Migration to run: a 1-based index, a name, `module/name`, or `all`.
    pub selector: Option<String>,

    /// Apply the selected migrations.
    #[arg(long, conflicts_with = "down")]
    pub up: bool,

    /// Revert the selected migrations.
    #[arg(long)]
    pub down: bool,
}

impl RunCommand {
    fn direction(&self) -> Option<Direction> {
        match (self.up, self.down) {
            (true, _) => Some(Direction::Up),
            (_, true) => Some(Direction::Down),
            _ => None,
        }
    }

    pub async fn execute(self, global: &GlobalArgs) -> Result<()> {
        let session = Session::open(global)?;
        output::header("Run Migrations", session.env);

        let runner = session.runner().await?;
        let registry = runner.registry();
        if registry.is_empty() {
            output::info(format!(
                "No migrations registered in {}",
                global.config.display()
            ));
            return Ok(());
        }

        let selector = match &self.selector {
            Some(raw) => raw.parse::<Selector>()?,
            None if session.yes => bail!("A migration selector is required with --yes"),
            None => prompt::choose_migration(&registry.sorted())?,
        };
        let selected = registry.select(&selector)?;

        let direction = match self.direction() {
            Some(direction) => direction,
            None if session.yes => bail!("--up or --down is required with --yes"),
            None => prompt::choose_direction()?,
        };

        if direction == Direction::Down || selector == Selector::All {
            session.confirm(&format!(
                "Run {} migration(s) {} on {}?",
                selected.len(),
                direction,
                session.env
            ))?;
        }

        if let [def] = selected.as_slice() {
            output::step(format!("{} {}", direction, output::migration(&def.id())));
            runner.run_single(def, direction).await?;
            match direction {
                Direction::Up => output::success(format!("Applied {}", output::migration(&def.id()))),
                Direction::Down => {
                    output::success(format!("Reverted {}", output::migration(&def.id())))
                }
            }
            println!();
            return Ok(());
        }

        let ordered = by_version(selected, direction);
        let tally = run_each(&runner, &ordered, direction, |_| {
            session.continue_after_failure()
        })
        .await?;
        tally.finish(direction)
    }
}
