use anyhow::Result;
use clap::Parser;

use strata_core::migration::Direction;

use super::batch::{run_each, setup_order};
use super::context::Session;
use super::{output, GlobalArgs};

/// Run every registered migration forward, in version order.
///
/// Migrations that are already applied are skipped. On failure the user is
/// asked whether to continue; with `--yes` the run halts instead.
#[derive(Parser, Debug)]
pub struct SetupCommand {}

impl SetupCommand {
    pub async fn execute(self, global: &GlobalArgs) -> Result<()> {
        let session = Session::open(global)?;
        output::header("Database Setup", session.env);

        let runner = session.runner().await?;
        runner.registry().validate()?;
        let ordered = setup_order(runner.registry());
        if ordered.is_empty() {
            output::info("No migrations registered");
            return Ok(());
        }

        session.confirm(&format!(
            "Run all {} migration(s) on {}?",
            ordered.len(),
            session.env
        ))?;
        println!();

        let tally = run_each(&runner, &ordered, Direction::Up, |_| {
            session.continue_after_failure()
        })
        .await?;
        tally.finish(Direction::Up)
    }
}
