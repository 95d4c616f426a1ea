use anyhow::Result;
use clap::Parser;

use strata_core::migration::Direction;

use super::batch::run_each;
use super::context::Session;
use super::{output, GlobalArgs};

/// Apply all pending migrations.
///
/// On failure the user is asked whether to continue; with `--yes` the run
/// halts instead.
#[derive(Parser, Debug)]
pub struct UpCommand {}

impl UpCommand {
    pub async fn execute(self, global: &GlobalArgs) -> Result<()> {
        let session = Session::open(global)?;
        output::header("Migrations", session.env);

        let runner = session.runner().await?;
        if runner.registry().is_empty() {
            output::info(format!(
                "No migrations registered in {}",
                global.config.display()
            ));
            return Ok(());
        }
        runner.registry().validate()?;

        let pending = runner.pending().await?;
        if pending.is_empty() {
            output::success("Already up to date");
            println!();
            return Ok(());
        }

        output::info(format!("{} pending migration(s)", pending.len()));
        println!();

        let tally = run_each(&runner, &pending, Direction::Up, |_| {
            session.continue_after_failure()
        })
        .await?;
        tally.finish(Direction::Up)
    }
}
