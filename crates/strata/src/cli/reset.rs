use anyhow::Result;
use clap::Parser;
use console::style;

use strata_core::config::Environment;

use super::context::Session;
use super::{output, GlobalArgs};

/// Revert every applied migration, then apply everything again.
#[derive(Parser, Debug)]
pub struct ResetCommand {}

impl ResetCommand {
    pub async fn execute(self, global: &GlobalArgs) -> Result<()> {
        let session = Session::open(global)?;
        output::header("Reset", session.env);

        let runner = session.runner().await?;
        if runner.registry().is_empty() {
            output::info("No migrations registered");
            return Ok(());
        }

        if session.env == Environment::Prod {
            output::warn(
                style("This drops and recreates every migrated object in PROD")
                    .red()
                    .bold()
                    .to_string(),
            );
        }
        session.confirm(&format!(
            "Revert and reapply all migrations on {}? Data will be lost",
            session.env
        ))?;

        let pb = output::spinner("Resetting database...");
        let result = runner.reset().await;
        pb.finish_and_clear();

        let report = match result {
            Ok(report) => report,
            Err(e) => {
                if let Some(id) = e.failed_migration() {
                    output::failure(format!("Failed: {}", output::migration(id)));
                }
                return Err(e.into());
            }
        };

        for id in &report.reverted {
            output::step(format!("Reverted {}", output::migration(id)));
        }
        for id in &report.applied {
            output::success(format!("Applied {}", output::migration(id)));
        }
        println!();
        output::success(format!(
            "Reset complete: {} reverted, {} applied",
            report.reverted.len(),
            report.applied.len()
        ));
        println!();
        Ok(())
    }
}
