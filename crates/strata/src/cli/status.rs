use anyhow::{bail, Result};
use clap::Parser;
use console::style;
use serde_json::json;

use strata_core::migration::{module_statuses, MigrationRegistry, ModuleStatus, TrackingRecord};
use strata_runtime::{connect_and_inspect, ConnectionFailure, DatabaseState};

use super::context::Session;
use super::{output, GlobalArgs};

/// Show connectivity diagnostics and per-module migration status.
#[derive(Parser, Debug)]
pub struct StatusCommand {
    /// Print machine-readable JSON instead of a table.
    #[arg(long)]
    pub json: bool,
}

impl StatusCommand {
    pub async fn execute(self, global: &GlobalArgs) -> Result<()> {
        let session = Session::open(global)?;
        let state = connect_and_inspect(&session.config.database, &session.config.tracking.table)
            .await?;

        let registry = match &state {
            DatabaseState::Unavailable { .. } => MigrationRegistry::new(),
            _ => {
                let db = session.connect().await?;
                let registry = session.registry(&db)?;
                db.close().await;
                registry
            }
        };
        let modules = module_statuses(registry.all(), state.records());

        if self.json {
            let report = json!({
                "environment": session.env.to_string(),
                "database": state,
                "modules": modules,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            output::header("Migration Status", session.env);
            print_state(&state, &session.config.tracking.table);
            if !matches!(state, DatabaseState::Unavailable { .. }) {
                print_modules(&modules);
                print_unregistered(&registry, state.records());
            }
        }

        if let DatabaseState::Unavailable { failure, .. } = &state {
            bail!("Database unavailable: {}", failure);
        }
        Ok(())
    }
}

fn print_state(state: &DatabaseState, table: &str) {
    match state {
        DatabaseState::Unavailable { failure, message } => {
            output::failure(failure.to_string());
            println!("    {}", style(message).dim());
            println!();
            match failure {
                ConnectionFailure::DatabaseMissing {
                    database: Some(name),
                } => output::info(format!("Create it first, e.g. `createdb {}`", name)),
                ConnectionFailure::DatabaseMissing { database: None } => {
                    output::info("Create the target database first")
                }
                ConnectionFailure::ServerUnreachable => output::info(
                    "Check that PostgreSQL is running and the host/port settings are correct",
                ),
                ConnectionFailure::Generic => {
                    output::info("Check the credentials and connection settings")
                }
            }
        }
        DatabaseState::NotInitialized { reason, tables } => {
            output::warn(format!("Not initialized: {}", reason));
            if tables.is_empty() {
                output::info("The database has no tables");
            } else {
                output::info(format!("Existing tables: {}", tables.join(", ")));
            }
            output::info(format!(
                "Run `strata up` to create {} and apply migrations",
                table
            ));
            println!();
        }
        DatabaseState::Initialized { records, tables } => {
            output::success(format!(
                "Connected: {} table(s), {} applied migration(s)",
                tables.len(),
                records.len()
            ));
            println!();
        }
    }
}

fn print_modules(modules: &[ModuleStatus]) {
    if modules.is_empty() {
        output::info("No migrations registered");
        return;
    }

    println!(
        "  {:<16} {:>8} {:>8} {:>8}",
        style("MODULE").bold(),
        style("CURRENT").bold(),
        style("LATEST").bold(),
        style("PENDING").bold()
    );
    for m in modules {
        let current = m
            .current_version
            .map_or_else(|| "-".to_string(), |v| v.to_string());
        let pending = if m.is_up_to_date() {
            style(m.pending_count.to_string()).green()
        } else {
            style(m.pending_count.to_string()).yellow()
        };
        println!(
            "  {:<16} {:>8} {:>8} {:>8}",
            m.module, current, m.latest_version, pending
        );
    }
    println!();

    let pending: usize = modules.iter().map(|m| m.pending_count).sum();
    if pending == 0 {
        output::success("All modules up to date");
    } else {
        output::info(format!("{} pending migration(s)", pending));
    }
    println!();
}

fn print_unregistered(registry: &MigrationRegistry, records: &[TrackingRecord]) {
    let unknown: Vec<&TrackingRecord> = records
        .iter()
        .filter(|r| {
            !registry
                .all()
                .iter()
                .any(|d| d.module == r.module && d.version == r.version)
        })
        .collect();

    if unknown.is_empty() {
        return;
    }

    output::warn("Applied but not registered:");
    for r in unknown {
        println!(
            "    {} {} v{} ({}) at {}",
            style("?").yellow(),
            r.module,
            r.version,
            r.name,
            r.applied_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    println!();
}
