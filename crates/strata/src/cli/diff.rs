use anyhow::{Context as _, Result};
use clap::Parser;
use console::style;

use strata_core::config::Environment;
use strata_runtime::diff::ColumnDifference;
use strata_runtime::{fetch_schema, DiffAction, DiffEntry, SchemaDiff};

use super::context::Session;
use super::{output, GlobalArgs};

/// Compare the column layout of the local and prod databases.
///
/// Always reads `.env` and `.env.prod`; `--env` is ignored.
#[derive(Parser, Debug)]
pub struct DiffCommand {}

impl DiffCommand {
    pub async fn execute(self, global: &GlobalArgs) -> Result<()> {
        let local = Session::for_env(Environment::Local, global)?;
        let prod = Session::for_env(Environment::Prod, global)?;

        println!();
        println!(
            "  {}  Schema Diff {}",
            style("STRATA").bold().cyan(),
            style("[local vs prod]").dim()
        );
        println!();

        let pb = output::spinner("Fetching schemas...");
        let local_db = local.connect().await;
        let prod_db = prod.connect().await;
        let (local_db, prod_db) = match (local_db, prod_db) {
            (Ok(l), Ok(p)) => (l, p),
            (Err(e), _) | (_, Err(e)) => {
                pb.finish_and_clear();
                return Err(e);
            }
        };

        let schemas = tokio::try_join!(fetch_schema(local_db.pool()), fetch_schema(prod_db.pool()));
        pb.finish_and_clear();
        local_db.close().await;
        prod_db.close().await;
        let (local_schema, prod_schema) = schemas.context("Failed to read schemas")?;

        let diff = SchemaDiff::compare(&local_schema, &prod_schema);
        if diff.is_empty() {
            output::success("Databases are identical");
            println!();
            return Ok(());
        }

        for entry in &diff.entries {
            print_entry(entry);
        }
        println!();
        output::warn(format!("{} difference(s) found", diff.entries.len()));
        println!();
        Ok(())
    }
}

fn print_entry(entry: &DiffEntry) {
    let line = describe(entry);
    match entry.action {
        DiffAction::TableOnlyInLocal | DiffAction::ColumnOnlyInLocal => {
            println!("  {}", style(line).green())
        }
        DiffAction::TableOnlyInProd | DiffAction::ColumnOnlyInProd => {
            println!("  {}", style(line).red())
        }
        DiffAction::ColumnMismatch => {
            println!("  {}", style(line).cyan());
            for d in &entry.differences {
                println!("        {}", style(describe_difference(d)).yellow());
            }
        }
    }
}

fn describe(entry: &DiffEntry) -> String {
    let table = &entry.table_name;
    let column = entry.column_name.as_deref().unwrap_or_default();
    match entry.action {
        DiffAction::TableOnlyInLocal => {
            format!("[+] Table '{}' exists in LOCAL but not in PROD", table)
        }
        DiffAction::TableOnlyInProd => {
            format!("[-] Table '{}' exists in PROD but not in LOCAL", table)
        }
        DiffAction::ColumnOnlyInLocal => format!(
            "    [+] Column '{}' in table '{}' exists in LOCAL but not in PROD",
            column, table
        ),
        DiffAction::ColumnOnlyInProd => format!(
            "    [-] Column '{}' in table '{}' exists in PROD but not in LOCAL",
            column, table
        ),
        DiffAction::ColumnMismatch => {
            format!("[~] Table '{}' Column '{}' mismatch:", table, column)
        }
    }
}

fn describe_difference(d: &ColumnDifference) -> String {
    format!("{}: {} (local) vs {} (prod)", d.attribute, d.local, d.prod)
}
