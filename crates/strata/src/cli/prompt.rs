//! Interactive prompts. Only used when `--yes` is not set.

use anyhow::{bail, Result};
use dialoguer::theme::ColorfulTheme;
use dialoguer::{Confirm, Select};

use strata_core::config::Environment;
use strata_core::migration::{Direction, MigrationDefinition, Selector};

use super::output;

pub fn choose_environment() -> Result<Environment> {
    let labels = ["local (.env)", "prod (.env.prod)"];
    let index = select("Select environment", &labels, 0)?;
    Ok(Environment::ALL[index])
}

/// Pick one migration from `sorted` (or all of them).
pub fn choose_migration(sorted: &[&MigrationDefinition]) -> Result<Selector> {
    let mut labels: Vec<String> = sorted
        .iter()
        .enumerate()
        .map(|(i, def)| output::picker_label(i + 1, def))
        .collect();
    labels.push("  *. all migrations".to_string());

    let index = select("Select migration", &labels, 0)?;
    if index == sorted.len() {
        Ok(Selector::All)
    } else {
        Ok(Selector::Index(index + 1))
    }
}

pub fn choose_direction() -> Result<Direction> {
    let index = select("Select direction", &["up", "down"], 0)?;
    Ok(if index == 0 {
        Direction::Up
    } else {
        Direction::Down
    })
}

/// Ask a yes/no question, defaulting to no.
pub fn confirm(question: &str) -> Result<bool> {
    Ok(Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(question)
        .default(false)
        .interact()?)
}

/// Fail with a cancellation error unless the user agrees.
pub fn confirm_or_cancel(question: &str) -> Result<()> {
    if !confirm(question)? {
        bail!("Cancelled");
    }
    Ok(())
}

fn select<T: std::fmt::Display>(prompt: &str, items: &[T], default: usize) -> Result<usize> {
    match Select::with_theme(&ColorfulTheme::default())
        .with_prompt(prompt)
        .items(items)
        .default(default)
        .interact_opt()?
    {
        Some(index) => Ok(index),
        None => bail!("Cancelled"),
    }
}
