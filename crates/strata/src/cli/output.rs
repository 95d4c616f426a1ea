//! Console output helpers shared by the commands.

use std::time::Duration;

use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use strata_core::config::Environment;
use strata_core::migration::{MigrationDefinition, MigrationId};

pub fn header(title: &str, env: Environment) {
    let env_label = match env {
        Environment::Local => style(env.to_string()).green(),
        Environment::Prod => style(env.to_string()).red().bold(),
    };
    println!();
    println!(
        "  {}  {} {}",
        style("STRATA").bold().cyan(),
        title,
        style(format!("[{}]", env_label)).dim()
    );
    println!();
}

pub fn success(message: impl AsRef<str>) {
    println!("  {} {}", style("✓").green(), message.as_ref());
}

pub fn info(message: impl AsRef<str>) {
    println!("  {} {}", style("ℹ").blue(), message.as_ref());
}

pub fn step(message: impl AsRef<str>) {
    println!("  {} {}", style("→").dim(), message.as_ref());
}

pub fn warn(message: impl AsRef<str>) {
    println!("  {} {}", style("⚠").yellow(), message.as_ref());
}

pub fn failure(message: impl AsRef<str>) {
    println!("  {} {}", style("✗").red(), message.as_ref());
}

/// `core v1 (add_discounts)`, with the name highlighted.
pub fn migration(id: &MigrationId) -> String {
    format!(
        "{} v{} ({})",
        style(&id.module).bold(),
        id.version,
        style(&id.name).cyan()
    )
}

/// Row shown in migration pickers: `  3. add_discounts [core] - Discount tables`.
pub fn picker_label(index: usize, def: &MigrationDefinition) -> String {
    if def.description.is_empty() {
        format!("{:>3}. {} [{}]", index, def.name, def.module)
    } else {
        format!(
            "{:>3}. {} [{}] - {}",
            index, def.name, def.module, def.description
        )
    }
}

/// Spinner for a long-running step.
pub fn spinner(message: impl Into<String>) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(template) = ProgressStyle::default_spinner().template("  {spinner:.green} {msg}") {
        pb.set_style(template);
    }
    pb.set_message(message.into());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}
