mod batch;
mod context;
mod diff;
mod output;
mod prompt;
mod reset;
mod run;
mod setup;
mod status;
mod up;

pub use diff::DiffCommand;
pub use reset::ResetCommand;
pub use run::RunCommand;
pub use setup::SetupCommand;
pub use status::StatusCommand;
pub use up::UpCommand;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};

use strata_core::config::Environment;

/// STRATA - module-versioned PostgreSQL migrations
#[derive(Parser)]
#[command(name = "strata")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Options shared by every command.
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Target environment (local or prod). Prompted for when omitted.
    #[arg(long, global = true)]
    pub env: Option<Environment>,

    /// Never prompt: assume yes to confirmations and halt on the first failure.
    #[arg(short, long, global = true)]
    pub yes: bool,

    /// Configuration file path.
    #[arg(short, long, default_value = "strata.toml", global = true)]
    pub config: PathBuf,

    /// Enable debug logging.
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// CLI commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Show connectivity diagnostics and per-module migration status.
    Status(StatusCommand),

    /// Apply all pending migrations.
    Up(UpCommand),

    /// Apply or revert selected migrations.
    Run(RunCommand),

    /// Run every registered migration forward, in version order.
    Setup(SetupCommand),

    /// Revert every applied migration, then apply everything again.
    Reset(ResetCommand),

    /// Compare the local and prod schemas.
    Diff(DiffCommand),
}

impl Cli {
    /// Execute the CLI command.
    pub async fn execute(self) -> Result<()> {
        let log_level = if self.global.verbose { "debug" } else { "warn" };
        tracing_subscriber::fmt()
            .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.to_string()))
            .with_writer(std::io::stderr)
            .init();

        match self.command {
            Commands::Status(cmd) => cmd.execute(&self.global).await,
            Commands::Up(cmd) => cmd.execute(&self.global).await,
            Commands::Run(cmd) => cmd.execute(&self.global).await,
            Commands::Setup(cmd) => cmd.execute(&self.global).await,
            Commands::Reset(cmd) => cmd.execute(&self.global).await,
            Commands::Diff(cmd) => cmd.execute(&self.global).await,
        }
    }
}
