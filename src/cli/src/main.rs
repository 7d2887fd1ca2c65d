//! Raptor CLI - submit quantification jobs and inspect their results.
//!
//! Talks to the Redis-backed broker and ledger directly.

mod backends;
mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use raptor_core::config::Config;
use raptor_core::telemetry::{self, LogFormat};

use commands::{config, health, job, lanes, submit};
use output::OutputFormat;

/// Raptor - PRA quantification job orchestration CLI
#[derive(Parser)]
#[command(
    name = "raptor",
    version = "0.1.0",
    about = "Raptor - PRA quantification job orchestration",
    long_about = "Submit whole-model and per-sequence quantification jobs, inspect job status and merged results, and manage the broker lanes.",
    propagate_version = true
)]
pub struct Cli {
    /// Output format
    #[arg(short, long, global = true, default_value = "table")]
    output: OutputFormat,

    /// Configuration file (defaults to ~/.raptor/config.toml when present)
    #[arg(short, long, global = true, env = "RAPTOR_CONFIG")]
    config: Option<String>,

    /// Log level for diagnostics written to stderr
    #[arg(long, global = true, env = "RAPTOR_LOG", default_value = "warn")]
    log_level: String,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Queue a quantification request
    #[command(subcommand)]
    Submit(submit::SubmitCommands),

    /// Inspect a single job
    #[command(subcommand)]
    Job(job::JobCommands),

    /// List recorded jobs
    Jobs(job::ListArgs),

    /// Broker lane management
    #[command(subcommand)]
    Lanes(lanes::LaneCommands),

    /// Check broker and ledger connectivity
    Health,

    /// Configuration management
    #[command(subcommand)]
    Config(config::ConfigCommands),
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let format = cli.output;
    if let Err(e) = run(cli).await {
        output::report_error(&e, format);
        std::process::exit(1);
    }

    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let format = cli.output;
    let explicit = cli.config.as_deref();
    let setup = || configure(explicit, &cli.log_level);

    match cli.command {
        Commands::Submit(cmd) => submit::execute(cmd, &setup()?, format).await,
        Commands::Job(cmd) => job::execute(cmd, &setup()?, format).await,
        Commands::Jobs(args) => job::list(args, &setup()?, format).await,
        Commands::Lanes(cmd) => lanes::execute(cmd, &setup()?, format).await,
        Commands::Health => health::execute(&setup()?, format).await,
        Commands::Config(cmd) => config::execute(cmd, explicit, format),
    }
}

/// Resolve the backend configuration and start compact stderr logging.
fn configure(explicit: Option<&str>, log_level: &str) -> Result<Config> {
    let mut settings = config::resolve(explicit)?;
    settings.logging.level = log_level.to_string();
    settings.logging.format = LogFormat::Compact;
    telemetry::init_logging(&settings.logging, "cli")?;
    telemetry::register_metrics();
    Ok(settings)
}
