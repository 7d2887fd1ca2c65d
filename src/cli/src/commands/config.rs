//! Configuration management commands.
//!
//! The CLI reads `~/.raptor/config.toml` when it exists, with `RAPTOR__*`
//! environment variables layered on top.

use anyhow::{bail, Context, Result};
use clap::Subcommand;
use raptor_core::config::Config;
use raptor_core::telemetry::SensitiveFieldRedactor;
use std::path::PathBuf;

use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,

    /// Write a configuration file with every default filled in
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Print the configuration file location
    Path,
}

/// Return the default configuration path (`~/.raptor/config.toml`).
fn default_path() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".raptor").join("config.toml"))
}

fn config_path(explicit: Option<&str>) -> Result<PathBuf> {
    match explicit {
        Some(path) => Ok(PathBuf::from(path)),
        None => default_path(),
    }
}

/// Load the configuration from `explicit`, else the default file if present,
/// else the environment alone.
pub fn resolve(explicit: Option<&str>) -> Result<Config> {
    if let Some(path) = explicit {
        return Config::from_file(path).with_context(|| format!("Failed to load {}", path));
    }

    let path = default_path()?;
    if path.exists() {
        let path = path.to_string_lossy();
        Config::from_file(&path).with_context(|| format!("Failed to load {}", path))
    } else {
        Config::load().context("Failed to load configuration from the environment")
    }
}

fn redacted(config: &Config) -> Config {
    let redactor = SensitiveFieldRedactor::global();
    let mut shown = config.clone();
    shown.broker.url = redactor.redact_url(&shown.broker.url);
    shown.ledger.url = redactor.redact_url(&shown.ledger.url);
    shown
}

pub fn execute(cmd: ConfigCommands, explicit: Option<&str>, format: OutputFormat) -> Result<()> {
    match cmd {
        ConfigCommands::Show => {
            let shown = redacted(&resolve(explicit)?);
            match format {
                OutputFormat::Table => {
                    print!("{}", toml::to_string_pretty(&shown).context("Failed to serialize config")?)
                }
                _ => output::print_item(&shown, format)?,
            }
        }

        ConfigCommands::Init { force } => {
            let path = config_path(explicit)?;
            if path.exists() && !force {
                bail!("{} already exists; use --force to overwrite", path.display());
            }
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            let content =
                toml::to_string_pretty(&Config::default()).context("Failed to serialize config")?;
            std::fs::write(&path, content)
                .with_context(|| format!("Failed to write {}", path.display()))?;

            output::print_success(&format!("Wrote {}", path.display()));
        }

        ConfigCommands::Path => {
            let path = config_path(explicit)?;
            match format {
                OutputFormat::Table => println!("{}", path.display()),
                _ => output::print_item(
                    &serde_json::json!({ "path": path, "exists": path.exists() }),
                    format,
                )?,
            }
        }
    }

    Ok(())
}
