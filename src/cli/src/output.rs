//! Output formatting for the Raptor CLI.
//!
//! Supports table, JSON, and YAML output formats.

use anyhow::Result;
use clap::ValueEnum;
use colored::*;
use raptor_core::error::{ErrorResponse, RaptorError};
use serde::Serialize;
use tabled::{
    settings::{object::Columns, Alignment, Modify, Style},
    Table, Tabled,
};

/// Output format selection.
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    /// Render as a formatted table
    #[default]
    Table,
    /// Render as JSON
    Json,
    /// Render as YAML
    Yaml,
}

pub fn print_success(msg: &str) {
    println!("{} {}", "[OK]".green().bold(), msg);
}

/// Print an error message to stderr.
pub fn print_error(msg: &str) {
    eprintln!("{} {}", "[ERROR]".red().bold(), msg);
}

/// The core error behind a failed command, if there is one.
fn core_error(error: &anyhow::Error) -> Option<&RaptorError> {
    error.chain().find_map(|cause| cause.downcast_ref::<RaptorError>())
}

/// Report a failed command.
///
/// Core errors are logged at their severity; JSON and YAML output get the
/// structured error document on stdout.
pub fn report_error(error: &anyhow::Error, format: OutputFormat) {
    let core = core_error(error);
    if let Some(core) = core {
        core.log();
    }

    match (format, core) {
        (OutputFormat::Json | OutputFormat::Yaml, Some(core)) => {
            if print_item(&ErrorResponse::from(core), format).is_err() {
                print_error(&format!("{:#}", error));
            }
        }
        _ => print_error(&format!("{:#}", error)),
    }
}

pub fn print_warning(msg: &str) {
    eprintln!("{} {}", "[WARN]".yellow().bold(), msg);
}

pub fn print_info(msg: &str) {
    println!("{} {}", "[INFO]".blue().bold(), msg);
}

/// Print rows as a table, or the serialized list for JSON/YAML.
pub fn print_list<T: Tabled + Serialize>(items: &[T], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => {
            if items.is_empty() {
                println!("{}", "No results found.".dimmed());
                return Ok(());
            }
            let table = Table::new(items)
                .with(Style::rounded())
                .with(Modify::new(Columns::first()).with(Alignment::left()))
                .to_string();
            println!("{}", table);
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(items)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(items)?),
    }
    Ok(())
}

/// Print a single item; tables fall back to pretty JSON.
pub fn print_item<T: Serialize + ?Sized>(item: &T, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table | OutputFormat::Json => println!("{}", serde_json::to_string_pretty(item)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(item)?),
    }
    Ok(())
}

pub fn print_detail(key: &str, value: &str) {
    println!("  {}: {}", key.cyan(), value);
}

pub fn print_header(title: &str) {
    println!();
    println!("{}", title.bold().underline());
    println!();
}

/// Colour a job status for table output.
pub fn status_label(status: &str) -> String {
    match status {
        "completed" => status.green().to_string(),
        "failed" | "orphaned" => status.red().to_string(),
        "partial" => status.yellow().to_string(),
        _ => status.to_string(),
    }
}

/// Render epoch milliseconds as RFC 3339, or `-` when absent.
pub fn timestamp(millis: Option<i64>) -> String {
    millis
        .and_then(chrono::DateTime::from_timestamp_millis)
        .map(|t| t.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
        .unwrap_or_else(|| "-".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;
    use raptor_core::error::ErrorCode;
    use raptor_core::jobs::JobId;

    #[test]
    fn test_error_document_found_under_context() {
        let result: anyhow::Result<()> = Err(RaptorError::job_not_found(&JobId::from("job-1")))
            .context("Failed to fetch job-1");
        let error = result.unwrap_err();

        let core = core_error(&error).unwrap();
        let document = serde_json::to_value(ErrorResponse::from(core)).unwrap();

        assert_eq!(document["success"], serde_json::json!(false));
        assert_eq!(
            document["error"]["code"],
            serde_json::to_value(ErrorCode::JobNotFound).unwrap()
        );
        assert_eq!(document["error"]["details"]["entity_id"], serde_json::json!("job-1"));
    }

    #[test]
    fn test_plain_errors_have_no_document() {
        let error = anyhow::anyhow!("config file missing");
        assert!(core_error(&error).is_none());
    }

    #[test]
    fn test_timestamp_rendering() {
        assert_eq!(timestamp(None), "-");
        assert_eq!(timestamp(Some(0)), "1970-01-01T00:00:00.000Z");
    }
}
