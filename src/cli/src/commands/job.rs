//! Job inspection commands.

use anyhow::Result;
use clap::{Args, Subcommand};
use raptor_core::config::Config;
use raptor_core::jobs::{JobId, JobMetadata, JobStatus};
use serde::Serialize;
use tabled::Tabled;

use crate::backends;
use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum JobCommands {
    /// Show where a job's input and results live
    Status {
        /// Job ID
        job_id: String,
    },

    /// Show a job's output, merging child results for batch jobs
    Output {
        /// Job ID
        job_id: String,
    },

    /// Show timing and quantification stats
    Stats {
        /// Job ID
        job_id: String,
    },

    /// Show the raw job record
    Metadata {
        /// Job ID
        job_id: String,
    },

    /// Print a stored request payload
    Input {
        /// Input blob ID (see `job status`)
        input_id: String,
    },
}

#[derive(Args)]
pub struct ListArgs {
    /// Filter by status (processing, running, completed, partial, failed, orphaned)
    #[arg(short, long)]
    status: Option<JobStatus>,

    /// Maximum number of results
    #[arg(short, long, default_value = "50")]
    limit: usize,
}

#[derive(Debug, Serialize, Tabled)]
struct JobRow {
    #[tabled(rename = "ID")]
    job_id: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Children")]
    children: usize,
    #[tabled(rename = "Parent")]
    parent: String,
    #[tabled(rename = "Sent")]
    sent_at: String,
    #[tabled(rename = "Received")]
    received_at: String,
}

impl From<&JobMetadata> for JobRow {
    fn from(meta: &JobMetadata) -> Self {
        Self {
            job_id: meta.job_id.to_string(),
            status: output::status_label(meta.status.as_str()),
            children: meta.child_jobs.as_ref().map_or(0, Vec::len),
            parent: meta
                .parent_job_id
                .as_ref()
                .map_or_else(|| "-".to_string(), JobId::to_string),
            sent_at: output::timestamp(meta.sent_at),
            received_at: output::timestamp(meta.received_at),
        }
    }
}

pub async fn execute(cmd: JobCommands, config: &Config, format: OutputFormat) -> Result<()> {
    let aggregator = backends::aggregator(config).await?;

    match cmd {
        JobCommands::Status { job_id } => {
            let status = aggregator.get_job_status(&JobId::from(job_id)).await?;
            match format {
                OutputFormat::Table => {
                    output::print_header("Job");
                    output::print_detail("Output", status.aggregated_output_job_id.as_str());
                    output::print_detail("Input", &status.input_id);
                    if let Some(children) = &status.child_job_ids {
                        output::print_detail("Children", &children.len().to_string());
                        for child in children {
                            println!("    {}", child);
                        }
                    }
                }
                _ => output::print_item(&status, format)?,
            }
        }

        JobCommands::Output { job_id } => {
            let response = aggregator.get_aggregated_job_output(&JobId::from(job_id)).await?;
            if let (OutputFormat::Table, Some(failed)) = (format, &response.failed_jobs) {
                output::print_warning(&format!("{} child job(s) had no usable output", failed.len()));
            }
            output::print_item(&response, format)?;
        }

        JobCommands::Stats { job_id } => {
            let stats = aggregator.get_job_stats(&JobId::from(job_id)).await?;
            output::print_item(&stats, format)?;
        }

        JobCommands::Metadata { job_id } => {
            let metadata = aggregator.get_job_metadata(&JobId::from(job_id)).await?;
            output::print_item(&metadata, format)?;
        }

        JobCommands::Input { input_id } => {
            let data = aggregator.get_input_data(&input_id).await?;
            match serde_json::from_str::<serde_json::Value>(&data) {
                Ok(value) => output::print_item(&value, format)?,
                Err(_) => println!("{}", data),
            }
        }
    }

    Ok(())
}

pub async fn list(args: ListArgs, config: &Config, format: OutputFormat) -> Result<()> {
    let aggregator = backends::aggregator(config).await?;

    let records = match args.status {
        Some(status) => aggregator.get_jobs_by_status(status).await?,
        None => aggregator.get_quantified_reports().await?,
    };

    match format {
        OutputFormat::Table => {
            let rows: Vec<JobRow> = records.iter().take(args.limit).map(JobRow::from).collect();
            output::print_list(&rows, format)?;
            if records.len() > args.limit {
                output::print_info(&format!("Showing {} of {} jobs", args.limit, records.len()));
            }
        }
        _ => {
            let shown: Vec<&JobMetadata> = records.iter().take(args.limit).collect();
            output::print_item(&shown, format)?;
        }
    }

    Ok(())
}
