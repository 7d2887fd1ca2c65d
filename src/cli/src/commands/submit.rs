//! Job submission commands.

use anyhow::{Context, Result};
use clap::Subcommand;
use raptor_core::config::Config;
use raptor_core::dispatch::JobDispatcher;
use raptor_core::error::ErrorCode;
use raptor_core::jobs::JobId;
use raptor_core::ledger::JobLedger;
use raptor_core::request::QuantRequest;
use serde::Serialize;
use std::path::PathBuf;

use crate::backends;
use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum SubmitCommands {
    /// Queue the whole model as one job on the quant lane
    Quant {
        /// Path to a JSON quantification request
        file: PathBuf,
    },

    /// Queue one job per event-tree sequence on the distributed-sequences lane
    Sequences {
        /// Path to a JSON quantification request
        file: PathBuf,
    },

    /// Queue one job per event-tree sequence on the adaptive-sequences lane
    Adaptive {
        /// Path to a JSON quantification request
        file: PathBuf,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QuantSubmitted {
    lane: &'static str,
    job_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BatchSubmitted {
    lane: &'static str,
    parent_job_id: Option<String>,
    sequence_job_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Submitted {
    Quant(QuantSubmitted),
    Batch(BatchSubmitted),
}

impl SubmitCommands {
    fn lane(&self) -> &'static str {
        match self {
            Self::Quant { .. } => "quant",
            Self::Sequences { .. } => "distributed-sequences",
            Self::Adaptive { .. } => "adaptive-sequences",
        }
    }

    fn file(&self) -> &PathBuf {
        match self {
            Self::Quant { file } | Self::Sequences { file } | Self::Adaptive { file } => file,
        }
    }
}

fn read_request(file: &PathBuf) -> Result<QuantRequest> {
    let content =
        std::fs::read_to_string(file).with_context(|| format!("Failed to read {}", file.display()))?;
    QuantRequest::from_json(&content).with_context(|| format!("Failed to parse {}", file.display()))
}

/// The parent of a sequence batch, as recorded on its first child.
///
/// Child ids embed sequence names that may themselves contain hyphens, so the
/// ledger is the only reliable source.
async fn batch_parent(ledger: &dyn JobLedger, children: &[JobId]) -> raptor_core::error::Result<Option<JobId>> {
    match children.first() {
        Some(first) => Ok(ledger.get_job_metadata(first).await?.parent_job_id),
        None => Ok(None),
    }
}

async fn submit(
    cmd: &SubmitCommands,
    dispatcher: &JobDispatcher,
    request: &QuantRequest,
) -> raptor_core::error::Result<Submitted> {
    let lane = cmd.lane();
    let children = match cmd {
        SubmitCommands::Quant { .. } => {
            let job_id = dispatcher.create_and_queue_quant(request).await?;
            return Ok(Submitted::Quant(QuantSubmitted {
                lane,
                job_id: job_id.into_inner(),
            }));
        }
        SubmitCommands::Sequences { .. } => dispatcher.create_and_queue_sequence_batch(request).await?,
        SubmitCommands::Adaptive { .. } => dispatcher.create_and_queue_adaptive_sequence_batch(request).await?,
    };

    let parent = batch_parent(dispatcher.ledger().as_ref(), &children).await?;
    Ok(Submitted::Batch(BatchSubmitted {
        lane,
        parent_job_id: parent.map(JobId::into_inner),
        sequence_job_ids: children.into_iter().map(JobId::into_inner).collect(),
    }))
}

fn print_table(submitted: &Submitted) {
    match submitted {
        Submitted::Quant(quant) => {
            output::print_success(&format!("Queued job {} on the {} lane", quant.job_id, quant.lane));
        }
        Submitted::Batch(batch) => {
            output::print_success(&format!(
                "Queued {} sequence job(s) on the {} lane",
                batch.sequence_job_ids.len(),
                batch.lane
            ));
            output::print_detail("parent", batch.parent_job_id.as_deref().unwrap_or("-"));
            for id in &batch.sequence_job_ids {
                println!("  {}", id);
            }
        }
    }
}

pub async fn execute(cmd: SubmitCommands, config: &Config, format: OutputFormat) -> Result<()> {
    let request = read_request(cmd.file())?;
    let dispatcher = backends::dispatcher(config).await?;

    let result = submit(&cmd, &dispatcher, &request).await;

    if let Err(e) = dispatcher.disconnect().await {
        output::print_warning(&format!("Broker session did not close cleanly: {}", e));
    }

    let submitted = match result {
        Ok(submitted) => submitted,
        Err(e) if e.code() == ErrorCode::PartialBatchFailure => {
            let dispatched = e.dispatched_job_ids();
            output::print_warning(&format!(
                "{} job(s) of parent {} were queued before the batch failed:",
                dispatched.len(),
                e.details().entity_id.as_deref().unwrap_or("-")
            ));
            for id in &dispatched {
                output::print_detail("queued", id.as_str());
            }
            return Err(e.into());
        }
        Err(e) => return Err(e.into()),
    };

    match format {
        OutputFormat::Table => print_table(&submitted),
        _ => output::print_item(&submitted, format)?,
    }

    Ok(())
}
