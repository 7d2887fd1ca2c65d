//! Read side: job status, stats and aggregated sequence results.
//!
//! A problem with one child job never fails a parent-level read. It is
//! reported in `failedJobs` (outputs) or by omitting the child (stats). Only a
//! missing or unreadable record for the requested job itself is an error.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::error::Result;
use crate::jobs::{JobId, JobMetadata, JobStats, JobStatus};
use crate::ledger::JobLedger;
use crate::telemetry::metrics;

pub mod merge;

pub use merge::{merge_sequence_results, AggregatedOutput, AggregatedResults, MergedInitiatingEvent};

const OUTPUT_NOT_AVAILABLE: &str = "Output not available";

// ═══════════════════════════════════════════════════════════════════════════════
// Response Types
// ═══════════════════════════════════════════════════════════════════════════════

/// Where to find a job's input and results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusView {
    pub input_id: String,
    pub aggregated_output_job_id: JobId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child_job_ids: Option<Vec<JobId>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildJobOutput {
    pub job_id: JobId,
    pub output: Value,
}

/// A child whose results could not be used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedJob {
    pub job_id: JobId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobOutputResponse {
    pub job_id: JobId,
    /// The job's own output; a string if it is not valid JSON
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child_outputs: Option<Vec<ChildJobOutput>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregated_output: Option<AggregatedOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_jobs: Option<Vec<FailedJob>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildStats {
    pub job_id: JobId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub received_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<JobStats>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatsView {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub received_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<JobStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child_stats: Option<Vec<ChildStats>>,
}

/// Outcome of reading one child for aggregation.
enum ChildResult {
    Contributed(Map<String, Value>),
    Failed(Option<String>),
}

// ═══════════════════════════════════════════════════════════════════════════════
// Aggregator
// ═══════════════════════════════════════════════════════════════════════════════

/// Reads job records and assembles parent-level views.
#[derive(Clone)]
pub struct ResultAggregator {
    ledger: Arc<dyn JobLedger>,
}

impl ResultAggregator {
    pub fn new(ledger: Arc<dyn JobLedger>) -> Self {
        Self { ledger }
    }

    /// Input blob and child ids for `job_id`.
    pub async fn get_job_status(&self, job_id: &JobId) -> Result<JobStatusView> {
        let metadata = self.ledger.get_job_metadata(job_id).await?;
        Ok(JobStatusView {
            input_id: metadata.input_id,
            aggregated_output_job_id: job_id.clone(),
            child_job_ids: metadata.child_jobs.filter(|c| !c.is_empty()),
        })
    }

    /// The job's own output plus, for parents, every usable child result
    /// merged into one.
    pub async fn get_aggregated_job_output(&self, job_id: &JobId) -> Result<JobOutputResponse> {
        let metadata = self.ledger.get_job_metadata(job_id).await?;
        let children = metadata.child_jobs.clone().unwrap_or_default();

        let (own_output, child_results) = futures::join!(
            self.load_output(metadata.output_id.as_deref()),
            join_all(children.iter().map(|child| self.read_child(child))),
        );

        let mut child_outputs = Vec::new();
        let mut contributions = Vec::new();
        let mut failed_jobs = Vec::new();

        for (child_id, result) in children.into_iter().zip(child_results) {
            match result {
                ChildResult::Contributed(output) => {
                    child_outputs.push(ChildJobOutput {
                        job_id: child_id,
                        output: Value::Object(output.clone()),
                    });
                    contributions.push(output);
                }
                ChildResult::Failed(error) => failed_jobs.push(FailedJob { job_id: child_id, error }),
            }
        }

        metrics::record_child_unavailable(failed_jobs.len() as u64);
        debug!(
            job_id = %job_id,
            contributed = contributions.len(),
            failed = failed_jobs.len(),
            "Aggregated child outputs"
        );

        let aggregated_output = if contributions.is_empty() {
            None
        } else {
            Some(merge_sequence_results(&contributions))
        };

        Ok(JobOutputResponse {
            job_id: job_id.clone(),
            output: own_output,
            child_outputs: non_empty(child_outputs),
            aggregated_output,
            failed_jobs: non_empty(failed_jobs),
        })
    }

    /// Timing and stats for `job_id` and each readable child.
    pub async fn get_job_stats(&self, job_id: &JobId) -> Result<JobStatsView> {
        let metadata = self.ledger.get_job_metadata(job_id).await?;
        let children = metadata.child_jobs.unwrap_or_default();

        let fetched = join_all(children.iter().map(|child| self.ledger.get_job_metadata(child))).await;

        let child_stats: Vec<ChildStats> = children
            .into_iter()
            .zip(fetched)
            .filter_map(|(child_id, result)| match result {
                Ok(child) => Some(ChildStats {
                    job_id: child_id,
                    sent_at: child.sent_at,
                    received_at: child.received_at,
                    stats: child.stats,
                }),
                Err(e) => {
                    warn!(job_id = %child_id, error = %e, "Could not fetch stats for child job");
                    None
                }
            })
            .collect();

        Ok(JobStatsView {
            sent_at: metadata.sent_at,
            received_at: metadata.received_at,
            stats: metadata.stats,
            child_stats: non_empty(child_stats),
        })
    }

    /// Every job record.
    pub async fn get_quantified_reports(&self) -> Result<Vec<JobMetadata>> {
        self.ledger.get_all_job_metadata().await
    }

    /// Every job record with `status`.
    pub async fn get_jobs_by_status(&self, status: JobStatus) -> Result<Vec<JobMetadata>> {
        let mut records = self.ledger.get_all_job_metadata().await?;
        records.retain(|record| record.status == status);
        Ok(records)
    }

    pub async fn get_job_metadata(&self, job_id: &JobId) -> Result<JobMetadata> {
        self.ledger.get_job_metadata(job_id).await
    }

    /// A stored request payload as text.
    pub async fn get_input_data(&self, input_id: &str) -> Result<String> {
        let data = self.ledger.get_input_data(input_id).await?;
        Ok(String::from_utf8_lossy(&data).into_owned())
    }

    /// A stored result payload as text.
    pub async fn get_output_data(&self, output_id: &str) -> Result<String> {
        let data = self.ledger.get_output_data(output_id).await?;
        Ok(String::from_utf8_lossy(&data).into_owned())
    }

    async fn read_child(&self, child_id: &JobId) -> ChildResult {
        let metadata = match self.ledger.get_job_metadata(child_id).await {
            Ok(metadata) => metadata,
            Err(e) => {
                error!(job_id = %child_id, error = %e, "Failed to load metadata for child job");
                return ChildResult::Failed(Some(e.to_string()));
            }
        };

        match metadata.status {
            JobStatus::Completed => match self.load_output(metadata.output_id.as_deref()).await {
                Some(Value::Object(output)) => ChildResult::Contributed(output),
                _ => ChildResult::Failed(Some(OUTPUT_NOT_AVAILABLE.to_string())),
            },
            JobStatus::Failed => ChildResult::Failed(metadata.error),
            other => ChildResult::Failed(Some(format!(
                "Job status {} does not have output available",
                other
            ))),
        }
    }

    /// Load and parse an output blob. Text that is not JSON is returned as a
    /// string; a missing id or blob yields `None`.
    async fn load_output(&self, output_id: Option<&str>) -> Option<Value> {
        let output_id = output_id?;
        match self.ledger.get_output_data(output_id).await {
            Ok(raw) => Some(
                serde_json::from_slice(&raw)
                    .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&raw).into_owned())),
            ),
            Err(e) => {
                error!(output_id, error = %e, "Failed to load output");
                None
            }
        }
    }
}

impl std::fmt::Debug for ResultAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultAggregator").finish_non_exhaustive()
    }
}

fn non_empty<T>(items: Vec<T>) -> Option<Vec<T>> {
    if items.is_empty() {
        None
    } else {
        Some(items)
    }
}
