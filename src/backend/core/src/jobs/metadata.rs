//! Ledger records describing a job and its timing.

use serde::{Deserialize, Serialize};

use super::{JobId, JobStatus};
use crate::error::Result;

/// Current time as epoch milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Metadata
// ═══════════════════════════════════════════════════════════════════════════════

/// The ledger's record of one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobMetadata {
    pub job_id: JobId,

    /// Blob id of the request payload
    pub input_id: String,

    /// Blob id of the worker's result, once written
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_id: Option<String>,

    #[serde(default)]
    pub status: JobStatus,

    /// Epoch milliseconds at dispatch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<i64>,

    /// Epoch milliseconds at which a worker received the message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub received_at: Option<i64>,

    /// Children of a decomposed request, fixed at creation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child_jobs: Option<Vec<JobId>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_job_id: Option<JobId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<JobStats>,

    /// Failure description written by a worker or by the dispatcher
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobMetadata {
    /// A fresh record in the `processing` state.
    pub fn new(job_id: JobId, input_id: impl Into<String>) -> Self {
        Self {
            job_id,
            input_id: input_id.into(),
            output_id: None,
            status: JobStatus::Processing,
            sent_at: None,
            received_at: None,
            child_jobs: None,
            parent_job_id: None,
            stats: None,
            error: None,
        }
    }

    /// Whether this record fans out to child jobs.
    pub fn is_parent(&self) -> bool {
        self.child_jobs.as_ref().is_some_and(|c| !c.is_empty())
    }

    /// Overwrite every field the patch sets.
    pub fn apply(&mut self, patch: JobMetadataPatch) {
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(output_id) = patch.output_id {
            self.output_id = Some(output_id);
        }
        if let Some(sent_at) = patch.sent_at {
            self.sent_at = Some(sent_at);
        }
        if let Some(received_at) = patch.received_at {
            self.received_at = Some(received_at);
        }
        if let Some(child_jobs) = patch.child_jobs {
            self.child_jobs = Some(child_jobs);
        }
        if let Some(parent) = patch.parent_job_id {
            self.parent_job_id = Some(parent);
        }
        if let Some(stats) = patch.stats {
            self.stats = Some(stats);
        }
        if let Some(error) = patch.error {
            self.error = Some(error);
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Stats
// ═══════════════════════════════════════════════════════════════════════════════

/// Timing and quantification figures reported by a worker.
///
/// Every field is explicitly nullable; absent figures serialize as `null`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JobStats {
    /// Milliseconds between dispatch and pickup
    pub idle_time: Option<i64>,
    /// Milliseconds spent executing
    pub execution_time: Option<i64>,
    pub started_at: Option<i64>,
    pub ended_at: Option<i64>,
    pub analysis_seconds: Option<f64>,
    pub total_seconds: Option<f64>,
    pub probability: Option<f64>,
    pub products: Option<f64>,
    pub original_products: Option<f64>,
    pub exact_probability: Option<f64>,
    pub approximate_probability: Option<f64>,
    pub relative_error: Option<f64>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Partial Updates
// ═══════════════════════════════════════════════════════════════════════════════

/// A partial set of metadata fields for create and update calls.
///
/// Unset fields are left untouched by the ledger.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobMetadataPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<JobStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub received_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub child_jobs: Option<Vec<JobId>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_job_id: Option<JobId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<JobStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobMetadataPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn output_id(mut self, output_id: impl Into<String>) -> Self {
        self.output_id = Some(output_id.into());
        self
    }

    pub fn sent_at(mut self, millis: i64) -> Self {
        self.sent_at = Some(millis);
        self
    }

    pub fn received_at(mut self, millis: i64) -> Self {
        self.received_at = Some(millis);
        self
    }

    pub fn child_jobs(mut self, children: Vec<JobId>) -> Self {
        self.child_jobs = Some(children);
        self
    }

    pub fn parent_job_id(mut self, parent: JobId) -> Self {
        self.parent_job_id = Some(parent);
        self
    }

    pub fn stats(mut self, stats: JobStats) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// The set fields as `(camelCase name, JSON value)` pairs.
    pub fn fields(&self) -> Result<Vec<(String, serde_json::Value)>> {
        match serde_json::to_value(self)? {
            serde_json::Value::Object(map) => Ok(map.into_iter().collect()),
            _ => Ok(Vec::new()),
        }
    }
}
