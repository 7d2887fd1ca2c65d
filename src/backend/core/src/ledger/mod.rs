//! Durable store of job metadata and payload blobs.
//!
//! The ledger is shared with the workers that consume the lanes: this crate
//! creates records, workers move them through their lifecycle and attach
//! output blobs and stats.

use async_trait::async_trait;

use crate::error::Result;
use crate::jobs::{JobId, JobMetadata, JobMetadataPatch};

pub mod memory;
pub mod redis;

pub use self::memory::InMemoryLedger;
pub use self::redis::RedisLedger;

#[async_trait]
pub trait JobLedger: Send + Sync {
    /// Store a request payload and return its blob id.
    async fn store_input_data(&self, data: &[u8]) -> Result<String>;

    /// Fetch a request payload. `BlobNotFound` if absent.
    async fn get_input_data(&self, input_id: &str) -> Result<Vec<u8>>;

    /// Store a result payload and return its blob id.
    async fn store_output_data(&self, data: &[u8]) -> Result<String>;

    /// Fetch a result payload. `BlobNotFound` if absent.
    async fn get_output_data(&self, output_id: &str) -> Result<Vec<u8>>;

    /// Create (or replace) the record for `job_id`.
    async fn create_job_metadata(
        &self,
        job_id: &JobId,
        input_id: &str,
        fields: JobMetadataPatch,
    ) -> Result<()>;

    /// Overwrite the fields set in `fields`. `JobNotFound` if no record exists.
    async fn update_job_metadata(&self, job_id: &JobId, fields: JobMetadataPatch) -> Result<()>;

    /// `JobNotFound` if no record exists.
    async fn get_job_metadata(&self, job_id: &JobId) -> Result<JobMetadata>;

    /// Every record, oldest dispatch first.
    async fn get_all_job_metadata(&self) -> Result<Vec<JobMetadata>>;

    /// Health check.
    async fn ping(&self) -> Result<()>;
}

/// Ordering used by `get_all_job_metadata` implementations.
pub(crate) fn sort_by_dispatch(records: &mut [JobMetadata]) {
    records.sort_by(|a, b| {
        a.sent_at
            .cmp(&b.sent_at)
            .then_with(|| a.job_id.cmp(&b.job_id))
    });
}
