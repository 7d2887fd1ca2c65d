//! In-process ledger for tests and local development.

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use uuid::Uuid;

use super::{sort_by_dispatch, JobLedger};
use crate::error::{RaptorError, Result};
use crate::jobs::{JobId, JobMetadata, JobMetadataPatch};

/// Ledger held in concurrent maps.
///
/// Reads and metadata creation can be made to fail per job id.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    metadata: DashMap<JobId, JobMetadata>,
    inputs: DashMap<String, Vec<u8>>,
    outputs: DashMap<String, Vec<u8>>,
    failing_reads: DashSet<JobId>,
    failing_creates: DashSet<JobId>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `get_job_metadata(job_id)` fail with a ledger error.
    pub fn fail_metadata_reads(&self, job_id: &JobId) {
        self.failing_reads.insert(job_id.clone());
    }

    /// Make `create_job_metadata(job_id, ..)` fail with a ledger error.
    pub fn fail_metadata_creates(&self, job_id: &JobId) {
        self.failing_creates.insert(job_id.clone());
    }

    /// Insert a record directly.
    pub fn insert(&self, metadata: JobMetadata) {
        self.metadata.insert(metadata.job_id.clone(), metadata);
    }

    pub fn contains(&self, job_id: &JobId) -> bool {
        self.metadata.contains_key(job_id)
    }

    pub fn len(&self) -> usize {
        self.metadata.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metadata.is_empty()
    }
}

#[async_trait]
impl JobLedger for InMemoryLedger {
    async fn store_input_data(&self, data: &[u8]) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        self.inputs.insert(id.clone(), data.to_vec());
        Ok(id)
    }

    async fn get_input_data(&self, input_id: &str) -> Result<Vec<u8>> {
        self.inputs
            .get(input_id)
            .map(|blob| blob.value().clone())
            .ok_or_else(|| RaptorError::blob_not_found("input", input_id))
    }

    async fn store_output_data(&self, data: &[u8]) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        self.outputs.insert(id.clone(), data.to_vec());
        Ok(id)
    }

    async fn get_output_data(&self, output_id: &str) -> Result<Vec<u8>> {
        self.outputs
            .get(output_id)
            .map(|blob| blob.value().clone())
            .ok_or_else(|| RaptorError::blob_not_found("output", output_id))
    }

    async fn create_job_metadata(
        &self,
        job_id: &JobId,
        input_id: &str,
        fields: JobMetadataPatch,
    ) -> Result<()> {
        if self.failing_creates.contains(job_id) {
            return Err(RaptorError::ledger(format!(
                "injected create failure for {}",
                job_id
            )));
        }
        let mut metadata = JobMetadata::new(job_id.clone(), input_id);
        metadata.apply(fields);
        self.metadata.insert(job_id.clone(), metadata);
        Ok(())
    }

    async fn update_job_metadata(&self, job_id: &JobId, fields: JobMetadataPatch) -> Result<()> {
        let mut entry = self
            .metadata
            .get_mut(job_id)
            .ok_or_else(|| RaptorError::job_not_found(job_id))?;
        entry.apply(fields);
        Ok(())
    }

    async fn get_job_metadata(&self, job_id: &JobId) -> Result<JobMetadata> {
        if self.failing_reads.contains(job_id) {
            return Err(RaptorError::ledger(format!(
                "injected read failure for {}",
                job_id
            )));
        }
        self.metadata
            .get(job_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| RaptorError::job_not_found(job_id))
    }

    async fn get_all_job_metadata(&self) -> Result<Vec<JobMetadata>> {
        let mut records: Vec<_> = self
            .metadata
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        sort_by_dispatch(&mut records);
        Ok(records)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
