//! Job creation and publication.
//!
//! Every job gets its input blob and metadata record in the ledger before its
//! message is published. For sequence batches the parent record, including the
//! full list of child ids, is written before the first child is published.

use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::broker::{BrokerSession, Lane};
use crate::config::DispatchConfig;
use crate::decompose::extract_sequence_requests;
use crate::error::{ErrorCode, RaptorError, Result};
use crate::jobs::{now_millis, JobId, JobMetadataPatch, JobStatus};
use crate::ledger::JobLedger;
use crate::request::{encode_payload, QuantRequest};
use crate::telemetry::metrics;

/// Creates jobs in the ledger and publishes them to the broker lanes.
pub struct JobDispatcher {
    session: BrokerSession,
    ledger: Arc<dyn JobLedger>,
    config: DispatchConfig,
}

impl JobDispatcher {
    pub fn new(session: BrokerSession, ledger: Arc<dyn JobLedger>, config: DispatchConfig) -> Self {
        Self {
            session,
            ledger,
            config,
        }
    }

    pub fn session(&self) -> &BrokerSession {
        &self.session
    }

    pub fn ledger(&self) -> &Arc<dyn JobLedger> {
        &self.ledger
    }

    /// Queue `request` as a single whole-model job on the quant lane.
    ///
    /// # Errors
    ///
    /// - `ValidationError` if the payload is invalid; nothing is persisted.
    /// - `BrokerUnavailable` if the quant exchange is missing or unreachable.
    ///   The record was already written: it is marked `orphaned` when
    ///   [`DispatchConfig::mark_orphans`] is set (the default), and otherwise
    ///   stays `processing` with no message behind it.
    /// - Ledger errors from storing the input or the metadata.
    pub async fn create_and_queue_quant(&self, request: &QuantRequest) -> Result<JobId> {
        let job_id = JobId::generate();
        let payload = encode_payload(&request.with_id(&job_id))?;

        let input_id = self.ledger.store_input_data(&payload).await?;
        self.ledger
            .create_job_metadata(
                &job_id,
                &input_id,
                JobMetadataPatch::new()
                    .status(JobStatus::Processing)
                    .sent_at(now_millis()),
            )
            .await?;

        if let Err(e) = self.session.publish(Lane::Quant, &payload).await {
            error!(job_id = %job_id, error = %e, "Failed to queue quantification job");
            if self.config.mark_orphans {
                self.mark_orphaned(&job_id, None, &e).await;
            }
            return Err(e);
        }

        info!(job_id = %job_id, lane = %Lane::Quant, "Quantification job queued");
        Ok(job_id)
    }

    /// Decompose `request` into one job per sequence and queue them on the
    /// distributed-sequences lane. Returns the child ids in dispatch order.
    ///
    /// # Errors
    ///
    /// `DecompositionFailed` and `ValidationError` are raised before anything
    /// is persisted. `PartialBatchFailure` means the parent record exists and
    /// the listed children were already published.
    pub async fn create_and_queue_sequence_batch(&self, request: &QuantRequest) -> Result<Vec<JobId>> {
        self.queue_sequence_batch(request, Lane::DistributedSequences).await
    }

    /// As [`create_and_queue_sequence_batch`](Self::create_and_queue_sequence_batch),
    /// on the adaptive-sequences lane.
    pub async fn create_and_queue_adaptive_sequence_batch(
        &self,
        request: &QuantRequest,
    ) -> Result<Vec<JobId>> {
        self.queue_sequence_batch(request, Lane::AdaptiveSequences).await
    }

    /// Delete the lane exchanges and close the broker session.
    pub async fn shutdown(&self) -> Result<()> {
        self.session.shutdown().await
    }

    /// Close the broker session, leaving the lanes provisioned.
    pub async fn disconnect(&self) -> Result<()> {
        self.session.disconnect().await
    }

    async fn queue_sequence_batch(&self, request: &QuantRequest, lane: Lane) -> Result<Vec<JobId>> {
        let parent_id = JobId::generate();
        let batch = extract_sequence_requests(request, &parent_id)?;
        if batch.is_empty() {
            return Err(RaptorError::decomposition("No sequences found in the model"));
        }

        let parent_payload = encode_payload(&request.with_id(&parent_id))?;
        let child_payloads = batch
            .sequence_requests
            .iter()
            .map(encode_payload)
            .collect::<Result<Vec<_>>>()?;

        debug!(
            job_id = %parent_id,
            lane = %lane,
            child_count = batch.len(),
            "Creating batch job"
        );
        metrics::record_batch_size(lane.as_str(), batch.len());

        let parent_input = self.ledger.store_input_data(&parent_payload).await?;
        self.ledger
            .create_job_metadata(
                &parent_id,
                &parent_input,
                JobMetadataPatch::new()
                    .status(JobStatus::Processing)
                    .child_jobs(batch.sequence_job_ids.clone())
                    .sent_at(now_millis()),
            )
            .await?;

        for (index, (child_id, payload)) in batch.sequence_job_ids.iter().zip(&child_payloads).enumerate() {
            if let Err(cause) = self.dispatch_child(&parent_id, child_id, payload, lane).await {
                let dispatched = &batch.sequence_job_ids[..index];
                let unpublished = &batch.sequence_job_ids[index..];
                error!(
                    job_id = %parent_id,
                    child_job_id = %child_id,
                    lane = %lane,
                    dispatched = dispatched.len(),
                    error = %cause,
                    "Failed to queue sequence"
                );
                metrics::record_partial_batch_failure(lane.as_str());

                if self.config.mark_orphans {
                    for orphan in unpublished {
                        self.mark_orphaned(orphan, Some(&parent_id), &cause).await;
                    }
                }
                let note = format!("Failed to queue sequence {}: {}", child_id, cause.user_message());
                if let Err(e) = self
                    .ledger
                    .update_job_metadata(&parent_id, JobMetadataPatch::new().error(note))
                    .await
                {
                    warn!(job_id = %parent_id, error = %e, "Failed to record batch failure on parent");
                }

                return Err(RaptorError::partial_batch_failure(&parent_id, child_id, dispatched, cause));
            }
            debug!(job_id = %child_id, lane = %lane, "Sequence job queued");
        }

        info!(
            job_id = %parent_id,
            lane = %lane,
            child_count = batch.len(),
            "Sequence batch queued"
        );
        Ok(batch.sequence_job_ids)
    }

    async fn dispatch_child(&self, parent_id: &JobId, child_id: &JobId, payload: &[u8], lane: Lane) -> Result<()> {
        let input_id = self.ledger.store_input_data(payload).await?;
        self.ledger
            .create_job_metadata(
                child_id,
                &input_id,
                JobMetadataPatch::new()
                    .status(JobStatus::Processing)
                    .parent_job_id(parent_id.clone())
                    .sent_at(now_millis()),
            )
            .await?;
        self.session.publish(lane, payload).await
    }

    /// Best-effort: record that `job_id` was never published.
    async fn mark_orphaned(&self, job_id: &JobId, parent_id: Option<&JobId>, cause: &RaptorError) {
        let patch = JobMetadataPatch::new()
            .status(JobStatus::Orphaned)
            .error(cause.user_message().to_string());

        let outcome = match self.ledger.update_job_metadata(job_id, patch.clone()).await {
            Err(e) if e.code() == ErrorCode::JobNotFound => {
                let patch = match parent_id {
                    Some(parent) => patch.parent_job_id(parent.clone()),
                    None => patch,
                };
                self.ledger.create_job_metadata(job_id, "", patch).await
            }
            other => other,
        };

        match outcome {
            Ok(()) => debug!(job_id = %job_id, "Job marked orphaned"),
            Err(e) => warn!(job_id = %job_id, error = %e, "Failed to mark job orphaned"),
        }
    }
}

impl std::fmt::Debug for JobDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobDispatcher")
            .field("session", &self.session)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
