//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;

use raptor_core::broker::{Broker, BrokerSession, InMemoryBroker, PublishOptions};
use raptor_core::config::{DispatchConfig, LaneConfig, LanesConfig};
use raptor_core::dispatch::JobDispatcher;
use raptor_core::error::Result;
use raptor_core::jobs::{JobId, JobMetadata, JobMetadataPatch, JobStatus};
use raptor_core::ledger::{InMemoryLedger, JobLedger};
use raptor_core::request::QuantRequest;

// ============================================================================
// Requests
// ============================================================================

/// A request whose model has the given event trees and sequence names.
pub fn model_request(trees: Vec<(&str, Vec<&str>)>) -> QuantRequest {
    let event_trees: Vec<Value> = trees
        .into_iter()
        .map(|(name, sequences)| {
            json!({
                "name": name,
                "sequences": sequences
                    .iter()
                    .map(|s| json!({"name": s, "state": "failure"}))
                    .collect::<Vec<_>>(),
            })
        })
        .collect();

    serde_json::from_value(json!({
        "settings": {"mocus": true},
        "model": {
            "eventTrees": event_trees,
            "faultTrees": [{"name": "FT1"}],
        }
    }))
    .unwrap()
}

/// A sequence result as a worker would write it.
pub fn sequence_output(ie: &str, sequences: &[&str]) -> Value {
    json!({
        "modelFeatures": {"gates": 3},
        "results": {
            "initiatingEvents": [{
                "name": ie,
                "sequences": sequences.iter().map(|s| json!({"name": s, "value": 1e-6})).collect::<Vec<_>>(),
            }],
            "sumOfProducts": [],
        }
    })
}

// ============================================================================
// Worker simulation
// ============================================================================

/// Record a job directly, as if dispatched earlier.
pub async fn seed_job(ledger: &InMemoryLedger, job_id: &str, children: Option<Vec<&str>>) {
    let mut patch = JobMetadataPatch::new().sent_at(1_000);
    if let Some(children) = children {
        patch = patch.child_jobs(children.into_iter().map(JobId::from).collect());
    }
    ledger
        .create_job_metadata(&JobId::from(job_id), "input", patch)
        .await
        .unwrap();
}

/// Store `output` and mark `job_id` completed, as a worker would.
pub async fn complete_job(ledger: &InMemoryLedger, job_id: &str, output: &[u8]) {
    let output_id = ledger.store_output_data(output).await.unwrap();
    ledger
        .update_job_metadata(
            &JobId::from(job_id),
            JobMetadataPatch::new()
                .status(JobStatus::Completed)
                .output_id(output_id)
                .received_at(2_000),
        )
        .await
        .unwrap();
}

/// Mark `job_id` failed with `error`.
pub async fn fail_job(ledger: &InMemoryLedger, job_id: &str, error: &str) {
    ledger
        .update_job_metadata(
            &JobId::from(job_id),
            JobMetadataPatch::new().status(JobStatus::Failed).error(error),
        )
        .await
        .unwrap();
}

// ============================================================================
// Call recording
// ============================================================================

/// A ledger or broker call, in the order it happened.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    StoreInput,
    CreateMetadata {
        job_id: JobId,
        child_jobs: Option<Vec<JobId>>,
    },
    UpdateMetadata {
        job_id: JobId,
    },
    Publish {
        exchange: String,
        job_id: String,
    },
}

pub type CallLog = Arc<Mutex<Vec<Call>>>;

/// Ledger wrapper that appends every write to a shared log.
pub struct RecordingLedger {
    pub inner: Arc<InMemoryLedger>,
    pub log: CallLog,
}

#[async_trait]
impl JobLedger for RecordingLedger {
    async fn store_input_data(&self, data: &[u8]) -> Result<String> {
        self.log.lock().push(Call::StoreInput);
        self.inner.store_input_data(data).await
    }

    async fn get_input_data(&self, input_id: &str) -> Result<Vec<u8>> {
        self.inner.get_input_data(input_id).await
    }

    async fn store_output_data(&self, data: &[u8]) -> Result<String> {
        self.inner.store_output_data(data).await
    }

    async fn get_output_data(&self, output_id: &str) -> Result<Vec<u8>> {
        self.inner.get_output_data(output_id).await
    }

    async fn create_job_metadata(&self, job_id: &JobId, input_id: &str, fields: JobMetadataPatch) -> Result<()> {
        self.log.lock().push(Call::CreateMetadata {
            job_id: job_id.clone(),
            child_jobs: fields.child_jobs.clone(),
        });
        self.inner.create_job_metadata(job_id, input_id, fields).await
    }

    async fn update_job_metadata(&self, job_id: &JobId, fields: JobMetadataPatch) -> Result<()> {
        self.log.lock().push(Call::UpdateMetadata { job_id: job_id.clone() });
        self.inner.update_job_metadata(job_id, fields).await
    }

    async fn get_job_metadata(&self, job_id: &JobId) -> Result<JobMetadata> {
        self.inner.get_job_metadata(job_id).await
    }

    async fn get_all_job_metadata(&self) -> Result<Vec<JobMetadata>> {
        self.inner.get_all_job_metadata().await
    }

    async fn ping(&self) -> Result<()> {
        self.inner.ping().await
    }
}

/// Broker wrapper that appends every publish to a shared log.
pub struct RecordingBroker {
    pub inner: Arc<InMemoryBroker>,
    pub log: CallLog,
}

#[async_trait]
impl Broker for RecordingBroker {
    async fn setup_queue(&self, lane: &LaneConfig) -> Result<()> {
        self.inner.setup_queue(lane).await
    }

    async fn check_exchange(&self, exchange: &str) -> Result<()> {
        self.inner.check_exchange(exchange).await
    }

    async fn publish(&self, exchange: &str, routing_key: &str, body: &[u8], options: PublishOptions) -> Result<()> {
        let job_id = serde_json::from_slice::<Value>(body)
            .ok()
            .and_then(|v| v["id"].as_str().map(str::to_string))
            .unwrap_or_default();
        self.log.lock().push(Call::Publish {
            exchange: exchange.to_string(),
            job_id,
        });
        self.inner.publish(exchange, routing_key, body, options).await
    }

    async fn delete_exchange(&self, exchange: &str) -> Result<()> {
        self.inner.delete_exchange(exchange).await
    }

    async fn queue_depth(&self, queue: &str) -> Result<u64> {
        self.inner.queue_depth(queue).await
    }

    async fn close_channel(&self) -> Result<()> {
        self.inner.close_channel().await
    }

    async fn close_connection(&self) -> Result<()> {
        self.inner.close_connection().await
    }

    async fn ping(&self) -> Result<()> {
        self.inner.ping().await
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub broker: Arc<InMemoryBroker>,
    pub ledger: Arc<InMemoryLedger>,
    pub log: CallLog,
    pub dispatcher: JobDispatcher,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(DispatchConfig::default()).await
    }

    pub async fn with_config(config: DispatchConfig) -> Self {
        let broker = Arc::new(InMemoryBroker::new());
        let ledger = Arc::new(InMemoryLedger::new());
        let log: CallLog = Arc::new(Mutex::new(Vec::new()));

        let recording_broker = Arc::new(RecordingBroker {
            inner: broker.clone(),
            log: log.clone(),
        });
        let recording_ledger = Arc::new(RecordingLedger {
            inner: ledger.clone(),
            log: log.clone(),
        });

        let session = BrokerSession::open(recording_broker, LanesConfig::default())
            .await
            .unwrap();
        let dispatcher = JobDispatcher::new(session, recording_ledger, config);

        Self {
            broker,
            ledger,
            log,
            dispatcher,
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.log.lock().clone()
    }

    pub async fn metadata(&self, job_id: &JobId) -> JobMetadata {
        self.ledger.get_job_metadata(job_id).await.unwrap()
    }
}
