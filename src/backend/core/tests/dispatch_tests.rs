//! Tests for job creation and publication.
//!
//! Tests cover:
//! - Whole-model jobs on the quant lane
//! - Sequence batches on both sequence lanes
//! - Ledger writes ordered before publishes
//! - Validation and decomposition failures persisting nothing
//! - Partial batch failures and orphan marking
//! - Session shutdown

mod common;

use common::{model_request, Call, Harness};
use raptor_core::config::DispatchConfig;
use raptor_core::error::ErrorCode;
use raptor_core::jobs::{JobId, JobStatus};
use raptor_core::ledger::JobLedger;
use raptor_core::request::QuantRequest;
use serde_json::{json, Value};

fn publishes(calls: &[Call]) -> Vec<(String, String)> {
    calls
        .iter()
        .filter_map(|call| match call {
            Call::Publish { exchange, job_id } => Some((exchange.clone(), job_id.clone())),
            _ => None,
        })
        .collect()
}

// ============================================================================
// Quant Lane
// ============================================================================

#[tokio::test]
async fn test_quant_job_is_recorded_then_published() {
    let harness = Harness::new().await;
    let request = model_request(vec![("IE1", vec!["SEQ1"])]);

    let job_id = harness.dispatcher.create_and_queue_quant(&request).await.unwrap();

    let meta = harness.metadata(&job_id).await;
    assert_eq!(meta.status, JobStatus::Processing);
    assert!(meta.sent_at.is_some());
    assert!(meta.child_jobs.is_none());

    let input: Value = serde_json::from_slice(&harness.ledger.get_input_data(&meta.input_id).await.unwrap()).unwrap();
    assert_eq!(input["id"], json!(job_id.as_str()));
    assert_eq!(input["settings"], json!({"mocus": true}));

    let published = harness.broker.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].exchange, "quant-exchange");
    assert!(published[0].persistent);
    assert_eq!(published[0].json().unwrap()["id"], json!(job_id.as_str()));

    let calls = harness.calls();
    assert!(matches!(calls[0], Call::StoreInput));
    assert!(matches!(calls[1], Call::CreateMetadata { .. }));
    assert!(matches!(calls[2], Call::Publish { .. }));
}

#[tokio::test]
async fn test_quant_ignores_caller_supplied_id() {
    let harness = Harness::new().await;
    let mut request = model_request(vec![("IE1", vec!["SEQ1"])]);
    request.id = Some("caller-id".into());

    let job_id = harness.dispatcher.create_and_queue_quant(&request).await.unwrap();
    assert_ne!(job_id.as_str(), "caller-id");
}

#[tokio::test]
async fn test_invalid_quant_payload_persists_nothing() {
    let harness = Harness::new().await;
    let request: QuantRequest = serde_json::from_value(json!({
        "model": {"eventTrees": [{"name": "", "sequences": []}]}
    }))
    .unwrap();

    let err = harness.dispatcher.create_and_queue_quant(&request).await.unwrap_err();

    assert_eq!(err.code(), ErrorCode::ValidationError);
    assert!(harness.calls().is_empty());
    assert!(harness.ledger.is_empty());
}

#[tokio::test]
async fn test_quant_publish_to_missing_exchange() {
    let harness = Harness::new().await;
    harness.broker.remove_exchange("quant-exchange");

    let err = harness
        .dispatcher
        .create_and_queue_quant(&model_request(vec![("IE1", vec!["SEQ1"])]))
        .await
        .unwrap_err();

    assert_eq!(err.code(), ErrorCode::BrokerUnavailable);
    assert!(err.user_message().contains("quant-exchange"));

    let records = harness.ledger.get_all_job_metadata().await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, JobStatus::Orphaned);
}

#[tokio::test]
async fn test_quant_publish_failure_without_orphan_marking_stays_processing() {
    let harness = Harness::with_config(DispatchConfig { mark_orphans: false }).await;
    harness.broker.remove_exchange("quant-exchange");

    let err = harness
        .dispatcher
        .create_and_queue_quant(&model_request(vec![("IE1", vec!["SEQ1"])]))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::BrokerUnavailable);

    let records = harness.ledger.get_all_job_metadata().await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, JobStatus::Processing);
    assert!(records[0].error.is_none());
    assert!(harness.broker.published().is_empty());
    assert!(!harness.calls().iter().any(|c| matches!(c, Call::UpdateMetadata { .. })));
}

// ============================================================================
// Sequence Batches
// ============================================================================

#[tokio::test]
async fn test_sequence_batch_returns_child_ids_in_order() {
    let harness = Harness::new().await;
    let request = model_request(vec![("IE1", vec!["SEQ1", "SEQ2"]), ("IE2", vec!["SEQ3"])]);

    let ids = harness.dispatcher.create_and_queue_sequence_batch(&request).await.unwrap();

    assert_eq!(ids.len(), 3);
    let parent = ids[0].as_str().trim_end_matches("-SEQ1").to_string();
    for (id, seq) in ids.iter().zip(["SEQ1", "SEQ2", "SEQ3"]) {
        assert_eq!(id.as_str(), format!("{}-{}", parent, seq));
    }

    let published = publishes(&harness.calls());
    assert_eq!(published.len(), 3);
    assert!(published.iter().all(|(exchange, _)| exchange == "distributed-sequences-exchange"));
    assert_eq!(
        published.iter().map(|(_, id)| id.clone()).collect::<Vec<_>>(),
        ids.iter().map(|id| id.to_string()).collect::<Vec<_>>()
    );
}

#[tokio::test]
async fn test_parent_child_list_persisted_before_any_publish() {
    let harness = Harness::new().await;
    let request = model_request(vec![("IE1", vec!["SEQ1", "SEQ2", "SEQ3"])]);

    let ids = harness.dispatcher.create_and_queue_sequence_batch(&request).await.unwrap();
    let calls = harness.calls();

    let parent_create = calls
        .iter()
        .position(|call| matches!(call, Call::CreateMetadata { child_jobs: Some(_), .. }))
        .expect("parent metadata was never created");
    let first_publish = calls
        .iter()
        .position(|call| matches!(call, Call::Publish { .. }))
        .expect("nothing was published");

    assert!(parent_create < first_publish);
    match &calls[parent_create] {
        Call::CreateMetadata { child_jobs, .. } => assert_eq!(child_jobs.as_ref(), Some(&ids)),
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn test_each_child_recorded_before_its_publish() {
    let harness = Harness::new().await;
    let ids = harness
        .dispatcher
        .create_and_queue_sequence_batch(&model_request(vec![("IE1", vec!["SEQ1", "SEQ2"])]))
        .await
        .unwrap();
    let calls = harness.calls();

    for id in &ids {
        let created = calls
            .iter()
            .position(|c| matches!(c, Call::CreateMetadata { job_id, .. } if job_id == id))
            .unwrap();
        let published = calls
            .iter()
            .position(|c| matches!(c, Call::Publish { job_id, .. } if job_id == id.as_str()))
            .unwrap();
        assert!(created < published);
    }
}

#[tokio::test]
async fn test_child_metadata_links_parent() {
    let harness = Harness::new().await;
    let ids = harness
        .dispatcher
        .create_and_queue_sequence_batch(&model_request(vec![("IE1", vec!["SEQ1", "SEQ2"])]))
        .await
        .unwrap();

    let child = harness.metadata(&ids[1]).await;
    let parent_id = child.parent_job_id.clone().unwrap();
    assert_eq!(child.status, JobStatus::Processing);

    let parent = harness.metadata(&parent_id).await;
    assert_eq!(parent.child_jobs, Some(ids.clone()));
    assert_eq!(parent.status, JobStatus::Processing);

    let child_input: Value =
        serde_json::from_slice(&harness.ledger.get_input_data(&child.input_id).await.unwrap()).unwrap();
    assert_eq!(child_input["id"], json!(ids[1].as_str()));
    assert_eq!(child_input["model"]["eventTrees"][0]["sequences"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_adaptive_batch_uses_adaptive_lane() {
    let harness = Harness::new().await;
    let ids = harness
        .dispatcher
        .create_and_queue_adaptive_sequence_batch(&model_request(vec![("IE1", vec!["SEQ1", "SEQ2"])]))
        .await
        .unwrap();

    assert_eq!(ids.len(), 2);
    let published = harness.broker.published();
    assert!(published.iter().all(|m| m.exchange == "adaptive-sequences-exchange"));
    assert_eq!(harness.broker.queued_messages("adaptive-sequences-queue").len(), 2);
    assert!(harness.broker.queued_messages("distributed-sequences-queue").is_empty());
}

#[tokio::test]
async fn test_batch_without_event_trees_persists_nothing() {
    let harness = Harness::new().await;
    let err = harness
        .dispatcher
        .create_and_queue_sequence_batch(&model_request(vec![]))
        .await
        .unwrap_err();

    assert_eq!(err.code(), ErrorCode::DecompositionFailed);
    assert!(harness.calls().is_empty());
}

#[tokio::test]
async fn test_batch_without_sequences_is_rejected() {
    let harness = Harness::new().await;
    let err = harness
        .dispatcher
        .create_and_queue_sequence_batch(&model_request(vec![("IE1", vec![])]))
        .await
        .unwrap_err();

    assert_eq!(err.code(), ErrorCode::DecompositionFailed);
    assert!(harness.ledger.is_empty());
}

// ============================================================================
// Partial Batch Failure
// ============================================================================

#[tokio::test]
async fn test_publish_failure_mid_batch() {
    let harness = Harness::new().await;
    harness.broker.fail_publishes_after(2);
    let request = model_request(vec![("IE1", vec!["SEQ1", "SEQ2", "SEQ3", "SEQ4"])]);

    let err = harness
        .dispatcher
        .create_and_queue_sequence_batch(&request)
        .await
        .unwrap_err();

    assert_eq!(err.code(), ErrorCode::PartialBatchFailure);
    let dispatched = err.dispatched_job_ids();
    assert_eq!(dispatched.len(), 2);
    assert!(dispatched[0].as_str().ends_with("-SEQ1"));
    assert!(dispatched[1].as_str().ends_with("-SEQ2"));
    assert_eq!(harness.broker.published().len(), 2);

    let parent_id = harness.metadata(&dispatched[0]).await.parent_job_id.unwrap();
    let parent = harness.metadata(&parent_id).await;
    assert_eq!(parent.child_jobs.as_ref().map(Vec::len), Some(4));
    assert!(parent.error.as_deref().unwrap().contains("SEQ3"));

    for seq in ["SEQ1", "SEQ2"] {
        assert_eq!(harness.metadata(&parent_id.child(seq)).await.status, JobStatus::Processing);
    }
    for seq in ["SEQ3", "SEQ4"] {
        let orphan = harness.metadata(&parent_id.child(seq)).await;
        assert_eq!(orphan.status, JobStatus::Orphaned);
        assert_eq!(orphan.parent_job_id.as_ref(), Some(&parent_id));
        assert!(orphan.error.is_some());
    }
}

#[tokio::test]
async fn test_publish_failure_on_first_child() {
    let harness = Harness::new().await;
    let request = model_request(vec![("IE1", vec!["SEQ1", "SEQ2"])]);
    harness.broker.fail_publishes_after(0);

    let err = harness
        .dispatcher
        .create_and_queue_sequence_batch(&request)
        .await
        .unwrap_err();

    assert_eq!(err.code(), ErrorCode::PartialBatchFailure);
    assert!(err.dispatched_job_ids().is_empty());
    let orphaned: Vec<JobId> = harness
        .ledger
        .get_all_job_metadata()
        .await
        .unwrap()
        .into_iter()
        .filter(|m| m.status == JobStatus::Orphaned)
        .map(|m| m.job_id)
        .collect();
    assert_eq!(orphaned.len(), 2);
}

#[tokio::test]
async fn test_orphan_marking_can_be_disabled() {
    let harness = Harness::with_config(DispatchConfig { mark_orphans: false }).await;
    harness.broker.fail_publishes_after(1);

    let err = harness
        .dispatcher
        .create_and_queue_sequence_batch(&model_request(vec![("IE1", vec!["SEQ1", "SEQ2", "SEQ3"])]))
        .await
        .unwrap_err();

    assert_eq!(err.code(), ErrorCode::PartialBatchFailure);
    let parent_id = harness.metadata(&err.dispatched_job_ids()[0]).await.parent_job_id.unwrap();

    assert_eq!(harness.metadata(&parent_id.child("SEQ2")).await.status, JobStatus::Processing);
    assert!(!harness.ledger.contains(&parent_id.child("SEQ3")));
}

// ============================================================================
// Shutdown
// ============================================================================

#[tokio::test]
async fn test_shutdown_deletes_lane_exchanges() {
    let harness = Harness::new().await;
    harness.dispatcher.shutdown().await.unwrap();

    assert!(!harness.broker.has_exchange("quant-exchange"));
    assert!(!harness.broker.has_exchange("distributed-sequences-exchange"));
    assert!(!harness.broker.has_exchange("adaptive-sequences-exchange"));
    assert!(harness.broker.has_exchange("quant-dead-letter-exchange"));
    assert!(harness.broker.is_closed());
}

#[tokio::test]
async fn test_shutdown_reports_every_failed_deletion() {
    let harness = Harness::new().await;
    harness.broker.fail_exchange_deletion("quant-exchange");
    harness.broker.fail_exchange_deletion("adaptive-sequences-exchange");

    let err = harness.dispatcher.shutdown().await.unwrap_err();

    assert_eq!(err.code(), ErrorCode::ShutdownFailed);
    let detail = err.internal_message().unwrap();
    assert!(detail.contains("quant-exchange"));
    assert!(detail.contains("adaptive-sequences-exchange"));
    assert!(!harness.broker.has_exchange("distributed-sequences-exchange"));
    assert!(harness.broker.is_closed());
}
