//! Splitting a whole-model request into one request per event-tree sequence.

use tracing::{debug, warn};

use crate::error::{RaptorError, Result};
use crate::jobs::JobId;
use crate::request::{EventTree, Model, QuantRequest};

/// Child requests produced from one parent, in dispatch order.
#[derive(Debug, Clone, Default)]
pub struct SequenceBatch {
    pub sequence_requests: Vec<QuantRequest>,
    pub sequence_job_ids: Vec<JobId>,
}

impl SequenceBatch {
    pub fn len(&self) -> usize {
        self.sequence_job_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequence_job_ids.is_empty()
    }

    /// Pairs of child id and child request.
    pub fn iter(&self) -> impl Iterator<Item = (&JobId, &QuantRequest)> {
        self.sequence_job_ids.iter().zip(self.sequence_requests.iter())
    }
}

/// Build one child request per sequence of every event tree.
///
/// Each child carries the parent's settings unchanged and a copy of the model
/// whose event trees are reduced to the single tree holding the sequence, which
/// is itself reduced to that sequence. Children are ordered by event tree, then
/// by sequence, in declaration order. Trees without sequences are skipped.
///
/// # Errors
///
/// Returns `DecompositionFailed` when the model has no event trees.
pub fn extract_sequence_requests(request: &QuantRequest, parent_job_id: &JobId) -> Result<SequenceBatch> {
    let trees = request.event_trees();
    if trees.is_empty() {
        return Err(RaptorError::decomposition("No event trees found in the model"));
    }

    let base_model = request.model.clone().unwrap_or_default();
    let mut batch = SequenceBatch::default();

    for tree in trees {
        if tree.sequences().is_empty() {
            warn!(event_tree = %tree.name, job_id = %parent_job_id, "Event tree has no sequences");
            continue;
        }

        for sequence in tree.sequences() {
            let child_id = parent_job_id.child(&sequence.name);

            let single_tree = EventTree {
                sequences: Some(vec![sequence.clone()]),
                ..tree.clone()
            };
            let model = Model {
                event_trees: Some(vec![single_tree]),
                ..base_model.clone()
            };

            batch.sequence_requests.push(QuantRequest {
                id: Some(child_id.to_string()),
                settings: request.settings.clone(),
                model: Some(model),
            });
            batch.sequence_job_ids.push(child_id);
        }
    }

    debug!(
        job_id = %parent_job_id,
        child_count = batch.len(),
        "Extracted sequence requests"
    );

    Ok(batch)
}

/// Every sequence name in the model, in declaration order.
pub fn all_sequence_names(model: &Model) -> Vec<String> {
    model
        .event_trees
        .iter()
        .flatten()
        .flat_map(|tree| tree.sequences())
        .map(|sequence| sequence.name.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use serde_json::json;

    fn request(value: serde_json::Value) -> QuantRequest {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_absent_event_trees_fail() {
        let err = extract_sequence_requests(&request(json!({"model": {}})), &JobId::from("p")).unwrap_err();
        assert_eq!(err.code(), ErrorCode::DecompositionFailed);

        let err = extract_sequence_requests(&request(json!({})), &JobId::from("p")).unwrap_err();
        assert_eq!(err.code(), ErrorCode::DecompositionFailed);
    }

    #[test]
    fn test_only_empty_trees_yield_empty_batch() {
        let req = request(json!({"model": {"eventTrees": [{"name": "IE1", "sequences": []}, {"name": "IE2"}]}}));
        let batch = extract_sequence_requests(&req, &JobId::from("p")).unwrap();
        assert!(batch.is_empty());
    }

    #[test]
    fn test_all_sequence_names() {
        let req = request(json!({"model": {"eventTrees": [
            {"name": "IE1", "sequences": [{"name": "A"}, {"name": "B"}]},
            {"name": "IE2", "sequences": [{"name": "C"}]}
        ]}}));
        let names = all_sequence_names(req.model.as_ref().unwrap());
        assert_eq!(names, vec!["A", "B", "C"]);
    }
}
