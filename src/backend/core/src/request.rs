//! Quantification requests and the wire payload published to workers.
//!
//! The model is only partially typed: event trees and their sequences are
//! inspected for decomposition, everything else (fault trees, basic events,
//! solver settings) is carried through verbatim.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{RaptorError, Result};
use crate::jobs::JobId;

/// A request to quantify a PRA model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuantRequest {
    /// Assigned by the dispatcher; any caller-supplied value is replaced
    #[serde(default, alias = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Solver settings, passed to workers unmodified
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<Model>,
}

/// The PRA model of a request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Model {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_trees: Option<Vec<EventTree>>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventTree {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequences: Option<Vec<Sequence>>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Sequence {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl QuantRequest {
    /// Parse a request document.
    pub fn from_json(input: &str) -> Result<Self> {
        Ok(serde_json::from_str(input)?)
    }

    /// Event trees of the model, empty when absent.
    pub fn event_trees(&self) -> &[EventTree] {
        self.model
            .as_ref()
            .and_then(|m| m.event_trees.as_deref())
            .unwrap_or_default()
    }

    /// A copy of this request stamped with `job_id`.
    pub fn with_id(&self, job_id: &JobId) -> Self {
        Self {
            id: Some(job_id.to_string()),
            ..self.clone()
        }
    }
}

impl EventTree {
    pub fn sequences(&self) -> &[Sequence] {
        self.sequences.as_deref().unwrap_or_default()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Wire Payload
// ═══════════════════════════════════════════════════════════════════════════════

/// Validate `request` as a worker payload and serialize it.
///
/// Nothing is persisted or published for a request that fails here.
pub fn encode_payload(request: &QuantRequest) -> Result<Vec<u8>> {
    let job_id = JobId::from(request.id.clone().unwrap_or_default());
    validate_payload(request).map_err(|reason| RaptorError::invalid_payload(&job_id, reason))?;
    Ok(serde_json::to_vec(request)?)
}

fn validate_payload(request: &QuantRequest) -> std::result::Result<(), String> {
    match request.id.as_deref() {
        None => return Err("payload has no id".to_string()),
        Some(id) if id.trim().is_empty() => return Err("payload id is empty".to_string()),
        Some(_) => {}
    }

    for (t, tree) in request.event_trees().iter().enumerate() {
        if tree.name.trim().is_empty() {
            return Err(format!("model.eventTrees[{}] has no name", t));
        }
        for (s, sequence) in tree.sequences().iter().enumerate() {
            if sequence.name.trim().is_empty() {
                return Err(format!(
                    "model.eventTrees[{}].sequences[{}] has no name",
                    t, s
                ));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use serde_json::json;

    fn sample() -> QuantRequest {
        serde_json::from_value(json!({
            "settings": {"mocus": true, "limitOrder": 4},
            "model": {
                "eventTrees": [
                    {"name": "IE1", "sequences": [{"name": "SEQ1", "state": "CD", "frequency": 1}]}
                ],
                "faultTrees": [{"name": "FT1"}]
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_unknown_fields_survive_round_trip() {
        let request = sample();
        let value = serde_json::to_value(&request).unwrap();

        assert_eq!(value["model"]["faultTrees"], json!([{"name": "FT1"}]));
        assert_eq!(value["model"]["eventTrees"][0]["sequences"][0]["frequency"], json!(1));
        assert_eq!(value["settings"]["limitOrder"], json!(4));
    }

    #[test]
    fn test_underscore_id_is_accepted() {
        let request = QuantRequest::from_json(r#"{"_id": "abc"}"#).unwrap();
        assert_eq!(request.id.as_deref(), Some("abc"));
        assert!(request.event_trees().is_empty());
    }

    #[test]
    fn test_encode_requires_id() {
        let err = encode_payload(&sample()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationError);
    }

    #[test]
    fn test_encode_rejects_unnamed_sequence() {
        let mut request = sample().with_id(&JobId::from("j1"));
        if let Some(trees) = request.model.as_mut().and_then(|m| m.event_trees.as_mut()) {
            trees[0].sequences.as_mut().unwrap()[0].name = String::new();
        }

        let err = encode_payload(&request).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationError);
        assert!(err.user_message().contains("j1"));
    }

    #[test]
    fn test_encode_writes_id() {
        let request = sample().with_id(&JobId::from("j1"));
        let bytes = encode_payload(&request).unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["id"], json!("j1"));
    }
}
