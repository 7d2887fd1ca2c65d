//! Merging per-sequence results into one model-level result.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Combined result of every contributing sequence job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedOutput {
    pub model_features: Value,
    pub results: AggregatedResults,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedResults {
    pub initiating_events: Vec<MergedInitiatingEvent>,
    pub sum_of_products: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedInitiatingEvent {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<Value>,
    pub sequences: Vec<Value>,
}

/// Merge sequence results, given in child order.
///
/// - `modelFeatures` is taken from the first result (`{}` when absent).
/// - Initiating events are merged by name in first-seen order; within each,
///   sequences are deduplicated by name with the first occurrence kept.
/// - `sumOfProducts` is the first non-empty list.
pub fn merge_sequence_results(results: &[Map<String, Value>]) -> AggregatedOutput {
    let model_features = results
        .first()
        .and_then(|first| first.get("modelFeatures"))
        .filter(|v| !v.is_null())
        .cloned()
        .unwrap_or_else(|| Value::Object(Map::new()));

    let mut events: Vec<MergedInitiatingEvent> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();

    for result in results {
        for ie in array_at(result, "initiatingEvents") {
            let name = name_of(ie);
            let index = *positions.entry(name.clone()).or_insert_with(|| {
                events.push(MergedInitiatingEvent {
                    name,
                    description: ie.get("description").filter(|d| !d.is_null()).cloned(),
                    sequences: Vec::new(),
                });
                events.len() - 1
            });

            let entry = &mut events[index];
            for sequence in ie.get("sequences").and_then(Value::as_array).into_iter().flatten() {
                let sequence_name = name_of(sequence);
                if !entry.sequences.iter().any(|s| name_of(s) == sequence_name) {
                    entry.sequences.push(sequence.clone());
                }
            }
        }
    }

    for event in &mut events {
        sort_sequences(&mut event.sequences);
    }

    let sum_of_products = results
        .iter()
        .map(|result| array_at(result, "sumOfProducts"))
        .find(|sop| !sop.is_empty())
        .map(<[Value]>::to_vec)
        .unwrap_or_default();

    AggregatedOutput {
        model_features,
        results: AggregatedResults {
            initiating_events: events,
            sum_of_products,
        },
    }
}

/// Sort by trailing number when every name has one, otherwise by name.
pub fn sort_sequences(sequences: &mut [Value]) {
    let numbered = sequences.iter().all(|s| trailing_number(&name_of(s)).is_some());

    if numbered {
        sequences.sort_by(|a, b| {
            let (an, bn) = (name_of(a), name_of(b));
            trailing_number(&an)
                .cmp(&trailing_number(&bn))
                .then_with(|| an.cmp(&bn))
        });
    } else {
        sequences.sort_by_key(name_of);
    }
}

/// The number formed by the trailing ASCII digits of `name`, if any.
pub fn trailing_number(name: &str) -> Option<u64> {
    let digits = name.len() - name.trim_end_matches(|c: char| c.is_ascii_digit()).len();
    if digits == 0 {
        return None;
    }
    name[name.len() - digits..].parse().ok()
}

fn array_at<'a>(object: &'a Map<String, Value>, key: &str) -> &'a [Value] {
    object
        .get("results")
        .and_then(|r| r.get(key))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

fn name_of(value: &Value) -> String {
    match value.get("name") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}
