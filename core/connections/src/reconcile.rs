//! Validation of the model's answer and mapping of its list indices back to
//! stored thoughts.

use serde_json::Value;
use std::collections::HashSet;
use thoughtmap_schemas::{Connection, ConnectionType};
use tracing::{debug, warn};

use crate::error::ModelError;
use crate::prompts::ThoughtSummary;

/// One well-formed item of the model's `connections` array
#[derive(Debug, Clone, PartialEq)]
pub struct ProposedConnection {
    pub thought1_index: usize,
    pub thought2_index: usize,
    pub reason: String,
    pub connection_type: Option<ConnectionType>,
}

/// A non-negative whole number; `2.0` counts, `1.5` does not
fn index_field(item: &Value, key: &str) -> Option<usize> {
    let value = item.get(key)?;
    if let Some(i) = value.as_u64() {
        return Some(i as usize);
    }

    let f = value.as_f64()?;
    (f >= 0.0 && f.fract() == 0.0).then_some(f as usize)
}

/// Check the top-level shape and keep the items that carry two whole-number
/// indices and a reason. Anything else in the array is skipped.
pub fn parse_model_response(value: &Value) -> Result<Vec<ProposedConnection>, ModelError> {
    let items = value
        .as_object()
        .and_then(|obj| obj.get("connections"))
        .and_then(Value::as_array)
        .ok_or_else(|| {
            ModelError::InvalidResponse("expected an object with a \"connections\" array".into())
        })?;

    let mut proposals = Vec::with_capacity(items.len());
    for (position, item) in items.iter().enumerate() {
        let (Some(thought1_index), Some(thought2_index)) = (
            index_field(item, "thought1_index"),
            index_field(item, "thought2_index"),
        ) else {
            warn!("Skipping model item {}: missing or invalid indices", position);
            continue;
        };

        let reason = match item.get("reason").and_then(Value::as_str).map(str::trim) {
            Some(r) if !r.is_empty() => r.to_string(),
            _ => {
                warn!("Skipping model item {}: no reason given", position);
                continue;
            }
        };

        let connection_type = item
            .get("connection_type")
            .and_then(Value::as_str)
            .and_then(ConnectionType::parse);

        proposals.push(ProposedConnection {
            thought1_index,
            thought2_index,
            reason,
            connection_type,
        });
    }

    Ok(proposals)
}

/// Resolve proposals against the summaries the model was shown.
///
/// Out-of-range indices, self-pairs and repeated pairs (in either order) are
/// dropped; the first `max` survivors are kept in the model's order. Endpoint
/// details always come from `summaries`, never from the model.
pub fn reconcile(
    proposals: &[ProposedConnection],
    summaries: &[ThoughtSummary],
    max: usize,
) -> Vec<Connection> {
    let mut seen = HashSet::new();
    let mut connections = Vec::new();

    for proposal in proposals {
        if connections.len() >= max {
            break;
        }

        let (Some(t1), Some(t2)) = (
            summaries.get(proposal.thought1_index),
            summaries.get(proposal.thought2_index),
        ) else {
            debug!(
                "Dropping pair ({}, {}): index out of range for {} thoughts",
                proposal.thought1_index,
                proposal.thought2_index,
                summaries.len()
            );
            continue;
        };

        if proposal.thought1_index == proposal.thought2_index {
            debug!("Dropping self-pair at index {}", proposal.thought1_index);
            continue;
        }

        let key = (
            proposal.thought1_index.min(proposal.thought2_index),
            proposal.thought1_index.max(proposal.thought2_index),
        );
        if !seen.insert(key) {
            continue;
        }

        connections.push(Connection {
            id: None,
            thought1_id: t1.id.clone(),
            thought2_id: t2.id.clone(),
            thought1: t1.brief(),
            thought2: t2.brief(),
            title: None,
            description: proposal.reason.clone(),
            reason: Some(proposal.reason.clone()),
            connection_type: proposal.connection_type,
            is_dismissed: None,
            created_at: None,
        });
    }

    connections
}
