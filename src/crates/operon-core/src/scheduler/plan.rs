//! Shared planning: input assembly, node invocation, output finalization.

use crate::error::{CoreError, Result};
use crate::execution_graph::{ExecutionGraph, ExecutionNode, NodePayload};
use crate::graph::{EdgeSpec, NodeId, INPUT, OUTPUT, WHOLE_RECORD};
use crate::record::{merge, Record};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

/// Assemble a node's input record from its inbound edges.
///
/// Rules, per edge `(from, from_field, to, to_field)`:
///
/// - `from_field = None, to_field = "input"`: the upstream record is merged
///   wholesale (sorted-by-source order keeps multi-edge merges stable);
/// - `from_field = Some(f)`: `inputs[to_field] = upstream[f]`;
/// - `from_field = None`, other `to_field`: the whole upstream record is
///   nested at `to_field`.
///
/// A node with no inbound edges receives the caller's initial record.
pub fn assemble_inputs(
    graph: &ExecutionGraph,
    node: &str,
    results: &HashMap<NodeId, Record>,
    initial: &Record,
) -> Result<Record> {
    let mut incoming: Vec<&EdgeSpec> = graph.incoming(node);
    if incoming.is_empty() {
        return Ok(initial.clone());
    }
    incoming.sort_by(|a, b| a.from.cmp(&b.from).then_with(|| a.to_field.cmp(&b.to_field)));

    let mut inputs = Record::new();
    for edge in incoming {
        let source: &Record = if edge.from == INPUT {
            initial
        } else {
            results
                .get(&edge.from)
                .ok_or_else(|| CoreError::UnknownNode(edge.from.clone()))?
        };

        match (&edge.from_field, edge.to_field.as_str()) {
            (None, WHOLE_RECORD) => {
                inputs = merge(inputs, source.clone());
            }
            (Some(field), _) => {
                let value = source.get(field).cloned().ok_or_else(|| {
                    CoreError::Validation(format!(
                        "edge {}->{}: source output has no field '{}'",
                        edge.from, edge.to, field
                    ))
                })?;
                inputs.insert(edge.to_field.clone(), value);
            }
            (None, _) => {
                inputs.insert(edge.to_field.clone(), Value::Object(source.clone()));
            }
        }
    }
    Ok(inputs)
}

/// Invoke a node's payload with fully assembled inputs.
///
/// Failures (including deadline expiry) surface as
/// [`CoreError::Child`] keyed by the node id, per the scheduler boundary
/// contract. No lock is held across the call.
pub async fn run_node(
    node_id: &str,
    node: &ExecutionNode,
    inputs: Record,
    timeout: Option<Duration>,
) -> Result<Record> {
    let operator = match &node.payload {
        NodePayload::Passthrough => return Ok(inputs),
        NodePayload::Operator(op) => op.clone(),
    };

    tracing::trace!(node = %node_id, "executing node");
    let outcome = match timeout {
        Some(deadline) => match tokio::time::timeout(deadline, operator.call(inputs)).await {
            Ok(result) => result,
            Err(_) => Err(CoreError::timeout(
                format!("node '{}'", node_id),
                deadline.as_millis() as u64,
            )),
        },
        None => operator.call(inputs).await,
    };

    outcome.map_err(|e| CoreError::child(node_id, e))
}

/// Compute the [`OUTPUT`] sentinel record: the merge of explicit edges into
/// `OUTPUT` plus the records of implicit sinks (nodes with no outgoing
/// edges), in sorted source order.
pub fn finalize_output(
    graph: &ExecutionGraph,
    results: &HashMap<NodeId, Record>,
    initial: &Record,
) -> Record {
    let mut contributions: Vec<(NodeId, Option<String>, String)> = graph
        .incoming(OUTPUT)
        .into_iter()
        .map(|e| (e.from.clone(), e.from_field.clone(), e.to_field.clone()))
        .collect();

    for id in graph.nodes().keys() {
        let flows_on = graph.outgoing(id).iter().any(|e| e.to != OUTPUT);
        let explicit = contributions.iter().any(|(from, _, _)| from == id);
        if !flows_on && !explicit {
            contributions.push((id.clone(), None, WHOLE_RECORD.to_string()));
        }
    }
    contributions.sort();

    let mut output = Record::new();
    for (from, from_field, to_field) in contributions {
        let source = if from == INPUT {
            initial
        } else {
            match results.get(&from) {
                Some(record) => record,
                None => continue,
            }
        };
        match (from_field, to_field) {
            (None, field) if field == WHOLE_RECORD => {
                output = merge(output, source.clone());
            }
            (Some(field), to_field) => {
                if let Some(value) = source.get(&field) {
                    output.insert(to_field, value.clone());
                }
            }
            (None, to_field) => {
                output.insert(to_field, Value::Object(source.clone()));
            }
        }
    }

    if output.is_empty() && graph.nodes().is_empty() {
        return initial.clone();
    }
    output
}
