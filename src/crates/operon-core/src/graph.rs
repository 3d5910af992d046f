//! User-facing graph of operators with typed field edges
//!
//! A [`Graph`] maps node ids to operators and routes data between them with
//! field-level edges: `(from_node, from_field?, to_node, to_field)`. Two
//! sentinel nodes are always addressable: [`INPUT`] (the caller's initial
//! record) and [`OUTPUT`] (the merged final record).
//!
//! # Graph structure
//!
//! ```text
//!  __input__ ──────► translate ── french_text ──► uppercase ──► __output__
//!                        │                            │
//!                   (whole record)              (field routed)
//! ```
//!
//! Cycles are not rejected at edge-insertion time; the scheduler's prepare
//! step runs a Kahn pass and fails with
//! [`CoreError::GraphCycle`](crate::error::CoreError::GraphCycle) before any
//! operator runs.
//!
//! # Examples
//!
//! ```rust
//! use operon_core::graph::Graph;
//! use operon_core::ops::map;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let mut graph = Graph::new();
//! graph.add_node("inc", Arc::new(map("inc", |v| Ok(json!(v.as_i64().unwrap() + 1))).on("v").into_key("a")));
//! graph.add_node("dbl", Arc::new(map("dbl", |v| Ok(json!(v.as_i64().unwrap() * 2))).on("a").into_key("b")));
//! graph.add_edge("inc", "dbl", None, "input").unwrap();
//!
//! assert_eq!(graph.get_input_dependencies("dbl").len(), 1);
//! ```

use crate::error::{CoreError, Result};
use crate::operator::OperatorRef;
use crate::record::Record;
use std::collections::HashMap;

/// Node identifier within a graph.
pub type NodeId = String;

/// Sentinel node supplying the caller's initial record.
pub const INPUT: &str = "__input__";

/// Sentinel node collecting the merged final record.
pub const OUTPUT: &str = "__output__";

/// Conventional target field for whole-record edges.
pub const WHOLE_RECORD: &str = "input";

/// A typed data-flow edge.
///
/// `from_field = None` routes the source node's whole output record;
/// `Some(field)` routes a single value. `to_field` names the slot in the
/// target's input record, with the [`WHOLE_RECORD`] convention meaning
/// "merge the routed record wholesale".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeSpec {
    /// Source node.
    pub from: NodeId,
    /// Field of the source output to route; `None` for the whole record.
    pub from_field: Option<String>,
    /// Target node.
    pub to: NodeId,
    /// Slot in the target's input record.
    pub to_field: String,
}

/// A node: an operator plus free-form metadata.
#[derive(Clone)]
pub struct GraphNode {
    /// The operator executed at this node.
    pub operator: OperatorRef,
    /// Caller-supplied metadata (labels, provenance).
    pub metadata: Record,
}

/// Named operators connected by typed field edges.
#[derive(Clone, Default)]
pub struct Graph {
    nodes: HashMap<NodeId, GraphNode>,
    edges: Vec<EdgeSpec>,
    metadata: Record,
}

impl Graph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty graph carrying metadata.
    pub fn with_metadata(metadata: Record) -> Self {
        Self {
            metadata,
            ..Self::default()
        }
    }

    /// Add (or replace) a node.
    pub fn add_node(&mut self, id: impl Into<NodeId>, operator: OperatorRef) {
        self.nodes.insert(
            id.into(),
            GraphNode {
                operator,
                metadata: Record::new(),
            },
        );
    }

    /// Add a node with metadata.
    pub fn add_node_with_metadata(
        &mut self,
        id: impl Into<NodeId>,
        operator: OperatorRef,
        metadata: Record,
    ) {
        self.nodes.insert(id.into(), GraphNode { operator, metadata });
    }

    /// Add a typed edge between existing nodes.
    ///
    /// Both endpoints must already be present (sentinels always are);
    /// fails with [`CoreError::UnknownNode`] otherwise. A second inbound
    /// edge for the same `(to, to_field)` pair is rejected as a validation
    /// error.
    pub fn add_edge(
        &mut self,
        from: impl Into<NodeId>,
        to: impl Into<NodeId>,
        from_field: Option<String>,
        to_field: impl Into<String>,
    ) -> Result<()> {
        let from = from.into();
        let to = to.into();
        let to_field = to_field.into();

        if !self.contains(&from) {
            return Err(CoreError::UnknownNode(from));
        }
        if !self.contains(&to) {
            return Err(CoreError::UnknownNode(to));
        }
        if to != OUTPUT
            && self
                .edges
                .iter()
                .any(|e| e.to == to && e.to_field == to_field)
        {
            return Err(CoreError::Validation(format!(
                "duplicate inbound edge for ({}, {})",
                to, to_field
            )));
        }

        self.edges.push(EdgeSpec {
            from,
            from_field,
            to,
            to_field,
        });
        Ok(())
    }

    /// Build a linear graph from an operator chain.
    ///
    /// Produces `node_i -> node_{i+1}` edges with `to_field = "input"`,
    /// node ids taken from operator ids (suffixed on collision).
    pub fn from_sequence(operators: Vec<OperatorRef>) -> Self {
        let mut graph = Self::new();
        let mut ids: Vec<NodeId> = Vec::with_capacity(operators.len());

        for (index, op) in operators.into_iter().enumerate() {
            let mut id = op.id().to_string();
            if graph.nodes.contains_key(&id) {
                id = format!("{}#{}", id, index);
            }
            graph.add_node(id.clone(), op);
            ids.push(id);
        }
        for pair in ids.windows(2) {
            // Endpoints were just inserted; the edge cannot fail.
            graph
                .add_edge(pair[0].clone(), pair[1].clone(), None, WHOLE_RECORD)
                .expect("sequence edge endpoints exist");
        }
        graph
    }

    fn contains(&self, id: &str) -> bool {
        id == INPUT || id == OUTPUT || self.nodes.contains_key(id)
    }

    /// All nodes.
    pub fn nodes(&self) -> &HashMap<NodeId, GraphNode> {
        &self.nodes
    }

    /// All edges, in insertion order.
    pub fn edges(&self) -> &[EdgeSpec] {
        &self.edges
    }

    /// Graph metadata.
    pub fn metadata(&self) -> &Record {
        &self.metadata
    }

    /// Nodes with no dependency on other operator nodes: entry points fed
    /// by the caller's record (directly or via the [`INPUT`] sentinel).
    pub fn input_nodes(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self
            .nodes
            .keys()
            .filter(|id| {
                self.edges
                    .iter()
                    .all(|e| e.to != **id || e.from == INPUT)
            })
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// Nodes whose output flows (implicitly or explicitly) to [`OUTPUT`].
    pub fn output_nodes(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self
            .nodes
            .keys()
            .filter(|id| {
                self.edges
                    .iter()
                    .all(|e| e.from != **id || e.to == OUTPUT)
            })
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// Inbound edges of a node.
    pub fn get_input_dependencies(&self, id: &str) -> Vec<&EdgeSpec> {
        self.edges.iter().filter(|e| e.to == id).collect()
    }

    /// Predecessor map: node id to the operator nodes it depends on.
    pub fn get_dependencies(&self) -> HashMap<NodeId, Vec<NodeId>> {
        let mut deps: HashMap<NodeId, Vec<NodeId>> = self
            .nodes
            .keys()
            .map(|id| (id.clone(), Vec::new()))
            .collect();
        for edge in &self.edges {
            if edge.from != INPUT && edge.to != OUTPUT {
                if let Some(entry) = deps.get_mut(&edge.to) {
                    if !entry.contains(&edge.from) {
                        entry.push(edge.from.clone());
                    }
                }
            }
        }
        for entry in deps.values_mut() {
            entry.sort();
        }
        deps
    }

    /// Validate edge endpoints (sentinels allowed).
    ///
    /// `add_edge` already enforces this; `validate` exists for graphs
    /// assembled by other means.
    pub fn validate(&self) -> Result<()> {
        for edge in &self.edges {
            if !self.contains(&edge.from) {
                return Err(CoreError::UnknownNode(edge.from.clone()));
            }
            if !self.contains(&edge.to) {
                return Err(CoreError::UnknownNode(edge.to.clone()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::map;
    use serde_json::json;
    use std::sync::Arc;

    fn inc() -> OperatorRef {
        Arc::new(map("inc", |v| Ok(json!(v.as_i64().unwrap_or(0) + 1))).on("v").into_key("a"))
    }

    #[test]
    fn test_add_edge_requires_existing_endpoints() {
        let mut graph = Graph::new();
        graph.add_node("a", inc());

        let err = graph.add_edge("a", "missing", None, "input").unwrap_err();
        assert!(matches!(err, CoreError::UnknownNode(id) if id == "missing"));

        let err = graph.add_edge("ghost", "a", None, "input").unwrap_err();
        assert!(matches!(err, CoreError::UnknownNode(id) if id == "ghost"));
    }

    #[test]
    fn test_sentinels_are_always_addressable() {
        let mut graph = Graph::new();
        graph.add_node("a", inc());
        assert!(graph.add_edge(INPUT, "a", None, "input").is_ok());
        assert!(graph.add_edge("a", OUTPUT, None, "input").is_ok());
    }

    #[test]
    fn test_duplicate_inbound_slot_rejected() {
        let mut graph = Graph::new();
        graph.add_node("a", inc());
        graph.add_node("b", inc());
        graph.add_node("c", inc());

        graph.add_edge("a", "c", None, "input").unwrap();
        let err = graph.add_edge("b", "c", None, "input").unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn test_from_sequence_chains_with_input_field() {
        let graph = Graph::from_sequence(vec![inc(), inc()]);
        assert_eq!(graph.nodes().len(), 2);
        assert_eq!(graph.edges().len(), 1);
        let edge = &graph.edges()[0];
        assert_eq!(edge.to_field, WHOLE_RECORD);
        assert!(edge.from_field.is_none());
    }

    #[test]
    fn test_dependency_queries() {
        let mut graph = Graph::new();
        graph.add_node("a", inc());
        graph.add_node("b", inc());
        graph.add_node("c", inc());
        graph.add_edge("a", "c", Some("x".to_string()), "left").unwrap();
        graph.add_edge("b", "c", Some("y".to_string()), "right").unwrap();

        assert_eq!(graph.input_nodes(), vec!["a", "b"]);
        assert_eq!(graph.output_nodes(), vec!["c"]);
        assert_eq!(graph.get_input_dependencies("c").len(), 2);
        assert_eq!(graph.get_dependencies()["c"], vec!["a", "b"]);
    }
}
