//! Execution graph: the representation schedulers and the JIT operate on
//!
//! An [`ExecutionGraph`] is derived from a user [`Graph`](crate::graph::Graph)
//! or built directly by a JIT strategy. Nodes are kind-tagged so analysis
//! can match on them without touching payloads, and the sentinels
//! [`INPUT`]/[`OUTPUT`] are always present.

use crate::error::{CoreError, Result};
use crate::graph::{EdgeSpec, Graph, NodeId, INPUT, OUTPUT};
use crate::operator::{OperatorRef, StructureKind};
use std::collections::HashMap;

/// Kind tag of an execution node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Deterministic pure transform (a Map leaf or a fusion of them).
    Function,
    /// Opaque operator scheduled as-is.
    Operator,
    /// Identity node that only routes/merges records.
    Passthrough,
    /// Language-model leaf (a memoization barrier when stochastic).
    Llm,
}

/// Payload of an execution node.
#[derive(Clone)]
pub enum NodePayload {
    /// Callable operator.
    Operator(OperatorRef),
    /// No computation; inputs pass through unchanged.
    Passthrough,
}

/// One node of an execution graph.
#[derive(Clone)]
pub struct ExecutionNode {
    /// Kind tag used by JIT matching.
    pub kind: NodeKind,
    /// The node's payload.
    pub payload: NodePayload,
}

impl ExecutionNode {
    /// Operator payload, when present.
    pub fn operator(&self) -> Option<&OperatorRef> {
        match &self.payload {
            NodePayload::Operator(op) => Some(op),
            NodePayload::Passthrough => None,
        }
    }

    /// Whether the payload is stochastic.
    pub fn is_stochastic(&self) -> bool {
        self.operator().map(|op| op.is_stochastic()).unwrap_or(false)
    }
}

/// Kind-tagged DAG executed by the scheduler family.
#[derive(Clone, Default)]
pub struct ExecutionGraph {
    nodes: HashMap<NodeId, ExecutionNode>,
    edges: Vec<EdgeSpec>,
}

impl ExecutionGraph {
    /// Create an empty execution graph (sentinels implicitly present).
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive an execution graph from a user graph, classifying each
    /// node by its operator's structure kind.
    pub fn from_graph(graph: &Graph) -> Self {
        let mut out = Self::new();
        for (id, node) in graph.nodes() {
            out.insert_operator(id.clone(), node.operator.clone());
        }
        out.edges = graph.edges().to_vec();
        out
    }

    /// Insert an operator node, deriving its kind tag.
    pub fn insert_operator(&mut self, id: impl Into<NodeId>, operator: OperatorRef) {
        let kind = match operator.structure().kind {
            StructureKind::Map => NodeKind::Function,
            StructureKind::Llm => NodeKind::Llm,
            _ => NodeKind::Operator,
        };
        self.nodes.insert(
            id.into(),
            ExecutionNode {
                kind,
                payload: NodePayload::Operator(operator),
            },
        );
    }

    /// Insert an operator node with an explicit kind tag.
    pub fn insert_tagged(&mut self, id: impl Into<NodeId>, kind: NodeKind, operator: OperatorRef) {
        self.nodes.insert(
            id.into(),
            ExecutionNode {
                kind,
                payload: NodePayload::Operator(operator),
            },
        );
    }

    /// Insert a passthrough node.
    pub fn insert_passthrough(&mut self, id: impl Into<NodeId>) {
        self.nodes.insert(
            id.into(),
            ExecutionNode {
                kind: NodeKind::Passthrough,
                payload: NodePayload::Passthrough,
            },
        );
    }

    /// Add a typed edge; endpoints must exist (sentinels always do).
    pub fn add_edge(
        &mut self,
        from: impl Into<NodeId>,
        to: impl Into<NodeId>,
        from_field: Option<String>,
        to_field: impl Into<String>,
    ) -> Result<()> {
        let from = from.into();
        let to = to.into();
        if !self.contains(&from) {
            return Err(CoreError::UnknownNode(from));
        }
        if !self.contains(&to) {
            return Err(CoreError::UnknownNode(to));
        }
        self.edges.push(EdgeSpec {
            from,
            from_field,
            to,
            to_field: to_field.into(),
        });
        Ok(())
    }

    fn contains(&self, id: &str) -> bool {
        id == INPUT || id == OUTPUT || self.nodes.contains_key(id)
    }

    /// All executable nodes (sentinels excluded).
    pub fn nodes(&self) -> &HashMap<NodeId, ExecutionNode> {
        &self.nodes
    }

    /// Look up a node.
    pub fn node(&self, id: &str) -> Option<&ExecutionNode> {
        self.nodes.get(id)
    }

    /// Mutable access to a node, for payload rewrites (the JIT wraps
    /// payloads in memoizing proxies without changing graph shape).
    pub fn node_mut(&mut self, id: &str) -> Option<&mut ExecutionNode> {
        self.nodes.get_mut(id)
    }

    /// All edges, in insertion order.
    pub fn edges(&self) -> &[EdgeSpec] {
        &self.edges
    }

    /// Inbound edges of a node.
    pub fn incoming(&self, id: &str) -> Vec<&EdgeSpec> {
        self.edges.iter().filter(|e| e.to == id).collect()
    }

    /// Outbound edges of a node.
    pub fn outgoing(&self, id: &str) -> Vec<&EdgeSpec> {
        self.edges.iter().filter(|e| e.from == id).collect()
    }

    /// Topological layers of executable nodes (Kahn's algorithm).
    ///
    /// Dependencies on the [`INPUT`] sentinel are satisfied from the start
    /// and do not count toward in-degree. Node ids within a level are
    /// sorted so layering is deterministic. Fails with
    /// [`CoreError::GraphCycle`] when nodes remain after the pass.
    pub fn levels(&self) -> Result<Vec<Vec<NodeId>>> {
        let mut in_degree: HashMap<&str, usize> =
            self.nodes.keys().map(|id| (id.as_str(), 0)).collect();
        for edge in &self.edges {
            if edge.from != INPUT && edge.to != OUTPUT && self.nodes.contains_key(&edge.to) {
                if let Some(count) = in_degree.get_mut(edge.to.as_str()) {
                    *count += 1;
                }
            }
        }

        let mut levels: Vec<Vec<NodeId>> = Vec::new();
        let mut placed = 0usize;
        let mut ready: Vec<&str> = in_degree
            .iter()
            .filter(|(_, deg)| **deg == 0)
            .map(|(id, _)| *id)
            .collect();
        ready.sort_unstable();

        while !ready.is_empty() {
            placed += ready.len();
            let level: Vec<NodeId> = ready.iter().map(|id| id.to_string()).collect();

            let mut next: Vec<&str> = Vec::new();
            for id in &ready {
                for edge in &self.edges {
                    if edge.from == *id && edge.to != OUTPUT {
                        if let Some(count) = in_degree.get_mut(edge.to.as_str()) {
                            *count -= 1;
                            if *count == 0 {
                                next.push(
                                    self.nodes
                                        .get_key_value(&edge.to)
                                        .map(|(k, _)| k.as_str())
                                        .expect("edge target exists"),
                                );
                            }
                        }
                    }
                }
            }
            next.sort_unstable();
            next.dedup();
            levels.push(level);
            ready = next;
        }

        if placed != self.nodes.len() {
            let mut stuck: Vec<&str> = in_degree
                .iter()
                .filter(|(_, deg)| **deg > 0)
                .map(|(id, _)| *id)
                .collect();
            stuck.sort_unstable();
            return Err(CoreError::GraphCycle(format!(
                "unresolvable nodes: {}",
                stuck.join(", ")
            )));
        }
        Ok(levels)
    }

    /// Graphviz dump for debugging compiled graphs.
    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph execution {\n  rankdir=LR;\n");
        let mut ids: Vec<&NodeId> = self.nodes.keys().collect();
        ids.sort();
        for id in ids {
            let node = &self.nodes[id];
            let shape = match node.kind {
                NodeKind::Function => "box",
                NodeKind::Operator => "ellipse",
                NodeKind::Passthrough => "point",
                NodeKind::Llm => "diamond",
            };
            out.push_str(&format!("  \"{}\" [shape={}];\n", id, shape));
        }
        for edge in &self.edges {
            let label = match &edge.from_field {
                Some(field) => format!(" [label=\"{}→{}\"]", field, edge.to_field),
                None => format!(" [label=\"→{}\"]", edge.to_field),
            };
            out.push_str(&format!("  \"{}\" -> \"{}\"{};\n", edge.from, edge.to, label));
        }
        out.push_str("}\n");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::map;
    use std::sync::Arc;

    fn id_op(name: &str) -> OperatorRef {
        Arc::new(map(name, Ok))
    }

    fn diamond() -> ExecutionGraph {
        let mut g = ExecutionGraph::new();
        g.insert_operator("a", id_op("a"));
        g.insert_operator("b", id_op("b"));
        g.insert_operator("c", id_op("c"));
        g.insert_operator("d", id_op("d"));
        g.add_edge("a", "b", None, "input").unwrap();
        g.add_edge("a", "c", None, "input").unwrap();
        g.add_edge("b", "d", None, "input").unwrap();
        g.add_edge("c", "d", None, "input").unwrap();
        g
    }

    #[test]
    fn test_levels_layer_a_diamond() {
        let levels = diamond().levels().unwrap();
        assert_eq!(
            levels,
            vec![
                vec!["a".to_string()],
                vec!["b".to_string(), "c".to_string()],
                vec!["d".to_string()],
            ]
        );
    }

    #[test]
    fn test_cycle_detected() {
        let mut g = ExecutionGraph::new();
        g.insert_operator("a", id_op("a"));
        g.insert_operator("b", id_op("b"));
        g.add_edge("a", "b", None, "input").unwrap();
        g.add_edge("b", "a", None, "input").unwrap();

        let err = g.levels().unwrap_err();
        assert!(matches!(err, CoreError::GraphCycle(_)));
    }

    #[test]
    fn test_kind_classification_from_structure() {
        let mut g = ExecutionGraph::new();
        g.insert_operator("m", Arc::new(map("m", Ok)));
        assert_eq!(g.node("m").unwrap().kind, NodeKind::Function);

        g.insert_passthrough("p");
        assert_eq!(g.node("p").unwrap().kind, NodeKind::Passthrough);
    }

    #[test]
    fn test_incoming_outgoing_views() {
        let g = diamond();
        assert_eq!(g.incoming("d").len(), 2);
        assert_eq!(g.outgoing("a").len(), 2);
        assert!(g.incoming("a").is_empty());
    }

    #[test]
    fn test_dot_output_contains_nodes_and_edges() {
        let dot = diamond().to_dot();
        assert!(dot.contains("\"a\" -> \"b\""));
        assert!(dot.contains("digraph execution"));
    }
}
