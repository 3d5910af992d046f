//! Graph rewrite toolkit shared by the strategies
//!
//! Three building blocks:
//!
//! - [`mirror`]: build an execution graph mirroring an operator's
//!   composition tree (sequence → chain, eligible parallel → fan-out/fan-in,
//!   map → function node, LLM → llm node);
//! - [`fuse_adjacent_functions`]: coalesce maximal linear runs of
//!   deterministic function nodes into single [`FusedOperator`] nodes;
//! - [`MemoizedOperator`] / [`wrap_node`]: memoizing payload proxies,
//!   never applied to stochastic operators.

use operon_core::error::{CoreError, Result};
use operon_core::execution_graph::{ExecutionGraph, NodeKind, NodePayload};
use operon_core::graph::{NodeId, WHOLE_RECORD};
use operon_core::operator::{Operator, OperatorRef, Structure, StructureKind};
use operon_core::record::{merge, produced_keys, Record};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

/// Build the identity graph: a single opaque node executing the operator
/// as-is. Cached for low-scoring operators to avoid re-analysis churn.
pub fn identity_graph(operator: OperatorRef) -> ExecutionGraph {
    let mut graph = ExecutionGraph::new();
    let id = operator.id().to_string();
    graph.insert_tagged(id, NodeKind::Operator, operator);
    graph
}

/// Whether a parallel block may be expanded to fan-out/fan-in form without
/// changing semantics: every branch must be a map with a declared output
/// key, and the keys must be pairwise distinct. Anything else keeps the
/// block as one operator node so runtime conflict detection still applies.
pub fn vectorizable(structure: &Structure) -> bool {
    if structure.kind != StructureKind::Parallel || structure.children.is_empty() {
        return false;
    }
    let mut seen = HashSet::new();
    structure.children.iter().all(|child| {
        child.kind == StructureKind::Map
            && !child.stochastic
            && matches!(&child.out_key, Some(key) if seen.insert(key.clone()))
    })
}

/// Build an execution graph mirroring an operator's composition tree.
///
/// The top level is always expanded; nested combinators are expanded only
/// when `recursive` is set (otherwise they stay single opaque nodes).
pub fn mirror(operator: &OperatorRef, recursive: bool) -> Result<ExecutionGraph> {
    let structure = operator.structure().with_payload(operator.clone());
    let mut graph = ExecutionGraph::new();
    let mut namer = Namer::default();
    build(&mut graph, &structure, recursive, true, &mut namer)?;
    Ok(graph)
}

#[derive(Default)]
struct Namer {
    used: HashSet<String>,
}

impl Namer {
    fn unique(&mut self, base: &str) -> String {
        if self.used.insert(base.to_string()) {
            return base.to_string();
        }
        let mut n = 2;
        loop {
            let candidate = format!("{}#{}", base, n);
            if self.used.insert(candidate.clone()) {
                return candidate;
            }
            n += 1;
        }
    }
}

fn build(
    graph: &mut ExecutionGraph,
    structure: &Structure,
    recursive: bool,
    top: bool,
    namer: &mut Namer,
) -> Result<(Vec<NodeId>, Vec<NodeId>)> {
    let expandable = top || recursive;
    match structure.kind {
        StructureKind::Sequence if expandable && !structure.children.is_empty() => {
            let mut first_entries: Option<Vec<NodeId>> = None;
            let mut prev_exits: Vec<NodeId> = Vec::new();
            for child in &structure.children {
                let (entries, exits) = build(graph, child, recursive, false, namer)?;
                for from in &prev_exits {
                    for to in &entries {
                        graph.add_edge(from.clone(), to.clone(), None, WHOLE_RECORD)?;
                    }
                }
                if first_entries.is_none() {
                    first_entries = Some(entries);
                }
                prev_exits = exits;
            }
            Ok((first_entries.unwrap_or_default(), prev_exits))
        }
        StructureKind::Parallel if expandable && vectorizable(structure) => {
            let mut ids = Vec::with_capacity(structure.children.len());
            for child in &structure.children {
                let (entries, _) = build(graph, child, recursive, false, namer)?;
                ids.extend(entries);
            }
            Ok((ids.clone(), ids))
        }
        _ => {
            let payload = structure.payload.clone().ok_or_else(|| {
                CoreError::Cache(format!(
                    "structure node '{}' carries no payload",
                    structure.id
                ))
            })?;
            let kind = match structure.kind {
                StructureKind::Map => NodeKind::Function,
                StructureKind::Llm => NodeKind::Llm,
                _ => NodeKind::Operator,
            };
            let id = namer.unique(&structure.id);
            graph.insert_tagged(id.clone(), kind, payload);
            Ok((vec![id.clone()], vec![id]))
        }
    }
}

/// Deterministic fold over fused stages, presented as a single function
/// node.
pub struct FusedOperator {
    id: String,
    stages: Vec<OperatorRef>,
}

impl FusedOperator {
    /// Fuse stages into one operator; `stages` must all be deterministic.
    pub fn new(id: impl Into<String>, stages: Vec<OperatorRef>) -> Self {
        Self {
            id: id.into(),
            stages,
        }
    }
}

#[async_trait]
impl Operator for FusedOperator {
    fn id(&self) -> &str {
        &self.id
    }

    async fn call(&self, inputs: Record) -> Result<Record> {
        let mut record = inputs;
        for stage in &self.stages {
            let output = stage
                .call(record.clone())
                .await
                .map_err(|e| CoreError::child(stage.name(), e))?;
            record = merge(record, output);
        }
        Ok(record)
    }

    fn structure(&self) -> Structure {
        Structure::leaf(StructureKind::Map, self.id.clone(), false)
    }
}

/// Coalesce maximal linear runs of function nodes joined by exclusive
/// whole-record edges into single [`FusedOperator`] nodes.
pub fn fuse_adjacent_functions(graph: &ExecutionGraph) -> ExecutionGraph {
    // A node can start a run when it is a Function whose sole link to the
    // next Function is an exclusive whole-record edge.
    let linear_next = |id: &str| -> Option<NodeId> {
        let outgoing = graph.outgoing(id);
        if outgoing.len() != 1 {
            return None;
        }
        let edge = outgoing[0];
        if edge.from_field.is_some() || edge.to_field != WHOLE_RECORD {
            return None;
        }
        let next = graph.node(&edge.to)?;
        if next.kind != NodeKind::Function || graph.incoming(&edge.to).len() != 1 {
            return None;
        }
        Some(edge.to.clone())
    };

    // A run head is a Function node that no run can extend into: its sole
    // predecessor link is not itself a linear Function edge.
    let is_head = |id: &str| -> bool {
        let incoming = graph.incoming(id);
        if incoming.len() != 1 {
            return true;
        }
        let edge = incoming[0];
        if edge.from_field.is_some() || edge.to_field != WHOLE_RECORD {
            return true;
        }
        match graph.node(&edge.from) {
            Some(pred) => {
                pred.kind != NodeKind::Function || graph.outgoing(&edge.from).len() != 1
            }
            None => true,
        }
    };

    let mut in_run: HashMap<NodeId, usize> = HashMap::new();
    let mut runs: Vec<Vec<NodeId>> = Vec::new();

    let mut heads: Vec<&NodeId> = graph
        .nodes()
        .iter()
        .filter(|(id, node)| node.kind == NodeKind::Function && is_head(id))
        .map(|(id, _)| id)
        .collect();
    heads.sort();

    for head in heads {
        let mut run = vec![head.clone()];
        let mut cursor = head.clone();
        while let Some(next) = linear_next(&cursor) {
            run.push(next.clone());
            cursor = next;
        }
        if run.len() >= 2 {
            let index = runs.len();
            for id in &run {
                in_run.insert(id.clone(), index);
            }
            runs.push(run);
        }
    }

    if runs.is_empty() {
        return graph.clone();
    }

    // Rebuild: run members collapse into one fused node; edges internal to
    // a run disappear, boundary edges are remapped onto the fused node.
    let fused_ids: Vec<NodeId> = runs.iter().map(|run| run.join("+")).collect();
    let replacement = |id: &NodeId| -> NodeId {
        match in_run.get(id) {
            Some(index) => fused_ids[*index].clone(),
            None => id.clone(),
        }
    };

    let mut rebuilt = ExecutionGraph::new();
    for (id, node) in graph.nodes() {
        if !in_run.contains_key(id) {
            if let NodePayload::Operator(op) = &node.payload {
                rebuilt.insert_tagged(id.clone(), node.kind, op.clone());
            } else {
                rebuilt.insert_passthrough(id.clone());
            }
        }
    }
    for (index, run) in runs.iter().enumerate() {
        let stages: Vec<OperatorRef> = run
            .iter()
            .filter_map(|id| graph.node(id).and_then(|n| n.operator().cloned()))
            .collect();
        tracing::debug!(fused = %fused_ids[index], stages = stages.len(), "fusing function run");
        rebuilt.insert_tagged(
            fused_ids[index].clone(),
            NodeKind::Function,
            std::sync::Arc::new(FusedOperator::new(fused_ids[index].clone(), stages)),
        );
    }
    for edge in graph.edges() {
        let same_run = match (in_run.get(&edge.from), in_run.get(&edge.to)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        };
        if same_run {
            continue;
        }
        rebuilt
            .add_edge(
                replacement(&edge.from),
                replacement(&edge.to),
                edge.from_field.clone(),
                edge.to_field.clone(),
            )
            .expect("remapped endpoints exist");
    }
    rebuilt
}

/// Memoizing proxy around a deterministic operator.
///
/// Stores the *produced* sub-record per key (not the echoed input), so a
/// cached result replays correctly against a different surrounding record.
/// Keyed by the serialized input record, or by a single field when
/// `keyed_on` is set (the parser-cache case: keyed by the model's text).
pub struct MemoizedOperator {
    id: String,
    inner: OperatorRef,
    key_field: Option<String>,
    store: Mutex<HashMap<String, Record>>,
}

impl MemoizedOperator {
    /// Memoize an operator keyed by its full input record.
    pub fn new(inner: OperatorRef) -> Self {
        Self {
            id: format!("memo({})", inner.id()),
            inner,
            key_field: None,
            store: Mutex::new(HashMap::new()),
        }
    }

    /// Key the memo on a single input field instead of the whole record.
    pub fn keyed_on(mut self, field: impl Into<String>) -> Self {
        self.key_field = Some(field.into());
        self
    }

    fn cache_key(&self, inputs: &Record) -> String {
        match &self.key_field {
            Some(field) => inputs
                .get(field)
                .map(Value::to_string)
                .unwrap_or_else(|| Value::Object(inputs.clone()).to_string()),
            None => Value::Object(inputs.clone()).to_string(),
        }
    }
}

#[async_trait]
impl Operator for MemoizedOperator {
    fn id(&self) -> &str {
        &self.id
    }

    async fn call(&self, inputs: Record) -> Result<Record> {
        let key = self.cache_key(&inputs);
        let cached = self.store.lock().expect("memo lock").get(&key).cloned();
        if let Some(produced) = cached {
            tracing::trace!(operator = %self.id, "memo hit");
            return Ok(merge(inputs, produced));
        }

        let outputs = self.inner.call(inputs.clone()).await?;
        let mut produced = Record::new();
        for key_name in produced_keys(&inputs, &outputs) {
            if let Some(value) = outputs.get(&key_name) {
                produced.insert(key_name, value.clone());
            }
        }
        self.store.lock().expect("memo lock").insert(key, produced);
        Ok(outputs)
    }

    fn structure(&self) -> Structure {
        self.inner.structure()
    }

    fn is_stochastic(&self) -> bool {
        self.inner.is_stochastic()
    }
}

/// Replace a node's payload via `wrap`, keeping its kind tag.
///
/// Refuses stochastic payloads when `preserve_stochasticity` is set and
/// reports whether the wrap happened, so callers can log skipped targets.
pub fn wrap_node(
    graph: &mut ExecutionGraph,
    id: &str,
    preserve_stochasticity: bool,
    wrap: impl FnOnce(OperatorRef) -> OperatorRef,
) -> bool {
    let Some(node) = graph.node_mut(id) else {
        return false;
    };
    let NodePayload::Operator(op) = &node.payload else {
        return false;
    };
    if preserve_stochasticity && op.is_stochastic() {
        tracing::debug!(node = %id, "skipping rewrite of stochastic node");
        return false;
    }
    node.payload = NodePayload::Operator(wrap(op.clone()));
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use operon_core::ops::{map, opaque, parallel, sequence};
    use operon_core::record::record_from;
    use operon_core::scheduler::{self, SchedulerOptions};
    use operon_core::graph::OUTPUT;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn int_map(name: &str, in_key: &str, out_key: &str, f: fn(i64) -> i64) -> OperatorRef {
        Arc::new(
            map(name, move |v: Value| {
                Ok(json!(f(v.as_i64().unwrap_or_default())))
            })
            .on(in_key)
            .into_key(out_key),
        )
    }

    #[tokio::test]
    async fn test_mirror_chain_matches_direct_call() {
        let op: OperatorRef = Arc::new(sequence(vec![
            int_map("inc", "v", "v", |n| n + 1),
            int_map("dbl", "v", "v", |n| n * 2),
        ]));

        let graph = mirror(&op, false).unwrap();
        assert_eq!(graph.nodes().len(), 2);
        assert_eq!(graph.edges().len(), 1);

        let mut sched = scheduler::create("sequential", SchedulerOptions::default()).unwrap();
        let results = sched
            .execute(&graph, record_from(vec![("v", json!(3))]))
            .await
            .unwrap();
        let direct = op.call(record_from(vec![("v", json!(3))])).await.unwrap();
        assert_eq!(results[OUTPUT]["v"], direct["v"]);
    }

    #[test]
    fn test_vectorizable_requires_distinct_out_keys() {
        let good = parallel(vec![
            int_map("a", "v", "x", |n| n + 1),
            int_map("b", "v", "y", |n| n + 2),
        ]);
        assert!(vectorizable(&good.structure()));

        let clash = parallel(vec![
            int_map("a", "v", "x", |n| n + 1),
            int_map("b", "v", "x", |n| n + 2),
        ]);
        assert!(!vectorizable(&clash.structure()));

        let opaque_branch = parallel(vec![
            int_map("a", "v", "x", |n| n + 1),
            Arc::new(opaque("o", |r: Record| Box::pin(async move { Ok(r) }))),
        ]);
        assert!(!vectorizable(&opaque_branch.structure()));
    }

    #[test]
    fn test_ineligible_parallel_stays_opaque_node() {
        let clash: OperatorRef = Arc::new(parallel(vec![
            int_map("a", "v", "x", |n| n + 1),
            int_map("b", "v", "x", |n| n + 2),
        ]));
        let graph = mirror(&clash, true).unwrap();
        assert_eq!(graph.nodes().len(), 1);
        let node = graph.nodes().values().next().unwrap();
        assert_eq!(node.kind, NodeKind::Operator);
    }

    #[tokio::test]
    async fn test_fusion_collapses_linear_runs() {
        let op: OperatorRef = Arc::new(sequence(vec![
            int_map("inc", "v", "v", |n| n + 1),
            int_map("dbl", "v", "v", |n| n * 2),
            int_map("dec", "v", "v", |n| n - 1),
        ]));
        let mirrored = mirror(&op, false).unwrap();
        let fused = fuse_adjacent_functions(&mirrored);

        assert_eq!(fused.nodes().len(), 1);
        assert!(fused.edges().is_empty());

        let mut sched = scheduler::create("sequential", SchedulerOptions::default()).unwrap();
        let results = sched
            .execute(&fused, record_from(vec![("v", json!(5))]))
            .await
            .unwrap();
        assert_eq!(results[OUTPUT]["v"], json!(2 * (5 + 1) - 1));
    }

    #[tokio::test]
    async fn test_fusion_stops_at_non_function_nodes() {
        let op: OperatorRef = Arc::new(sequence(vec![
            int_map("inc", "v", "v", |n| n + 1),
            Arc::new(
                opaque("side", |mut r: Record| {
                    Box::pin(async move {
                        r.insert("seen".to_string(), json!(true));
                        Ok(r)
                    })
                }),
            ),
            int_map("dbl", "v", "v", |n| n * 2),
        ]));
        let fused = fuse_adjacent_functions(&mirror(&op, false).unwrap());
        // Nothing fusible: function, opaque, function.
        assert_eq!(fused.nodes().len(), 3);
    }

    #[tokio::test]
    async fn test_memoized_operator_replays_produced_keys() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let inner: OperatorRef = Arc::new(
            map("expensive", move |v: Value| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(json!(v.as_i64().unwrap_or_default() * 3))
            })
            .on("v")
            .into_key("tripled"),
        );

        let memo = MemoizedOperator::new(inner);
        let first = memo.call(record_from(vec![("v", json!(2))])).await.unwrap();
        let second = memo.call(record_from(vec![("v", json!(2))])).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        memo.call(record_from(vec![("v", json!(3))])).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_memo_keyed_on_field_ignores_other_keys() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let inner: OperatorRef = Arc::new(
            map("parse", move |v: Value| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(json!(v.as_str().unwrap_or_default().len()))
            })
            .on("answer")
            .into_key("length"),
        );

        let memo = MemoizedOperator::new(inner).keyed_on("answer");
        let a = memo
            .call(record_from(vec![("answer", json!("hello")), ("run", json!(1))]))
            .await
            .unwrap();
        let b = memo
            .call(record_from(vec![("answer", json!("hello")), ("run", json!(2))]))
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(a["length"], json!(5));
        assert_eq!(b["length"], json!(5));
        // The surrounding record is preserved, not replayed from the memo.
        assert_eq!(b["run"], json!(2));
    }

    #[test]
    fn test_wrap_node_refuses_stochastic_payloads() {
        let stochastic: OperatorRef = Arc::new(
            opaque("rng", |r: Record| Box::pin(async move { Ok(r) })).stochastic(),
        );
        let mut graph = identity_graph(stochastic);
        let wrapped = wrap_node(&mut graph, "rng", true, |op| {
            Arc::new(MemoizedOperator::new(op))
        });
        assert!(!wrapped);

        let mut graph2 = identity_graph(int_map("pure", "v", "w", |n| n));
        let wrapped2 = wrap_node(&mut graph2, "pure", true, |op| {
            Arc::new(MemoizedOperator::new(op))
        });
        assert!(wrapped2);
    }
}
