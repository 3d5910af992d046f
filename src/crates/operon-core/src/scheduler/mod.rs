//! The scheduler family
//!
//! Turns an [`ExecutionGraph`] and an input record into per-node output
//! records. Three schedulers satisfy one interface:
//!
//! - **sequential**: topological order, one node at a time;
//! - **topological**: same order, nodes within a level run concurrently
//!   bounded by `max_workers`;
//! - **wave**: repeatedly extracts every node whose predecessors are
//!   complete and runs the wave fully parallel.
//!
//! `"parallel"` aliases topological; `"auto"` defaults to it. For any DAG
//! whose leaves are deterministic, all three produce identical result maps.
//!
//! # Failure semantics
//!
//! The first child error cancels pending siblings in the same level, the
//! completed partials survive (exposed via `partial_results`) and the error
//! surfaced is stable across runs: lowest level first, then lowest node id.
//! Per-call deadlines come from [`SchedulerOptions::timeout`] and propagate
//! as child errors.
//!
//! # Examples
//!
//! ```rust
//! use operon_core::execution_graph::ExecutionGraph;
//! use operon_core::ops::map;
//! use operon_core::record::record_from;
//! use operon_core::scheduler::{self, SchedulerOptions};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let mut graph = ExecutionGraph::new();
//! graph.insert_operator("inc", Arc::new(
//!     map("inc", |v| Ok(json!(v.as_i64().unwrap() + 1))).on("v").into_key("a"),
//! ));
//!
//! let mut sched = scheduler::create("auto", SchedulerOptions::default()).unwrap();
//! let results = sched.execute(&graph, record_from(vec![("v", json!(1))])).await.unwrap();
//! assert_eq!(results["inc"]["a"], json!(2));
//! # }
//! ```

mod plan;
mod sequential;
mod topological;
mod wave;

pub use plan::{assemble_inputs, finalize_output, run_node};
pub use sequential::SequentialScheduler;
pub use topological::TopologicalScheduler;
pub use wave::WaveScheduler;

use crate::error::{CoreError, Result};
use crate::execution_graph::ExecutionGraph;
use crate::graph::{Graph, NodeId, OUTPUT};
use crate::record::Record;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

/// Per-node output records.
pub type NodeResults = HashMap<NodeId, Record>;

/// Scheduler tuning knobs.
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// Concurrent node bound for parallel schedulers.
    pub max_workers: usize,
    /// Optional per-call deadline applied to every operator invocation.
    pub timeout: Option<Duration>,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            max_workers: num_cpus::get().max(1),
            timeout: None,
        }
    }
}

impl SchedulerOptions {
    /// Bound concurrent node execution.
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }

    /// Apply a per-call deadline to every operator invocation.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Planner + executor turning a graph and inputs into per-node outputs.
#[async_trait]
pub trait Scheduler: Send {
    /// Scheduler kind name.
    fn name(&self) -> &str;

    /// Derive the internal plan; fails with
    /// [`CoreError::GraphCycle`] on cyclic graphs, before any operator runs.
    fn prepare(&mut self, graph: &ExecutionGraph) -> Result<()>;

    /// Execute the graph. Prepares implicitly when `prepare` was not
    /// called. The returned map contains every executed node plus the
    /// [`OUTPUT`](crate::graph::OUTPUT) sentinel record.
    async fn execute(&mut self, graph: &ExecutionGraph, inputs: Record) -> Result<NodeResults>;

    /// Results completed before a failure (the full map after success).
    fn partial_results(&self) -> NodeResults;
}

/// Create a scheduler by kind name.
///
/// Kinds: `"sequential"`, `"topological"`, `"wave"`, `"parallel"` (alias
/// for topological) and `"auto"` (defaults to topological).
pub fn create(kind: &str, options: SchedulerOptions) -> Result<Box<dyn Scheduler>> {
    match kind {
        "sequential" => Ok(Box::new(SequentialScheduler::new(options))),
        "topological" | "parallel" | "auto" => {
            Ok(Box::new(TopologicalScheduler::new(options)))
        }
        "wave" => Ok(Box::new(WaveScheduler::new(options))),
        other => Err(CoreError::Validation(format!(
            "unknown scheduler kind '{}'",
            other
        ))),
    }
}

/// Compile a user [`Graph`] and execute it, returning per-node records.
pub async fn execute_graph(
    graph: &Graph,
    inputs: Record,
    kind: &str,
    options: SchedulerOptions,
) -> Result<NodeResults> {
    graph.validate()?;
    let execution = ExecutionGraph::from_graph(graph);
    let mut scheduler = create(kind, options)?;
    scheduler.execute(&execution, inputs).await
}

/// Compile a user [`Graph`], execute it and return only the merged
/// [`OUTPUT`](crate::graph::OUTPUT) record.
pub async fn execute_graph_output(
    graph: &Graph,
    inputs: Record,
    kind: &str,
    options: SchedulerOptions,
) -> Result<Record> {
    let mut results = execute_graph(graph, inputs, kind, options).await?;
    Ok(results.remove(OUTPUT).unwrap_or_default())
}

/// Run one level's nodes concurrently, bounded by `max_workers`.
///
/// Returns completed `(node, record)` pairs; on failure the successes that
/// finished before cancellation are still returned alongside the
/// run-stable first error (lowest node id in the level).
pub(crate) async fn execute_level(
    graph: &ExecutionGraph,
    level: &[NodeId],
    results: &NodeResults,
    initial: &Record,
    options: &SchedulerOptions,
) -> (Vec<(NodeId, Record)>, Option<CoreError>) {
    use tokio::sync::Semaphore;
    use tokio::task::JoinSet;

    let semaphore = std::sync::Arc::new(Semaphore::new(options.max_workers));
    let mut set = JoinSet::new();

    for node_id in level {
        let node = match graph.node(node_id) {
            Some(node) => node.clone(),
            None => {
                return (
                    Vec::new(),
                    Some(CoreError::UnknownNode(node_id.clone())),
                )
            }
        };
        // Inputs are fully assembled before invocation; assembly errors
        // count as that node's failure.
        let inputs = match assemble_inputs(graph, node_id, results, initial) {
            Ok(inputs) => inputs,
            Err(e) => return (Vec::new(), Some(CoreError::child(node_id.as_str(), e))),
        };

        let semaphore = semaphore.clone();
        let node_id = node_id.clone();
        let timeout = options.timeout;
        set.spawn(async move {
            // The semaphore is never closed; a failed acquire would only
            // mean the permit is not held, which is safe.
            let _permit = semaphore.acquire_owned().await.ok();
            let outcome = run_node(&node_id, &node, inputs, timeout).await;
            (node_id, outcome)
        });
    }

    let mut completed: Vec<(NodeId, Record)> = Vec::new();
    let mut failures: Vec<(NodeId, CoreError)> = Vec::new();

    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((node_id, Ok(record))) => completed.push((node_id, record)),
            Ok((node_id, Err(error))) => {
                if failures.is_empty() {
                    set.abort_all();
                }
                failures.push((node_id, error));
            }
            Err(join_err) if join_err.is_cancelled() => {}
            Err(join_err) => {
                set.abort_all();
                failures.push((
                    String::new(),
                    CoreError::Validation(format!("node task panicked: {}", join_err)),
                ));
            }
        }
    }

    completed.sort_by(|a, b| a.0.cmp(&b.0));
    failures.sort_by(|a, b| a.0.cmp(&b.0));
    let first_error = failures.into_iter().next().map(|(_, e)| e);
    (completed, first_error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_kinds() {
        assert_eq!(
            create("sequential", SchedulerOptions::default())
                .unwrap()
                .name(),
            "sequential"
        );
        assert_eq!(
            create("wave", SchedulerOptions::default()).unwrap().name(),
            "wave"
        );
        assert_eq!(
            create("parallel", SchedulerOptions::default())
                .unwrap()
                .name(),
            "topological"
        );
        assert_eq!(
            create("auto", SchedulerOptions::default()).unwrap().name(),
            "topological"
        );
        assert!(create("bogus", SchedulerOptions::default()).is_err());
    }

    #[test]
    fn test_options_builders() {
        let options = SchedulerOptions::default()
            .with_max_workers(0)
            .with_timeout(Duration::from_millis(5));
        assert_eq!(options.max_workers, 1);
        assert_eq!(options.timeout, Some(Duration::from_millis(5)));
    }
}
