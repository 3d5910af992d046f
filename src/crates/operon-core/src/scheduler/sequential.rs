//! One-node-at-a-time scheduler.

use super::plan::{assemble_inputs, finalize_output, run_node};
use super::{NodeResults, Scheduler, SchedulerOptions};
use crate::error::{CoreError, Result};
use crate::execution_graph::ExecutionGraph;
use crate::graph::{NodeId, OUTPUT};
use crate::record::Record;
use async_trait::async_trait;

/// Executes nodes in topological order, one at a time.
///
/// The reference scheduler: no concurrency, no cancellation races. The
/// parallel schedulers must produce byte-identical result maps on
/// deterministic graphs.
pub struct SequentialScheduler {
    options: SchedulerOptions,
    plan: Option<Vec<Vec<NodeId>>>,
    partials: NodeResults,
}

impl SequentialScheduler {
    /// Create a sequential scheduler.
    pub fn new(options: SchedulerOptions) -> Self {
        Self {
            options,
            plan: None,
            partials: NodeResults::new(),
        }
    }
}

#[async_trait]
impl Scheduler for SequentialScheduler {
    fn name(&self) -> &str {
        "sequential"
    }

    fn prepare(&mut self, graph: &ExecutionGraph) -> Result<()> {
        self.plan = Some(graph.levels()?);
        Ok(())
    }

    async fn execute(&mut self, graph: &ExecutionGraph, inputs: Record) -> Result<NodeResults> {
        if self.plan.is_none() {
            self.prepare(graph)?;
        }
        let plan = self.plan.clone().expect("prepared above");
        self.partials.clear();

        let mut results = NodeResults::new();
        for level in &plan {
            for node_id in level {
                let node = graph
                    .node(node_id)
                    .ok_or_else(|| CoreError::UnknownNode(node_id.clone()))?;
                let node_inputs = assemble_inputs(graph, node_id, &results, &inputs)
                    .map_err(|e| CoreError::child(node_id.as_str(), e))?;
                let record = run_node(node_id, node, node_inputs, self.options.timeout).await?;
                results.insert(node_id.clone(), record);
                self.partials = results.clone();
            }
        }

        let output = finalize_output(graph, &results, &inputs);
        results.insert(OUTPUT.to_string(), output);
        self.partials = results.clone();
        Ok(results)
    }

    fn partial_results(&self) -> NodeResults {
        self.partials.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::map;
    use crate::record::record_from;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_chain_executes_in_order() {
        let mut graph = ExecutionGraph::new();
        graph.insert_operator(
            "inc",
            Arc::new(
                map("inc", |v| Ok(json!(v.as_i64().unwrap() + 1)))
                    .on("v")
                    .into_key("a"),
            ),
        );
        graph.insert_operator(
            "dbl",
            Arc::new(
                map("dbl", |v| Ok(json!(v.as_i64().unwrap() * 2)))
                    .on("a")
                    .into_key("b"),
            ),
        );
        graph.add_edge("inc", "dbl", None, "input").unwrap();

        let mut sched = SequentialScheduler::new(SchedulerOptions::default());
        let results = sched
            .execute(&graph, record_from(vec![("v", json!(3))]))
            .await
            .unwrap();

        assert_eq!(results["inc"]["a"], json!(4));
        assert_eq!(results["dbl"]["b"], json!(8));
        assert_eq!(results[OUTPUT]["b"], json!(8));
    }

    #[tokio::test]
    async fn test_partials_survive_failure() {
        let mut graph = ExecutionGraph::new();
        graph.insert_operator("ok", Arc::new(map("ok", Ok)));
        graph.insert_operator(
            "boom",
            Arc::new(map("boom", |_| {
                Err(CoreError::Validation("broken".to_string()))
            })),
        );
        graph.add_edge("ok", "boom", None, "input").unwrap();

        let mut sched = SequentialScheduler::new(SchedulerOptions::default());
        let err = sched.execute(&graph, Record::new()).await.unwrap_err();
        assert!(matches!(err, CoreError::Child { .. }));

        let partials = sched.partial_results();
        assert!(partials.contains_key("ok"));
        assert!(!partials.contains_key("boom"));
    }

    #[tokio::test]
    async fn test_cycle_rejected_at_prepare() {
        let mut graph = ExecutionGraph::new();
        graph.insert_operator("a", Arc::new(map("a", Ok)));
        graph.insert_operator("b", Arc::new(map("b", Ok)));
        graph.add_edge("a", "b", None, "input").unwrap();
        graph.add_edge("b", "a", None, "input").unwrap();

        let mut sched = SequentialScheduler::new(SchedulerOptions::default());
        let err = sched.prepare(&graph).unwrap_err();
        assert!(matches!(err, CoreError::GraphCycle(_)));
    }
}
