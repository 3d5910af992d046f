//! Wave scheduler: predecessor-closure extraction.

use super::plan::finalize_output;
use super::{execute_level, NodeResults, Scheduler, SchedulerOptions};
use crate::error::{CoreError, Result};
use crate::execution_graph::ExecutionGraph;
use crate::graph::{NodeId, INPUT, OUTPUT};
use crate::record::Record;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};

/// Repeatedly extracts every node whose predecessors are all completed and
/// runs each wave fully parallel.
///
/// For any DAG the wave decomposition is identical to the Kahn layering of
/// [`ExecutionGraph::levels`]; the two are computed independently so the
/// invariant is testable.
pub struct WaveScheduler {
    options: SchedulerOptions,
    plan: Option<Vec<Vec<NodeId>>>,
    partials: NodeResults,
}

impl WaveScheduler {
    /// Create a wave scheduler.
    pub fn new(options: SchedulerOptions) -> Self {
        Self {
            options,
            plan: None,
            partials: NodeResults::new(),
        }
    }

    /// Compute waves by iterated predecessor closure.
    pub fn compute_waves(graph: &ExecutionGraph) -> Result<Vec<Vec<NodeId>>> {
        let predecessors: HashMap<&str, Vec<&str>> = graph
            .nodes()
            .keys()
            .map(|id| {
                let preds: Vec<&str> = graph
                    .incoming(id)
                    .into_iter()
                    .filter(|e| e.from != INPUT)
                    .map(|e| e.from.as_str())
                    .filter(|from| graph.nodes().contains_key(*from))
                    .collect();
                (id.as_str(), preds)
            })
            .collect();

        let mut remaining: HashSet<&str> = graph.nodes().keys().map(String::as_str).collect();
        let mut completed: HashSet<&str> = HashSet::new();
        let mut waves: Vec<Vec<NodeId>> = Vec::new();

        while !remaining.is_empty() {
            let mut wave: Vec<&str> = remaining
                .iter()
                .copied()
                .filter(|id| {
                    predecessors[*id]
                        .iter()
                        .all(|pred| completed.contains(pred))
                })
                .collect();
            if wave.is_empty() {
                let mut stuck: Vec<&str> = remaining.iter().copied().collect();
                stuck.sort_unstable();
                return Err(CoreError::GraphCycle(format!(
                    "unresolvable nodes: {}",
                    stuck.join(", ")
                )));
            }
            wave.sort_unstable();
            for id in &wave {
                remaining.remove(*id);
                completed.insert(*id);
            }
            waves.push(wave.into_iter().map(str::to_string).collect());
        }
        Ok(waves)
    }
}

#[async_trait]
impl Scheduler for WaveScheduler {
    fn name(&self) -> &str {
        "wave"
    }

    fn prepare(&mut self, graph: &ExecutionGraph) -> Result<()> {
        self.plan = Some(Self::compute_waves(graph)?);
        Ok(())
    }

    async fn execute(&mut self, graph: &ExecutionGraph, inputs: Record) -> Result<NodeResults> {
        if self.plan.is_none() {
            self.prepare(graph)?;
        }
        let plan = self.plan.clone().expect("prepared above");
        self.partials.clear();

        let mut results = NodeResults::new();
        for (index, wave) in plan.iter().enumerate() {
            tracing::trace!(wave = index, width = wave.len(), "executing wave");
            let (completed, error) =
                execute_level(graph, wave, &results, &inputs, &self.options).await;
            for (node_id, record) in completed {
                results.insert(node_id, record);
            }
            self.partials = results.clone();
            if let Some(error) = error {
                return Err(error);
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
