//! Level-parallel topological scheduler.

use super::plan::finalize_output;
use super::{execute_level, NodeResults, Scheduler, SchedulerOptions};
use crate::error::Result;
use crate::execution_graph::ExecutionGraph;
use crate::graph::{NodeId, OUTPUT};
use crate::record::Record;
use async_trait::async_trait;

/// Executes topological levels in order, nodes within a level concurrently
/// up to `max_workers`.
pub struct TopologicalScheduler {
    options: SchedulerOptions,
    plan: Option<Vec<Vec<NodeId>>>,
    partials: NodeResults,
}

impl TopologicalScheduler {
    /// Create a topological scheduler.
    pub fn new(options: SchedulerOptions) -> Self {
        Self {
            options,
            plan: None,
            partials: NodeResults::new(),
        }
    }
}

#[async_trait]
impl Scheduler for TopologicalScheduler {
    fn name(&self) -> &str {
        "topological"
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
        for (depth, level) in plan.iter().enumerate() {
            tracing::trace!(depth, width = level.len(), "executing level");
            let (completed, error) =
                execute_level(graph, level, &results, &inputs, &self.options).await;
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use crate::ops::{map, opaque};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    #[tokio::test]
    async fn test_level_runs_concurrently() {
        let slow = |name: &str, key: &'static str| {
            Arc::new(opaque(name.to_string(), move |mut record: Record| {
                Box::pin(async move {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    record.insert(key.to_string(), json!(true));
                    Ok(record)
                })
            }))
        };

        let mut graph = ExecutionGraph::new();
        graph.insert_operator("s1", slow("s1", "a"));
        graph.insert_operator("s2", slow("s2", "b"));

        let mut sched = TopologicalScheduler::new(SchedulerOptions::default());
        let started = Instant::now();
        let results = sched.execute(&graph, Record::new()).await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(180));
        assert_eq!(results["s1"]["a"], json!(true));
        assert_eq!(results["s2"]["b"], json!(true));
    }

    #[tokio::test]
    async fn test_failure_cancels_level_and_keeps_partials() {
        let mut graph = ExecutionGraph::new();
        graph.insert_operator("fast", Arc::new(map("fast", Ok)));
        // Fails only after the fast sibling has certainly completed.
        graph.insert_operator(
            "boom",
            Arc::new(opaque("boom", |_| {
                Box::pin(async move {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Err(CoreError::Validation("broken".to_string()))
                })
            })),
        );
        graph.insert_operator(
            "slow",
            Arc::new(opaque("slow", |record: Record| {
                Box::pin(async move {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    Ok(record)
                })
            })),
        );

        let mut sched = TopologicalScheduler::new(SchedulerOptions::default());
        let started = Instant::now();
        let err = sched.execute(&graph, Record::new()).await.unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(2));

        match err {
            CoreError::Child { path, .. } => assert_eq!(path[0], "boom"),
            other => panic!("expected Child, got {:?}", other),
        }
        assert!(sched.partial_results().contains_key("fast"));
    }

    #[tokio::test]
    async fn test_max_workers_bounds_concurrency() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let live = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut graph = ExecutionGraph::new();
        for i in 0..6 {
            let live = live.clone();
            let peak = peak.clone();
            graph.insert_operator(
                format!("n{}", i),
                Arc::new(opaque(format!("n{}", i), move |record: Record| {
                    let live = live.clone();
                    let peak = peak.clone();
                    Box::pin(async move {
                        let now = live.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(30)).await;
                        live.fetch_sub(1, Ordering::SeqCst);
                        Ok(record)
                    })
                })),
            );
        }

        let mut sched =
            TopologicalScheduler::new(SchedulerOptions::default().with_max_workers(2));
        sched.execute(&graph, Record::new()).await.unwrap();
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_timeout_propagates_as_child_error() {
        let mut graph = ExecutionGraph::new();
        graph.insert_operator(
            "slow",
            Arc::new(opaque("slow", |record: Record| {
                Box::pin(async move {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    Ok(record)
                })
            })),
        );

        let mut sched = TopologicalScheduler::new(
            SchedulerOptions::default().with_timeout(Duration::from_millis(20)),
        );
        let err = sched.execute(&graph, Record::new()).await.unwrap_err();
        assert!(matches!(err.root_cause(), CoreError::Timeout { .. }));
    }
}
