//! Trace strategy: one sandboxed execution with per-descendant recording.

use crate::analysis::{Analysis, OptTarget, TargetKind};
use crate::rewrite::{fuse_adjacent_functions, mirror, MemoizedOperator};
use crate::strategy::Strategy;
use async_trait::async_trait;
use operon_core::error::{CoreError, Result};
use operon_core::operator::{OperatorRef, Structure, StructureKind};
use operon_core::record::{merge, Record};
use operon_core::ExecutionGraph;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// Share of total wall time that makes a leaf "hot".
const HOT_PATH_SHARE: f64 = 0.20;

/// One recorded leaf invocation.
#[derive(Debug, Clone)]
struct TraceEvent {
    target: String,
    kind: StructureKind,
    stochastic: bool,
    latency_ms: f64,
    input_key: String,
}

/// Runs the operator once in a tracing sandbox that records per-descendant
/// inputs and latency, then proposes inlining for small hot leaves and
/// memoization for deterministic leaves observed with repeated identical
/// inputs. The score is a function of latency spread and input repetition.
pub struct TraceStrategy {
    /// Refuse rewrites touching stochastic leaves.
    pub preserve_stochasticity: bool,
    /// Expand nested combinators when compiling.
    pub recursive: bool,
}

impl TraceStrategy {
    /// Create the strategy.
    pub fn new(preserve_stochasticity: bool, recursive: bool) -> Self {
        Self {
            preserve_stochasticity,
            recursive,
        }
    }
}

/// Interpret the composition tree, timing every leaf call.
///
/// The sandbox mimics combinator semantics (sequence folds, parallel
/// merges) but runs branches sequentially; only per-leaf latency matters
/// for the analysis.
fn trace_walk<'a>(
    structure: &'a Structure,
    inputs: Record,
    events: &'a mut Vec<TraceEvent>,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Record>> + Send + 'a>> {
    Box::pin(async move {
        match structure.kind {
            StructureKind::Sequence if !structure.children.is_empty() => {
                let mut record = inputs;
                for child in &structure.children {
                    let output = trace_walk(child, record.clone(), events).await?;
                    record = merge(record, output);
                }
                Ok(record)
            }
            StructureKind::Parallel if !structure.children.is_empty() => {
                let mut record = inputs.clone();
                for child in &structure.children {
                    let output = trace_walk(child, inputs.clone(), events).await?;
                    record = merge(record, output);
                }
                Ok(record)
            }
            _ => {
                let payload = structure.payload.clone().ok_or_else(|| {
                    CoreError::Cache(format!(
                        "trace sandbox: structure node '{}' carries no payload",
                        structure.id
                    ))
                })?;
                let input_key = Value::Object(inputs.clone()).to_string();
                let started = Instant::now();
                let output = payload.call(inputs).await?;
                events.push(TraceEvent {
                    target: structure.id.clone(),
                    kind: structure.kind,
                    stochastic: structure.stochastic,
                    latency_ms: started.elapsed().as_secs_f64() * 1000.0,
                    input_key,
                });
                Ok(output)
            }
        }
    })
}

#[async_trait]
impl Strategy for TraceStrategy {
    fn name(&self) -> &str {
        "trace"
    }

    async fn analyze(&self, operator: &OperatorRef, inputs: &Record) -> Result<Analysis> {
        let structure = operator.structure().with_payload(operator.clone());
        let mut events = Vec::new();
        trace_walk(&structure, inputs.clone(), &mut events).await?;

        let total_ms: f64 = events.iter().map(|e| e.latency_ms).sum();
        let mean = if events.is_empty() {
            0.0
        } else {
            total_ms / events.len() as f64
        };
        let variance = if events.is_empty() {
            0.0
        } else {
            events
                .iter()
                .map(|e| (e.latency_ms - mean).powi(2))
                .sum::<f64>()
                / events.len() as f64
        };
        let spread = if mean > 0.0 {
            variance.sqrt() / mean
        } else {
            0.0
        };

        // Aggregate latency per target; a leaf may run several times.
        let mut per_target: HashMap<&str, f64> = HashMap::new();
        for event in &events {
            *per_target.entry(event.target.as_str()).or_default() += event.latency_ms;
        }
        let mut hot: Vec<String> = per_target
            .iter()
            .filter(|(_, ms)| total_ms > 0.0 && **ms / total_ms >= HOT_PATH_SHARE)
            .map(|(id, _)| id.to_string())
            .collect();
        hot.sort();

        // Repeated identical inputs on deterministic leaves.
        let mut seen: HashMap<(&str, &str), usize> = HashMap::new();
        for event in &events {
            if !event.stochastic {
                *seen
                    .entry((event.target.as_str(), event.input_key.as_str()))
                    .or_default() += 1;
            }
        }
        let mut repeated: Vec<String> = seen
            .iter()
            .filter(|(_, count)| **count >= 2)
            .map(|((id, _), _)| id.to_string())
            .collect();
        repeated.sort();
        repeated.dedup();

        let mut targets = Vec::new();
        for id in &hot {
            let is_function = events
                .iter()
                .any(|e| &e.target == id && e.kind == StructureKind::Map);
            if is_function {
                targets.push(OptTarget::new(TargetKind::InlineFunction, vec![id.clone()]));
            }
        }
        for id in &repeated {
            targets.push(OptTarget::new(TargetKind::MemoizePure, vec![id.clone()]));
        }

        let score = 20.0 * hot.len() as f64
            + 25.0 * repeated.len() as f64
            + (spread * 30.0).min(30.0)
            + if events.len() >= 3 { 10.0 } else { 0.0 };
        let rationale = format!(
            "{} leaves traced in {:.2}ms, {} hot (≥{:.0}% of wall time), {} with repeated inputs, latency spread {:.2}",
            events.len(),
            total_ms,
            hot.len(),
            HOT_PATH_SHARE * 100.0,
            repeated.len(),
            spread
        );
        tracing::debug!(operator = %operator.id(), score, %rationale, "trace analysis");
        Ok(Analysis::new(score, rationale, targets))
    }

    async fn compile(
        &self,
        operator: &OperatorRef,
        _inputs: &Record,
        analysis: &Analysis,
    ) -> Result<ExecutionGraph> {
        let mut graph = mirror(operator, self.recursive)?;

        for target in analysis.targets_of(TargetKind::MemoizePure) {
            for id in &target.nodes {
                let wrapped = crate::rewrite::wrap_node(
                    &mut graph,
                    id,
                    self.preserve_stochasticity,
                    |op| Arc::new(MemoizedOperator::new(op)),
                );
                if !wrapped {
                    tracing::debug!(node = %id, "memoization target skipped");
                }
            }
        }

        if analysis.targets_of(TargetKind::InlineFunction).count() > 0 {
            graph = fuse_adjacent_functions(&graph);
        }
        Ok(graph)
    }
}
