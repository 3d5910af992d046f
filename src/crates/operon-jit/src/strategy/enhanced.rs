//! Enhanced composite strategy: structural + LLM staging + trace memoization.

use crate::analysis::{Analysis, TargetKind};
use crate::rewrite::{fuse_adjacent_functions, mirror, wrap_node, MemoizedOperator};
use crate::strategy::{LlmStrategy, Strategy, StructuralStrategy, TraceStrategy};
use async_trait::async_trait;
use operon_core::error::Result;
use operon_core::operator::OperatorRef;
use operon_core::record::Record;
use operon_core::ExecutionGraph;
use std::sync::Arc;

/// Runs all three analyzers, tags each target with its origin and takes the
/// maximum score. Compilation applies targets in a fixed order: structural
/// fusion, then LLM staging caches, then trace memoization: skipping any
/// target whose node was consumed by an earlier rewrite. An individual
/// analyzer failure is logged and never blocks the others.
pub struct EnhancedStrategy {
    structural: StructuralStrategy,
    trace: TraceStrategy,
    llm: LlmStrategy,
}

impl EnhancedStrategy {
    /// Create the composite.
    pub fn new(preserve_stochasticity: bool, recursive: bool) -> Self {
        Self {
            structural: StructuralStrategy::new(recursive),
            trace: TraceStrategy::new(preserve_stochasticity, recursive),
            llm: LlmStrategy::new(preserve_stochasticity, recursive),
        }
    }

    async fn run_one(
        strategy: &dyn Strategy,
        operator: &OperatorRef,
        inputs: &Record,
    ) -> Option<Analysis> {
        match strategy.analyze(operator, inputs).await {
            Ok(analysis) => Some(analysis),
            Err(error) => {
                tracing::warn!(
                    strategy = strategy.name(),
                    operator = %operator.id(),
                    %error,
                    "analyzer failed; continuing with the others"
                );
                None
            }
        }
    }
}

#[async_trait]
impl Strategy for EnhancedStrategy {
    fn name(&self) -> &str {
        "enhanced"
    }

    async fn analyze(&self, operator: &OperatorRef, inputs: &Record) -> Result<Analysis> {
        let mut score: f64 = 0.0;
        let mut targets = Vec::new();
        let mut notes = Vec::new();

        let parts: [(&dyn Strategy, Option<Analysis>); 3] = [
            (
                &self.structural,
                Self::run_one(&self.structural, operator, inputs).await,
            ),
            (&self.llm, Self::run_one(&self.llm, operator, inputs).await),
            (
                &self.trace,
                Self::run_one(&self.trace, operator, inputs).await,
            ),
        ];

        for (strategy, analysis) in parts {
            let Some(analysis) = analysis else {
                continue;
            };
            score = score.max(analysis.score);
            notes.push(format!(
                "{}: {:.0} ({})",
                strategy.name(),
                analysis.score,
                analysis.rationale
            ));
            targets.extend(
                analysis
                    .targets
                    .into_iter()
                    .map(|t| t.with_origin(strategy.name())),
            );
        }

        Ok(Analysis::new(score, notes.join("; "), targets))
    }

    async fn compile(
        &self,
        operator: &OperatorRef,
        _inputs: &Record,
        analysis: &Analysis,
    ) -> Result<ExecutionGraph> {
        let mut graph = mirror(operator, self.structural.recursive)?;

        // 1. Structural fusion.
        if analysis.targets_of(TargetKind::FuseFunctions).count() > 0
            || analysis.targets_of(TargetKind::InlineFunction).count() > 0
        {
            graph = fuse_adjacent_functions(&graph);
        }

        // 2. LLM staging caches. A stage swallowed by fusion no longer
        // exists under its own id; the target is skipped.
        for target in analysis.targets_of(TargetKind::CacheTemplate) {
            for id in &target.nodes {
                if !wrap_node(&mut graph, id, self.llm.preserve_stochasticity, |op| {
                    Arc::new(MemoizedOperator::new(op))
                }) {
                    tracing::debug!(node = %id, "template cache target invalidated by earlier rewrite");
                }
            }
        }
        for target in analysis.targets_of(TargetKind::CacheParser) {
            for id in &target.nodes {
                if !wrap_node(&mut graph, id, self.llm.preserve_stochasticity, |op| {
                    Arc::new(MemoizedOperator::new(op))
                }) {
                    tracing::debug!(node = %id, "parser cache target invalidated by earlier rewrite");
                }
            }
        }

        // 3. Trace memoization.
        for target in analysis.targets_of(TargetKind::MemoizePure) {
            for id in &target.nodes {
                if !wrap_node(&mut graph, id, self.trace.preserve_stochasticity, |op| {
                    Arc::new(MemoizedOperator::new(op))
                }) {
                    tracing::debug!(node = %id, "memoization target invalidated by earlier rewrite");
                }
            }
        }

        Ok(graph)
    }
}
