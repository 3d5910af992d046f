//! Optimization strategies
//!
//! Each strategy is an (analyze, compile) pair: `analyze` inspects an
//! operator (structurally, by tracing one execution, or with LLM-aware
//! heuristics) and produces an [`Analysis`](crate::analysis::Analysis) with
//! a score and rewrite targets; `compile` materializes an optimized
//! [`ExecutionGraph`] honoring those targets.
//!
//! Every compiled graph preserves the operator's observable semantics:
//! stochastic leaves are never memoized or collapsed (when stochasticity
//! preservation is on, the default) and parallel blocks are only expanded
//! when their branches provably cannot conflict.

mod enhanced;
mod llm;
mod structural;
mod trace;

pub use enhanced::EnhancedStrategy;
pub use llm::{BatchController, LlmStrategy};
pub use structural::StructuralStrategy;
pub use trace::TraceStrategy;

use crate::analysis::Analysis;
use async_trait::async_trait;
use operon_core::error::Result;
use operon_core::operator::OperatorRef;
use operon_core::record::Record;
use operon_core::ExecutionGraph;

/// An (analyze, compile) pair producing an optimized execution graph.
#[async_trait]
pub trait Strategy: Send + Sync {
    /// Strategy name; part of the cache fingerprint.
    fn name(&self) -> &str;

    /// Inspect the operator and score its optimization potential.
    ///
    /// Only the trace strategy executes the operator (once, in a
    /// sandbox); the others analyze without running anything.
    async fn analyze(&self, operator: &OperatorRef, inputs: &Record) -> Result<Analysis>;

    /// Materialize an optimized execution graph for the analysis.
    async fn compile(
        &self,
        operator: &OperatorRef,
        inputs: &Record,
        analysis: &Analysis,
    ) -> Result<ExecutionGraph>;
}
