//! JIT core: strategy selection, compile-and-cache, the wrapped operator.
//!
//! [`Jit::compile`] wraps an operator in a [`JitOperator`] with the same
//! call contract. On each call the JIT fingerprints the (operator, input
//! shape, strategy, options) tuple; a cache hit runs the stored execution
//! graph, a miss analyzes, compiles and caches before running.
//!
//! Selection in `auto` mode runs the cheap structural analyzer first,
//! escalates to the LLM-aware strategy when any descendant is LLM-kind and
//! to the trace strategy when the structural score falls below
//! [`T_STRUCTURAL`]. Analyses scoring below [`T_COMPILE`] cache the
//! identity graph so low-value operators are not re-analyzed every call.

use crate::analysis::Analysis;
use crate::cache::{CacheStats, CompiledArtifact, JitCache, DEFAULT_MAX_ENTRIES};
use crate::fingerprint::fingerprint;
use crate::rewrite::identity_graph;
use crate::strategy::{
    EnhancedStrategy, LlmStrategy, Strategy, StructuralStrategy, TraceStrategy,
};
use async_trait::async_trait;
use operon_core::error::{CoreError, Result};
use operon_core::operator::{Operator, OperatorRef, Structure};
use operon_core::record::{shape_signature, Record};
use operon_core::scheduler::{self, SchedulerOptions};
use operon_core::{ExecutionGraph, OUTPUT};
use std::sync::Arc;
use std::time::Instant;

/// Below this structural score, `auto` escalates to the trace strategy.
pub const T_STRUCTURAL: f64 = 40.0;

/// Below this analysis score, the identity graph is cached instead of a
/// compiled one.
pub const T_COMPILE: f64 = 25.0;

/// Strategy selection mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JitMode {
    /// Pick a strategy from the operator's shape (the default).
    #[default]
    Auto,
    /// Always use the structural strategy.
    Structural,
    /// Always use the trace strategy.
    Trace,
    /// Always use the LLM-specialized strategy.
    Llm,
    /// Run all analyzers and apply the merged plan.
    Enhanced,
}

/// JIT tuning knobs.
#[derive(Clone)]
pub struct JitOptions {
    /// Strategy selection mode.
    pub mode: JitMode,
    /// Force the trace strategy regardless of structural score.
    pub force_trace: bool,
    /// Expand nested combinators when compiling.
    pub recursive: bool,
    /// Never memoize or collapse stochastic subgraphs (default true).
    pub preserve_stochasticity: bool,
    /// Representative input for `explain_selection` ahead of the first
    /// call.
    pub sample_input: Option<Record>,
    /// Compiled-artifact cache bound.
    pub max_entries: usize,
}

impl Default for JitOptions {
    fn default() -> Self {
        Self {
            mode: JitMode::Auto,
            force_trace: false,
            recursive: false,
            preserve_stochasticity: true,
            sample_input: None,
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }
}

impl JitOptions {
    /// Fingerprint component encoding the semantically relevant flags.
    fn flags(&self) -> String {
        format!(
            "ps={},rec={}",
            u8::from(self.preserve_stochasticity),
            u8::from(self.recursive)
        )
    }
}

/// Selection outcome reported by [`Jit::explain_selection`].
#[derive(Debug, Clone)]
pub struct SelectionReport {
    /// Chosen strategy name.
    pub strategy: String,
    /// Why it was chosen.
    pub rationale: String,
    /// The analysis score backing the choice.
    pub score: f64,
}

/// Aggregate JIT statistics.
pub type JitStats = CacheStats;

/// The JIT compiler: owns the artifact cache and wraps operators.
pub struct Jit {
    options: JitOptions,
    cache: Arc<JitCache>,
}

impl Jit {
    /// Create a JIT with options.
    pub fn new(options: JitOptions) -> Self {
        let cache = Arc::new(JitCache::new(options.max_entries));
        Self { options, cache }
    }

    /// Wrap an operator; the wrapper shares this JIT's cache.
    pub fn compile(&self, operator: OperatorRef) -> JitOperator {
        JitOperator {
            id: format!("jit({})", operator.id()),
            inner: operator,
            options: self.options.clone(),
            cache: self.cache.clone(),
        }
    }

    /// Aggregate cache statistics: hits, misses, hit rate, total calls and
    /// stored entries.
    pub async fn stats(&self) -> JitStats {
        self.cache.stats().await
    }

    /// Explain which strategy would be selected for an operator and why.
    ///
    /// Uses `sample_input` when provided (the trace strategy needs a
    /// concrete record to execute); otherwise the report reflects the
    /// analyses that run without input content.
    pub async fn explain_selection(&self, operator: &OperatorRef) -> Result<SelectionReport> {
        let inputs = self.options.sample_input.clone().unwrap_or_default();
        let strategy = select_strategy(&self.options, &operator.structure());
        let analysis = strategy.analyze(operator, &inputs).await?;
        Ok(SelectionReport {
            strategy: strategy.name().to_string(),
            rationale: analysis.rationale,
            score: analysis.score,
        })
    }
}

impl Default for Jit {
    fn default() -> Self {
        Self::new(JitOptions::default())
    }
}

/// Wrap an operator with a default-configured JIT.
///
/// The returned operator has the same call contract as the original.
pub fn jit(operator: OperatorRef, options: JitOptions) -> JitOperator {
    Jit::new(options).compile(operator)
}

fn select_strategy(options: &JitOptions, structure: &Structure) -> Box<dyn Strategy> {
    let preserve = options.preserve_stochasticity;
    let recursive = options.recursive;
    match options.mode {
        JitMode::Structural => Box::new(StructuralStrategy::new(recursive)),
        JitMode::Trace => Box::new(TraceStrategy::new(preserve, recursive)),
        JitMode::Llm => Box::new(LlmStrategy::new(preserve, recursive)),
        JitMode::Enhanced => Box::new(EnhancedStrategy::new(preserve, recursive)),
        JitMode::Auto => {
            if options.force_trace {
                return Box::new(TraceStrategy::new(preserve, recursive));
            }
            if structure.contains_llm() {
                return Box::new(LlmStrategy::new(preserve, recursive));
            }
            // The structural score is recomputed cheaply from shape
            // metrics; below the threshold the trace strategy takes over.
            if quick_structural_score(structure) < T_STRUCTURAL {
                Box::new(TraceStrategy::new(preserve, recursive))
            } else {
                Box::new(StructuralStrategy::new(recursive))
            }
        }
    }
}

/// Shape-only estimate matching the structural strategy's scoring, used
/// for selection before any analyzer runs.
fn quick_structural_score(structure: &Structure) -> f64 {
    use operon_core::StructureKind;

    if structure.size() == 1 {
        return 5.0;
    }
    let mut breadth = 0usize;
    let mut fusible = 0usize;
    let mut vectorized = 0usize;
    let mut stack = vec![structure];
    while let Some(node) = stack.pop() {
        if node.kind == StructureKind::Parallel {
            breadth = breadth.max(node.children.len());
            if crate::rewrite::vectorizable(node) {
                vectorized += 1;
            }
        }
        if node.kind == StructureKind::Sequence {
            fusible += node
                .children
                .windows(2)
                .filter(|pair| {
                    pair[0].kind == StructureKind::Map && pair[1].kind == StructureKind::Map
                })
                .count();
        }
        stack.extend(node.children.iter());
    }
    8.0 * structure.depth() as f64
        + 8.0 * breadth as f64
        + 15.0 * fusible as f64
        + 12.0 * vectorized as f64
}

/// An operator wrapped by the JIT; same call contract as the original.
pub struct JitOperator {
    id: String,
    inner: OperatorRef,
    options: JitOptions,
    cache: Arc<JitCache>,
}

impl JitOperator {
    /// The wrapped operator.
    pub fn inner(&self) -> &OperatorRef {
        &self.inner
    }

    /// Aggregate statistics of the backing cache.
    pub async fn stats(&self) -> JitStats {
        self.cache.stats().await
    }

    async fn compile_on_miss(
        &self,
        strategy: &dyn Strategy,
        inputs: &Record,
    ) -> (ExecutionGraph, String) {
        let analysis: Analysis = match strategy.analyze(&self.inner, inputs).await {
            Ok(analysis) => analysis,
            Err(error) => {
                tracing::warn!(
                    operator = %self.inner.id(),
                    strategy = strategy.name(),
                    %error,
                    "analysis failed; caching identity graph"
                );
                return (identity_graph(self.inner.clone()), "identity".to_string());
            }
        };

        if analysis.score < T_COMPILE {
            tracing::debug!(
                operator = %self.inner.id(),
                score = analysis.score,
                "score below compile threshold; caching identity graph"
            );
            return (identity_graph(self.inner.clone()), "identity".to_string());
        }

        match strategy.compile(&self.inner, inputs, &analysis).await {
            Ok(graph) => (graph, strategy.name().to_string()),
            Err(error) => {
                // Compilation bugs must never change observable behavior;
                // fall back to running the operator as-is.
                tracing::error!(
                    operator = %self.inner.id(),
                    strategy = strategy.name(),
                    %error,
                    "compilation failed; caching identity graph"
                );
                (identity_graph(self.inner.clone()), "identity".to_string())
            }
        }
    }

    async fn run_graph(&self, graph: &ExecutionGraph, inputs: Record) -> Result<Record> {
        let mut sched = scheduler::create("auto", SchedulerOptions::default())?;
        let mut results = sched.execute(graph, inputs).await?;
        results
            .remove(OUTPUT)
            .ok_or_else(|| CoreError::Cache("compiled graph produced no output record".to_string()))
    }
}

#[async_trait]
impl Operator for JitOperator {
    fn id(&self) -> &str {
        &self.id
    }

    async fn call(&self, inputs: Record) -> Result<Record> {
        let strategy = select_strategy(&self.options, &self.inner.structure());
        let key = fingerprint(
            self.inner.as_ref(),
            &inputs,
            strategy.name(),
            &self.options.flags(),
        );
        let shape = shape_signature(&inputs);

        let graph = match self.cache.get(&key).await {
            Some(artifact) => artifact.graph,
            None => {
                let (graph, produced_by) = self.compile_on_miss(strategy.as_ref(), &inputs).await;
                let artifact = CompiledArtifact::new(graph, key.clone(), produced_by);
                let shared = artifact.graph.clone();
                self.cache.insert(artifact).await;
                shared
            }
        };

        let started = Instant::now();
        let outputs = self.run_graph(&graph, inputs).await?;
        self.cache
            .record_invocation(&key, started.elapsed().as_secs_f64() * 1000.0, &shape)
            .await;
        Ok(outputs)
    }

    fn structure(&self) -> Structure {
        self.inner.structure().with_payload(self.inner.clone())
    }

    fn is_stochastic(&self) -> bool {
        self.inner.is_stochastic()
    }

    fn content_keys(&self) -> &[String] {
        self.inner.content_keys()
    }
}
