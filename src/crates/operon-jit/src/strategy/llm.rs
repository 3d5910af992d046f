//! LLM-specialized strategy: stage-aware caching around model calls.

use crate::analysis::{Analysis, OptTarget, TargetKind};
use crate::rewrite::{mirror, wrap_node, MemoizedOperator};
use crate::strategy::Strategy;
use async_trait::async_trait;
use operon_core::error::Result;
use operon_core::operator::{OperatorRef, Structure, StructureKind};
use operon_core::record::Record;
use operon_core::ExecutionGraph;
use std::collections::VecDeque;
use std::sync::Arc;

/// Tail-latency spike threshold relative to the median.
const TAIL_LATENCY_FACTOR: f64 = 1.5;

/// Upper bound on the adaptive batch size.
const MAX_BATCH_SIZE: usize = 32;

/// Classified leaf roles in an LLM pipeline.
#[derive(Debug, Default)]
struct Roles {
    templating: Vec<String>,
    invocation: Vec<(String, Option<String>)>,
    parsing: Vec<(String, Option<String>)>,
    batchable: bool,
}

/// Detects the three roles of an LLM pipeline: prompt templating, model
/// invocation, result parsing: and produces a plan that caches the
/// deterministic stages while leaving every model call un-memoized.
///
/// Classification is positional over the flattened leaf order (maps before
/// the first model call are templating, maps after the last are parsing)
/// reinforced by name heuristics (`template`/`prompt`, `parse`/`extract`).
/// Batching is planned only when the resolved provider reports batch
/// semantics for the model.
pub struct LlmStrategy {
    /// Refuse rewrites touching stochastic leaves.
    pub preserve_stochasticity: bool,
    /// Expand nested combinators when compiling.
    pub recursive: bool,
}

impl LlmStrategy {
    /// Create the strategy.
    pub fn new(preserve_stochasticity: bool, recursive: bool) -> Self {
        Self {
            preserve_stochasticity,
            recursive,
        }
    }
}

fn flatten_leaves<'a>(structure: &'a Structure, out: &mut Vec<&'a Structure>) {
    if structure.children.is_empty() {
        out.push(structure);
    } else {
        for child in &structure.children {
            flatten_leaves(child, out);
        }
    }
}

fn looks_like_templating(id: &str) -> bool {
    let lower = id.to_lowercase();
    lower.contains("template") || lower.contains("prompt") || lower.contains("format")
}

fn looks_like_parsing(id: &str) -> bool {
    let lower = id.to_lowercase();
    lower.contains("parse") || lower.contains("extract") || lower.contains("decode")
}

fn classify(structure: &Structure) -> Roles {
    let mut leaves = Vec::new();
    flatten_leaves(structure, &mut leaves);

    let llm_positions: Vec<usize> = leaves
        .iter()
        .enumerate()
        .filter(|(_, leaf)| leaf.kind == StructureKind::Llm)
        .map(|(i, _)| i)
        .collect();
    let mut roles = Roles::default();
    let (Some(&first_llm), Some(&last_llm)) = (llm_positions.first(), llm_positions.last())
    else {
        return roles;
    };

    for (index, leaf) in leaves.iter().enumerate() {
        match leaf.kind {
            StructureKind::Llm => {
                roles.batchable |= leaf.batchable;
                roles
                    .invocation
                    .push((leaf.id.clone(), leaf.out_key.clone()));
            }
            StructureKind::Map if index < first_llm || looks_like_templating(&leaf.id) => {
                roles.templating.push(leaf.id.clone());
            }
            StructureKind::Map if index > last_llm || looks_like_parsing(&leaf.id) => {
                roles.parsing.push((leaf.id.clone(), leaf.in_key.clone()));
            }
            _ => {}
        }
    }
    roles
}

#[async_trait]
impl Strategy for LlmStrategy {
    fn name(&self) -> &str {
        "llm"
    }

    async fn analyze(&self, operator: &OperatorRef, _inputs: &Record) -> Result<Analysis> {
        let structure = operator.structure().with_payload(operator.clone());
        let roles = classify(&structure);

        if roles.invocation.is_empty() {
            return Ok(Analysis::new(
                0.0,
                "no model invocations in the operator tree",
                vec![],
            ));
        }

        let score = 45.0
            + 12.0 * (roles.templating.len().min(2)) as f64
            + 12.0 * (roles.parsing.len().min(2)) as f64
            + if roles.batchable { 8.0 } else { 0.0 };

        let mut targets = Vec::new();
        if !roles.templating.is_empty() {
            targets.push(OptTarget::new(
                TargetKind::CacheTemplate,
                roles.templating.clone(),
            ));
        }
        if !roles.parsing.is_empty() {
            targets.push(OptTarget::new(
                TargetKind::CacheParser,
                roles.parsing.iter().map(|(id, _)| id.clone()).collect(),
            ));
        }
        if roles.batchable {
            targets.push(OptTarget::new(
                TargetKind::BatchLlm,
                roles.invocation.iter().map(|(id, _)| id.clone()).collect(),
            ));
        }

        let rationale = format!(
            "{} model call(s), {} templating stage(s), {} parsing stage(s){}",
            roles.invocation.len(),
            roles.templating.len(),
            roles.parsing.len(),
            if roles.batchable {
                ", provider supports batching"
            } else {
                ""
            }
        );
        tracing::debug!(operator = %operator.id(), score, %rationale, "llm analysis");
        Ok(Analysis::new(score, rationale, targets))
    }

    async fn compile(
        &self,
        operator: &OperatorRef,
        _inputs: &Record,
        analysis: &Analysis,
    ) -> Result<ExecutionGraph> {
        let structure = operator.structure().with_payload(operator.clone());
        let roles = classify(&structure);
        let mut graph = mirror(operator, self.recursive)?;

        // Templating outputs are keyed by the substituted inputs: the
        // whole record the stage saw.
        for target in analysis.targets_of(TargetKind::CacheTemplate) {
            for id in &target.nodes {
                wrap_node(&mut graph, id, self.preserve_stochasticity, |op| {
                    Arc::new(MemoizedOperator::new(op))
                });
            }
        }

        // Parser outputs are keyed by the model's textual output: the
        // parser map's input key, which downstream of an LLM leaf is its
        // out_key.
        for target in analysis.targets_of(TargetKind::CacheParser) {
            for id in &target.nodes {
                let key = roles
                    .parsing
                    .iter()
                    .find(|(pid, _)| pid == id)
                    .and_then(|(_, in_key)| in_key.clone());
                wrap_node(&mut graph, id, self.preserve_stochasticity, |op| {
                    let memo = MemoizedOperator::new(op);
                    Arc::new(match key {
                        Some(field) => memo.keyed_on(field),
                        None => memo,
                    })
                });
            }
        }

        // The model calls themselves stay un-memoized: stochastic leaves
        // are re-executed on every invocation. Batching, when planned, is
        // driven at call time by a BatchController; no graph change.
        if analysis.targets_of(TargetKind::BatchLlm).count() > 0 {
            tracing::debug!(operator = %operator.id(), "batch plan recorded for batch-capable provider");
        }
        Ok(graph)
    }
}

/// Adaptive batch sizing for batch-capable providers.
///
/// Starts at 1, doubles on sustained throughput gains and halves when a
/// batch's latency spikes beyond 1.5× the rolling median.
#[derive(Debug)]
pub struct BatchController {
    size: usize,
    latencies: VecDeque<f64>,
    throughputs: VecDeque<f64>,
}

impl BatchController {
    /// Create a controller starting at batch size 1.
    pub fn new() -> Self {
        Self {
            size: 1,
            latencies: VecDeque::with_capacity(8),
            throughputs: VecDeque::with_capacity(8),
        }
    }

    /// Current batch size.
    pub fn size(&self) -> usize {
        self.size
    }

    fn median_latency(&self) -> Option<f64> {
        if self.latencies.is_empty() {
            return None;
        }
        let mut sorted: Vec<f64> = self.latencies.iter().copied().collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).expect("finite latencies"));
        Some(sorted[sorted.len() / 2])
    }

    /// Record one completed batch and adapt the size.
    pub fn record(&mut self, items: usize, latency_ms: f64) {
        let throughput = if latency_ms > 0.0 {
            items as f64 / latency_ms
        } else {
            items as f64
        };

        let spiked = self
            .median_latency()
            .map(|median| latency_ms > TAIL_LATENCY_FACTOR * median)
            .unwrap_or(false);

        if self.latencies.len() == 8 {
            self.latencies.pop_front();
            self.throughputs.pop_front();
        }
        self.latencies.push_back(latency_ms);
        self.throughputs.push_back(throughput);

        if spiked {
            self.size = (self.size / 2).max(1);
            tracing::debug!(size = self.size, latency_ms, "batch size halved on tail-latency spike");
            return;
        }

        // Sustained gain: the last three throughput samples strictly
        // increasing.
        let n = self.throughputs.len();
        if n >= 3 {
            let a = self.throughputs[n - 3];
            let b = self.throughputs[n - 2];
            let c = self.throughputs[n - 1];
            if a < b && b < c {
                self.size = (self.size * 2).min(MAX_BATCH_SIZE);
                tracing::debug!(size = self.size, "batch size doubled on sustained throughput gain");
            }
        }
    }
}

impl Default for BatchController {
    fn default() -> Self {
        Self::new()
    }
}
