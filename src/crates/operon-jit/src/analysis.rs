//! Analysis results produced by optimization strategies.

use serde::{Deserialize, Serialize};

/// Kind of rewrite a strategy proposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetKind {
    /// Fuse adjacent deterministic function nodes into one.
    FuseFunctions,
    /// Expand a pure parallel-of-map block into fan-out/fan-in form.
    Vectorize,
    /// Inline a small hot function leaf into its linear neighbor.
    InlineFunction,
    /// Memoize a deterministic leaf observed with repeated inputs.
    MemoizePure,
    /// Cache prompt-templating outputs keyed by substituted inputs.
    CacheTemplate,
    /// Cache parser outputs keyed by the model's textual output.
    CacheParser,
    /// Batch model invocations when the provider supports it.
    BatchLlm,
}

/// One proposed rewrite, addressed by node/operator ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptTarget {
    /// What to do.
    pub kind: TargetKind,
    /// Ids of the affected nodes, in rewrite order.
    pub nodes: Vec<String>,
    /// Strategy that proposed the target (set by the enhanced composite).
    pub origin: Option<String>,
}

impl OptTarget {
    /// Create a target over node ids.
    pub fn new(kind: TargetKind, nodes: Vec<String>) -> Self {
        Self {
            kind,
            nodes,
            origin: None,
        }
    }

    /// Tag the proposing strategy.
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }
}

/// Outcome of a strategy's analysis pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Analysis {
    /// Optimization potential, clamped to `0..=100`.
    pub score: f64,
    /// Human-readable explanation of the score.
    pub rationale: String,
    /// Proposed rewrites.
    pub targets: Vec<OptTarget>,
}

impl Analysis {
    /// Create an analysis with a clamped score.
    pub fn new(score: f64, rationale: impl Into<String>, targets: Vec<OptTarget>) -> Self {
        Self {
            score: score.clamp(0.0, 100.0),
            rationale: rationale.into(),
            targets,
        }
    }

    /// Targets of one kind.
    pub fn targets_of(&self, kind: TargetKind) -> impl Iterator<Item = &OptTarget> {
        self.targets.iter().filter(move |t| t.kind == kind)
    }
}
