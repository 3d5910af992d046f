//! Structural strategy: composition-tree analysis without execution.

use crate::analysis::{Analysis, OptTarget, TargetKind};
use crate::rewrite::{fuse_adjacent_functions, mirror, vectorizable};
use crate::strategy::Strategy;
use async_trait::async_trait;
use operon_core::error::Result;
use operon_core::operator::{OperatorRef, Structure, StructureKind};
use operon_core::record::Record;
use operon_core::ExecutionGraph;

/// Walks `structure()` recursively and mirrors the composition tree into an
/// execution graph: sequences become chains, eligible parallels become
/// fan-out/fan-in, maps become function nodes, LLM leaves stay opaque
/// barriers.
///
/// Detected opportunities: adjacent map pairs (function fusion) and pure
/// parallel-of-map blocks (vectorization). The score grows with tree depth,
/// parallel breadth and the number of fusible adjacencies.
pub struct StructuralStrategy {
    /// Expand nested combinators, not just the top level.
    pub recursive: bool,
}

impl StructuralStrategy {
    /// Create the strategy.
    pub fn new(recursive: bool) -> Self {
        Self { recursive }
    }
}

struct Metrics {
    depth: usize,
    breadth: usize,
    fusible: Vec<(String, String)>,
    vectorized: Vec<Vec<String>>,
}

fn survey(structure: &Structure, metrics: &mut Metrics) {
    if structure.kind == StructureKind::Parallel {
        metrics.breadth = metrics.breadth.max(structure.children.len());
        if vectorizable(structure) {
            metrics
                .vectorized
                .push(structure.children.iter().map(|c| c.id.clone()).collect());
        }
    }
    if structure.kind == StructureKind::Sequence {
        for pair in structure.children.windows(2) {
            if pair[0].kind == StructureKind::Map && pair[1].kind == StructureKind::Map {
                metrics.fusible.push((pair[0].id.clone(), pair[1].id.clone()));
            }
        }
    }
    for child in &structure.children {
        survey(child, metrics);
    }
}

#[async_trait]
impl Strategy for StructuralStrategy {
    fn name(&self) -> &str {
        "structural"
    }

    async fn analyze(&self, operator: &OperatorRef, _inputs: &Record) -> Result<Analysis> {
        let structure = operator.structure().with_payload(operator.clone());
        let mut metrics = Metrics {
            depth: structure.depth(),
            breadth: 0,
            fusible: Vec::new(),
            vectorized: Vec::new(),
        };
        survey(&structure, &mut metrics);

        let score = if structure.size() == 1 {
            // A lone leaf has no structure to exploit.
            5.0
        } else {
            8.0 * metrics.depth as f64
                + 8.0 * metrics.breadth as f64
                + 15.0 * metrics.fusible.len() as f64
                + 12.0 * metrics.vectorized.len() as f64
        };

        let mut targets = Vec::new();
        for (a, b) in &metrics.fusible {
            targets.push(OptTarget::new(
                TargetKind::FuseFunctions,
                vec![a.clone(), b.clone()],
            ));
        }
        for branches in &metrics.vectorized {
            targets.push(OptTarget::new(TargetKind::Vectorize, branches.clone()));
        }

        let rationale = format!(
            "depth {}, parallel breadth {}, {} fusible adjacencies, {} vectorizable blocks",
            metrics.depth,
            metrics.breadth,
            metrics.fusible.len(),
            metrics.vectorized.len()
        );
        tracing::debug!(operator = %operator.id(), score, %rationale, "structural analysis");
        Ok(Analysis::new(score, rationale, targets))
    }

    async fn compile(
        &self,
        operator: &OperatorRef,
        _inputs: &Record,
        analysis: &Analysis,
    ) -> Result<ExecutionGraph> {
        let graph = mirror(operator, self.recursive)?;
        if analysis.targets_of(TargetKind::FuseFunctions).count() > 0 {
            Ok(fuse_adjacent_functions(&graph))
        } else {
            Ok(graph)
        }
    }
}
