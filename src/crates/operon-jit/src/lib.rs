//! # operon-jit: JIT optimization for operator graphs
//!
//! Rewrites an operator subtree into an optimized execution graph while
//! preserving observable semantics, behind a fingerprint-keyed artifact
//! cache.
//!
//! ## How it works
//!
//! 1. [`jit`] wraps any [`Operator`](operon_core::Operator) in a
//!    [`JitOperator`] with an identical call contract.
//! 2. On each call the operator's structure signature, the input's shape
//!    signature, the selected strategy and the option flags are hashed into
//!    a [`fingerprint`](fingerprint::fingerprint).
//! 3. A cache hit runs the stored [`ExecutionGraph`](operon_core::ExecutionGraph)
//!    through the default scheduler; a miss analyzes, compiles and caches.
//!
//! ## Strategies
//!
//! - [`StructuralStrategy`](strategy::StructuralStrategy): mirrors the
//!   composition tree without executing; fuses adjacent functions,
//!   expands provably-safe parallel blocks.
//! - [`TraceStrategy`](strategy::TraceStrategy): runs once in a tracing
//!   sandbox; memoizes deterministic leaves with repeated inputs, inlines
//!   hot function leaves.
//! - [`LlmStrategy`](strategy::LlmStrategy): caches prompt templating and
//!   result parsing around model calls; the calls themselves are never
//!   memoized.
//! - [`EnhancedStrategy`](strategy::EnhancedStrategy): all three,
//!   failure-isolated, applied in a fixed order.
//!
//! ## Stochasticity preservation
//!
//! With `preserve_stochasticity` on (the default), a subgraph containing a
//! stochastic node is never memoized across invocations: the cache stores
//! only graph shape and stochastic leaves re-execute on every call.
//! Deterministic pre/post-processing around them may still be inlined and
//! reused.
//!
//! ## Quick Start
//!
//! ```rust
//! use operon_core::ops::{map, sequence};
//! use operon_core::operator::Operator;
//! use operon_core::record::record_from;
//! use operon_jit::{jit, JitOptions};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let pipeline = Arc::new(sequence(vec![
//!     Arc::new(map("inc", |v| Ok(json!(v.as_i64().unwrap() + 1))).on("v").into_key("v")),
//!     Arc::new(map("dbl", |v| Ok(json!(v.as_i64().unwrap() * 2))).on("v").into_key("v")),
//!     Arc::new(map("dec", |v| Ok(json!(v.as_i64().unwrap() - 1))).on("v").into_key("v")),
//! ]));
//!
//! let optimized = jit(pipeline, JitOptions::default());
//! let out = optimized.call(record_from(vec![("v", json!(5))])).await.unwrap();
//! assert_eq!(out["v"], json!(2 * (5 + 1) - 1));
//! # }
//! ```

pub mod analysis;
pub mod cache;
pub mod fingerprint;
pub mod jit;
pub mod rewrite;
pub mod strategy;

pub use analysis::{Analysis, OptTarget, TargetKind};
pub use cache::{ArtifactStats, CacheStats, CompiledArtifact, JitCache};
pub use jit::{jit, Jit, JitMode, JitOperator, JitOptions, JitStats, SelectionReport};
pub use strategy::Strategy;
