//! # operon-core: Operator graphs for LLM applications
//!
//! Computation is modeled as a directed acyclic graph of typed operators:
//! pure transforms and language-model calls composed with a small set of
//! combinators, executed by a family of interchangeable schedulers.
//!
//! ## Core Concepts
//!
//! ### 1. Operators and Combinators
//!
//! An [`Operator`](operator::Operator) maps a [`Record`](record::Record)
//! (string-keyed JSON map) to a record. Four built-in kinds compose:
//!
//! - [`map`](ops::map): pure single-function transform
//! - [`sequence`](ops::sequence): sequential fold
//! - [`parallel`](ops::parallel): concurrent fan-out with conflict checks
//! - [`LlmOperator`](ops::LlmOperator): language-model leaf, stochastic by
//!   default
//!
//! Operators expose their composition through
//! [`Structure`](operator::Structure) descriptors, which is what lets the
//! JIT layer (the `operon-jit` crate) rewrite subtrees without executing
//! them.
//!
//! ### 2. Graphs and Schedulers
//!
//! A [`Graph`](graph::Graph) routes data between named operators with typed
//! field edges; an [`ExecutionGraph`](execution_graph::ExecutionGraph) is
//! the kind-tagged form schedulers run. Sequential, topological and wave
//! schedulers share one interface and produce identical results on
//! deterministic DAGs.
//!
//! ### 3. Provider Contract
//!
//! Model calls go through the [`llm::Provider`] trait and
//! [`llm::ProviderRegistry`]; concrete HTTP clients live outside this
//! crate. The registry carries stacked generation defaults with scoped,
//! panic-safe overrides ([`llm::ConfigStack`]).
//!
//! ## Quick Start
//!
//! ```rust
//! use operon_core::ops::{map, sequence};
//! use operon_core::operator::Operator;
//! use operon_core::record::record_from;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let pipeline = sequence(vec![
//!     Arc::new(map("inc", |v| Ok(json!(v.as_i64().unwrap() + 1))).on("v").into_key("a")),
//!     Arc::new(map("dbl", |v| Ok(json!(v.as_i64().unwrap() * 2))).on("a").into_key("b")),
//! ]);
//!
//! let out = pipeline.call(record_from(vec![("v", json!(3))])).await.unwrap();
//! assert_eq!(out["b"], json!(8));
//! # }
//! ```

pub mod error;
pub mod execution_graph;
pub mod graph;
pub mod llm;
pub mod operator;
pub mod ops;
pub mod record;
pub mod retry;
pub mod scheduler;
pub mod specification;

pub use error::{CoreError, Result};
pub use execution_graph::{ExecutionGraph, ExecutionNode, NodeKind, NodePayload};
pub use graph::{EdgeSpec, Graph, NodeId, INPUT, OUTPUT};
pub use operator::{Operator, OperatorRef, Structure, StructureKind};
pub use record::Record;
pub use scheduler::{Scheduler, SchedulerOptions};
pub use specification::Specification;
