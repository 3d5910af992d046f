//! The operator abstraction
//!
//! An [`Operator`] is the uniform composition unit of the framework: an async
//! callable from [`Record`] to [`Record`] with a stable identity, an optional
//! structure descriptor exposing its composition, and a stochasticity flag.
//!
//! # Call contract
//!
//! `call` receives the full input record and returns the full output record:
//! the input merged right-biased with whatever keys the operator produced.
//! An operator must be referentially transparent with respect to its inputs
//! unless it reports `is_stochastic() == true`; the JIT treats stochastic
//! operators as memoization barriers.
//!
//! # Structure descriptors
//!
//! Combinators expose their composition through [`Structure`], a tree of
//! kind-tagged nodes carrying the child operators as payloads. The JIT's
//! structural analysis walks this tree without executing anything. Operators
//! that do not override [`Operator::structure`] are opaque to analysis and
//! are scheduled as-is.
//!
//! # Examples
//!
//! ```rust
//! use operon_core::ops::MapOperator;
//! use operon_core::operator::Operator;
//! use operon_core::record::record_from;
//! use serde_json::{json, Value};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let uppercase = MapOperator::new("uppercase", |value: Value| {
//!     Ok(json!(value.as_str().unwrap_or_default().to_uppercase()))
//! })
//! .on("text")
//! .into_key("UP");
//!
//! let out = uppercase.call(record_from(vec![("text", json!("hi"))])).await.unwrap();
//! assert_eq!(out["UP"], json!("HI"));
//! assert_eq!(out["text"], json!("hi"));
//! # }
//! ```

use crate::error::Result;
use crate::record::Record;
use crate::specification::Specification;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Shared handle to any operator.
pub type OperatorRef = Arc<dyn Operator>;

/// A callable from record to record, the composition unit.
#[async_trait]
pub trait Operator: Send + Sync {
    /// Stable identity of this operator instance, used for caching.
    ///
    /// User-named operators return their name; anonymous ones carry a
    /// generated `kind-<uuid>` id that is stable for the instance lifetime.
    fn id(&self) -> &str;

    /// Human-readable name for logging. Defaults to the id.
    fn name(&self) -> &str {
        self.id()
    }

    /// Execute the operator against an input record.
    async fn call(&self, inputs: Record) -> Result<Record>;

    /// Composition descriptor, enabling JIT structural analysis.
    ///
    /// Defaults to an opaque leaf; combinators override this to expose
    /// their children.
    fn structure(&self) -> Structure {
        Structure::leaf(StructureKind::Opaque, self.id(), self.is_stochastic())
    }

    /// Whether outputs may differ across calls with identical inputs.
    ///
    /// Stochastic operators are never memoized, cached or collapsed by the
    /// JIT.
    fn is_stochastic(&self) -> bool {
        false
    }

    /// Optional declared input/output contract.
    fn specification(&self) -> Option<&Specification> {
        None
    }

    /// Keys whose *values* (not just types) participate in JIT fingerprints.
    ///
    /// Empty for almost every operator; content-aware operators opt in.
    fn content_keys(&self) -> &[String] {
        &[]
    }
}

/// Composition kind of a structure node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StructureKind {
    /// Sequential fold over children.
    Sequence,
    /// Concurrent fan-out over children.
    Parallel,
    /// Pure single-function transform.
    Map,
    /// Language-model invocation leaf.
    Llm,
    /// Operator with no exposed composition.
    Opaque,
}

impl fmt::Display for StructureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            StructureKind::Sequence => "seq",
            StructureKind::Parallel => "par",
            StructureKind::Map => "map",
            StructureKind::Llm => "llm",
            StructureKind::Opaque => "op",
        };
        write!(f, "{}", label)
    }
}

/// One node of a composition tree.
///
/// Child nodes carry the described operator as `payload` so analysis can
/// reach the callable without downcasting; the root node's payload is the
/// operator the descriptor was requested from and is filled in by the
/// caller that holds its `Arc`.
#[derive(Clone)]
pub struct Structure {
    /// Composition kind.
    pub kind: StructureKind,
    /// Identity of the described operator.
    pub id: String,
    /// Whether the described operator is stochastic.
    pub stochastic: bool,
    /// Input key for Map/Llm leaves.
    pub in_key: Option<String>,
    /// Output key for Map/Llm leaves.
    pub out_key: Option<String>,
    /// Child descriptors, in composition order.
    pub children: Vec<Structure>,
    /// The described operator, when reachable.
    pub payload: Option<OperatorRef>,
    /// For LLM leaves: whether the resolved provider exposes batch
    /// semantics for the target model.
    pub batchable: bool,
}

impl Structure {
    /// Leaf descriptor with no children.
    pub fn leaf(kind: StructureKind, id: impl Into<String>, stochastic: bool) -> Self {
        Self {
            kind,
            id: id.into(),
            stochastic,
            in_key: None,
            out_key: None,
            children: Vec::new(),
            payload: None,
            batchable: false,
        }
    }

    /// Interior descriptor with children.
    pub fn node(kind: StructureKind, id: impl Into<String>, children: Vec<Structure>) -> Self {
        let stochastic = children.iter().any(|c| c.stochastic);
        Self {
            kind,
            id: id.into(),
            stochastic,
            in_key: None,
            out_key: None,
            children,
            payload: None,
            batchable: false,
        }
    }

    /// Attach the described operator.
    pub fn with_payload(mut self, payload: OperatorRef) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Attach leaf key routing.
    pub fn with_keys(mut self, in_key: Option<String>, out_key: Option<String>) -> Self {
        self.in_key = in_key;
        self.out_key = out_key;
        self
    }

    /// Mark an LLM leaf as batch-capable.
    pub fn with_batchable(mut self, batchable: bool) -> Self {
        self.batchable = batchable;
        self
    }

    /// Depth of the composition tree (a leaf has depth 1).
    pub fn depth(&self) -> usize {
        1 + self
            .children
            .iter()
            .map(Structure::depth)
            .max()
            .unwrap_or(0)
    }

    /// Total node count of the tree.
    pub fn size(&self) -> usize {
        1 + self.children.iter().map(Structure::size).sum::<usize>()
    }

    /// Count nodes of a given kind anywhere in the tree.
    pub fn count_kind(&self, kind: StructureKind) -> usize {
        let own = usize::from(self.kind == kind);
        own + self
            .children
            .iter()
            .map(|c| c.count_kind(kind))
            .sum::<usize>()
    }

    /// Whether any node in the tree is stochastic.
    pub fn contains_stochastic(&self) -> bool {
        self.stochastic || self.children.iter().any(Structure::contains_stochastic)
    }

    /// Whether any node in the tree is an LLM leaf.
    pub fn contains_llm(&self) -> bool {
        self.kind == StructureKind::Llm || self.children.iter().any(Structure::contains_llm)
    }

    /// Deterministic textual signature of the tree.
    ///
    /// Covers kinds, ids, leaf key routing and the stochastic flag: never
    /// input content. This is the `operator_structure_signature` component
    /// of the JIT fingerprint.
    pub fn signature(&self) -> String {
        let keys = match (&self.in_key, &self.out_key) {
            (None, None) => String::new(),
            (in_key, out_key) => format!(
                "[{}>{}]",
                in_key.as_deref().unwrap_or("*"),
                out_key.as_deref().unwrap_or("*")
            ),
        };
        let stoch = if self.stochastic { "!" } else { "" };
        if self.children.is_empty() {
            format!("{}:{}{}{}", self.kind, self.id, keys, stoch)
        } else {
            let inner: Vec<String> = self.children.iter().map(Structure::signature).collect();
            format!("{}:{}{}({})", self.kind, self.id, stoch, inner.join(","))
        }
    }
}

impl fmt::Debug for Structure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Structure")
            .field("kind", &self.kind)
            .field("id", &self.id)
            .field("stochastic", &self.stochastic)
            .field("children", &self.children.len())
            .finish()
    }
}

/// Generate a `kind-<uuid>` id for an anonymous operator.
pub(crate) fn generated_id(kind: &str) -> String {
    format!("{}-{}", kind, uuid::Uuid::new_v4())
}
