//! User-defined operators with no exposed composition.

use crate::error::Result;
use crate::operator::{Operator, Structure, StructureKind};
use crate::record::Record;
use crate::specification::Specification;
use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Async executor function wrapped by an [`OpaqueOperator`].
pub type OpaqueFn =
    Arc<dyn Fn(Record) -> Pin<Box<dyn Future<Output = Result<Record>> + Send>> + Send + Sync>;

/// Wraps an arbitrary async function as an operator.
///
/// Opaque operators are scheduled as-is: the JIT cannot see inside them, so
/// they are never fused or rewritten. Mark them stochastic when outputs may
/// differ across calls with identical inputs: the default assumes a pure
/// function, and a mislabeled operator can be memoized incorrectly.
///
/// # Examples
///
/// ```rust
/// use operon_core::ops::opaque;
/// use operon_core::operator::Operator;
/// use operon_core::record::Record;
/// use serde_json::json;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let stamp = opaque("stamp", |mut record: Record| {
///     Box::pin(async move {
///         record.insert("stamped".to_string(), json!(true));
///         Ok(record)
///     })
/// });
///
/// let out = stamp.call(Record::new()).await.unwrap();
/// assert_eq!(out["stamped"], json!(true));
/// # }
/// ```
pub struct OpaqueOperator {
    id: String,
    f: OpaqueFn,
    stochastic: bool,
    spec: Option<Specification>,
    content_keys: Vec<String>,
}

impl OpaqueOperator {
    /// Wrap an async function as a named operator.
    pub fn new<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Record) -> Pin<Box<dyn Future<Output = Result<Record>> + Send>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            id: name.into(),
            f: Arc::new(f),
            stochastic: false,
            spec: None,
            content_keys: Vec::new(),
        }
    }

    /// Mark the operator stochastic (a JIT memoization barrier).
    pub fn stochastic(mut self) -> Self {
        self.stochastic = true;
        self
    }

    /// Attach an input/output specification.
    pub fn with_spec(mut self, spec: Specification) -> Self {
        self.spec = Some(spec);
        self
    }

    /// Declare keys whose values participate in JIT fingerprints.
    pub fn with_content_keys(mut self, keys: Vec<String>) -> Self {
        self.content_keys = keys;
        self
    }
}

#[async_trait]
impl Operator for OpaqueOperator {
    fn id(&self) -> &str {
        &self.id
    }

    async fn call(&self, inputs: Record) -> Result<Record> {
        if let Some(spec) = &self.spec {
            spec.validate_input(&inputs)?;
        }
        (self.f)(inputs).await
    }

    fn structure(&self) -> Structure {
        Structure::leaf(StructureKind::Opaque, self.id.clone(), self.stochastic)
    }

    fn is_stochastic(&self) -> bool {
        self.stochastic
    }

    fn specification(&self) -> Option<&Specification> {
        self.spec.as_ref()
    }

    fn content_keys(&self) -> &[String] {
        &self.content_keys
    }
}

/// Wrap an async function as an operator.
pub fn opaque<F>(name: impl Into<String>, f: F) -> OpaqueOperator
where
    F: Fn(Record) -> Pin<Box<dyn Future<Output = Result<Record>> + Send>> + Send + Sync + 'static,
{
    OpaqueOperator::new(name, f)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_opaque_runs_wrapped_function() {
        let double = opaque("double", |mut record: Record| {
            Box::pin(async move {
                let v = record.get("v").and_then(|v| v.as_i64()).unwrap_or(0);
                record.insert("v".to_string(), json!(v * 2));
                Ok(record)
            })
        });

        let mut inputs = Record::new();
        inputs.insert("v".to_string(), json!(21));
        let out = double.call(inputs).await.unwrap();
        assert_eq!(out["v"], json!(42));
    }

    #[test]
    fn test_stochastic_flag_shows_in_structure() {
        let leaf = opaque("rng", |r: Record| Box::pin(async move { Ok(r) })).stochastic();
        assert!(leaf.is_stochastic());
        assert!(leaf.structure().stochastic);
        assert_eq!(leaf.structure().kind, StructureKind::Opaque);
    }
}
