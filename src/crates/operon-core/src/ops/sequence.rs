//! Sequential composition of operators.

use crate::error::{CoreError, Result};
use crate::operator::{generated_id, Operator, OperatorRef, Structure, StructureKind};
use crate::record::{merge, Record};
use crate::specification::Specification;
use async_trait::async_trait;

/// Runs children one after another, folding each output into the record.
///
/// `call` folds `r <- merge(r, child.call(r))`: every key of the incoming
/// record survives, keys a child produced overwrite. The first failing child
/// aborts the fold with a [`CoreError::Child`] carrying the operator path.
///
/// # Examples
///
/// ```rust
/// use operon_core::ops::{map, sequence};
/// use operon_core::operator::Operator;
/// use operon_core::record::record_from;
/// use serde_json::json;
/// use std::sync::Arc;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let pipeline = sequence(vec![
///     Arc::new(map("inc", |v| Ok(json!(v.as_i64().unwrap() + 1))).on("v").into_key("a")),
///     Arc::new(map("dbl", |v| Ok(json!(v.as_i64().unwrap() * 2))).on("a").into_key("b")),
/// ]);
///
/// let out = pipeline.call(record_from(vec![("v", json!(3))])).await.unwrap();
/// assert_eq!(out["v"], json!(3));
/// assert_eq!(out["a"], json!(4));
/// assert_eq!(out["b"], json!(8));
/// # }
/// ```
pub struct SequenceOperator {
    id: String,
    children: Vec<OperatorRef>,
    spec: Option<Specification>,
}

impl SequenceOperator {
    /// Create an anonymous sequence over children.
    pub fn new(children: Vec<OperatorRef>) -> Self {
        Self {
            id: generated_id("seq"),
            children,
            spec: None,
        }
    }

    /// Create a named sequence over children.
    pub fn named(name: impl Into<String>, children: Vec<OperatorRef>) -> Self {
        Self {
            id: name.into(),
            children,
            spec: None,
        }
    }

    /// Attach an input/output specification.
    pub fn with_spec(mut self, spec: Specification) -> Self {
        self.spec = Some(spec);
        self
    }

    /// Children in execution order.
    pub fn children(&self) -> &[OperatorRef] {
        &self.children
    }
}

#[async_trait]
impl Operator for SequenceOperator {
    fn id(&self) -> &str {
        &self.id
    }

    async fn call(&self, inputs: Record) -> Result<Record> {
        if let Some(spec) = &self.spec {
            spec.validate_input(&inputs)?;
        }

        let mut record = inputs;
        for child in &self.children {
            let output = child
                .call(record.clone())
                .await
                .map_err(|e| CoreError::child(child.name(), e))?;
            record = merge(record, output);
        }
        Ok(record)
    }

    fn structure(&self) -> Structure {
        let children = self
            .children
            .iter()
            .map(|c| c.structure().with_payload(c.clone()))
            .collect();
        Structure::node(StructureKind::Sequence, self.id.clone(), children)
    }

    fn is_stochastic(&self) -> bool {
        self.children.iter().any(|c| c.is_stochastic())
    }

    fn specification(&self) -> Option<&Specification> {
        self.spec.as_ref()
    }
}

/// Compose operators sequentially.
pub fn sequence(children: Vec<OperatorRef>) -> SequenceOperator {
    SequenceOperator::new(children)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::map;
    use crate::record::record_from;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_fold_accumulates_keys() {
        let pipeline = sequence(vec![
            Arc::new(
                map("inc", |v| Ok(json!(v.as_i64().unwrap() + 1)))
                    .on("v")
                    .into_key("a"),
            ),
            Arc::new(
                map("dbl", |v| Ok(json!(v.as_i64().unwrap() * 2)))
                    .on("a")
                    .into_key("b"),
            ),
        ]);

        let out = pipeline
            .call(record_from(vec![("v", json!(3))]))
            .await
            .unwrap();
        assert_eq!(out["v"], json!(3));
        assert_eq!(out["a"], json!(4));
        assert_eq!(out["b"], json!(8));
    }

    #[tokio::test]
    async fn test_first_failure_aborts_with_path() {
        let pipeline = sequence(vec![
            Arc::new(map("ok", |v| Ok(v))),
            Arc::new(map("boom", |_| {
                Err(CoreError::Validation("broken".to_string()))
            })),
            Arc::new(map("never", |v| Ok(v))),
        ]);

        let err = pipeline.call(Record::new()).await.unwrap_err();
        match err {
            CoreError::Child { path, source } => {
                assert_eq!(path, vec!["boom".to_string()]);
                assert!(matches!(*source, CoreError::Validation(_)));
            }
            other => panic!("expected Child, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_structure_exposes_children_in_order() {
        let pipeline = SequenceOperator::named(
            "pipe",
            vec![Arc::new(map("a", Ok)), Arc::new(map("b", Ok))],
        );
        let structure = pipeline.structure();
        assert_eq!(structure.children.len(), 2);
        assert_eq!(structure.children[0].id, "a");
        assert_eq!(structure.children[1].id, "b");
        assert!(structure.children[0].payload.is_some());
    }
}
