//! Concurrent fan-out composition of operators.

use crate::error::{CoreError, Result};
use crate::operator::{generated_id, Operator, OperatorRef, Structure, StructureKind};
use crate::record::{produced_keys, Record};
use crate::specification::Specification;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio::task::JoinSet;

/// Resolves a key both branches produced with diverging values.
///
/// Receives the key and the two candidate values (earlier branch first) and
/// returns the value to keep.
pub type MergeResolver = Arc<dyn Fn(&str, &Value, &Value) -> Value + Send + Sync>;

/// Runs all children concurrently against the same input record and merges
/// the keys each branch produced.
///
/// Branch ordering is unspecified during execution; the merge is performed
/// in declaration order so results are stable. Two branches producing the
/// same key with different values raise [`CoreError::Conflict`] unless a
/// [`MergeResolver`] is registered; byte-identical values merge silently.
///
/// The first failing branch aborts the combinator; pending siblings are
/// cancelled best-effort and their results discarded.
pub struct ParallelOperator {
    id: String,
    children: Vec<OperatorRef>,
    resolver: Option<MergeResolver>,
    spec: Option<Specification>,
}

impl ParallelOperator {
    /// Create an anonymous parallel block over children.
    pub fn new(children: Vec<OperatorRef>) -> Self {
        Self {
            id: generated_id("par"),
            children,
            resolver: None,
            spec: None,
        }
    }

    /// Create a named parallel block over children.
    pub fn named(name: impl Into<String>, children: Vec<OperatorRef>) -> Self {
        Self {
            id: name.into(),
            children,
            resolver: None,
            spec: None,
        }
    }

    /// Register a resolver for conflicting branch writes.
    pub fn with_resolver(mut self, resolver: MergeResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Attach an input/output specification.
    pub fn with_spec(mut self, spec: Specification) -> Self {
        self.spec = Some(spec);
        self
    }

    /// Children in declaration order.
    pub fn children(&self) -> &[OperatorRef] {
        &self.children
    }
}

#[async_trait]
impl Operator for ParallelOperator {
    fn id(&self) -> &str {
        &self.id
    }

    async fn call(&self, inputs: Record) -> Result<Record> {
        if let Some(spec) = &self.spec {
            spec.validate_input(&inputs)?;
        }

        let mut set = JoinSet::new();
        for (index, child) in self.children.iter().enumerate() {
            let child = child.clone();
            let branch_inputs = inputs.clone();
            set.spawn(async move { (index, child.call(branch_inputs).await) });
        }

        let mut outputs: Vec<Option<Result<Record>>> = Vec::new();
        outputs.resize_with(self.children.len(), || None);
        let mut failed = false;

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, result)) => {
                    if result.is_err() && !failed {
                        failed = true;
                        // Cancel pending siblings; already-running branches
                        // may still complete but their results are dropped
                        // below.
                        set.abort_all();
                    }
                    outputs[index] = Some(result);
                }
                Err(join_err) if join_err.is_cancelled() => {}
                Err(join_err) => {
                    set.abort_all();
                    return Err(CoreError::child(
                        self.name(),
                        CoreError::Validation(format!("branch task panicked: {}", join_err)),
                    ));
                }
            }
        }

        // Surface the lowest-index failure so the reported error is stable
        // across runs regardless of completion order.
        for (index, slot) in outputs.iter_mut().enumerate() {
            if let Some(Err(_)) = slot {
                let err = match slot.take() {
                    Some(Err(e)) => e,
                    _ => unreachable!(),
                };
                tracing::debug!(
                    operator = %self.id,
                    branch = %self.children[index].name(),
                    "parallel branch failed, siblings cancelled"
                );
                return Err(CoreError::child(self.children[index].name(), err));
            }
        }

        self.merge_branches(inputs, outputs)
    }

    fn structure(&self) -> Structure {
        let children = self
            .children
            .iter()
            .map(|c| c.structure().with_payload(c.clone()))
            .collect();
        Structure::node(StructureKind::Parallel, self.id.clone(), children)
    }

    fn is_stochastic(&self) -> bool {
        self.children.iter().any(|c| c.is_stochastic())
    }

    fn specification(&self) -> Option<&Specification> {
        self.spec.as_ref()
    }
}

impl ParallelOperator {
    fn merge_branches(
        &self,
        inputs: Record,
        outputs: Vec<Option<Result<Record>>>,
    ) -> Result<Record> {
        let mut merged = inputs.clone();
        let mut produced_by: std::collections::HashMap<String, usize> =
            std::collections::HashMap::new();

        for (index, slot) in outputs.into_iter().enumerate() {
            let output = match slot {
                Some(Ok(record)) => record,
                // Cancelled branch with no result; only reachable when a
                // sibling failed, which returned above.
                None => continue,
                Some(Err(_)) => unreachable!("failures surfaced before merge"),
            };

            for key in produced_keys(&inputs, &output) {
                let value = output[&key].clone();
                match produced_by.get(&key) {
                    Some(_) if merged.get(&key) == Some(&value) => {}
                    Some(_) => {
                        let existing = merged[&key].clone();
                        match &self.resolver {
                            Some(resolve) => {
                                merged.insert(key.clone(), resolve(&key, &existing, &value));
                            }
                            None => return Err(CoreError::Conflict { key }),
                        }
                    }
                    None => {
                        produced_by.insert(key.clone(), index);
                        merged.insert(key, value);
                    }
                }
            }
        }

        Ok(merged)
    }
}

/// Compose operators to run concurrently.
pub fn parallel(children: Vec<OperatorRef>) -> ParallelOperator {
    ParallelOperator::new(children)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::{map, opaque};
    use crate::record::record_from;
    use serde_json::json;
    use std::time::{Duration, Instant};

    #[tokio::test]
    async fn test_fan_out_merges_disjoint_keys() {
        let block = parallel(vec![
            Arc::new(
                map("inc", |v| Ok(json!(v.as_i64().unwrap() + 1)))
                    .on("v")
                    .into_key("a"),
            ),
            Arc::new(
                map("dbl", |v| Ok(json!(v.as_i64().unwrap() * 2)))
                    .on("v")
                    .into_key("b"),
            ),
        ]);

        let out = block
            .call(record_from(vec![("v", json!(5))]))
            .await
            .unwrap();
        assert_eq!(out["v"], json!(5));
        assert_eq!(out["a"], json!(6));
        assert_eq!(out["b"], json!(10));
    }

    #[tokio::test]
    async fn test_branches_run_concurrently() {
        let slow = |name: &str, key: &'static str| {
            let name = name.to_string();
            Arc::new(opaque(name, move |mut record: Record| {
                Box::pin(async move {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    record.insert(key.to_string(), json!(true));
                    Ok(record)
                })
            })) as OperatorRef
        };

        let block = parallel(vec![slow("s1", "a"), slow("s2", "b")]);
        let started = Instant::now();
        let out = block.call(Record::new()).await.unwrap();
        let elapsed = started.elapsed();

        assert_eq!(out["a"], json!(true));
        assert_eq!(out["b"], json!(true));
        // Two 100ms branches in parallel finish well under the 200ms a
        // sequential run would take.
        assert!(elapsed < Duration::from_millis(180), "took {:?}", elapsed);
    }

    #[tokio::test]
    async fn test_diverging_writes_conflict() {
        let block = parallel(vec![
            Arc::new(map("one", |_| Ok(json!(1))).into_key("x")),
            Arc::new(map("two", |_| Ok(json!(2))).into_key("x")),
        ]);

        let err = block.call(Record::new()).await.unwrap_err();
        assert!(matches!(err, CoreError::Conflict { key } if key == "x"));
    }

    #[tokio::test]
    async fn test_identical_writes_are_not_conflicts() {
        let block = parallel(vec![
            Arc::new(map("one", |_| Ok(json!(7))).into_key("x")),
            Arc::new(map("two", |_| Ok(json!(7))).into_key("x")),
        ]);

        let out = block.call(Record::new()).await.unwrap();
        assert_eq!(out["x"], json!(7));
    }

    #[tokio::test]
    async fn test_resolver_settles_conflicts() {
        let block = parallel(vec![
            Arc::new(map("one", |_| Ok(json!(1))).into_key("x")),
            Arc::new(map("two", |_| Ok(json!(2))).into_key("x")),
        ])
        .with_resolver(Arc::new(|_key, a, b| {
            json!(a.as_i64().unwrap() + b.as_i64().unwrap())
        }));

        let out = block.call(Record::new()).await.unwrap();
        assert_eq!(out["x"], json!(3));
    }

    #[tokio::test]
    async fn test_branch_failure_cancels_and_reports_path() {
        let block = parallel(vec![
            Arc::new(map("boom", |_| {
                Err(CoreError::Validation("broken".to_string()))
            })),
            Arc::new(opaque("slow", |record: Record| {
                Box::pin(async move {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(record)
                })
            })),
        ]);

        let started = Instant::now();
        let err = block.call(Record::new()).await.unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(1));
        match err {
            CoreError::Child { path, .. } => assert_eq!(path[0], "boom"),
            other => panic!("expected Child, got {:?}", other),
        }
    }
}
