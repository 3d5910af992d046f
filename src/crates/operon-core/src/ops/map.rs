//! Pure single-function transform operator.

use crate::error::{CoreError, Result};
use crate::operator::{Operator, Structure, StructureKind};
use crate::record::{merge, Record};
use crate::specification::Specification;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Transform function applied by a [`MapOperator`].
///
/// Receives either the full record (as `Value::Object`) or the value at the
/// configured input key. Must be deterministic for the operator to be
/// eligible for JIT fusion and memoization.
pub type MapFn = Arc<dyn Fn(Value) -> Result<Value> + Send + Sync>;

/// Applies a pure function to a record or to one of its fields.
///
/// Routing is controlled by two optional keys:
///
/// - `in_key` absent: the function receives the whole record as an object.
/// - `in_key` set: the function receives `inputs[in_key]`.
/// - `out_key` set: the result is written at `out_key`.
/// - `out_key` absent: the result must be an object and is merged
///   right-biased into the record.
///
/// # Examples
///
/// ```rust
/// use operon_core::ops::map;
/// use operon_core::operator::Operator;
/// use operon_core::record::record_from;
/// use serde_json::json;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let add_one = map("add_one", |v| Ok(json!(v.as_i64().unwrap_or(0) + 1)))
///     .on("v")
///     .into_key("a");
///
/// let out = add_one.call(record_from(vec![("v", json!(3))])).await.unwrap();
/// assert_eq!(out["a"], json!(4));
/// # }
/// ```
pub struct MapOperator {
    id: String,
    f: MapFn,
    in_key: Option<String>,
    out_key: Option<String>,
    spec: Option<Specification>,
}

impl MapOperator {
    /// Create a named map operator over a pure function.
    pub fn new<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Value) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            id: name.into(),
            f: Arc::new(f),
            in_key: None,
            out_key: None,
            spec: None,
        }
    }

    /// Read the function argument from `inputs[key]` instead of the whole
    /// record.
    pub fn on(mut self, key: impl Into<String>) -> Self {
        self.in_key = Some(key.into());
        self
    }

    /// Write the function result at `key` instead of merging it.
    pub fn into_key(mut self, key: impl Into<String>) -> Self {
        self.out_key = Some(key.into());
        self
    }

    /// Attach an input/output specification.
    pub fn with_spec(mut self, spec: Specification) -> Self {
        self.spec = Some(spec);
        self
    }

    /// Input key, when configured.
    pub fn in_key(&self) -> Option<&str> {
        self.in_key.as_deref()
    }

    /// Output key, when configured.
    pub fn out_key(&self) -> Option<&str> {
        self.out_key.as_deref()
    }
}

#[async_trait]
impl Operator for MapOperator {
    fn id(&self) -> &str {
        &self.id
    }

    async fn call(&self, inputs: Record) -> Result<Record> {
        if let Some(spec) = &self.spec {
            spec.validate_input(&inputs)?;
        }

        let argument = match &self.in_key {
            Some(key) => inputs.get(key).cloned().ok_or_else(|| {
                CoreError::Validation(format!("map '{}': missing input key '{}'", self.id, key))
            })?,
            None => Value::Object(inputs.clone()),
        };

        let result = (self.f)(argument)?;

        match &self.out_key {
            Some(key) => {
                let mut outputs = inputs;
                outputs.insert(key.clone(), result);
                Ok(outputs)
            }
            None => match result {
                Value::Object(produced) => Ok(merge(inputs, produced)),
                other => Err(CoreError::Validation(format!(
                    "map '{}' without an output key must return an object, got {}",
                    self.id,
                    type_name(&other)
                ))),
            },
        }
    }

    fn structure(&self) -> Structure {
        Structure::leaf(StructureKind::Map, self.id.clone(), false)
            .with_keys(self.in_key.clone(), self.out_key.clone())
    }

    fn specification(&self) -> Option<&Specification> {
        self.spec.as_ref()
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Convenience constructor, mirroring [`sequence`](crate::ops::sequence) and
/// [`parallel`](crate::ops::parallel).
pub fn map<F>(name: impl Into<String>, f: F) -> MapOperator
where
    F: Fn(Value) -> Result<Value> + Send + Sync + 'static,
{
    MapOperator::new(name, f)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::record_from;
    use serde_json::json;

    #[tokio::test]
    async fn test_keyed_map_preserves_input() {
        let uppercase = map("up", |v| {
            Ok(json!(v.as_str().unwrap_or_default().to_uppercase()))
        })
        .on("text")
        .into_key("UP");

        let out = uppercase
            .call(record_from(vec![("text", json!("hi"))]))
            .await
            .unwrap();
        assert_eq!(out["text"], json!("hi"));
        assert_eq!(out["UP"], json!("HI"));
    }

    #[tokio::test]
    async fn test_whole_record_map_merges_object_result() {
        let tag = map("tag", |v| {
            let count = v.as_object().map(|o| o.len()).unwrap_or(0);
            Ok(json!({"keys": count}))
        });

        let out = tag
            .call(record_from(vec![("a", json!(1)), ("b", json!(2))]))
            .await
            .unwrap();
        assert_eq!(out["keys"], json!(2));
        assert_eq!(out["a"], json!(1));
    }

    #[tokio::test]
    async fn test_missing_in_key_is_validation_error() {
        let add = map("add", |v| Ok(json!(v.as_i64().unwrap_or(0) + 1))).on("v");
        let err = add.call(Record::new()).await.unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[tokio::test]
    async fn test_scalar_result_without_out_key_is_rejected() {
        let bad = map("bad", |_| Ok(json!(42)));
        let err = bad.call(Record::new()).await.unwrap_err();
        assert!(format!("{}", err).contains("must return an object"));
    }
}
