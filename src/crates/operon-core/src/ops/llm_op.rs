//! Language-model invocation leaf operator.

use crate::error::{CoreError, Result};
use crate::llm::{GenerationConfig, ModelId, ProviderRegistry};
use crate::operator::{generated_id, Operator, Structure, StructureKind};
use crate::record::{stringify, Record};
use crate::specification::Specification;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Placeholder substituted into the prompt template.
const TEMPLATE_SLOT: &str = "{input}";

/// Invokes a language model through the provider registry.
///
/// `call` substitutes `{input}` in the template with the stringified value
/// at `in_key`, resolves the model through the registry and stores the
/// response text at `out_key`. Stochastic by default; supplying a
/// generation config with `temperature = 0` and a seed makes the operator
/// deterministic and therefore eligible for JIT memoization.
///
/// # Examples
///
/// ```rust
/// use operon_core::llm::{FnProvider, ProviderRegistry};
/// use operon_core::operator::Operator;
/// use operon_core::ops::LlmOperator;
/// use operon_core::record::record_from;
/// use serde_json::json;
/// use std::sync::Arc;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let registry = Arc::new(ProviderRegistry::new());
/// registry.register(Arc::new(FnProvider::new(
///     "echo",
///     vec!["echo-1".to_string()],
///     |_, prompt, _| Ok(prompt.to_string()),
/// )));
///
/// let summarize = LlmOperator::new("echo:echo-1", "Summarize: {input}", "text", "summary", registry);
/// let out = summarize.call(record_from(vec![("text", json!("hello"))])).await.unwrap();
/// assert_eq!(out["summary"], json!("Summarize: hello"));
/// # }
/// ```
pub struct LlmOperator {
    id: String,
    model: ModelId,
    template: String,
    in_key: String,
    out_key: String,
    registry: Arc<ProviderRegistry>,
    config: GenerationConfig,
    spec: Option<Specification>,
}

impl LlmOperator {
    /// Create an LLM operator for a model id and prompt template.
    pub fn new(
        model_id: &str,
        template: impl Into<String>,
        in_key: impl Into<String>,
        out_key: impl Into<String>,
        registry: Arc<ProviderRegistry>,
    ) -> Self {
        Self {
            id: generated_id("llm"),
            model: ModelId::parse(model_id),
            template: template.into(),
            in_key: in_key.into(),
            out_key: out_key.into(),
            registry,
            config: GenerationConfig::new(),
            spec: None,
        }
    }

    /// Override the generated id with a stable name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.id = name.into();
        self
    }

    /// Set operator-level generation parameters (overlaid on the registry
    /// defaults at call time).
    pub fn with_config(mut self, config: GenerationConfig) -> Self {
        self.config = config;
        self
    }

    /// Attach an input/output specification.
    pub fn with_spec(mut self, spec: Specification) -> Self {
        self.spec = Some(spec);
        self
    }

    /// The target model id.
    pub fn model(&self) -> &ModelId {
        &self.model
    }

    /// Input key read for template substitution.
    pub fn in_key(&self) -> &str {
        &self.in_key
    }

    /// Output key the response text is stored at.
    pub fn out_key(&self) -> &str {
        &self.out_key
    }

    /// Render the prompt for an input value.
    pub fn render_prompt(&self, value: &Value) -> String {
        self.template.replace(TEMPLATE_SLOT, &stringify(value))
    }
}

#[async_trait]
impl Operator for LlmOperator {
    fn id(&self) -> &str {
        &self.id
    }

    async fn call(&self, inputs: Record) -> Result<Record> {
        if let Some(spec) = &self.spec {
            spec.validate_input(&inputs)?;
        }

        let value = inputs.get(&self.in_key).ok_or_else(|| {
            CoreError::Validation(format!(
                "llm '{}': missing input key '{}'",
                self.id, self.in_key
            ))
        })?;
        let prompt = self.render_prompt(value);

        tracing::debug!(
            operator = %self.id,
            model = %self.model,
            prompt_len = prompt.len(),
            "invoking model provider"
        );

        let text = self
            .registry
            .generate(&self.model.to_string(), &prompt, &self.config)
            .await
            .map_err(CoreError::from)?;

        let mut outputs = inputs;
        outputs.insert(self.out_key.clone(), Value::String(text));
        Ok(outputs)
    }

    fn structure(&self) -> Structure {
        let batchable = self
            .registry
            .resolve(&self.model)
            .map(|p| p.supports_batch(&self.model.model))
            .unwrap_or(false);
        Structure::leaf(StructureKind::Llm, self.id.clone(), self.is_stochastic())
            .with_keys(Some(self.in_key.clone()), Some(self.out_key.clone()))
            .with_batchable(batchable)
    }

    fn is_stochastic(&self) -> bool {
        !self.config.is_deterministic()
    }

    fn specification(&self) -> Option<&Specification> {
        self.spec.as_ref()
    }
}

/// Create an LLM operator, mirroring [`map`](crate::ops::map) and
/// [`sequence`](crate::ops::sequence).
pub fn llm(
    model_id: &str,
    template: impl Into<String>,
    in_key: impl Into<String>,
    out_key: impl Into<String>,
    registry: Arc<ProviderRegistry>,
) -> LlmOperator {
    LlmOperator::new(model_id, template, in_key, out_key, registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::FnProvider;
    use crate::record::record_from;
    use serde_json::json;

    fn registry() -> Arc<ProviderRegistry> {
        let registry = Arc::new(ProviderRegistry::new());
        registry.register(Arc::new(FnProvider::new(
            "echo",
            vec!["echo-1".to_string()],
            |_, prompt, _| Ok(prompt.to_string()),
        )));
        registry
    }

    #[tokio::test]
    async fn test_template_substitution_and_output_key() {
        let op = LlmOperator::new("echo:echo-1", "Q: {input}", "question", "answer", registry());
        let out = op
            .call(record_from(vec![("question", json!("why?"))]))
            .await
            .unwrap();
        assert_eq!(out["answer"], json!("Q: why?"));
        assert_eq!(out["question"], json!("why?"));
    }

    #[tokio::test]
    async fn test_non_string_inputs_render_as_json() {
        let op = LlmOperator::new("echo:echo-1", "{input}", "data", "echoed", registry());
        let out = op
            .call(record_from(vec![("data", json!({"n": 1}))]))
            .await
            .unwrap();
        assert_eq!(out["echoed"], json!("{\"n\":1}"));
    }

    #[tokio::test]
    async fn test_missing_input_key_is_validation_error() {
        let op = LlmOperator::new("echo:echo-1", "{input}", "absent", "out", registry());
        let err = op.call(Record::new()).await.unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn test_stochastic_unless_pinned() {
        let default = LlmOperator::new("echo:echo-1", "{input}", "a", "b", registry());
        assert!(default.is_stochastic());

        let pinned = LlmOperator::new("echo:echo-1", "{input}", "a", "b", registry())
            .with_config(GenerationConfig::new().with_temperature(0.0).with_seed(42));
        assert!(!pinned.is_stochastic());
        assert!(!pinned.structure().stochastic);
    }
}
