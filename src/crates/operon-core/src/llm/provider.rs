//! Provider trait and request/response types.

use super::config::GenerationConfig;
use super::error::{LlmError, LlmResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Default provider for bare model names.
pub const DEFAULT_PROVIDER: &str = "openai";

/// Parsed `provider:model_name` identifier.
///
/// ```rust
/// use operon_core::llm::ModelId;
///
/// let id = ModelId::parse("anthropic:claude-3-5-sonnet");
/// assert_eq!(id.provider, "anthropic");
///
/// // Bare names default to openai.
/// assert_eq!(ModelId::parse("gpt-4o").provider, "openai");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelId {
    /// Provider short name.
    pub provider: String,
    /// Provider-local model name.
    pub model: String,
}

impl ModelId {
    /// Parse a model id, defaulting bare names to [`DEFAULT_PROVIDER`].
    pub fn parse(raw: &str) -> Self {
        match raw.split_once(':') {
            Some((provider, model)) if !provider.is_empty() => Self {
                provider: provider.to_string(),
                model: model.to_string(),
            },
            _ => Self {
                provider: DEFAULT_PROVIDER.to_string(),
                model: raw.to_string(),
            },
        }
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.provider, self.model)
    }
}

/// A completion request passed to `generate_with_model`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Target model id.
    pub model: String,
    /// Prompt text.
    pub prompt: String,
}

impl CompletionRequest {
    /// Create a request for a model and prompt.
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
        }
    }
}

/// Token accounting reported by a provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Tokens consumed by the prompt.
    pub prompt_tokens: u32,
    /// Tokens in the completion.
    pub completion_tokens: u32,
    /// Prompt + completion.
    pub total_tokens: u32,
}

/// A completion response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    /// Model that produced the response.
    pub model: String,
    /// Response text.
    pub text: String,
    /// Token accounting, when the provider reports it.
    pub usage: Option<Usage>,
}

/// Contract every model provider satisfies.
///
/// The core never serializes provider access; implementations are assumed
/// thread-safe. Concrete HTTP clients are out of scope for this crate: they
/// implement this trait from the outside.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider short name (the `provider` half of a model id).
    fn name(&self) -> &str;

    /// Models this provider claims.
    fn supported_models(&self) -> Vec<String>;

    /// Generate a completion for a prompt, returning the text.
    async fn generate(
        &self,
        model: &str,
        prompt: &str,
        config: &GenerationConfig,
    ) -> LlmResult<String>;

    /// Generate a completion for a full request record.
    async fn generate_with_model(
        &self,
        model: &str,
        request: &CompletionRequest,
        config: &GenerationConfig,
    ) -> LlmResult<CompletionResponse> {
        let text = self.generate(model, &request.prompt, config).await?;
        Ok(CompletionResponse {
            model: model.to_string(),
            text,
            usage: None,
        })
    }

    /// Extract token accounting from a response, when available.
    fn extract_usage(&self, _model: &str, response: &CompletionResponse) -> Option<Usage> {
        response.usage
    }

    /// Estimate the cost of a request/response pair in dollars.
    fn calculate_cost(
        &self,
        _model: &str,
        _request: &CompletionRequest,
        _response: &CompletionResponse,
    ) -> f64 {
        0.0
    }

    /// Whether the provider exposes batch semantics for a model.
    ///
    /// The JIT's LLM strategy only plans batching when this is true.
    fn supports_batch(&self, _model: &str) -> bool {
        false
    }
}

type GenerateFn =
    Arc<dyn Fn(&str, &str, &GenerationConfig) -> LlmResult<String> + Send + Sync>;

/// Provider backed by a synchronous closure.
///
/// Stands in for out-of-process providers in tests and embeddings: the
/// closure receives `(model, prompt, config)` and returns the completion
/// text.
///
/// ```rust
/// use operon_core::llm::{FnProvider, GenerationConfig, Provider};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let echo = FnProvider::new("echo", vec!["echo-1".to_string()], |_, prompt, _| {
///     Ok(prompt.to_uppercase())
/// });
///
/// let text = echo.generate("echo-1", "hi", &GenerationConfig::new()).await.unwrap();
/// assert_eq!(text, "HI");
/// # }
/// ```
pub struct FnProvider {
    name: String,
    models: Vec<String>,
    f: GenerateFn,
    batch: bool,
}

impl FnProvider {
    /// Create a closure-backed provider.
    pub fn new<F>(name: impl Into<String>, models: Vec<String>, f: F) -> Self
    where
        F: Fn(&str, &str, &GenerationConfig) -> LlmResult<String> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            models,
            f: Arc::new(f),
            batch: false,
        }
    }

    /// Advertise batch semantics for all models.
    pub fn with_batch_support(mut self) -> Self {
        self.batch = true;
        self
    }
}

#[async_trait]
impl Provider for FnProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn supported_models(&self) -> Vec<String> {
        self.models.clone()
    }

    async fn generate(
        &self,
        model: &str,
        prompt: &str,
        config: &GenerationConfig,
    ) -> LlmResult<String> {
        if !self.models.iter().any(|m| m == model) {
            return Err(LlmError::ModelNotFound(model.to_string()));
        }
        (self.f)(model, prompt, config)
    }

    fn supports_batch(&self, _model: &str) -> bool {
        self.batch
    }
}
