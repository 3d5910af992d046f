//! Provider registry.

use super::config::{ConfigStack, GenerationConfig};
use super::error::{LlmError, LlmResult};
use super::provider::{ModelId, Provider};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Explicit registry of model providers plus the stacked default
/// generation configuration.
///
/// Created at process init and shared via `Arc`; providers are registered
/// once at startup, after which the registry is effectively read-only.
/// There is deliberately no process-wide singleton: operators hold the
/// `Arc` they were built with.
///
/// Resolution maps the provider half of a model id to a registered
/// provider; a bare model name is first resolved against every provider's
/// `supported_models` before the `openai:` default applies.
pub struct ProviderRegistry {
    providers: RwLock<HashMap<String, Arc<dyn Provider>>>,
    defaults: ConfigStack,
}

impl ProviderRegistry {
    /// Create an empty registry with base generation defaults.
    pub fn new() -> Self {
        Self {
            providers: RwLock::new(HashMap::new()),
            defaults: ConfigStack::default(),
        }
    }

    /// Create a registry with custom base generation defaults.
    pub fn with_defaults(base: GenerationConfig) -> Self {
        Self {
            providers: RwLock::new(HashMap::new()),
            defaults: ConfigStack::new(base),
        }
    }

    /// Register a provider under its own name. Startup-time operation;
    /// re-registering a name replaces the previous provider.
    pub fn register(&self, provider: Arc<dyn Provider>) {
        let name = provider.name().to_string();
        tracing::debug!(provider = %name, "registering model provider");
        self.providers.write().insert(name, provider);
    }

    /// Resolve the provider for a model id.
    pub fn resolve(&self, model: &ModelId) -> LlmResult<Arc<dyn Provider>> {
        let providers = self.providers.read();
        if let Some(provider) = providers.get(&model.provider) {
            return Ok(provider.clone());
        }
        // A bare name parsed to the default provider may still be claimed
        // by another registered provider.
        for provider in providers.values() {
            if provider.supported_models().iter().any(|m| m == &model.model) {
                return Ok(provider.clone());
            }
        }
        Err(LlmError::ModelNotFound(model.to_string()))
    }

    /// Generate a completion for a raw model id string.
    pub async fn generate(
        &self,
        model_id: &str,
        prompt: &str,
        config: &GenerationConfig,
    ) -> LlmResult<String> {
        let model = ModelId::parse(model_id);
        let provider = self.resolve(&model)?;
        let effective = self.defaults.current().overlay(config);
        provider.generate(&model.model, prompt, &effective).await
    }

    /// The stacked default configuration.
    pub fn defaults(&self) -> &ConfigStack {
        &self.defaults
    }

    /// Names of registered providers.
    pub fn provider_names(&self) -> Vec<String> {
        self.providers.read().keys().cloned().collect()
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}
