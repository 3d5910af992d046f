//! Language-model provider contract
//!
//! The core treats model calls as opaque effectful leaves: it requires only
//! that a [`Provider`] maps a request to a response or an error. Concrete
//! HTTP clients live outside this crate; [`FnProvider`] wraps a closure for
//! embedding and tests.
//!
//! Model ids follow the `provider:model_name` grammar (`openai:gpt-4o`);
//! bare names default to the `openai` provider.

mod config;
mod error;
mod provider;
mod registry;

pub use config::{ConfigStack, GenerationConfig};
pub use error::{LlmError, LlmResult};
pub use provider::{CompletionRequest, CompletionResponse, FnProvider, ModelId, Provider, Usage};
pub use registry::ProviderRegistry;
