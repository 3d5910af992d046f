//! Generation configuration and scoped overrides.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Model generation parameters.
///
/// Every field is optional; unset fields fall through to the surrounding
/// [`ConfigStack`] level or to the process-wide base. Built with the usual
/// `with_*` chain:
///
/// ```rust
/// use operon_core::llm::GenerationConfig;
///
/// let cfg = GenerationConfig::new()
///     .with_temperature(0.0)
///     .with_seed(42)
///     .with_max_tokens(256);
/// assert_eq!(cfg.temperature, Some(0.0));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Sampling temperature.
    pub temperature: Option<f64>,
    /// Completion token budget.
    pub max_tokens: Option<u32>,
    /// Per-request deadline.
    pub timeout: Option<Duration>,
    /// Nucleus sampling cutoff.
    pub top_p: Option<f64>,
    /// Top-k sampling cutoff.
    pub top_k: Option<u32>,
    /// Sequences that stop generation.
    pub stop_sequences: Option<Vec<String>>,
    /// Sampling seed; with `temperature = 0` makes the call deterministic.
    pub seed: Option<u64>,
}

impl GenerationConfig {
    /// Empty config; every field unset.
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide base defaults.
    pub fn base() -> Self {
        Self {
            temperature: Some(0.7),
            max_tokens: Some(1024),
            timeout: Some(Duration::from_secs(60)),
            top_p: None,
            top_k: None,
            stop_sequences: None,
            seed: None,
        }
    }

    /// Set the sampling temperature.
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set the completion token budget.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Set the per-request deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the nucleus sampling cutoff.
    pub fn with_top_p(mut self, top_p: f64) -> Self {
        self.top_p = Some(top_p);
        self
    }

    /// Set the top-k sampling cutoff.
    pub fn with_top_k(mut self, top_k: u32) -> Self {
        self.top_k = Some(top_k);
        self
    }

    /// Set the stop sequences.
    pub fn with_stop_sequences(mut self, stop: Vec<String>) -> Self {
        self.stop_sequences = Some(stop);
        self
    }

    /// Set the sampling seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Overlay `other` on top of `self`: set fields of `other` win.
    pub fn overlay(&self, other: &GenerationConfig) -> GenerationConfig {
        GenerationConfig {
            temperature: other.temperature.or(self.temperature),
            max_tokens: other.max_tokens.or(self.max_tokens),
            timeout: other.timeout.or(self.timeout),
            top_p: other.top_p.or(self.top_p),
            top_k: other.top_k.or(self.top_k),
            stop_sequences: other
                .stop_sequences
                .clone()
                .or_else(|| self.stop_sequences.clone()),
            seed: other.seed.or(self.seed),
        }
    }

    /// Whether these parameters make a model call deterministic.
    pub fn is_deterministic(&self) -> bool {
        self.temperature == Some(0.0) && self.seed.is_some()
    }
}

/// Stacked configuration overrides with guaranteed restoration.
///
/// `scoped` pushes an overlay, runs the closure and pops on every exit path
///: normal return, `?` early-exit inside the closure's result, or panic:
/// via an RAII guard. Nested scopes compose; `current()` always reflects
/// the innermost active scope.
///
/// ```rust
/// use operon_core::llm::{ConfigStack, GenerationConfig};
///
/// let stack = ConfigStack::new(GenerationConfig::base());
/// let outer = stack.current().temperature;
///
/// stack.scoped(GenerationConfig::new().with_temperature(0.0), || {
///     assert_eq!(stack.current().temperature, Some(0.0));
/// });
///
/// assert_eq!(stack.current().temperature, outer);
/// ```
pub struct ConfigStack {
    levels: Mutex<Vec<GenerationConfig>>,
}

impl ConfigStack {
    /// Create a stack with a base configuration.
    pub fn new(base: GenerationConfig) -> Self {
        Self {
            levels: Mutex::new(vec![base]),
        }
    }

    /// The effective configuration (innermost active scope).
    pub fn current(&self) -> GenerationConfig {
        self.levels
            .lock()
            .last()
            .cloned()
            .unwrap_or_else(GenerationConfig::base)
    }

    /// Run `f` with `overrides` overlaid on the current configuration,
    /// restoring the previous configuration afterwards.
    pub fn scoped<R>(&self, overrides: GenerationConfig, f: impl FnOnce() -> R) -> R {
        let merged = self.current().overlay(&overrides);
        self.levels.lock().push(merged);
        let _guard = PopGuard { stack: self };
        f()
    }
}

impl Default for ConfigStack {
    fn default() -> Self {
        Self::new(GenerationConfig::base())
    }
}

struct PopGuard<'a> {
    stack: &'a ConfigStack,
}

impl Drop for PopGuard<'_> {
    fn drop(&mut self) {
        let mut levels = self.stack.levels.lock();
        // The base level is never popped.
        if levels.len() > 1 {
            levels.pop();
        }
    }
}
