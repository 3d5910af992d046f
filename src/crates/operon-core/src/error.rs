//! Error types and error handling for operator and graph execution
//!
//! All errors implement `std::error::Error` via the `thiserror` crate and are
//! returned as values from `call` at the public API boundary; the core never
//! panics on user input and never retries silently (see [`crate::retry`] for
//! the explicit retry wrapper).
//!
//! # Error Hierarchy
//!
//! ```text
//! CoreError
//! ├── Validation       - inputs fail an operator specification
//! ├── UnknownNode      - graph references a missing node
//! ├── UnknownOperator  - registry lookup for a missing operator/model
//! ├── GraphCycle       - cycle detected at scheduler prepare
//! ├── Child            - failure propagated from a nested operator
//! ├── Timeout          - per-call deadline exceeded
//! ├── Provider         - model provider surfaced a failure
//! ├── Conflict         - parallel branches wrote diverging values
//! ├── Cache            - JIT cache invariant violation (logged, internal)
//! └── Serialization    - JSON conversion failure
//! ```

use thiserror::Error;

/// Convenience result type using [`CoreError`].
pub type Result<T> = std::result::Result<T, CoreError>;

/// Comprehensive error type for operator composition and graph execution.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Inputs failed an operator's declared specification.
    ///
    /// Raised before the operator body runs, e.g. when a required input key
    /// is absent from the record.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A graph operation referenced a node that does not exist.
    ///
    /// `add_edge` checks both endpoints at insertion time.
    #[error("Unknown node '{0}'")]
    UnknownNode(String),

    /// A lookup referenced an operator or model nobody registered.
    #[error("Unknown operator '{0}'")]
    UnknownOperator(String),

    /// The graph contains a cycle.
    ///
    /// Detected by the Kahn pass at scheduler prepare, before any operator
    /// runs. `add_edge` deliberately does not check (cycles spanning many
    /// insertions would be missed anyway).
    #[error("Graph contains a cycle: {0}")]
    GraphCycle(String),

    /// A nested operator failed.
    ///
    /// `path` is the chain of operator names from the combinator that
    /// observed the failure down to the operator that produced it.
    #[error("Operator '{}' failed: {source}", path.join("/"))]
    Child {
        /// Names from the outermost combinator to the failing operator.
        path: Vec<String>,
        /// The underlying failure.
        source: Box<CoreError>,
    },

    /// An operator call exceeded its deadline.
    #[error("Operation timed out after {duration_ms}ms: {operation}")]
    Timeout {
        /// Description of the operation that timed out.
        operation: String,
        /// Deadline in milliseconds.
        duration_ms: u64,
    },

    /// A model provider surfaced a network or API failure.
    #[error("Provider error{}: {message}", status.map(|s| format!(" (status {})", s)).unwrap_or_default())]
    Provider {
        /// HTTP-ish status code when the provider reported one.
        status: Option<u16>,
        /// Provider-supplied failure description.
        message: String,
    },

    /// Parallel branches produced the same output key with diverging values
    /// and no merge resolver was registered.
    #[error("Conflicting writes to key '{key}' from parallel branches")]
    Conflict {
        /// The contested record key.
        key: String,
    },

    /// Internal JIT cache invariant violation.
    ///
    /// Always logged at the point of detection; callers in normal operation
    /// never observe this variant because the JIT falls back to uncompiled
    /// execution.
    #[error("Cache invariant violation: {0}")]
    Cache(String),

    /// JSON serialization/deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CoreError {
    /// Wrap an error as a child failure observed at `name`.
    ///
    /// When the inner error is already a `Child`, the name is prepended to
    /// its path instead of nesting a second layer, so the path reads
    /// outermost-first.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use operon_core::error::CoreError;
    ///
    /// let inner = CoreError::Validation("missing key 'v'".to_string());
    /// let err = CoreError::child("pipeline", CoreError::child("step2", inner));
    /// assert!(format!("{}", err).contains("pipeline/step2"));
    /// ```
    pub fn child(name: impl Into<String>, cause: CoreError) -> Self {
        match cause {
            CoreError::Child { mut path, source } => {
                path.insert(0, name.into());
                CoreError::Child { path, source }
            }
            other => CoreError::Child {
                path: vec![name.into()],
                source: Box::new(other),
            },
        }
    }

    /// Create a provider error without a status code.
    pub fn provider(message: impl Into<String>) -> Self {
        CoreError::Provider {
            status: None,
            message: message.into(),
        }
    }

    /// Create a timeout error for `operation` after `duration_ms`.
    pub fn timeout(operation: impl Into<String>, duration_ms: u64) -> Self {
        CoreError::Timeout {
            operation: operation.into(),
            duration_ms,
        }
    }

    /// Whether a retry wrapper may reasonably re-attempt the operation.
    ///
    /// Only transient failures qualify; validation, structural and conflict
    /// errors will fail the same way every time.
    pub fn is_retryable(&self) -> bool {
        match self {
            CoreError::Timeout { .. } | CoreError::Provider { .. } => true,
            CoreError::Child { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// The innermost non-child error, unwrapping nested failures.
    pub fn root_cause(&self) -> &CoreError {
        match self {
            CoreError::Child { source, .. } => source.root_cause(),
            other => other,
        }
    }
}
