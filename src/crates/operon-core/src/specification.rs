//! Input/output specifications for operators
//!
//! A [`Specification`] declares which record keys an operator requires on
//! input and which it promises to produce. Attaching one is optional; when
//! present, required keys are validated before the operator body runs and a
//! [`CoreError::Validation`](crate::error::CoreError::Validation) is returned
//! on the first missing key.

use crate::error::{CoreError, Result};
use crate::record::Record;
use serde::{Deserialize, Serialize};

/// Declared input/output contract of an operator.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Specification {
    /// Keys that must be present in the input record.
    pub required: Vec<String>,
    /// Keys the operator promises to produce.
    pub produced: Vec<String>,
}

impl Specification {
    /// Create an empty specification.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a required input key.
    pub fn requires(mut self, key: impl Into<String>) -> Self {
        self.required.push(key.into());
        self
    }

    /// Add a promised output key.
    pub fn produces(mut self, key: impl Into<String>) -> Self {
        self.produced.push(key.into());
        self
    }

    /// Validate an input record against the required key set.
    pub fn validate_input(&self, inputs: &Record) -> Result<()> {
        for key in &self.required {
            if !inputs.contains_key(key) {
                return Err(CoreError::Validation(format!(
                    "missing required input key '{}'",
                    key
                )));
            }
        }
        Ok(())
    }
}
