//! Error types for scenario execution.
//!
//! Every variant except [`EngineError::Expectation`] is fatal and means the
//! scenario itself (or the caller driving it) is broken. Expectation failures
//! are data-dependent and carry everything gathered up to the failing step.

use indexmap::IndexMap;
use serde::Serialize;
use thiserror::Error;

/// Errors raised while building, validating or executing a scenario.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Malformed structure, e.g. a loop collection that is not iterable.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Expression syntax or evaluation failure (including undefined variables).
    #[error("Expression error: {0}")]
    Expression(String),

    /// A function that is disallowed in restricted mode was called.
    #[error("Security error: {0}")]
    Security(String),

    /// One or more assertions were false.
    #[error("{0}")]
    Expectation(Box<ExpectationFailure>),

    /// The peek/resume contract was violated by the caller.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Scenario document could not be parsed.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Request or response could not be serialized for expressions.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    /// Returns true for errors that end the run regardless of the data seen.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, EngineError::Expectation(_))
    }

    /// Returns the expectation failure, if this is one.
    pub fn as_expectation(&self) -> Option<&ExpectationFailure> {
        match self {
            EngineError::Expectation(failure) => Some(failure),
            _ => None,
        }
    }
}

/// Aggregated assertion failures of a single step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExpectationFailure {
    /// Uuid of the step whose assertions failed.
    pub step: String,

    /// One message per failing assertion, in declaration order.
    pub failures: Vec<String>,

    /// Every extraction gathered in the run so far, including the failing step's.
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub extractions: IndexMap<String, serde_json::Value>,
}

impl std::fmt::Display for ExpectationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Expectation failure: {}", self.failures.join("; "))
    }
}

/// Result type alias using EngineError.
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_error() {
        let err = EngineError::Configuration("loop over 42".to_string());
        assert_eq!(err.to_string(), "Configuration error: loop over 42");
        assert!(err.is_fatal());
    }

    #[test]
    fn test_expectation_failure_display() {
        let err = EngineError::Expectation(Box::new(ExpectationFailure {
            step: "s1".to_string(),
            failures: vec![
                "Assertion failed: response.status == 200".to_string(),
                "Assertion failed: ok".to_string(),
            ],
            extractions: IndexMap::new(),
        }));
        assert!(!err.is_fatal());
        assert_eq!(
            err.to_string(),
            "Expectation failure: Assertion failed: response.status == 200; Assertion failed: ok"
        );
        assert_eq!(err.as_expectation().map(|f| f.failures.len()), Some(2));
    }

    #[test]
    fn test_expectation_failure_serialization_omits_empty_extractions() {
        let failure = ExpectationFailure {
            step: "s1".to_string(),
            failures: vec!["x".to_string()],
            extractions: IndexMap::new(),
        };
        let json = serde_json::to_string(&failure).unwrap();
        assert!(!json.contains("extractions"));
    }
}
