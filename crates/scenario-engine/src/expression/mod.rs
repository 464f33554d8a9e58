//! Expression evaluation.
//!
//! The engine only depends on the [`Evaluator`] trait. [`JinjaEvaluator`]
//! is the default implementation, using Jinja2-style expressions.

mod jinja;

use serde_json::Value;

use crate::error::EngineResult;
use crate::scope::Scope;

pub use jinja::JinjaEvaluator;

/// Which built-in functions an evaluator exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// Every function is available.
    #[default]
    Full,
    /// Functions touching the host (environment, files) raise a security error.
    Restricted,
}

/// Evaluates scalar and boolean expressions against a scope.
pub trait Evaluator: Send + Sync {
    /// Evaluate an expression to a value.
    fn evaluate(&self, expression: &str, scope: &Scope<'_>) -> EngineResult<Value>;

    /// Check the syntax of an expression without evaluating it.
    fn check(&self, expression: &str) -> EngineResult<()> {
        let _ = expression;
        Ok(())
    }

    /// Evaluate an expression for its truthiness.
    fn evaluate_condition(&self, expression: &str, scope: &Scope<'_>) -> EngineResult<bool> {
        Ok(is_truthy(&self.evaluate(expression, scope)?))
    }
}

/// Jinja-like truthiness of a JSON value.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(true, |f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Render a value the way it should appear inside a URL or header.
pub fn to_display_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
