//! Jinja2-style expression evaluation using minijinja.
//!
//! Expressions are compiled with [`Environment::compile_expression`] and
//! evaluated against a snapshot of the scope chain. Unresolved root names are
//! errors unless the scope is tolerant; a missing attribute or item of a
//! defined value evaluates to `null`.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use minijinja::value::{Enumerator, Object, ValueKind};
use minijinja::{Environment, Error, ErrorKind, UndefinedBehavior, Value};

use super::{Evaluator, ExecutionMode};
use crate::error::{EngineError, EngineResult};
use crate::scope::Scope;

/// Global functions, never reported as missing variables.
const GLOBAL_FUNCTIONS: &[&str] = &["range", "dict", "debug", "namespace", "env", "file"];

/// Expression evaluator with custom filters and host functions.
pub struct JinjaEvaluator {
    env: Environment<'static>,
    mode: ExecutionMode,
}

impl Default for JinjaEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl JinjaEvaluator {
    /// Create an evaluator with every function enabled.
    pub fn new() -> Self {
        Self::with_mode(ExecutionMode::Full)
    }

    /// Create an evaluator whose host functions raise security errors.
    pub fn restricted() -> Self {
        Self::with_mode(ExecutionMode::Restricted)
    }

    pub fn with_mode(mode: ExecutionMode) -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Chainable);

        // Add custom filters
        env.add_filter("b64encode", filter_b64encode);
        env.add_filter("b64decode", filter_b64decode);
        env.add_filter("tojson", filter_tojson);
        env.add_filter("fromjson", filter_fromjson);
        env.add_filter("default", filter_default);
        env.add_filter("d", filter_default);
        env.add_filter("int", filter_int);
        env.add_filter("split", filter_split);
        env.add_filter("keys", filter_keys);

        match mode {
            ExecutionMode::Full => {
                env.add_function("env", function_env);
                env.add_function("file", function_file);
            }
            ExecutionMode::Restricted => {
                env.add_function("env", restricted_env);
                env.add_function("file", restricted_file);
            }
        }

        Self { env, mode }
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    fn eval_value(&self, expression: &str, scope: &Scope<'_>) -> EngineResult<Value> {
        let compiled = self
            .env
            .compile_expression(expression)
            .map_err(|e| syntax_error(expression, e))?;

        let ctx = Value::from_object(ScopeObject::new(scope));
        let result = compiled.eval(ctx.clone());

        let missing = ctx
            .downcast_object_ref::<ScopeObject>()
            .map(ScopeObject::take_missing)
            .unwrap_or_default();
        if scope.is_tolerant() {
            for name in &missing {
                scope.record_missing(name);
            }
        }

        if let Err(err) = &result {
            if let Some(denied) = denied_call(err) {
                return Err(EngineError::Security(format!("`{}`: {}", expression, denied)));
            }
        }
        if !scope.is_tolerant() {
            if let Some(name) = missing.iter().next() {
                return Err(EngineError::Expression(format!(
                    "undefined variable `{}` in `{}`",
                    name, expression
                )));
            }
        }

        let value = result.map_err(|e| {
            EngineError::Expression(format!("Failed to evaluate `{}`: {}", expression, e))
        })?;
        Ok(if value.is_undefined() {
            Value::from(())
        } else {
            value
        })
    }
}

impl Evaluator for JinjaEvaluator {
    fn evaluate(&self, expression: &str, scope: &Scope<'_>) -> EngineResult<serde_json::Value> {
        let value = self.eval_value(expression, scope)?;
        Ok(serde_json::to_value(&value)?)
    }

    fn evaluate_condition(&self, expression: &str, scope: &Scope<'_>) -> EngineResult<bool> {
        Ok(self.eval_value(expression, scope)?.is_true())
    }

    fn check(&self, expression: &str) -> EngineResult<()> {
        self.env
            .compile_expression(expression)
            .map(|_| ())
            .map_err(|e| syntax_error(expression, e))
    }
}

fn syntax_error(expression: &str, err: Error) -> EngineError {
    EngineError::Expression(format!("Syntax error in `{}`: {}", expression, err))
}

/// Call of a host function disabled in restricted mode.
///
/// Attached as the source of the minijinja error so the evaluator can tell it
/// apart from ordinary evaluation failures.
#[derive(Debug)]
struct DeniedCall {
    function: &'static str,
}

impl fmt::Display for DeniedCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "function {}() is not allowed in restricted mode", self.function)
    }
}

impl std::error::Error for DeniedCall {}

fn denied_call(err: &Error) -> Option<&DeniedCall> {
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        if let Some(denied) = cause.downcast_ref::<DeniedCall>() {
            return Some(denied);
        }
        source = cause.source();
    }
    None
}

// ============================================================================
// Scope snapshot
// ============================================================================

/// Root context object handed to minijinja.
///
/// Records every name it could not answer so the evaluator can report the
/// undefined variable, or feed tolerant-mode bookkeeping.
#[derive(Debug)]
struct ScopeObject {
    vars: HashMap<String, Value>,
    tolerant: bool,
    missing: Mutex<BTreeSet<String>>,
}

impl ScopeObject {
    fn new(scope: &Scope<'_>) -> Self {
        let vars = scope
            .visible()
            .into_iter()
            .map(|(k, v)| (k, Value::from_serialize(&v)))
            .collect();
        Self {
            vars,
            tolerant: scope.is_tolerant(),
            missing: Mutex::new(BTreeSet::new()),
        }
    }

    fn take_missing(&self) -> BTreeSet<String> {
        self.missing
            .lock()
            .map(|mut names| std::mem::take(&mut *names))
            .unwrap_or_default()
    }
}

impl Object for ScopeObject {
    fn get_value(self: &Arc<Self>, key: &Value) -> Option<Value> {
        let name = key.as_str()?;
        if let Some(value) = self.vars.get(name) {
            return Some(value.clone());
        }
        if GLOBAL_FUNCTIONS.contains(&name) || name.starts_with("__") {
            return None;
        }
        if let Ok(mut missing) = self.missing.lock() {
            missing.insert(name.to_string());
        }
        self.tolerant.then(|| Value::from(()))
    }

    fn enumerate(self: &Arc<Self>) -> Enumerator {
        Enumerator::Values(self.vars.keys().map(|k| Value::from(k.as_str())).collect())
    }
}

// ============================================================================
// Functions
// ============================================================================

/// Read an environment variable.
fn function_env(name: String) -> Result<Value, Error> {
    std::env::var(&name).map(Value::from).map_err(|_| {
        Error::new(
            ErrorKind::InvalidOperation,
            format!("environment variable {} is not set", name),
        )
    })
}

/// Read a file into a string.
fn function_file(path: String) -> Result<Value, Error> {
    std::fs::read_to_string(&path).map(Value::from).map_err(|e| {
        Error::new(
            ErrorKind::InvalidOperation,
            format!("cannot read {}: {}", path, e),
        )
    })
}

fn restricted_env(_name: String) -> Result<Value, Error> {
    Err(disallowed("env"))
}

fn restricted_file(_path: String) -> Result<Value, Error> {
    Err(disallowed("file"))
}

fn disallowed(function: &'static str) -> Error {
    let denied = DeniedCall { function };
    Error::new(ErrorKind::InvalidOperation, denied.to_string()).with_source(denied)
}

// ============================================================================
// Custom Filters
// ============================================================================

/// Base64 encode filter.
fn filter_b64encode(value: &Value) -> Result<String, Error> {
    let s = value.to_string();
    Ok(BASE64.encode(s.as_bytes()))
}

/// Base64 decode filter.
fn filter_b64decode(value: &Value) -> Result<String, Error> {
    let s = value.to_string();
    let decoded = BASE64.decode(s.as_bytes()).map_err(|e| {
        Error::new(
            ErrorKind::InvalidOperation,
            format!("b64decode error: {}", e),
        )
    })?;
    String::from_utf8(decoded)
        .map_err(|e| Error::new(ErrorKind::InvalidOperation, format!("utf8 error: {}", e)))
}

/// JSON encode filter.
fn filter_tojson(value: &Value) -> Result<String, Error> {
    serde_json::to_string(value)
        .map_err(|e| Error::new(ErrorKind::InvalidOperation, format!("tojson error: {}", e)))
}

/// JSON decode filter.
fn filter_fromjson(value: &Value) -> Result<Value, Error> {
    let s = value.to_string();
    let json_val: serde_json::Value = serde_json::from_str(&s).map_err(|e| {
        Error::new(
            ErrorKind::InvalidOperation,
            format!("fromjson error: {}", e),
        )
    })?;
    Ok(Value::from_serialize(&json_val))
}

/// Default value filter.
fn filter_default(value: &Value, default: Option<&Value>) -> Value {
    if value.is_undefined() || value.is_none() {
        default.cloned().unwrap_or(Value::from(""))
    } else {
        value.clone()
    }
}

/// Convert to integer filter.
fn filter_int(value: &Value) -> Result<i64, Error> {
    if let Some(i) = value.as_i64() {
        return Ok(i);
    }
    let s = value.to_string();
    if let Ok(f) = s.trim().parse::<f64>() {
        return Ok(f as i64);
    }
    s.parse::<i64>()
        .map_err(|e| Error::new(ErrorKind::InvalidOperation, format!("int error: {}", e)))
}

/// Split string filter.
fn filter_split(value: &Value, sep: Option<&Value>) -> Vec<String> {
    let s = value.to_string();
    let separator = sep
        .map(|v| v.to_string())
        .unwrap_or_else(|| " ".to_string());
    s.split(&separator).map(|s| s.to_string()).collect()
}

/// Get dict keys filter.
fn filter_keys(value: &Value) -> Result<Vec<Value>, Error> {
    if value.kind() != ValueKind::Map {
        return Err(Error::new(
            ErrorKind::InvalidOperation,
            "keys requires a mapping",
        ));
    }
    let iter = value
        .try_iter()
        .map_err(|_| Error::new(ErrorKind::InvalidOperation, "cannot iterate keys"))?;
    Ok(iter.collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::{Context, Frame, ValueBag};
    use serde_json::json;

    fn make_context() -> Context {
        let mut values = ValueBag::new();
        values.insert("name".to_string(), json!("Alice"));
        values.insert("age".to_string(), json!(30));
        values.insert("items".to_string(), json!(["apple", "banana", "cherry"]));
        values.insert(
            "user".to_string(),
            json!({"email": "alice@example.com", "id": 123}),
        );
        Context::new(values)
    }

    #[test]
    fn test_string_concatenation() {
        let evaluator = JinjaEvaluator::new();
        let ctx = make_context();
        let value = evaluator
            .evaluate(r#""Hello " + name + "!""#, &ctx.scope())
            .unwrap();
        assert_eq!(value, json!("Hello Alice!"));
    }

    #[test]
    fn test_nested_attribute() {
        let evaluator = JinjaEvaluator::new();
        let ctx = make_context();
        let value = evaluator.evaluate("user.email", &ctx.scope()).unwrap();
        assert_eq!(value, json!("alice@example.com"));
    }

    #[test]
    fn test_list_literal() {
        let evaluator = JinjaEvaluator::new();
        let ctx = make_context();
        let value = evaluator.evaluate("[1, 2, 3, 4]", &ctx.scope()).unwrap();
        assert_eq!(value, json!([1, 2, 3, 4]));
    }

    #[test]
    fn test_condition() {
        let evaluator = JinjaEvaluator::new();
        let ctx = make_context();
        assert!(evaluator.evaluate_condition("age > 25", &ctx.scope()).unwrap());
        assert!(!evaluator.evaluate_condition("age < 25", &ctx.scope()).unwrap());
        assert!(evaluator
            .evaluate_condition("items | length == 3", &ctx.scope())
            .unwrap());
    }

    #[test]
    fn test_filters() {
        let evaluator = JinjaEvaluator::new();
        let ctx = make_context();
        assert_eq!(
            evaluator.evaluate("name | b64encode", &ctx.scope()).unwrap(),
            json!("QWxpY2U=")
        );
        assert_eq!(
            evaluator
                .evaluate(r#"'{"a": [1, 2]}' | fromjson"#, &ctx.scope())
                .unwrap(),
            json!({"a": [1, 2]})
        );
        assert_eq!(
            evaluator.evaluate("'7' | int + 1", &ctx.scope()).unwrap(),
            json!(8)
        );
    }

    #[test]
    fn test_undefined_variable_is_expression_error() {
        let evaluator = JinjaEvaluator::new();
        let ctx = make_context();
        let err = evaluator.evaluate("unknown + 1", &ctx.scope()).unwrap_err();
        assert!(matches!(err, EngineError::Expression(_)));
        assert!(err.to_string().contains("`unknown`"), "{}", err);
    }

    #[test]
    fn test_undefined_operand_names_the_variable() {
        let evaluator = JinjaEvaluator::new();
        let ctx = make_context();
        let err = evaluator
            .evaluate_condition("missing_thing + 1 > 0", &ctx.scope())
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Expression error: undefined variable `missing_thing` in `missing_thing + 1 > 0`"
        );
    }

    #[test]
    fn test_missing_member_of_defined_value_is_null() {
        let evaluator = JinjaEvaluator::new();
        let mut values = ValueBag::new();
        values.insert(
            "response".to_string(),
            json!({"status": 401, "headers": {}, "body": ""}),
        );
        let ctx = Context::new(values);

        let value = evaluator
            .evaluate("response.headers['set-cookie']", &ctx.scope())
            .unwrap();
        assert_eq!(value, json!(null));
        assert_eq!(
            evaluator.evaluate("response.nothing.deeper", &ctx.scope()).unwrap(),
            json!(null)
        );
        assert!(!evaluator
            .evaluate_condition("response.headers.location", &ctx.scope())
            .unwrap());
    }

    #[test]
    fn test_undefined_variable_tolerant() {
        let evaluator = JinjaEvaluator::new();
        let ctx = Context::tolerant(ValueBag::new());
        let value = evaluator.evaluate("token", &ctx.scope()).unwrap();
        assert_eq!(value, json!(null));
        assert!(ctx.missing().contains("token"));
    }

    #[test]
    fn test_functions_not_reported_missing() {
        let evaluator = JinjaEvaluator::new();
        let ctx = Context::tolerant(ValueBag::new());
        let value = evaluator.evaluate("range(3) | list", &ctx.scope()).unwrap();
        assert_eq!(value, json!([0, 1, 2]));
        assert!(ctx.missing().is_empty());
    }

    #[test]
    fn test_syntax_error() {
        let evaluator = JinjaEvaluator::new();
        let ctx = make_context();
        let err = evaluator.evaluate("name +", &ctx.scope()).unwrap_err();
        assert!(matches!(err, EngineError::Expression(_)));
        assert!(err.to_string().contains("Syntax error"));
    }

    #[test]
    fn test_check_only_looks_at_syntax() {
        let evaluator = JinjaEvaluator::new();
        assert!(evaluator.check("undefined_name + 1").is_ok());
        assert!(evaluator.check("(1 + ").is_err());
    }

    #[test]
    fn test_restricted_mode_raises_security_error() {
        let evaluator = JinjaEvaluator::restricted();
        let ctx = make_context();
        let err = evaluator.evaluate("env('HOME')", &ctx.scope()).unwrap_err();
        assert!(matches!(err, EngineError::Security(_)), "{}", err);

        let err = evaluator
            .evaluate("file('/etc/hostname')", &ctx.scope())
            .unwrap_err();
        assert!(matches!(err, EngineError::Security(_)));
    }

    #[test]
    fn test_env_function_in_full_mode() {
        let evaluator = JinjaEvaluator::new();
        let ctx = make_context();
        let err = evaluator
            .evaluate("env('SCENARIO_ENGINE_SURELY_UNSET_VAR')", &ctx.scope())
            .unwrap_err();
        assert!(matches!(err, EngineError::Expression(_)));
    }

    #[test]
    fn test_full_mode_file_error_is_not_security() {
        let evaluator = JinjaEvaluator::new();
        let ctx = make_context();
        let err = evaluator
            .evaluate(
                "file('/nonexistent/function file() is not allowed in restricted mode')",
                &ctx.scope(),
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::Expression(_)), "{}", err);
    }

    #[test]
    fn test_overlay_visible() {
        let evaluator = JinjaEvaluator::new();
        let mut ctx = make_context();
        ctx.push_frame(Frame::new());
        let mut overlay = Frame::new();
        overlay.set("response", json!({"status": 200}));
        let scope = ctx.scope_with(&overlay);
        assert!(evaluator
            .evaluate_condition("response.status == 200 and index == 0", &scope)
            .unwrap());
    }
}
