//! Variable scopes for a single run.
//!
//! A [`Context`] owns the base [`ValueBag`] and a [`ScopeStack`] of frames,
//! one per open container. Resolution scans frames innermost to outermost,
//! then the base bag. Every open frame also exposes `index`, the number of
//! requests completed so far in the run.

use std::cell::RefCell;
use std::collections::BTreeSet;

use indexmap::IndexMap;
use serde_json::Value;

use crate::error::{EngineError, EngineResult};

/// Base variable set of a run, in declaration order.
pub type ValueBag = IndexMap<String, Value>;

/// Name under which the completed-request counter is exposed.
pub const INDEX_VARIABLE: &str = "index";

/// Local bindings of one open container.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    vars: IndexMap<String, Value>,
}

impl Frame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_vars(vars: IndexMap<String, Value>) -> Self {
        Self { vars }
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.vars.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    pub fn vars(&self) -> &IndexMap<String, Value> {
        &self.vars
    }

    pub fn into_vars(self) -> IndexMap<String, Value> {
        self.vars
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

/// Ordered frames, innermost last.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScopeStack {
    frames: Vec<Frame>,
}

impl ScopeStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new frame. Nothing is inherited from the enclosing frames.
    pub fn push(&mut self, frame: Frame) {
        self.frames.push(frame);
    }

    /// Discard the innermost frame.
    pub fn pop(&mut self) -> Option<Frame> {
        self.frames.pop()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn innermost(&self) -> Option<&Frame> {
        self.frames.last()
    }

    fn innermost_mut(&mut self) -> &mut Frame {
        if self.frames.is_empty() {
            self.frames.push(Frame::default());
        }
        let last = self.frames.len() - 1;
        &mut self.frames[last]
    }

    /// Scan frames innermost to outermost. `index` is answered by the first
    /// frame that does not declare its own binding for it.
    pub fn lookup(&self, name: &str, completed: u64) -> Option<Value> {
        for frame in self.frames.iter().rev() {
            if let Some(value) = frame.get(name) {
                return Some(value.clone());
            }
            if name == INDEX_VARIABLE {
                return Some(Value::from(completed));
            }
        }
        None
    }
}

/// How undefined variables are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResolveMode {
    /// Undefined variables are an expression error.
    #[default]
    Strict,
    /// Undefined variables are recorded and resolve to `null`.
    Tolerant,
}

/// Variables of one run: base values, scope stack and request counter.
#[derive(Debug, Clone)]
pub struct Context {
    values: ValueBag,
    stack: ScopeStack,
    completed: u64,
    mode: ResolveMode,
    missing: RefCell<BTreeSet<String>>,
}

impl Context {
    /// Create a strict context over the given base values.
    pub fn new(values: ValueBag) -> Self {
        Self {
            values,
            stack: ScopeStack::new(),
            completed: 0,
            mode: ResolveMode::Strict,
            missing: RefCell::new(BTreeSet::new()),
        }
    }

    /// Create a context that records undefined names instead of failing.
    pub fn tolerant(values: ValueBag) -> Self {
        Self {
            mode: ResolveMode::Tolerant,
            ..Self::new(values)
        }
    }

    pub fn values(&self) -> &ValueBag {
        &self.values
    }

    pub fn stack(&self) -> &ScopeStack {
        &self.stack
    }

    pub fn mode(&self) -> ResolveMode {
        self.mode
    }

    /// Number of requests completed in this run.
    pub fn completed(&self) -> u64 {
        self.completed
    }

    pub(crate) fn record_completed(&mut self) {
        self.completed += 1;
    }

    pub fn push_frame(&mut self, frame: Frame) {
        self.stack.push(frame);
    }

    pub fn pop_frame(&mut self) -> Option<Frame> {
        self.stack.pop()
    }

    /// Bind a variable in the innermost frame.
    pub fn set_local(&mut self, name: impl Into<String>, value: Value) {
        self.stack.innermost_mut().set(name, value);
    }

    /// Resolve a variable through the whole scope chain.
    pub fn resolve(&self, name: &str) -> EngineResult<Value> {
        self.scope().resolve(name)
    }

    /// Borrowed view over the current scope chain.
    pub fn scope(&self) -> Scope<'_> {
        Scope {
            context: self,
            overlay: None,
        }
    }

    /// Borrowed view with `overlay` stacked above the innermost frame.
    pub fn scope_with<'a>(&'a self, overlay: &'a Frame) -> Scope<'a> {
        Scope {
            context: self,
            overlay: Some(overlay),
        }
    }

    /// Names recorded as missing while in tolerant mode.
    pub fn missing(&self) -> BTreeSet<String> {
        self.missing.borrow().clone()
    }
}

/// Read-only view used by evaluators and converters.
#[derive(Debug, Clone, Copy)]
pub struct Scope<'a> {
    context: &'a Context,
    overlay: Option<&'a Frame>,
}

impl<'a> Scope<'a> {
    /// Find a variable without failing.
    pub fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.overlay.and_then(|frame| frame.get(name)) {
            return Some(value.clone());
        }
        self.context
            .stack
            .lookup(name, self.context.completed)
            .or_else(|| self.context.values.get(name).cloned())
    }

    /// Resolve a variable, failing (strict) or recording it (tolerant).
    pub fn resolve(&self, name: &str) -> EngineResult<Value> {
        match self.lookup(name) {
            Some(value) => Ok(value),
            None if self.is_tolerant() => {
                self.record_missing(name);
                Ok(Value::Null)
            }
            None => Err(EngineError::Expression(format!(
                "undefined variable `{}`",
                name
            ))),
        }
    }

    /// Every visible binding, inner bindings shadowing outer ones.
    pub fn visible(&self) -> IndexMap<String, Value> {
        let mut out = self.context.values.clone();
        for frame in self.context.stack.frames() {
            for (name, value) in frame.vars() {
                out.insert(name.clone(), value.clone());
            }
        }
        if let Some(innermost) = self.context.stack.innermost() {
            if innermost.get(INDEX_VARIABLE).is_none() {
                out.insert(
                    INDEX_VARIABLE.to_string(),
                    Value::from(self.context.completed),
                );
            }
        }
        if let Some(frame) = self.overlay {
            for (name, value) in frame.vars() {
                out.insert(name.clone(), value.clone());
            }
        }
        out
    }

    pub fn is_tolerant(&self) -> bool {
        self.context.mode == ResolveMode::Tolerant
    }

    /// Remember an undefined name (tolerant mode bookkeeping).
    pub fn record_missing(&self, name: &str) {
        self.context.missing.borrow_mut().insert(name.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn base() -> ValueBag {
        let mut values = ValueBag::new();
        values.insert("endpoint".to_string(), json!("http://localhost"));
        values.insert("name".to_string(), json!("base"));
        values
    }

    #[test]
    fn test_resolution_order() {
        let mut ctx = Context::new(base());
        assert_eq!(ctx.resolve("name").unwrap(), json!("base"));

        let mut outer = Frame::new();
        outer.set("name", json!("outer"));
        ctx.push_frame(outer);
        ctx.push_frame(Frame::new());
        assert_eq!(ctx.resolve("name").unwrap(), json!("outer"));

        ctx.set_local("name", json!("inner"));
        assert_eq!(ctx.resolve("name").unwrap(), json!("inner"));

        ctx.pop_frame();
        assert_eq!(ctx.resolve("name").unwrap(), json!("outer"));
        ctx.pop_frame();
        assert_eq!(ctx.resolve("name").unwrap(), json!("base"));
        assert_eq!(ctx.resolve("endpoint").unwrap(), json!("http://localhost"));
    }

    #[test]
    fn test_undefined_variable_strict() {
        let ctx = Context::new(ValueBag::new());
        let err = ctx.resolve("nope").unwrap_err();
        assert!(matches!(err, EngineError::Expression(_)));
        assert!(err.to_string().contains("`nope`"));
    }

    #[test]
    fn test_undefined_variable_tolerant() {
        let ctx = Context::tolerant(ValueBag::new());
        assert_eq!(ctx.resolve("nope").unwrap(), Value::Null);
        assert_eq!(ctx.resolve("other").unwrap(), Value::Null);
        let missing: Vec<String> = ctx.missing().into_iter().collect();
        assert_eq!(missing, vec!["nope".to_string(), "other".to_string()]);
    }

    #[test]
    fn test_index_shared_across_frames() {
        let mut ctx = Context::new(ValueBag::new());
        assert!(ctx.resolve(INDEX_VARIABLE).is_err());

        ctx.push_frame(Frame::new());
        ctx.record_completed();
        ctx.push_frame(Frame::new());
        ctx.record_completed();
        assert_eq!(ctx.resolve(INDEX_VARIABLE).unwrap(), json!(2));
        ctx.pop_frame();
        assert_eq!(ctx.resolve(INDEX_VARIABLE).unwrap(), json!(2));
    }

    #[test]
    fn test_frame_can_shadow_index() {
        let mut ctx = Context::new(ValueBag::new());
        ctx.push_frame(Frame::new());
        ctx.set_local("index", json!("custom"));
        assert_eq!(ctx.resolve("index").unwrap(), json!("custom"));
    }

    #[test]
    fn test_overlay_shadows_frames() {
        let mut ctx = Context::new(base());
        ctx.push_frame(Frame::new());
        let mut overlay = Frame::new();
        overlay.set("name", json!("overlay"));

        let scope = ctx.scope_with(&overlay);
        assert_eq!(scope.resolve("name").unwrap(), json!("overlay"));
        assert_eq!(ctx.resolve("name").unwrap(), json!("base"));
    }

    #[test]
    fn test_visible_matches_resolution() {
        let mut ctx = Context::new(base());
        let mut frame = Frame::new();
        frame.set("name", json!("frame"));
        frame.set("extra", json!(1));
        ctx.push_frame(frame);

        let visible = ctx.scope().visible();
        for (name, value) in &visible {
            assert_eq!(&ctx.resolve(name).unwrap(), value);
        }
        assert_eq!(visible.get("index"), Some(&json!(0)));
    }
}
