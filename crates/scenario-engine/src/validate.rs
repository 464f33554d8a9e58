//! Static scenario validation.
//!
//! Walks every branch of a graph once, without issuing requests, in
//! tolerant mode. Names that never resolve are reported as missing; syntax
//! and security errors are reported per step. Evaluation failures that
//! depend on response data are ignored.

use std::collections::BTreeSet;

use serde::Serialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::engine::{REQUEST_VARIABLE, RESPONSE_VARIABLE};
use crate::error::EngineError;
use crate::expression::Evaluator;
use crate::graph::{Step, StepGraph, StepId, StepKind};
use crate::scope::{Context, Frame, ValueBag};

/// A problem found in one expression.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationIssue {
    /// Uuid of the step carrying the expression.
    pub step: String,
    pub expression: String,
    pub message: String,
}

/// Outcome of [`validate`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationReport {
    /// Variables referenced but never defined.
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub missing: BTreeSet<String>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.missing.is_empty() && self.errors.is_empty()
    }
}

/// Validate a graph against its base values.
pub fn validate(
    graph: &StepGraph,
    values: &ValueBag,
    evaluator: &dyn Evaluator,
) -> ValidationReport {
    let mut walker = Walker {
        graph,
        evaluator,
        context: Context::tolerant(values.clone()),
        errors: Vec::new(),
    };
    walker.context.push_frame(Frame::new());
    walker.walk_chain(graph.root());

    let report = ValidationReport {
        missing: walker.context.missing(),
        errors: walker.errors,
    };
    debug!(
        missing = report.missing.len(),
        errors = report.errors.len(),
        "Validated scenario"
    );
    report
}

struct Walker<'a> {
    graph: &'a StepGraph,
    evaluator: &'a dyn Evaluator,
    context: Context,
    errors: Vec<ValidationIssue>,
}

impl<'a> Walker<'a> {
    fn walk_chain(&mut self, head: Option<StepId>) {
        let graph = self.graph;
        for (_, step) in graph.chain(head) {
            self.walk_step(step);
        }
    }

    fn walk_step(&mut self, step: &Step) {
        for expression in step.expressions() {
            if let Err(e) = self.evaluator.check(expression) {
                self.report(step, expression, &e);
            }
        }

        match &step.kind {
            StepKind::Visit { .. }
            | StepKind::Click { .. }
            | StepKind::Reload { .. }
            | StepKind::Follow { .. } => self.walk_leaf(step),

            StepKind::Empty => {}

            StepKind::Block { variables, child } => {
                let mut frame = Frame::new();
                for (name, expr) in variables {
                    let value = self.eval_with(step, expr, &frame);
                    frame.set(name.clone(), value);
                }
                self.context.push_frame(frame);
                self.walk_chain(*child);
                self.context.pop_frame();
            }

            StepKind::Loop {
                collection,
                key,
                value,
                child,
            } => {
                let (k, v) = match self.eval_with(step, collection, &Frame::new()) {
                    Value::Array(items) => {
                        (json!(0), items.into_iter().next().unwrap_or(Value::Null))
                    }
                    Value::Object(map) => map
                        .into_iter()
                        .next()
                        .map(|(k, v)| (Value::String(k), v))
                        .unwrap_or((Value::Null, Value::Null)),
                    _ => (Value::Null, Value::Null),
                };
                let mut frame = Frame::new();
                frame.set(key.clone(), k);
                frame.set(value.clone(), v);
                self.context.push_frame(frame);
                self.walk_chain(*child);
                self.context.pop_frame();
            }

            StepKind::While { condition, child } => {
                self.context.push_frame(Frame::new());
                self.eval_with(step, condition, &Frame::new());
                self.walk_chain(*child);
                self.context.pop_frame();
            }

            StepKind::Condition {
                condition,
                then_branch,
                else_branch,
            } => {
                self.eval_with(step, condition, &Frame::new());
                for branch in [then_branch, else_branch] {
                    self.context.push_frame(Frame::new());
                    self.walk_chain(*branch);
                    self.context.pop_frame();
                }
            }
        }
    }

    fn walk_leaf(&mut self, step: &Step) {
        let empty = Frame::new();
        match &step.kind {
            StepKind::Visit {
                url, method, body, ..
            } => {
                self.eval_with(step, url, &empty);
                for expr in method.iter().chain(body.iter()) {
                    self.eval_with(step, expr, &empty);
                }
            }
            StepKind::Click { link, .. } => {
                self.eval_with(step, link, &empty);
            }
            _ => {}
        }

        let Some(leaf) = step.kind.leaf() else {
            return;
        };
        for expr in leaf.headers.values() {
            self.eval_with(step, expr, &empty);
        }

        let mut overlay = Frame::new();
        overlay.set(
            REQUEST_VARIABLE,
            json!({"method": "GET", "url": "", "headers": {}, "body": ""}),
        );
        overlay.set(
            RESPONSE_VARIABLE,
            json!({"status": 0, "headers": {}, "body": ""}),
        );
        let mut extracted = Vec::new();
        for (name, expr) in &leaf.extractions {
            let value = self.eval_with(step, expr, &overlay);
            overlay.set(name.clone(), value.clone());
            extracted.push((name.clone(), value));
        }
        for expr in &leaf.assertions {
            self.eval_with(step, expr, &overlay);
        }
        for (name, value) in extracted {
            self.context.set_local(name, value);
        }
    }

    /// Evaluate for bookkeeping; returns `null` when evaluation fails.
    fn eval_with(&mut self, step: &Step, expression: &str, overlay: &Frame) -> Value {
        let result = self
            .evaluator
            .evaluate(expression, &self.context.scope_with(overlay));
        match result {
            Ok(value) => value,
            Err(e) => {
                if matches!(e, EngineError::Security(_)) {
                    self.report(step, expression, &e);
                }
                Value::Null
            }
        }
    }

    fn report(&mut self, step: &Step, expression: &str, err: &EngineError) {
        let issue = ValidationIssue {
            step: step.uuid.clone(),
            expression: expression.to_string(),
            message: err.to_string(),
        };
        if !self.errors.contains(&issue) {
            self.errors.push(issue);
        }
    }
}
