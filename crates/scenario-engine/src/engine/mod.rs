//! Execution state machine.
//!
//! An [`Engine`] walks one [`StepGraph`] depth first and hands out one
//! request at a time through the Peek/Resume protocol:
//!
//! 1. [`Engine::peek`] returns the pending request, or [`Next::Done`].
//! 2. The caller sends it and passes the response to [`Engine::resume`].
//! 3. `resume` runs extractions and assertions, commits them and advances
//!    to the next request-producing step.
//!
//! The engine performs no I/O and never blocks.

mod cursor;
mod state;


use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::converter::{Exchange, StepConverter};
use crate::error::{EngineError, EngineResult, ExpectationFailure};
use crate::expression::{Evaluator, JinjaEvaluator};
use crate::graph::{StepGraph, StepId, StepKind};
use crate::result::{AssertionOutcome, Branch, ResultNode, ResultTree};
use crate::scope::{Context, Frame, ValueBag};

use cursor::{iteration_items, Control, Cursor};

pub use cursor::MAX_WHILE_ITERATIONS;
pub use state::EngineState;

/// Name under which the request is visible to extractions and assertions.
pub const REQUEST_VARIABLE: &str = "request";
/// Name under which the response is visible to extractions and assertions.
pub const RESPONSE_VARIABLE: &str = "response";

/// A request waiting for its response.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingRequest<R> {
    pub step: StepId,
    pub uuid: String,
    pub request: R,
}

/// Outcome of [`Engine::peek`].
#[derive(Debug, Clone, PartialEq)]
pub enum Next<R> {
    Request(PendingRequest<R>),
    Done,
}

impl<R> Next<R> {
    pub fn is_done(&self) -> bool {
        matches!(self, Next::Done)
    }

    pub fn into_request(self) -> Option<PendingRequest<R>> {
        match self {
            Next::Request(pending) => Some(pending),
            Next::Done => None,
        }
    }
}

#[derive(Debug)]
struct Pending<R> {
    step: StepId,
    /// Built on the first peek, then reused.
    request: Option<R>,
}

/// Runs one scenario graph against one context.
pub struct Engine<C: StepConverter> {
    graph: Arc<StepGraph>,
    converter: C,
    evaluator: Arc<dyn Evaluator>,
    context: Context,
    cursors: Vec<Cursor>,
    state: EngineState,
    pending: Option<Pending<C::Request>>,
    previous: Option<Exchange<C::Request, C::Response>>,
    extractions: IndexMap<String, Value>,
    results: Vec<ResultNode>,
    max_while_iterations: usize,
}

impl<C: StepConverter> Engine<C> {
    /// Create an engine using the default Jinja evaluator.
    pub fn new(graph: Arc<StepGraph>, values: ValueBag, converter: C) -> Self {
        Self {
            graph,
            converter,
            evaluator: Arc::new(JinjaEvaluator::new()),
            context: Context::new(values),
            cursors: Vec::new(),
            state: EngineState::Created,
            pending: None,
            previous: None,
            extractions: IndexMap::new(),
            results: Vec::new(),
            max_while_iterations: MAX_WHILE_ITERATIONS,
        }
    }

    /// Replace the expression evaluator.
    pub fn with_evaluator(mut self, evaluator: Arc<dyn Evaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    /// Bound the iterations of each While step. Exceeding it is a
    /// configuration error; `usize::MAX` effectively lifts the bound.
    pub fn with_max_while_iterations(mut self, limit: usize) -> Self {
        self.max_while_iterations = limit;
        self
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn graph(&self) -> &StepGraph {
        &self.graph
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Every extraction committed so far, in order.
    pub fn extractions(&self) -> &IndexMap<String, Value> {
        &self.extractions
    }

    /// The last completed exchange.
    pub fn previous(&self) -> Option<&Exchange<C::Request, C::Response>> {
        self.previous.as_ref()
    }

    /// Snapshot of the result tree, including containers still open.
    pub fn results(&self) -> ResultTree {
        let mut open: Option<ResultNode> = None;
        for cursor in self.cursors.iter().rev() {
            if let Some(node) = &cursor.node {
                let mut node = node.clone();
                if let Some(child) = open.take() {
                    node.push_child(child);
                }
                open = Some(node);
            }
        }
        let mut steps = self.results.clone();
        steps.extend(open);
        ResultTree { steps }
    }

    /// Return the next request, building it on first call.
    ///
    /// Calling `peek` again before [`Engine::resume`] returns the same request.
    pub fn peek(&mut self) -> EngineResult<Next<C::Request>> {
        match self.state {
            EngineState::Failed => {
                return Err(EngineError::Protocol(
                    "peek called on a failed run".to_string(),
                ))
            }
            EngineState::Done => return Ok(Next::Done),
            EngineState::Created => {
                self.start();
                if let Err(e) = self.advance() {
                    return Err(self.fail(e));
                }
            }
            EngineState::AwaitingResponse => {}
        }

        let (step_id, cached) = match &self.pending {
            Some(pending) => (pending.step, pending.request.clone()),
            None => return Ok(Next::Done),
        };
        let graph = Arc::clone(&self.graph);
        let step = graph.step(step_id);

        let request = match cached {
            Some(request) => request,
            None => {
                let built = self.converter.convert(
                    step,
                    &self.context.scope(),
                    self.evaluator.as_ref(),
                    self.previous.as_ref(),
                );
                let request = built.map_err(|e| self.fail(e))?;
                trace!(step = %step.uuid, kind = %step.step_type(), "Request pending");
                self.pending = Some(Pending {
                    step: step_id,
                    request: Some(request.clone()),
                });
                request
            }
        };

        Ok(Next::Request(PendingRequest {
            step: step_id,
            uuid: step.uuid.clone(),
            request,
        }))
    }

    /// Hand back the response to the last peeked request.
    ///
    /// Protocol violations are reported without touching the run. Any other
    /// error, including an expectation failure, ends the run.
    pub fn resume(&mut self, request: &C::Request, response: C::Response) -> EngineResult<()> {
        let step_id = self.check_resume(request)?;
        self.complete(step_id, request, response)
            .map_err(|e| self.fail(e))
    }

    fn check_resume(&self, request: &C::Request) -> EngineResult<StepId> {
        match self.state {
            EngineState::Created => {
                return Err(EngineError::Protocol(
                    "resume called before peek".to_string(),
                ))
            }
            EngineState::Done => {
                return Err(EngineError::Protocol(
                    "resume called on a finished run".to_string(),
                ))
            }
            EngineState::Failed => {
                return Err(EngineError::Protocol(
                    "resume called on a failed run".to_string(),
                ))
            }
            EngineState::AwaitingResponse => {}
        }

        let pending = self.pending.as_ref().ok_or_else(|| {
            EngineError::Protocol("resume called without a pending request".to_string())
        })?;
        let uuid = &self.graph.step(pending.step).uuid;
        match &pending.request {
            None => Err(EngineError::Protocol(format!(
                "request for step {} has not been peeked",
                uuid
            ))),
            Some(expected) if expected != request => Err(EngineError::Protocol(format!(
                "request does not match the pending request of step {}",
                uuid
            ))),
            Some(_) => Ok(pending.step),
        }
    }

    fn complete(
        &mut self,
        step_id: StepId,
        request: &C::Request,
        response: C::Response,
    ) -> EngineResult<()> {
        let graph = Arc::clone(&self.graph);
        let step = graph.step(step_id);
        let leaf = step.kind.leaf().ok_or_else(|| {
            EngineError::Configuration(format!("Step {} does not produce a request", step.uuid))
        })?;

        let request_json = serde_json::to_value(request)?;
        let response_json = serde_json::to_value(&response)?;

        let mut overlay = Frame::new();
        overlay.set(REQUEST_VARIABLE, request_json.clone());
        overlay.set(RESPONSE_VARIABLE, response_json.clone());

        let mut extracted = IndexMap::new();
        for (name, expr) in &leaf.extractions {
            let value = self
                .evaluator
                .evaluate(expr, &self.context.scope_with(&overlay))?;
            overlay.set(name.clone(), value.clone());
            extracted.insert(name.clone(), value);
        }

        let mut outcomes = Vec::with_capacity(leaf.assertions.len());
        let mut failures = Vec::new();
        for expr in &leaf.assertions {
            let passed = self
                .evaluator
                .evaluate_condition(expr, &self.context.scope_with(&overlay))?;
            if !passed {
                failures.push(format!("Assertion failed: {}", expr));
            }
            outcomes.push(AssertionOutcome {
                expression: expr.clone(),
                passed,
            });
        }

        let mut node = ResultNode::new(step);
        node.extractions = extracted.clone();
        node.assertions = outcomes;
        node.request = Some(request_json);
        node.response = Some(response_json);

        if !failures.is_empty() {
            let mut gathered = self.extractions.clone();
            gathered.extend(extracted);
            self.record(node);
            return Err(EngineError::Expectation(Box::new(ExpectationFailure {
                step: step.uuid.clone(),
                failures,
                extractions: gathered,
            })));
        }

        for (name, value) in &extracted {
            self.context.set_local(name.clone(), value.clone());
        }
        self.extractions.extend(extracted);
        self.context.record_completed();
        self.record(node);
        self.previous = Some(Exchange {
            request: request.clone(),
            response,
        });
        self.pending = None;
        debug!(
            step = %step.uuid,
            completed = self.context.completed(),
            "Exchange completed"
        );

        self.advance()
    }

    fn start(&mut self) {
        debug!(steps = self.graph.len(), "Starting run");
        self.context.push_frame(Frame::new());
        self.cursors.push(Cursor::root(self.graph.root()));
        self.state = EngineState::AwaitingResponse;
    }

    fn fail(&mut self, err: EngineError) -> EngineError {
        warn!(error = %err, "Run failed");
        self.state = EngineState::Failed;
        self.pending = None;
        err
    }

    /// Move to the next request-producing step, or finish the run.
    fn advance(&mut self) -> EngineResult<()> {
        loop {
            let Some(top) = self.cursors.last_mut() else {
                debug!(completed = self.context.completed(), "Run finished");
                self.state = EngineState::Done;
                self.pending = None;
                return Ok(());
            };

            if let Some(id) = top.position.take() {
                top.position = self.graph.step(id).next;
                if self.enter(id)? {
                    self.pending = Some(Pending {
                        step: id,
                        request: None,
                    });
                    return Ok(());
                }
                continue;
            }

            if !self.rewind_top()? {
                self.close_top();
            }
        }
    }

    /// Enter a step. Returns true when the step produces a request.
    fn enter(&mut self, id: StepId) -> EngineResult<bool> {
        let graph = Arc::clone(&self.graph);
        let step = graph.step(id);

        match &step.kind {
            StepKind::Visit { .. }
            | StepKind::Click { .. }
            | StepKind::Reload { .. }
            | StepKind::Follow { .. } => Ok(true),

            StepKind::Empty => {
                self.record(ResultNode::new(step));
                Ok(false)
            }

            StepKind::Block { variables, child } => {
                let mut frame = Frame::new();
                for (name, expr) in variables {
                    let value = self
                        .evaluator
                        .evaluate(expr, &self.context.scope_with(&frame))?;
                    frame.set(name.clone(), value);
                }
                debug!(step = %step.uuid, variables = frame.vars().len(), "Entering block");

                let mut node = ResultNode::new(step);
                node.variables = frame.vars().clone();
                self.context.push_frame(frame);
                self.cursors
                    .push(Cursor::container(id, *child, Control::Block, node));
                Ok(false)
            }

            StepKind::Loop {
                collection,
                key,
                value,
                child,
            } => {
                let evaluated = self.evaluator.evaluate(collection, &self.context.scope())?;
                let mut items = iteration_items(step, evaluated)?;
                debug!(step = %step.uuid, items = items.len(), "Entering loop");

                let mut node = ResultNode::new(step);
                match items.pop_front() {
                    None => self.record(node),
                    Some((k, v)) => {
                        node.begin_iteration(Some(k.clone()), Some(v.clone()));
                        let mut frame = Frame::new();
                        frame.set(key.clone(), k);
                        frame.set(value.clone(), v);
                        self.context.push_frame(frame);
                        self.cursors.push(Cursor::container(
                            id,
                            *child,
                            Control::Loop { items },
                            node,
                        ));
                    }
                }
                Ok(false)
            }

            StepKind::While { condition, child } => {
                let mut node = ResultNode::new(step);
                if self
                    .evaluator
                    .evaluate_condition(condition, &self.context.scope_with(&Frame::new()))?
                {
                    debug!(step = %step.uuid, "Entering while");
                    node.begin_iteration(Some(Value::from(0)), None);
                    self.context.push_frame(Frame::new());
                    self.cursors.push(Cursor::container(
                        id,
                        *child,
                        Control::While { iterations: 1 },
                        node,
                    ));
                } else {
                    self.record(node);
                }
                Ok(false)
            }

            StepKind::Condition {
                condition,
                then_branch,
                else_branch,
            } => {
                let holds = self
                    .evaluator
                    .evaluate_condition(condition, &self.context.scope())?;
                debug!(step = %step.uuid, holds, "Entering condition");

                let mut node = ResultNode::new(step);
                let head = if holds {
                    node.branch = Some(Branch::Then);
                    *then_branch
                } else {
                    node.branch = Some(Branch::Else);
                    *else_branch
                };
                self.context.push_frame(Frame::new());
                self.cursors
                    .push(Cursor::container(id, head, Control::Condition, node));
                Ok(false)
            }
        }
    }

    /// Restart the innermost chain for another Loop/While iteration.
    fn rewind_top(&mut self) -> EngineResult<bool> {
        let graph = Arc::clone(&self.graph);
        let max_while_iterations = self.max_while_iterations;
        let Some(top) = self.cursors.last_mut() else {
            return Ok(false);
        };
        let Some(id) = top.step else {
            return Ok(false);
        };
        let step = graph.step(id);

        match (&mut top.control, &step.kind) {
            (
                Control::Loop { items },
                StepKind::Loop {
                    key, value, child, ..
                },
            ) => {
                let Some((k, v)) = items.pop_front() else {
                    return Ok(false);
                };
                if let Some(node) = top.node.as_mut() {
                    node.begin_iteration(Some(k.clone()), Some(v.clone()));
                }
                top.position = *child;

                self.context.pop_frame();
                let mut frame = Frame::new();
                frame.set(key.clone(), k);
                frame.set(value.clone(), v);
                self.context.push_frame(frame);
                Ok(true)
            }

            (Control::While { iterations }, StepKind::While { condition, child }) => {
                let carried = self.context.pop_frame().unwrap_or_default();
                self.context
                    .push_frame(Frame::from_vars(carried.into_vars()));
                if !self
                    .evaluator
                    .evaluate_condition(condition, &self.context.scope())?
                {
                    return Ok(false);
                }
                if *iterations >= max_while_iterations {
                    return Err(EngineError::Configuration(format!(
                        "While step {} exceeded {} iterations",
                        step.uuid, max_while_iterations
                    )));
                }
                if let Some(node) = top.node.as_mut() {
                    node.begin_iteration(Some(Value::from(*iterations)), None);
                }
                *iterations += 1;
                top.position = *child;
                Ok(true)
            }

            _ => Ok(false),
        }
    }

    /// Leave the innermost container.
    fn close_top(&mut self) {
        let Some(cursor) = self.cursors.pop() else {
            return;
        };
        self.context.pop_frame();
        if let Some(node) = cursor.node {
            trace!(step = %node.uuid, kind = %node.kind, "Leaving container");
            self.record(node);
        }
    }

    /// Attach a finished node to the innermost open container.
    fn record(&mut self, node: ResultNode) {
        match self.cursors.last_mut().and_then(|c| c.node.as_mut()) {
            Some(parent) => parent.push_child(node),
            None => self.results.push(node),
        }
    }
}
