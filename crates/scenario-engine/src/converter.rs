//! Step-to-request conversion seam.
//!
//! The engine does not know what a request is. A [`StepConverter`] turns a
//! request-producing step into a concrete request, given the current scope
//! and the previous exchange of the run.

use std::fmt::Debug;

use serde::Serialize;

use crate::error::EngineResult;
use crate::expression::Evaluator;
use crate::graph::Step;
use crate::scope::Scope;

/// A completed request/response pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Exchange<Req, Resp> {
    pub request: Req,
    pub response: Resp,
}

/// Builds requests for leaf steps.
pub trait StepConverter: Send + Sync {
    type Request: Clone + PartialEq + Debug + Serialize + Send;
    type Response: Clone + Debug + Serialize + Send;

    /// Convert a Visit/Click/Reload/Follow step into a request.
    fn convert(
        &self,
        step: &Step,
        scope: &Scope<'_>,
        evaluator: &dyn Evaluator,
        previous: Option<&Exchange<Self::Request, Self::Response>>,
    ) -> EngineResult<Self::Request>;
}
