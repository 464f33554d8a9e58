use serde_json::Value;
use tracing::trace;
use url::Url;

use crate::converter::{Exchange, StepConverter};
use crate::error::{EngineError, EngineResult};
use crate::expression::{to_display_string, Evaluator};
use crate::graph::{Leaf, Step, StepKind};
use crate::scope::Scope;

use super::types::{HttpRequest, HttpResponse};

/// Correlation headers removed before a redirect is followed.
pub const DEFAULT_STRIP_HEADERS: &[&str] = &["x-profiling-query", "x-profiling-uuid"];

type HttpExchange = Exchange<HttpRequest, HttpResponse>;

/// Converts leaf steps into [`HttpRequest`]s.
#[derive(Debug, Clone)]
pub struct HttpStepConverter {
    base_url: Option<Url>,
    strip_headers: Vec<String>,
}

impl Default for HttpStepConverter {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpStepConverter {
    pub fn new() -> Self {
        Self {
            base_url: None,
            strip_headers: DEFAULT_STRIP_HEADERS.iter().map(|h| h.to_string()).collect(),
        }
    }

    /// Resolve relative Visit URLs against `endpoint`.
    pub fn with_endpoint(mut self, endpoint: &str) -> EngineResult<Self> {
        let url = Url::parse(endpoint).map_err(|e| {
            EngineError::Configuration(format!("Invalid endpoint '{}': {}", endpoint, e))
        })?;
        self.base_url = Some(url);
        Ok(self)
    }

    /// Replace the headers stripped when following redirects.
    pub fn with_strip_headers<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.strip_headers = headers
            .into_iter()
            .map(|h| h.into().to_ascii_lowercase())
            .collect();
        self
    }

    pub fn base_url(&self) -> Option<&Url> {
        self.base_url.as_ref()
    }

    #[allow(clippy::too_many_arguments)]
    fn visit(
        &self,
        step: &Step,
        url: &str,
        method: Option<&str>,
        body: Option<&str>,
        scope: &Scope<'_>,
        evaluator: &dyn Evaluator,
        previous: Option<&HttpExchange>,
    ) -> EngineResult<HttpRequest> {
        let target = to_display_string(&evaluator.evaluate(url, scope)?);
        let absolute = self.resolve_url(&target, previous)?;

        let method = match method {
            Some(expr) => to_display_string(&evaluator.evaluate(expr, scope)?),
            None => "GET".to_string(),
        };
        if method.trim().is_empty() {
            return Err(EngineError::Configuration(format!(
                "Step {} evaluated to an empty method",
                step.uuid
            )));
        }

        let mut request = HttpRequest::new(method.trim(), absolute);
        if let Some(expr) = body {
            match evaluator.evaluate(expr, scope)? {
                Value::Null => {}
                Value::String(s) => request.body = Some(s),
                other => {
                    request.body = Some(serde_json::to_string(&other)?);
                    request.set_header("content-type", "application/json");
                }
            }
        }
        Ok(request)
    }

    fn click(
        &self,
        step: &Step,
        link: &str,
        scope: &Scope<'_>,
        evaluator: &dyn Evaluator,
        previous: Option<&HttpExchange>,
    ) -> EngineResult<HttpRequest> {
        let previous = require_previous(step, previous)?;
        let link = to_display_string(&evaluator.evaluate(link, scope)?);
        let url = join(&previous.request.url, &link)?;
        Ok(HttpRequest::get(url))
    }

    fn follow(&self, step: &Step, previous: Option<&HttpExchange>) -> EngineResult<HttpRequest> {
        let previous = require_previous(step, previous)?;
        let location = previous.response.location().ok_or_else(|| {
            EngineError::Configuration(format!(
                "Step {} follows a response that is not a redirect (status {})",
                step.uuid, previous.response.status
            ))
        })?;

        let mut request = previous.request.clone();
        request.url = join(&previous.request.url, location)?;
        if !matches!(previous.response.status, 307 | 308) {
            request.method = "GET".to_string();
            request.body = None;
            request.remove_header("content-type");
            request.remove_header("content-length");
        }
        for name in &self.strip_headers {
            request.remove_header(name);
        }
        Ok(request)
    }

    fn resolve_url(&self, target: &str, previous: Option<&HttpExchange>) -> EngineResult<String> {
        if let Ok(url) = Url::parse(target) {
            return Ok(url.to_string());
        }
        if let Some(base) = &self.base_url {
            return base
                .join(target)
                .map(|u| u.to_string())
                .map_err(|e| bad_url(target, e));
        }
        match previous {
            Some(exchange) => join(&exchange.request.url, target),
            None => Err(EngineError::Configuration(format!(
                "Relative URL '{}' needs an endpoint",
                target
            ))),
        }
    }
}

impl StepConverter for HttpStepConverter {
    type Request = HttpRequest;
    type Response = HttpResponse;

    fn convert(
        &self,
        step: &Step,
        scope: &Scope<'_>,
        evaluator: &dyn Evaluator,
        previous: Option<&HttpExchange>,
    ) -> EngineResult<HttpRequest> {
        let (mut request, leaf) = match &step.kind {
            StepKind::Visit {
                url,
                method,
                body,
                leaf,
            } => (
                self.visit(
                    step,
                    url,
                    method.as_deref(),
                    body.as_deref(),
                    scope,
                    evaluator,
                    previous,
                )?,
                leaf,
            ),
            StepKind::Click { link, leaf } => {
                (self.click(step, link, scope, evaluator, previous)?, leaf)
            }
            StepKind::Reload { leaf } => (require_previous(step, previous)?.request.clone(), leaf),
            StepKind::Follow { leaf } => (self.follow(step, previous)?, leaf),
            _ => {
                return Err(EngineError::Configuration(format!(
                    "Step {} ({}) does not produce a request",
                    step.uuid,
                    step.step_type()
                )))
            }
        };

        apply_headers(&mut request, leaf, scope, evaluator)?;
        trace!(step = %step.uuid, method = %request.method, url = %request.url, "Converted step");
        Ok(request)
    }
}

fn apply_headers(
    request: &mut HttpRequest,
    leaf: &Leaf,
    scope: &Scope<'_>,
    evaluator: &dyn Evaluator,
) -> EngineResult<()> {
    for (name, expr) in &leaf.headers {
        let value = to_display_string(&evaluator.evaluate(expr, scope)?);
        request.set_header(name, value);
    }
    Ok(())
}

fn require_previous<'a>(
    step: &Step,
    previous: Option<&'a HttpExchange>,
) -> EngineResult<&'a HttpExchange> {
    previous.ok_or_else(|| {
        EngineError::Configuration(format!(
            "Step {} ({}) needs a previous request",
            step.uuid,
            step.step_type()
        ))
    })
}

fn join(base: &str, reference: &str) -> EngineResult<String> {
    let base = Url::parse(base).map_err(|e| bad_url(base, e))?;
    base.join(reference)
        .map(|u| u.to_string())
        .map_err(|e| bad_url(reference, e))
}

fn bad_url(url: &str, err: url::ParseError) -> EngineError {
    EngineError::Configuration(format!("Invalid URL '{}': {}", url, err))
}
