//! Peek/Resume driver.
//!
//! Runs one scenario to completion: peek a request, send it, resume with
//! the response, until the engine reports completion or an error.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use scenario_engine::{
    Engine, EngineError, ExecutionMode, HttpStepConverter, JinjaEvaluator, Next, ResultTree,
    Scenario, ValueBag,
};

use crate::config::RunnerConfig;
use crate::transport::{Transport, TransportError};

/// Final outcome of a scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioStatus {
    /// Every assertion held.
    Passed,
    /// An assertion did not hold.
    Failed,
    /// The scenario or the transport broke.
    Errored,
}

impl std::fmt::Display for ScenarioStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Passed => write!(f, "passed"),
            Self::Failed => write!(f, "failed"),
            Self::Errored => write!(f, "errored"),
        }
    }
}

/// Report of one scenario run.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub name: String,

    pub status: ScenarioStatus,

    /// Failing assertion messages.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<String>,

    /// Fatal error message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Completed exchanges.
    pub requests: u64,

    pub results: ResultTree,

    pub started_at: DateTime<Utc>,

    pub duration_ms: u64,
}

impl ScenarioReport {
    /// Report for a scenario that could not run at all.
    pub fn errored(name: &str, error: impl std::fmt::Display) -> Self {
        Self {
            name: name.to_string(),
            status: ScenarioStatus::Errored,
            failures: Vec::new(),
            error: Some(error.to_string()),
            requests: 0,
            results: ResultTree::default(),
            started_at: Utc::now(),
            duration_ms: 0,
        }
    }

    pub fn passed(&self) -> bool {
        self.status == ScenarioStatus::Passed
    }
}

/// Settings shared by every scenario of an invocation.
#[derive(Debug, Clone, Default)]
pub struct RunSettings {
    /// Overrides the scenario's own endpoint.
    pub endpoint: Option<String>,

    /// Values overriding the scenario's base values.
    pub variables: ValueBag,

    pub mode: ExecutionMode,

    pub strip_headers: Vec<String>,
}

impl RunSettings {
    pub fn from_config(config: &RunnerConfig) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            variables: ValueBag::new(),
            mode: if config.restricted {
                ExecutionMode::Restricted
            } else {
                ExecutionMode::Full
            },
            strip_headers: config.strip_headers.clone(),
        }
    }
}

#[derive(Debug, Error)]
enum RunError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Run one scenario to completion.
pub async fn run_scenario(
    scenario: &Scenario,
    settings: &RunSettings,
    transport: &dyn Transport,
) -> ScenarioReport {
    let started_at = Utc::now();
    let clock = Instant::now();

    let mut engine = match build_engine(scenario, settings) {
        Ok(engine) => engine,
        Err(e) => return ScenarioReport::errored(&scenario.name, e),
    };

    let outcome = drive(&mut engine, transport).await;

    let mut report = ScenarioReport {
        name: scenario.name.clone(),
        status: ScenarioStatus::Passed,
        failures: Vec::new(),
        error: None,
        requests: engine.context().completed(),
        results: engine.results(),
        started_at,
        duration_ms: clock.elapsed().as_millis() as u64,
    };

    match outcome {
        Ok(()) => {}
        Err(RunError::Engine(EngineError::Expectation(failure))) => {
            report.status = ScenarioStatus::Failed;
            report.failures = failure.failures;
        }
        Err(e) => {
            report.status = ScenarioStatus::Errored;
            report.error = Some(e.to_string());
        }
    }

    match report.status {
        ScenarioStatus::Passed => info!(
            scenario = %report.name,
            requests = report.requests,
            duration_ms = report.duration_ms,
            "Scenario passed"
        ),
        status => warn!(
            scenario = %report.name,
            %status,
            requests = report.requests,
            "Scenario did not pass"
        ),
    }
    report
}

fn build_engine(
    scenario: &Scenario,
    settings: &RunSettings,
) -> Result<Engine<HttpStepConverter>, EngineError> {
    let mut converter = HttpStepConverter::new().with_strip_headers(settings.strip_headers.clone());
    if let Some(endpoint) = settings.endpoint.as_ref().or(scenario.endpoint.as_ref()) {
        converter = converter.with_endpoint(endpoint)?;
    }

    let mut values = scenario.values.clone();
    values.extend(settings.variables.clone());

    Ok(
        Engine::new(Arc::clone(&scenario.graph), values, converter)
            .with_evaluator(Arc::new(JinjaEvaluator::with_mode(settings.mode))),
    )
}

async fn drive(
    engine: &mut Engine<HttpStepConverter>,
    transport: &dyn Transport,
) -> Result<(), RunError> {
    while let Next::Request(pending) = engine.peek()? {
        let response = transport.send(&pending.request).await?;
        engine.resume(&pending.request, response)?;
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use scenario_engine::{load_str, HttpRequest, HttpResponse};

    /// Answers from a fixed table keyed by `METHOD url`; 404 otherwise.
    #[derive(Default)]
    pub(crate) struct MemoryTransport {
        routes: HashMap<String, HttpResponse>,
        pub sent: Mutex<Vec<HttpRequest>>,
    }

    impl MemoryTransport {
        pub fn route(mut self, method: &str, url: &str, response: HttpResponse) -> Self {
            self.routes.insert(format!("{} {}", method, url), response);
            self
        }

        pub fn sent_urls(&self) -> Vec<String> {
            self.sent
                .lock()
                .map(|sent| sent.iter().map(|r| r.url.clone()).collect())
                .unwrap_or_default()
        }
    }

    #[async_trait]
    impl Transport for MemoryTransport {
        async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
            if let Ok(mut sent) = self.sent.lock() {
                sent.push(request.clone());
            }
            let key = format!("{} {}", request.method, request.url);
            Ok(self
                .routes
                .get(&key)
                .cloned()
                .unwrap_or_else(|| HttpResponse::new(404)))
        }
    }

    struct FailingTransport;

    #[async_trait]
    impl Transport for FailingTransport {
        async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
            Err(TransportError::Timeout(request.url.clone()))
        }
    }

    const LOGIN: &str = r#"
name: login
endpoint: http://app.local
variables: { user: alice }
steps:
  - visit: { url: "'/login'", method: "'POST'", body: "{'user': user}" }
    set: { session: "response.headers['set-cookie']" }
    expect: ["response.status == 302"]
  - follow: ~
    headers: { cookie: "session" }
    expect: ["response.status == 200", "'Welcome' in response.body"]
"#;

    fn login_transport() -> MemoryTransport {
        MemoryTransport::default()
            .route(
                "POST",
                "http://app.local/login",
                HttpResponse::new(302)
                    .with_header("location", "/home")
                    .with_header("set-cookie", "sid=1"),
            )
            .route(
                "GET",
                "http://app.local/home",
                HttpResponse::new(200).with_body("Welcome alice"),
            )
    }

    #[tokio::test]
    async fn test_passing_scenario() {
        let scenario = load_str(LOGIN).unwrap().remove(0);
        let transport = login_transport();
        let report = run_scenario(&scenario, &RunSettings::default(), &transport).await;

        assert_eq!(report.status, ScenarioStatus::Passed, "{:?}", report.error);
        assert_eq!(report.requests, 2);
        assert_eq!(
            transport.sent_urls(),
            vec!["http://app.local/login", "http://app.local/home"]
        );
        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent[1].header("cookie"), Some("sid=1"));
        assert_eq!(sent[1].body, None);
    }

    #[tokio::test]
    async fn test_failed_assertion() {
        let scenario = load_str(LOGIN).unwrap().remove(0);
        let transport = MemoryTransport::default().route(
            "POST",
            "http://app.local/login",
            HttpResponse::new(401),
        );
        let report = run_scenario(&scenario, &RunSettings::default(), &transport).await;

        assert_eq!(report.status, ScenarioStatus::Failed);
        assert_eq!(
            report.failures,
            vec!["Assertion failed: response.status == 302".to_string()]
        );
        assert_eq!(report.requests, 0);
        assert_eq!(report.results.steps.len(), 1);
        assert_eq!(transport.sent_urls().len(), 1);
    }

    #[tokio::test]
    async fn test_transport_failure_is_errored() {
        let scenario = load_str(LOGIN).unwrap().remove(0);
        let report = run_scenario(&scenario, &RunSettings::default(), &FailingTransport).await;
        assert_eq!(report.status, ScenarioStatus::Errored);
        assert!(report.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_endpoint_and_variable_overrides() {
        let scenario = load_str(LOGIN).unwrap().remove(0);
        let transport = MemoryTransport::default();
        let mut settings = RunSettings {
            endpoint: Some("http://staging.local".to_string()),
            ..RunSettings::default()
        };
        settings
            .variables
            .insert("user".to_string(), serde_json::json!("bob"));

        run_scenario(&scenario, &settings, &transport).await;
        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent[0].url, "http://staging.local/login");
        assert_eq!(sent[0].body.as_deref(), Some(r#"{"user":"bob"}"#));
    }

    #[tokio::test]
    async fn test_restricted_mode() {
        let scenario = load_str(
            "name: r\nendpoint: http://app.local\nsteps:\n  - visit: \"'/' ~ env('HOME')\"\n",
        )
        .unwrap()
        .remove(0);
        let settings = RunSettings {
            mode: ExecutionMode::Restricted,
            ..RunSettings::default()
        };
        let report = run_scenario(&scenario, &settings, &MemoryTransport::default()).await;
        assert_eq!(report.status, ScenarioStatus::Errored);
        assert!(report.error.unwrap().starts_with("Security error"));
    }

    #[test]
    fn test_report_serialization() {
        let report = ScenarioReport::errored("broken", "boom");
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], serde_json::json!("errored"));
        assert_eq!(json["error"], serde_json::json!("boom"));
        assert!(json.get("failures").is_none());
    }
}
