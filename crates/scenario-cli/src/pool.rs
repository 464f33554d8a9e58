//! Concurrent scenario runs.
//!
//! Each scenario gets its own engine; a semaphore bounds how many are in
//! flight at once. Reports come back in input order.

use std::sync::Arc;

use tokio::sync::Semaphore;

use scenario_engine::Scenario;

use crate::driver::{run_scenario, RunSettings, ScenarioReport};
use crate::transport::Transport;

/// Run every scenario, at most `concurrency` at a time.
pub async fn run_all(
    scenarios: Vec<Scenario>,
    settings: Arc<RunSettings>,
    transport: Arc<dyn Transport>,
    concurrency: usize,
) -> Vec<ScenarioReport> {
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    tracing::info!(
        scenarios = scenarios.len(),
        concurrency = concurrency.max(1),
        "Running scenarios"
    );

    let mut handles = Vec::with_capacity(scenarios.len());
    for scenario in scenarios {
        let semaphore = Arc::clone(&semaphore);
        let settings = Arc::clone(&settings);
        let transport = Arc::clone(&transport);
        let name = scenario.name.clone();

        let handle = tokio::spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => return ScenarioReport::errored(&scenario.name, e),
            };
            run_scenario(&scenario, &settings, transport.as_ref()).await
        });
        handles.push((name, handle));
    }

    let mut reports = Vec::with_capacity(handles.len());
    for (name, handle) in handles {
        let report = match handle.await {
            Ok(report) => report,
            Err(e) => {
                tracing::error!(scenario = %name, error = %e, "Scenario task panicked");
                ScenarioReport::errored(&name, format!("Scenario task failed: {}", e))
            }
        };
        reports.push(report);
    }
    reports
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use scenario_engine::{load_str, HttpRequest, HttpResponse};

    use crate::driver::ScenarioStatus;
    use crate::transport::TransportError;

    /// Tracks the highest number of requests in flight at once.
    #[derive(Default)]
    struct CountingTransport {
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl Transport for CountingTransport {
        async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            if request.url.ends_with("/missing") {
                Ok(HttpResponse::new(404))
            } else {
                Ok(HttpResponse::new(200))
            }
        }
    }

    fn scenarios() -> Vec<Scenario> {
        load_str(
            r#"
endpoint: http://app.local
scenarios:
  - name: first
    steps: [{ visit: "'/a'", expect: ["response.status == 200"] }]
  - name: second
    steps: [{ visit: "'/missing'", expect: ["response.status == 200"] }]
  - name: third
    steps: [{ visit: "'/c'" }, { reload: ~ }]
  - name: fourth
    steps: [{ visit: "'/d'" }]
"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_reports_keep_input_order() {
        let transport = Arc::new(CountingTransport::default());
        let reports = run_all(
            scenarios(),
            Arc::new(RunSettings::default()),
            transport.clone(),
            4,
        )
        .await;

        let names: Vec<&str> = reports.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["first", "second", "third", "fourth"]);
        assert_eq!(reports[1].status, ScenarioStatus::Failed);
        assert_eq!(reports[2].requests, 2);
        assert!(reports.iter().filter(|r| r.passed()).count() == 3);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let transport = Arc::new(CountingTransport::default());
        run_all(
            scenarios(),
            Arc::new(RunSettings::default()),
            transport.clone(),
            1,
        )
        .await;
        assert_eq!(transport.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_zero_concurrency_still_runs() {
        let reports = run_all(
            scenarios(),
            Arc::new(RunSettings::default()),
            Arc::new(CountingTransport::default()),
            0,
        )
        .await;
        assert_eq!(reports.len(), 4);
    }
}
