//! Runner configuration.

use std::time::Duration;

use serde::Deserialize;

use scenario_engine::http::DEFAULT_STRIP_HEADERS;

/// Runner configuration loaded from environment variables.
///
/// Environment variables are prefixed with `SCENARIO_`:
/// - `SCENARIO_ENDPOINT`: Base URL overriding the scenario files' endpoint
/// - `SCENARIO_CONCURRENCY`: Scenarios run at once (default: 4)
/// - `SCENARIO_TIMEOUT_SECONDS`: Per-request timeout (default: 30)
/// - `SCENARIO_RESTRICTED`: Disable `env()` and `file()` in expressions
/// - `SCENARIO_STRIP_HEADERS`: Comma-separated headers dropped when following redirects
#[derive(Debug, Clone, Deserialize)]
pub struct RunnerConfig {
    /// Base URL overriding the scenario files' endpoint
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Maximum scenarios in flight
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Per-request timeout in seconds
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    /// Restricted expression mode
    #[serde(default)]
    pub restricted: bool,

    /// Headers stripped before following a redirect
    #[serde(default = "default_strip_headers")]
    pub strip_headers: Vec<String>,
}

fn default_concurrency() -> usize {
    4
}

fn default_timeout_seconds() -> u64 {
    30
}

fn default_strip_headers() -> Vec<String> {
    DEFAULT_STRIP_HEADERS.iter().map(|h| h.to_string()).collect()
}

impl RunnerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables are prefixed with `SCENARIO_`.
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::prefixed("SCENARIO_").from_env::<RunnerConfig>()
    }

    /// Per-request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            concurrency: default_concurrency(),
            timeout_seconds: default_timeout_seconds(),
            restricted: false,
            strip_headers: default_strip_headers(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_pairs(pairs: &[(&str, &str)]) -> RunnerConfig {
        envy::prefixed("SCENARIO_")
            .from_iter::<_, RunnerConfig>(
                pairs
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string())),
            )
            .unwrap()
    }

    #[test]
    fn test_default_config() {
        let config = RunnerConfig::default();
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.timeout(), Duration::from_secs(30));
        assert!(!config.restricted);
        assert_eq!(
            config.strip_headers,
            vec!["x-profiling-query".to_string(), "x-profiling-uuid".to_string()]
        );
    }

    #[test]
    fn test_empty_environment_uses_defaults() {
        let config = from_pairs(&[]);
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.endpoint, None);
        assert_eq!(config.strip_headers.len(), 2);
    }

    #[test]
    fn test_prefixed_values() {
        let config = from_pairs(&[
            ("SCENARIO_ENDPOINT", "http://staging:8080"),
            ("SCENARIO_CONCURRENCY", "16"),
            ("SCENARIO_RESTRICTED", "true"),
            ("SCENARIO_STRIP_HEADERS", "x-trace,x-debug"),
            ("OTHER_CONCURRENCY", "1"),
        ]);
        assert_eq!(config.endpoint.as_deref(), Some("http://staging:8080"));
        assert_eq!(config.concurrency, 16);
        assert!(config.restricted);
        assert_eq!(config.strip_headers, vec!["x-trace", "x-debug"]);
    }
}
