//! Command-line surface.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::Value;

use scenario_engine::{
    load_file, validate, ExecutionMode, JinjaEvaluator, Scenario, ValidationReport, ValueBag,
};

use crate::config::RunnerConfig;
use crate::driver::{RunSettings, ScenarioReport, ScenarioStatus};
use crate::pool::run_all;
use crate::transport::{ReqwestTransport, Transport};

#[derive(Parser)]
#[command(name = "scenario")]
#[command(version, about = "Run HTTP scenarios one exchange at a time", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Emit JSON logs
    #[arg(long, global = true)]
    pub log_json: bool,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run scenario files against a target
    /// Examples:
    ///     scenario run login.yaml
    ///     scenario run suite/*.yaml --endpoint http://localhost:8000 --concurrency 8
    ///     scenario run checkout.yaml --set user=alice --set retries=3 --json
    #[command(verbatim_doc_comment)]
    Run(RunArgs),

    /// Check scenario files without sending requests
    /// Examples:
    ///     scenario validate login.yaml
    ///     scenario validate suite/*.yaml --restricted --json
    #[command(verbatim_doc_comment)]
    Validate(ValidateArgs),
}

#[derive(Args)]
pub struct RunArgs {
    /// Scenario files
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Base URL, overriding the files' endpoints
    #[arg(short, long)]
    pub endpoint: Option<String>,

    /// Scenarios run at once
    #[arg(short, long)]
    pub concurrency: Option<usize>,

    /// Variable override (KEY=VALUE, VALUE parsed as JSON when possible)
    #[arg(long = "set", value_name = "KEY=VALUE")]
    pub variables: Vec<String>,

    /// Forbid environment and file access from expressions
    #[arg(long)]
    pub restricted: bool,

    /// Emit reports as JSON
    #[arg(short, long)]
    pub json: bool,
}

#[derive(Args)]
pub struct ValidateArgs {
    /// Scenario files
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Variable assumed defined (KEY=VALUE)
    #[arg(long = "set", value_name = "KEY=VALUE")]
    pub variables: Vec<String>,

    /// Forbid environment and file access from expressions
    #[arg(long)]
    pub restricted: bool,

    /// Emit reports as JSON
    #[arg(short, long)]
    pub json: bool,
}

impl Command {
    /// Execute the command; returns the process exit code.
    pub async fn execute(self, config: RunnerConfig) -> Result<i32> {
        match self {
            Command::Run(args) => run(args, config).await,
            Command::Validate(args) => validate_files(args, config),
        }
    }
}

/// Parse `KEY=VALUE` overrides. Values that are valid JSON keep their type;
/// anything else is taken as a string.
pub fn parse_variables(pairs: &[String]) -> Result<ValueBag> {
    let mut vars = ValueBag::new();
    for pair in pairs {
        let Some((key, raw)) = pair.split_once('=') else {
            bail!("Invalid variable format '{}', expected KEY=VALUE", pair);
        };
        let key = key.trim();
        if key.is_empty() {
            bail!("Invalid variable format '{}', empty key", pair);
        }
        let value =
            serde_json::from_str::<Value>(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        vars.insert(key.to_string(), value);
    }
    Ok(vars)
}

/// Load every scenario of every file, in order.
pub fn load_scenarios(files: &[PathBuf]) -> Result<Vec<Scenario>> {
    let mut scenarios = Vec::new();
    for file in files {
        let loaded =
            load_file(file).with_context(|| format!("Failed to load {}", file.display()))?;
        tracing::debug!(file = %file.display(), scenarios = loaded.len(), "Loaded scenario file");
        scenarios.extend(loaded);
    }
    Ok(scenarios)
}

async fn run(args: RunArgs, config: RunnerConfig) -> Result<i32> {
    let scenarios = load_scenarios(&args.files)?;
    if scenarios.is_empty() {
        bail!("No scenarios to run");
    }

    let mut settings = RunSettings::from_config(&config);
    if args.endpoint.is_some() {
        settings.endpoint = args.endpoint;
    }
    if args.restricted {
        settings.mode = ExecutionMode::Restricted;
    }
    settings.variables = parse_variables(&args.variables)?;

    let concurrency = args.concurrency.unwrap_or(config.concurrency);
    let transport: Arc<dyn Transport> = Arc::new(ReqwestTransport::new(config.timeout())?);
    let reports = run_all(scenarios, Arc::new(settings), transport, concurrency).await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        print_reports(&reports);
    }

    Ok(if reports.iter().all(ScenarioReport::passed) {
        0
    } else {
        1
    })
}

fn print_reports(reports: &[ScenarioReport]) {
    for report in reports {
        println!(
            "{:<8} {} ({} requests, {} ms)",
            report.status.to_string().to_uppercase(),
            report.name,
            report.requests,
            report.duration_ms
        );
        for failure in &report.failures {
            println!("         {}", failure);
        }
        if let Some(error) = &report.error {
            println!("         {}", error);
        }
    }

    let count = |status: ScenarioStatus| reports.iter().filter(|r| r.status == status).count();
    println!();
    println!(
        "{} passed, {} failed, {} errored",
        count(ScenarioStatus::Passed),
        count(ScenarioStatus::Failed),
        count(ScenarioStatus::Errored)
    );
}

#[derive(serde::Serialize)]
struct ValidationEntry {
    scenario: String,
    #[serde(flatten)]
    report: ValidationReport,
}

fn validate_files(args: ValidateArgs, config: RunnerConfig) -> Result<i32> {
    let scenarios = load_scenarios(&args.files)?;
    let overrides = parse_variables(&args.variables)?;
    let evaluator = if args.restricted || config.restricted {
        JinjaEvaluator::restricted()
    } else {
        JinjaEvaluator::new()
    };

    let entries: Vec<ValidationEntry> = scenarios
        .iter()
        .map(|scenario| {
            let mut values = scenario.values.clone();
            values.extend(overrides.clone());
            ValidationEntry {
                scenario: scenario.name.clone(),
                report: validate(&scenario.graph, &values, &evaluator),
            }
        })
        .collect();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else {
        for entry in &entries {
            if entry.report.is_ok() {
                println!("OK       {}", entry.scenario);
                continue;
            }
            println!("INVALID  {}", entry.scenario);
            for name in &entry.report.missing {
                println!("         undefined variable: {}", name);
            }
            for issue in &entry.report.errors {
                println!("         step {}: {}", issue.step, issue.message);
            }
        }
    }

    Ok(if entries.iter().all(|e| e.report.is_ok()) {
        0
    } else {
        1
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_variables() {
        let vars = parse_variables(&[
            "user=alice".to_string(),
            "retries=3".to_string(),
            "flags={\"a\": true}".to_string(),
            "query=a=b".to_string(),
            "quoted=\"42\"".to_string(),
        ])
        .unwrap();
        assert_eq!(vars["user"], json!("alice"));
        assert_eq!(vars["retries"], json!(3));
        assert_eq!(vars["flags"], json!({"a": true}));
        assert_eq!(vars["query"], json!("a=b"));
        assert_eq!(vars["quoted"], json!("42"));
    }

    #[test]
    fn test_parse_variables_rejects_malformed() {
        assert!(parse_variables(&["novalue".to_string()]).is_err());
        assert!(parse_variables(&["=x".to_string()]).is_err());
    }

    #[test]
    fn test_cli_parses_run() {
        let cli = Cli::try_parse_from([
            "scenario",
            "run",
            "a.yaml",
            "b.yaml",
            "--endpoint",
            "http://localhost:8000",
            "-c",
            "2",
            "--set",
            "user=bob",
            "--json",
        ])
        .unwrap();
        match cli.command {
            Command::Run(args) => {
                assert_eq!(args.files.len(), 2);
                assert_eq!(args.endpoint.as_deref(), Some("http://localhost:8000"));
                assert_eq!(args.concurrency, Some(2));
                assert_eq!(args.variables, vec!["user=bob"]);
                assert!(args.json);
                assert!(!args.restricted);
            }
            Command::Validate(_) => panic!("expected run"),
        }
    }

    #[test]
    fn test_cli_requires_files() {
        assert!(Cli::try_parse_from(["scenario", "validate"]).is_err());
    }

    #[test]
    fn test_load_scenarios_reports_path() {
        let err = load_scenarios(&[PathBuf::from("/nonexistent/scenario.yaml")]).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/scenario.yaml"));
    }
}
