//! Scenario runner binary.

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use scenario_cli::{Cli, RunnerConfig};

/// Initialize tracing/logging.
fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,scenario_engine=debug,scenario_cli=debug".into());
    let registry = tracing_subscriber::registry().with(filter);

    // Logs go to stderr so reports on stdout stay machine-readable.
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = RunnerConfig::from_env()?;
    tracing::debug!(?config, "Loaded configuration");

    let code = tokio::select! {
        result = cli.command.execute(config) => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted");
            130
        }
    };

    std::process::exit(code);
}
