//! Scenario Runner
//!
//! Drives the scenario engine over real HTTP: loads scenario files, runs
//! them concurrently through the Peek/Resume protocol and reports results.
//!
//! ## Modules
//!
//! - [`config`]: Environment configuration
//! - [`transport`]: Request transport (reqwest)
//! - [`driver`]: Runs one scenario to completion
//! - [`pool`]: Bounded concurrent runs
//! - [`commands`]: Command-line surface

pub mod commands;
pub mod config;
pub mod driver;
pub mod pool;
pub mod transport;

pub use commands::{Cli, Command};
pub use config::RunnerConfig;
pub use driver::{run_scenario, RunSettings, ScenarioReport, ScenarioStatus};
pub use pool::run_all;
pub use transport::{ReqwestTransport, Transport, TransportError};
