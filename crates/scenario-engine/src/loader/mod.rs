//! Scenario file loading.
//!
//! - Type definitions for the YAML document
//! - Parsing into [`StepGraph`]s and base values

pub mod parser;
pub mod types;

use std::path::Path;
use std::sync::Arc;

use crate::error::{EngineError, EngineResult};
use crate::graph::StepGraph;
use crate::scope::ValueBag;

pub use parser::{parse_scenarios, STEP_KINDS};
pub use types::{CommonDoc, ScenarioDoc, ScenarioFile};

/// A parsed scenario, ready to run.
#[derive(Debug, Clone)]
pub struct Scenario {
    pub name: String,

    /// Base URL from the scenario or its file.
    pub endpoint: Option<String>,

    pub graph: Arc<StepGraph>,

    pub values: ValueBag,
}

/// Parse scenarios from YAML text.
pub fn load_str(yaml_content: &str) -> EngineResult<Vec<Scenario>> {
    parse_scenarios(yaml_content)
}

/// Read and parse a scenario file.
pub fn load_file(path: impl AsRef<Path>) -> EngineResult<Vec<Scenario>> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .map_err(|e| EngineError::Parse(format!("Cannot read {}: {}", path.display(), e)))?;
    parse_scenarios(&content)
        .map_err(|e| EngineError::Parse(format!("{}: {}", path.display(), strip_kind(&e))))
}

fn strip_kind(err: &EngineError) -> String {
    match err {
        EngineError::Parse(msg) => msg.clone(),
        other => other.to_string(),
    }
}
