//! Scenario document types (YAML).

use indexmap::IndexMap;
use serde::Deserialize;

/// Top level of a scenario file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScenarioFile {
    /// File-level name; also the scenario name of single-scenario files.
    #[serde(default)]
    pub name: Option<String>,

    /// Base URL for relative Visit URLs.
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Literal values shared by every scenario of the file.
    #[serde(default)]
    pub variables: IndexMap<String, serde_json::Value>,

    #[serde(default)]
    pub scenarios: Vec<ScenarioDoc>,

    /// Steps of a single-scenario file.
    #[serde(default)]
    pub steps: Option<Vec<serde_yaml::Value>>,
}

/// One scenario of a file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScenarioDoc {
    pub name: String,

    #[serde(default)]
    pub endpoint: Option<String>,

    /// Literal values, overriding the file's.
    #[serde(default)]
    pub variables: IndexMap<String, serde_json::Value>,

    #[serde(default)]
    pub steps: Vec<serde_yaml::Value>,
}

/// Keys every step may carry besides its kind key.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommonDoc {
    #[serde(default)]
    pub uuid: Option<String>,

    #[serde(default)]
    pub name: Option<String>,

    /// Request headers (`name -> expression`).
    #[serde(default)]
    pub headers: IndexMap<String, String>,

    /// Extractions (`name -> expression`).
    #[serde(default)]
    pub set: IndexMap<String, String>,

    /// Assertions.
    #[serde(default)]
    pub expect: Vec<String>,
}

/// `visit:` either as a bare URL expression or a full mapping.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum VisitDoc {
    Url(String),
    Full(VisitSpec),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VisitSpec {
    pub url: String,

    #[serde(default)]
    pub method: Option<String>,

    #[serde(default)]
    pub body: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BlockDoc {
    /// Declarations, evaluated in order.
    #[serde(default)]
    pub variables: IndexMap<String, serde_yaml::Value>,

    #[serde(default)]
    pub steps: Vec<serde_yaml::Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoopDoc {
    /// Collection expression.
    pub over: String,

    #[serde(default = "default_key")]
    pub key: String,

    #[serde(default = "default_value")]
    pub value: String,

    #[serde(default)]
    pub steps: Vec<serde_yaml::Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WhileDoc {
    pub condition: String,

    #[serde(default)]
    pub steps: Vec<serde_yaml::Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IfDoc {
    pub condition: String,

    #[serde(default)]
    pub then: Vec<serde_yaml::Value>,

    #[serde(default, rename = "else")]
    pub otherwise: Vec<serde_yaml::Value>,
}

fn default_key() -> String {
    "key".to_string()
}

fn default_value() -> String {
    "value".to_string()
}
