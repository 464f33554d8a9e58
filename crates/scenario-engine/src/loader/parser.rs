//! Scenario YAML parser.
//!
//! Each step is a mapping with exactly one kind key (`visit`, `click`,
//! `reload`, `follow`, `empty`, `block`, `loop`, `while`, `if`) plus the
//! common keys `uuid`, `name`, `headers`, `set` and `expect`.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_yaml::{Mapping, Value as YamlValue};
use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::graph::{GraphBuilder, Leaf, Step, StepGraph, StepId, StepKind};
use crate::scope::ValueBag;

use super::types::{
    BlockDoc, CommonDoc, IfDoc, LoopDoc, ScenarioDoc, ScenarioFile, VisitDoc, WhileDoc,
};
use super::Scenario;

/// Keys selecting the kind of a step.
pub const STEP_KINDS: &[&str] = &[
    "visit", "click", "reload", "follow", "empty", "block", "loop", "while", "if",
];

/// Parse a YAML document into its scenarios.
pub fn parse_scenarios(yaml_content: &str) -> EngineResult<Vec<Scenario>> {
    let file: ScenarioFile =
        serde_yaml::from_str(yaml_content).map_err(|e| EngineError::Parse(e.to_string()))?;

    let docs = match (file.steps, file.scenarios.is_empty()) {
        (Some(_), false) => {
            return Err(EngineError::Parse(
                "A file declares either top-level 'steps' or 'scenarios', not both".to_string(),
            ))
        }
        (Some(steps), true) => vec![ScenarioDoc {
            name: file.name.clone().unwrap_or_else(|| "scenario".to_string()),
            endpoint: None,
            variables: Default::default(),
            steps,
        }],
        (None, false) => file.scenarios,
        (None, true) => {
            return Err(EngineError::Parse(
                "File declares no scenarios".to_string(),
            ))
        }
    };

    let mut seen = std::collections::HashSet::new();
    let mut scenarios = Vec::with_capacity(docs.len());
    for (idx, doc) in docs.into_iter().enumerate() {
        if !seen.insert(doc.name.clone()) {
            return Err(EngineError::Parse(format!(
                "Duplicate scenario name: {}",
                doc.name
            )));
        }

        let mut values: ValueBag = file.variables.clone();
        values.extend(doc.variables);

        let mut builder = StepGraph::builder();
        let path = format!("scenarios[{}]", idx);
        let head = build_chain(&mut builder, &doc.steps, &path)?;
        let graph = builder.build(head)?;
        debug!(scenario = %doc.name, steps = graph.len(), "Parsed scenario");

        scenarios.push(Scenario {
            name: doc.name,
            endpoint: doc.endpoint.or_else(|| file.endpoint.clone()),
            graph: Arc::new(graph),
            values,
        });
    }

    Ok(scenarios)
}

/// Add every step of a chain, then link them. Returns the chain head.
fn build_chain(
    builder: &mut GraphBuilder,
    docs: &[YamlValue],
    path: &str,
) -> EngineResult<Option<StepId>> {
    let mut ids = Vec::with_capacity(docs.len());
    for (idx, doc) in docs.iter().enumerate() {
        let step_path = format!("{}.steps[{}]", path, idx);
        ids.push(build_step(builder, doc, &step_path)?);
    }
    Ok(builder.chain(&ids))
}

fn build_step(builder: &mut GraphBuilder, doc: &YamlValue, path: &str) -> EngineResult<StepId> {
    let mut mapping = doc
        .as_mapping()
        .cloned()
        .ok_or_else(|| parse_error(path, "a step must be a mapping"))?;

    let kinds: Vec<&str> = STEP_KINDS
        .iter()
        .copied()
        .filter(|k| mapping.contains_key(*k))
        .collect();
    let kind_key = match kinds.as_slice() {
        [one] => *one,
        [] => {
            return Err(parse_error(
                path,
                &format!("a step needs one of: {}", STEP_KINDS.join(", ")),
            ))
        }
        many => {
            return Err(parse_error(
                path,
                &format!("a step has more than one kind: {}", many.join(", ")),
            ))
        }
    };
    let body = mapping.remove(kind_key).unwrap_or(YamlValue::Null);
    let common: CommonDoc = from_yaml(YamlValue::Mapping(mapping), path)?;

    let leaf = Leaf {
        headers: common.headers.clone(),
        extractions: common.set.clone(),
        assertions: common.expect.clone(),
    };
    let is_leaf = matches!(kind_key, "visit" | "click" | "reload" | "follow");
    let has_leaf_config =
        !leaf.headers.is_empty() || !leaf.extractions.is_empty() || !leaf.assertions.is_empty();
    if !is_leaf && has_leaf_config {
        return Err(parse_error(
            path,
            &format!("'{}' steps cannot carry headers, set or expect", kind_key),
        ));
    }

    let kind = match kind_key {
        "visit" => match from_yaml::<VisitDoc>(body, path)? {
            VisitDoc::Url(url) => StepKind::Visit {
                url,
                method: None,
                body: None,
                leaf,
            },
            VisitDoc::Full(parsed) => StepKind::Visit {
                url: parsed.url,
                method: parsed.method,
                body: parsed.body,
                leaf,
            },
        },
        "click" => StepKind::Click {
            link: from_yaml(body, path)?,
            leaf,
        },
        "reload" => {
            expect_null(&body, "reload", path)?;
            StepKind::Reload { leaf }
        }
        "follow" => {
            expect_null(&body, "follow", path)?;
            StepKind::Follow { leaf }
        }
        "empty" => {
            expect_null(&body, "empty", path)?;
            StepKind::Empty
        }
        "block" => {
            let block: BlockDoc = from_yaml(body, path)?;
            let mut variables = indexmap::IndexMap::new();
            for (name, value) in block.variables {
                variables.insert(name.clone(), expression_text(&value, path, &name)?);
            }
            StepKind::Block {
                variables,
                child: build_chain(builder, &block.steps, &format!("{}.block", path))?,
            }
        }
        "loop" => {
            let parsed: LoopDoc = from_yaml(body, path)?;
            StepKind::Loop {
                collection: parsed.over,
                key: parsed.key,
                value: parsed.value,
                child: build_chain(builder, &parsed.steps, &format!("{}.loop", path))?,
            }
        }
        "while" => {
            let parsed: WhileDoc = from_yaml(body, path)?;
            StepKind::While {
                condition: parsed.condition,
                child: build_chain(builder, &parsed.steps, &format!("{}.while", path))?,
            }
        }
        "if" => {
            let parsed: IfDoc = from_yaml(body, path)?;
            StepKind::Condition {
                condition: parsed.condition,
                then_branch: build_chain(builder, &parsed.then, &format!("{}.then", path))?,
                else_branch: build_chain(builder, &parsed.otherwise, &format!("{}.else", path))?,
            }
        }
        other => return Err(parse_error(path, &format!("unknown step kind '{}'", other))),
    };

    let mut step = Step::new(kind);
    if let Some(uuid) = common.uuid {
        step = step.with_uuid(uuid);
    }
    if let Some(name) = common.name {
        step = step.with_name(name);
    }
    Ok(builder.add(step))
}

fn from_yaml<T: DeserializeOwned>(value: YamlValue, path: &str) -> EngineResult<T> {
    serde_yaml::from_value(value).map_err(|e| parse_error(path, &e.to_string()))
}

fn expect_null(value: &YamlValue, kind: &str, path: &str) -> EngineResult<()> {
    match value {
        YamlValue::Null => Ok(()),
        YamlValue::Mapping(m) if m == &Mapping::new() => Ok(()),
        _ => Err(parse_error(path, &format!("'{}' takes no value", kind))),
    }
}

/// Declarations may be written as plain YAML scalars; they are still expressions.
fn expression_text(value: &YamlValue, path: &str, name: &str) -> EngineResult<String> {
    match value {
        YamlValue::String(s) => Ok(s.clone()),
        YamlValue::Number(n) => Ok(n.to_string()),
        YamlValue::Bool(b) => Ok(b.to_string()),
        YamlValue::Null => Ok("none".to_string()),
        _ => Err(parse_error(
            path,
            &format!("declaration '{}' must be an expression string", name),
        )),
    }
}

fn parse_error(path: &str, message: &str) -> EngineError {
    EngineError::Parse(format!("{}: {}", path, message))
}
