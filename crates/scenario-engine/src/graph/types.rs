//! Step node definitions.
//!
//! Steps live in an arena owned by [`super::StepGraph`] and refer to each
//! other through [`StepId`] handles: `next` for siblings, and kind-specific
//! handles for the head of each child chain.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Arena handle of a step inside its graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StepId(pub(crate) usize);

impl StepId {
    /// Position of the step in the arena.
    pub fn index(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for StepId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Serializable tag of a step kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Visit,
    Click,
    Reload,
    Follow,
    Block,
    Loop,
    While,
    Condition,
    Empty,
}

impl std::fmt::Display for StepType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StepType::Visit => "visit",
            StepType::Click => "click",
            StepType::Reload => "reload",
            StepType::Follow => "follow",
            StepType::Block => "block",
            StepType::Loop => "loop",
            StepType::While => "while",
            StepType::Condition => "condition",
            StepType::Empty => "empty",
        };
        write!(f, "{}", s)
    }
}

/// Configuration shared by every request-producing step.
///
/// All values are expressions evaluated against the scope at the time the
/// step runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Leaf {
    /// Extra request headers (`name -> expression`).
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub headers: IndexMap<String, String>,

    /// Values pulled from the exchange into the current frame.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub extractions: IndexMap<String, String>,

    /// Boolean expressions that must hold after the response.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assertions: Vec<String>,
}

impl Leaf {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_header(mut self, name: impl Into<String>, expression: impl Into<String>) -> Self {
        self.headers.insert(name.into(), expression.into());
        self
    }

    pub fn with_extraction(mut self, name: impl Into<String>, expression: impl Into<String>) -> Self {
        self.extractions.insert(name.into(), expression.into());
        self
    }

    pub fn with_assertion(mut self, expression: impl Into<String>) -> Self {
        self.assertions.push(expression.into());
        self
    }
}

/// Kind-specific payload of a step.
#[derive(Debug, Clone, PartialEq)]
pub enum StepKind {
    /// Issue a request to an explicit URL.
    Visit {
        url: String,
        method: Option<String>,
        body: Option<String>,
        leaf: Leaf,
    },
    /// Navigate to a link found relative to the previous request.
    Click { link: String, leaf: Leaf },
    /// Re-issue the previous request.
    Reload { leaf: Leaf },
    /// Follow the redirect of the previous response.
    Follow { leaf: Leaf },
    /// Placeholder producing no request.
    Empty,
    /// Sequence with its own variable declarations.
    Block {
        variables: IndexMap<String, String>,
        child: Option<StepId>,
    },
    /// Runs the child chain once per element of a collection.
    Loop {
        collection: String,
        key: String,
        value: String,
        child: Option<StepId>,
    },
    /// Runs the child chain while the condition holds.
    While {
        condition: String,
        child: Option<StepId>,
    },
    /// Runs one of two chains depending on a condition.
    Condition {
        condition: String,
        then_branch: Option<StepId>,
        else_branch: Option<StepId>,
    },
}

impl StepKind {
    pub fn step_type(&self) -> StepType {
        match self {
            StepKind::Visit { .. } => StepType::Visit,
            StepKind::Click { .. } => StepType::Click,
            StepKind::Reload { .. } => StepType::Reload,
            StepKind::Follow { .. } => StepType::Follow,
            StepKind::Empty => StepType::Empty,
            StepKind::Block { .. } => StepType::Block,
            StepKind::Loop { .. } => StepType::Loop,
            StepKind::While { .. } => StepType::While,
            StepKind::Condition { .. } => StepType::Condition,
        }
    }

    /// Leaf configuration of request-producing steps.
    pub fn leaf(&self) -> Option<&Leaf> {
        match self {
            StepKind::Visit { leaf, .. }
            | StepKind::Click { leaf, .. }
            | StepKind::Reload { leaf }
            | StepKind::Follow { leaf } => Some(leaf),
            _ => None,
        }
    }

    /// Returns true if the step produces exactly one request.
    pub fn is_request(&self) -> bool {
        self.leaf().is_some()
    }

    /// Heads of every child chain, in execution order.
    pub fn children(&self) -> Vec<StepId> {
        match self {
            StepKind::Block { child, .. }
            | StepKind::Loop { child, .. }
            | StepKind::While { child, .. } => child.iter().copied().collect(),
            StepKind::Condition {
                then_branch,
                else_branch,
                ..
            } => then_branch.iter().chain(else_branch.iter()).copied().collect(),
            _ => Vec::new(),
        }
    }
}

/// One node of the scenario graph.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    /// Stable external identifier, unaffected by execution.
    pub uuid: String,

    /// Human readable label.
    pub name: Option<String>,

    pub kind: StepKind,

    /// Next sibling in the enclosing chain.
    pub next: Option<StepId>,
}

impl Step {
    /// Create a step with a fresh v4 uuid.
    pub fn new(kind: StepKind) -> Self {
        Self {
            uuid: uuid::Uuid::new_v4().to_string(),
            name: None,
            kind,
            next: None,
        }
    }

    pub fn with_uuid(mut self, uuid: impl Into<String>) -> Self {
        self.uuid = uuid.into();
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn step_type(&self) -> StepType {
        self.kind.step_type()
    }

    /// Every expression carried by this step (not its children).
    pub fn expressions(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        match &self.kind {
            StepKind::Visit {
                url, method, body, ..
            } => {
                out.push(url);
                out.extend(method.as_deref());
                out.extend(body.as_deref());
            }
            StepKind::Click { link, .. } => out.push(link),
            StepKind::Block { variables, .. } => out.extend(variables.values().map(String::as_str)),
            StepKind::Loop { collection, .. } => out.push(collection),
            StepKind::While { condition, .. } | StepKind::Condition { condition, .. } => {
                out.push(condition)
            }
            StepKind::Reload { .. } | StepKind::Follow { .. } | StepKind::Empty => {}
        }
        if let Some(leaf) = self.kind.leaf() {
            out.extend(leaf.headers.values().map(String::as_str));
            out.extend(leaf.extractions.values().map(String::as_str));
            out.extend(leaf.assertions.iter().map(String::as_str));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_type_display() {
        assert_eq!(StepType::Visit.to_string(), "visit");
        assert_eq!(StepType::Condition.to_string(), "condition");
        assert_eq!(
            serde_json::to_string(&StepType::While).unwrap(),
            "\"while\""
        );
    }

    #[test]
    fn test_leaf_accessor() {
        let visit = StepKind::Visit {
            url: "'/'".to_string(),
            method: None,
            body: None,
            leaf: Leaf::new().with_assertion("response.status == 200"),
        };
        assert!(visit.is_request());
        assert_eq!(visit.leaf().unwrap().assertions.len(), 1);
        assert!(!StepKind::Empty.is_request());
    }

    #[test]
    fn test_expressions_lists_everything() {
        let step = Step::new(StepKind::Visit {
            url: "'/login'".to_string(),
            method: Some("'POST'".to_string()),
            body: None,
            leaf: Leaf::new()
                .with_header("accept", "'text/html'")
                .with_extraction("token", "response.body")
                .with_assertion("response.status == 200"),
        });
        assert_eq!(
            step.expressions(),
            vec![
                "'/login'",
                "'POST'",
                "'text/html'",
                "response.body",
                "response.status == 200"
            ]
        );
    }

    #[test]
    fn test_new_step_gets_unique_uuid() {
        let a = Step::new(StepKind::Empty);
        let b = Step::new(StepKind::Empty);
        assert_ne!(a.uuid, b.uuid);
        assert_eq!(a.with_uuid("fixed").uuid, "fixed");
    }
}
