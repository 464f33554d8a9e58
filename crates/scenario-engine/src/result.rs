//! Result tree produced by a run.
//!
//! One [`ResultNode`] per executed step, nested exactly like the graph.
//! Empty fields are omitted when serialized; reporters rely on that shape.

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;

use crate::graph::{Step, StepType};

/// Branch taken by a Condition step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Branch {
    Then,
    Else,
}

/// Outcome of a single assertion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssertionOutcome {
    pub expression: String,
    pub passed: bool,
}

/// One pass through a Loop or While body.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Iteration {
    /// Loop key, or the iteration number for While.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<Value>,

    /// Loop value. Absent for While.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<ResultNode>,
}

/// Record of one executed step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultNode {
    pub kind: StepType,

    pub uuid: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Block declarations, as evaluated.
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub variables: IndexMap<String, Value>,

    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub extractions: IndexMap<String, Value>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub assertions: Vec<AssertionOutcome>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,

    /// Children of a Block.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<ResultNode>,

    /// Children of a Condition whose condition held.
    #[serde(rename = "if", skip_serializing_if = "Vec::is_empty")]
    pub then_steps: Vec<ResultNode>,

    /// Children of a Condition whose condition did not hold.
    #[serde(rename = "else", skip_serializing_if = "Vec::is_empty")]
    pub else_steps: Vec<ResultNode>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub iterations: Vec<Iteration>,

    #[serde(skip)]
    pub branch: Option<Branch>,
}

impl ResultNode {
    pub fn new(step: &Step) -> Self {
        Self {
            kind: step.step_type(),
            uuid: step.uuid.clone(),
            name: step.name.clone(),
            variables: IndexMap::new(),
            extractions: IndexMap::new(),
            assertions: Vec::new(),
            request: None,
            response: None,
            steps: Vec::new(),
            then_steps: Vec::new(),
            else_steps: Vec::new(),
            iterations: Vec::new(),
            branch: None,
        }
    }

    /// Returns true if every assertion of this node passed.
    pub fn passed(&self) -> bool {
        self.assertions.iter().all(|a| a.passed)
    }

    /// Start a new Loop/While iteration.
    pub fn begin_iteration(&mut self, key: Option<Value>, value: Option<Value>) {
        self.iterations.push(Iteration {
            key,
            value,
            steps: Vec::new(),
        });
    }

    /// Attach a finished child where the graph nests it.
    pub fn push_child(&mut self, child: ResultNode) {
        match self.kind {
            StepType::Loop | StepType::While => match self.iterations.last_mut() {
                Some(iteration) => iteration.steps.push(child),
                None => self.steps.push(child),
            },
            StepType::Condition => match self.branch {
                Some(Branch::Else) => self.else_steps.push(child),
                _ => self.then_steps.push(child),
            },
            _ => self.steps.push(child),
        }
    }

    /// Direct children, whatever container they sit in.
    pub fn children(&self) -> Vec<&ResultNode> {
        self.steps
            .iter()
            .chain(&self.then_steps)
            .chain(&self.else_steps)
            .chain(self.iterations.iter().flat_map(|i| i.steps.iter()))
            .collect()
    }

    fn visit<'a>(&'a self, out: &mut Vec<&'a ResultNode>) {
        out.push(self);
        for child in self.children() {
            child.visit(out);
        }
    }
}

/// Top-level result of a run.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ResultTree {
    pub steps: Vec<ResultNode>,
}

impl ResultTree {
    /// Every node, depth first.
    pub fn flatten(&self) -> Vec<&ResultNode> {
        let mut out = Vec::new();
        for node in &self.steps {
            node.visit(&mut out);
        }
        out
    }

    /// Number of nodes that carry a request.
    pub fn request_count(&self) -> usize {
        self.flatten()
            .iter()
            .filter(|n| n.request.is_some())
            .count()
    }

    pub fn find(&self, uuid: &str) -> Option<&ResultNode> {
        self.flatten().into_iter().find(|n| n.uuid == uuid)
    }
}
