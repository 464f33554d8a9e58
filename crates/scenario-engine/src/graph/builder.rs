//! Graph construction and the immutable [`StepGraph`].

use std::collections::HashSet;

use crate::error::{EngineError, EngineResult};

use super::types::{Step, StepId, StepKind};

/// Immutable arena of steps with a root chain.
#[derive(Debug, Clone, PartialEq)]
pub struct StepGraph {
    steps: Vec<Step>,
    root: Option<StepId>,
}

impl StepGraph {
    /// Start building a new graph.
    pub fn builder() -> GraphBuilder {
        GraphBuilder::default()
    }

    /// Head of the top-level chain.
    pub fn root(&self) -> Option<StepId> {
        self.root
    }

    /// Look up a step by handle.
    ///
    /// Handles are only minted by the builder of this graph, so an unknown
    /// handle is a programming error.
    pub fn step(&self, id: StepId) -> &Step {
        &self.steps[id.0]
    }

    /// Find a step by its external uuid.
    pub fn find(&self, uuid: &str) -> Option<StepId> {
        self.steps.iter().position(|s| s.uuid == uuid).map(StepId)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Iterate over a sibling chain starting at `head`.
    pub fn chain(&self, head: Option<StepId>) -> ChainIter<'_> {
        ChainIter {
            graph: self,
            current: head,
        }
    }
}

/// Iterator over a `next`-linked chain.
pub struct ChainIter<'a> {
    graph: &'a StepGraph,
    current: Option<StepId>,
}

impl<'a> Iterator for ChainIter<'a> {
    type Item = (StepId, &'a Step);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.current?;
        let step = self.graph.step(id);
        self.current = step.next;
        Some((id, step))
    }
}

/// Mutable arena used to assemble a [`StepGraph`].
#[derive(Debug, Default)]
pub struct GraphBuilder {
    steps: Vec<Step>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a step and return its handle. Any `next` already set is kept.
    pub fn add(&mut self, step: Step) -> StepId {
        self.steps.push(step);
        StepId(self.steps.len() - 1)
    }

    /// Shorthand for `add(Step::new(kind))`.
    pub fn add_kind(&mut self, kind: StepKind) -> StepId {
        self.add(Step::new(kind))
    }

    /// Link the given steps as siblings, in order, and return the chain head.
    pub fn chain(&mut self, ids: &[StepId]) -> Option<StepId> {
        for pair in ids.windows(2) {
            self.steps[pair[0].0].next = Some(pair[1]);
        }
        ids.first().copied()
    }

    /// Freeze the arena into a graph whose top-level chain starts at `root`.
    pub fn build(self, root: Option<StepId>) -> EngineResult<StepGraph> {
        let graph = StepGraph {
            steps: self.steps,
            root,
        };
        validate_structure(&graph)?;
        Ok(graph)
    }
}

fn validate_structure(graph: &StepGraph) -> EngineResult<()> {
    let in_range = |id: Option<StepId>| id.map_or(true, |id| id.0 < graph.steps.len());

    if !in_range(graph.root) {
        return Err(EngineError::Configuration(
            "Root step handle is out of range".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    for step in &graph.steps {
        if !seen.insert(step.uuid.as_str()) {
            return Err(EngineError::Configuration(format!(
                "Duplicate step uuid: {}",
                step.uuid
            )));
        }

        let handles_ok = in_range(step.next)
            && step
                .kind
                .children()
                .into_iter()
                .all(|c| in_range(Some(c)));
        if !handles_ok {
            return Err(EngineError::Configuration(format!(
                "Step {} refers to a step outside the graph",
                step.uuid
            )));
        }

        if let StepKind::Loop { key, value, .. } = &step.kind {
            if key.is_empty() || value.is_empty() {
                return Err(EngineError::Configuration(format!(
                    "Loop step {} needs both key and value names",
                    step.uuid
                )));
            }
            if key == value {
                return Err(EngineError::Configuration(format!(
                    "Loop step {} binds key and value to the same name '{}'",
                    step.uuid, key
                )));
            }
        }
    }

    Ok(())
}
