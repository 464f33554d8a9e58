//! Traversal cursors.
//!
//! The engine keeps one [`Cursor`] per open container, innermost last. A
//! cursor remembers the next sibling to run in its chain and, for loops,
//! what is left to iterate.

use std::collections::VecDeque;

use serde_json::Value;

use crate::error::{EngineError, EngineResult};
use crate::graph::{Step, StepId};
use crate::result::ResultNode;

/// Default upper bound on the iterations of one While step.
///
/// A While whose condition never turns false would otherwise spin without
/// ever yielding a request. Override with
/// [`Engine::with_max_while_iterations`](super::Engine::with_max_while_iterations).
pub const MAX_WHILE_ITERATIONS: usize = 10_000;

/// Container-specific traversal state.
#[derive(Debug, Clone)]
pub(crate) enum Control {
    Root,
    Block,
    Condition,
    Loop { items: VecDeque<(Value, Value)> },
    While { iterations: usize },
}

/// Every cursor owns exactly one scope frame, popped when it closes.
#[derive(Debug, Clone)]
pub(crate) struct Cursor {
    /// Container step, `None` for the top-level chain.
    pub step: Option<StepId>,
    /// Next step to enter in the current chain.
    pub position: Option<StepId>,
    pub control: Control,
    /// Result node of the container, attached to its parent on close.
    pub node: Option<ResultNode>,
}

impl Cursor {
    pub fn root(head: Option<StepId>) -> Self {
        Self {
            step: None,
            position: head,
            control: Control::Root,
            node: None,
        }
    }

    pub fn container(
        step: StepId,
        head: Option<StepId>,
        control: Control,
        node: ResultNode,
    ) -> Self {
        Self {
            step: Some(step),
            position: head,
            control,
            node: Some(node),
        }
    }
}

/// Turn an evaluated Loop collection into `(key, value)` pairs.
///
/// Arrays are keyed by position, objects by member name.
pub(crate) fn iteration_items(
    step: &Step,
    collection: Value,
) -> EngineResult<VecDeque<(Value, Value)>> {
    match collection {
        Value::Array(items) => Ok(items
            .into_iter()
            .enumerate()
            .map(|(i, v)| (Value::from(i), v))
            .collect()),
        Value::Object(map) => Ok(map
            .into_iter()
            .map(|(k, v)| (Value::String(k), v))
            .collect()),
        other => Err(EngineError::Configuration(format!(
            "Loop step {} collection did not evaluate to an iterable: {}",
            step.uuid, other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::StepKind;
    use serde_json::json;

    #[test]
    fn test_array_items_keyed_by_position() {
        let step = Step::new(StepKind::Empty);
        let items = iteration_items(&step, json!(["a", "b"])).unwrap();
        assert_eq!(
            items,
            VecDeque::from(vec![(json!(0), json!("a")), (json!(1), json!("b"))])
        );
    }

    #[test]
    fn test_object_items_keyed_by_name() {
        let step = Step::new(StepKind::Empty);
        let items = iteration_items(&step, json!({"x": 1})).unwrap();
        assert_eq!(items, VecDeque::from(vec![(json!("x"), json!(1))]));
    }

    #[test]
    fn test_scalar_is_not_iterable() {
        let step = Step::new(StepKind::Empty);
        for value in [json!(42), json!("abc"), json!(null), json!(true)] {
            let err = iteration_items(&step, value).unwrap_err();
            assert!(matches!(err, EngineError::Configuration(_)));
        }
    }
}
