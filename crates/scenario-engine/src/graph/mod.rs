//! Scenario step graph.
//!
//! The graph is built once (by the loader or by hand through
//! [`GraphBuilder`]) and is read-only for the lifetime of every run that
//! shares it.

mod builder;
mod types;

pub use builder::{ChainIter, GraphBuilder, StepGraph};
pub use types::{Leaf, Step, StepId, StepKind, StepType};
