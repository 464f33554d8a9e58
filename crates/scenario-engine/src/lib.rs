//! Scenario Execution Engine
//!
//! Runs HTTP scenarios one exchange at a time. The engine never performs I/O:
//! the caller drives it through the Peek/Resume protocol and owns the
//! transport.
//!
//! ## Modules
//!
//! - [`graph`]: Immutable step graph (arena of steps linked by handles)
//! - [`scope`]: Base values and the scope stack of a run
//! - [`expression`]: Expression evaluation (minijinja)
//! - [`converter`]: Step-to-request conversion seam
//! - [`http`]: HTTP requests, responses and the default converter
//! - [`engine`]: Peek/Resume execution state machine
//! - [`result`]: Serializable result tree
//! - [`loader`]: YAML scenario files
//! - [`validate`]: Static validation in tolerant mode
//!
//! ## Example
//!
//! ```ignore
//! use scenario_engine::{load_str, Engine, HttpStepConverter, Next};
//!
//! let scenario = load_str(yaml)?.remove(0);
//! let converter = HttpStepConverter::new().with_endpoint("http://localhost:8000")?;
//! let mut engine = Engine::new(scenario.graph, scenario.values, converter);
//! while let Next::Request(pending) = engine.peek()? {
//!     let response = send(&pending.request)?;
//!     engine.resume(&pending.request, response)?;
//! }
//! println!("{}", serde_json::to_string_pretty(&engine.results())?);
//! ```

pub mod converter;
pub mod engine;
pub mod error;
pub mod expression;
pub mod graph;
pub mod http;
pub mod loader;
pub mod result;
pub mod scope;
pub mod validate;

pub use converter::{Exchange, StepConverter};
pub use engine::{Engine, EngineState, Next, PendingRequest};
pub use error::{EngineError, EngineResult, ExpectationFailure};
pub use expression::{Evaluator, ExecutionMode, JinjaEvaluator};
pub use graph::{GraphBuilder, Leaf, Step, StepGraph, StepId, StepKind, StepType};
pub use http::{HttpRequest, HttpResponse, HttpStepConverter};
pub use loader::{load_file, load_str, Scenario};
pub use result::{AssertionOutcome, Iteration, ResultNode, ResultTree};
pub use scope::{Context, Frame, ResolveMode, ScopeStack, ValueBag};
pub use validate::{validate, ValidationIssue, ValidationReport};
