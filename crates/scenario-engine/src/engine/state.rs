//! Engine lifecycle states.

use serde::{Deserialize, Serialize};

/// Lifecycle of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    /// Nothing has been peeked yet.
    Created,
    /// A request has been handed out (or is about to be) and a response is expected.
    AwaitingResponse,
    /// The graph is exhausted.
    Done,
    /// A fatal error or expectation failure ended the run.
    Failed,
}

impl EngineState {
    /// Returns true once no further requests can be produced.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::AwaitingResponse => write!(f, "awaiting_response"),
            Self::Done => write!(f, "done"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_display() {
        assert_eq!(EngineState::AwaitingResponse.to_string(), "awaiting_response");
        assert!(EngineState::Failed.is_terminal());
        assert!(!EngineState::Created.is_terminal());
    }
}
