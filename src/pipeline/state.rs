//! Orchestrator cycle state machine.

use serde::{Deserialize, Serialize};

use crate::error::OrchestratorError;

/// Stage of the current cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestratorState {
    /// Waiting for the next cycle.
    #[default]
    Idle,
    Perceiving,
    Analyzing,
    Planning,
    Executing,
    Reporting,
    /// A catastrophic error stopped the orchestrator. Terminal.
    Failed,
}

impl OrchestratorState {
    /// Check if this state allows transitioning to another state.
    pub fn can_transition_to(&self, target: OrchestratorState) -> bool {
        use OrchestratorState::*;

        matches!(
            (self, target),
            (Idle, Perceiving) |
            // An empty batch or a failed fetch reports straight away
            (Perceiving, Analyzing) | (Perceiving, Reporting) |
            (Analyzing, Planning) |
            (Planning, Executing) | (Planning, Failed) |
            (Executing, Reporting) | (Executing, Failed) |
            (Reporting, Idle)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed)
    }

    /// Validate a transition, returning the target on success.
    pub fn transition(self, target: OrchestratorState) -> Result<Self, OrchestratorError> {
        if self.can_transition_to(target) {
            Ok(target)
        } else {
            Err(OrchestratorError::InvalidTransition {
                from: self.to_string(),
                to: target.to_string(),
            })
        }
    }
}

impl std::fmt::Display for OrchestratorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Perceiving => "perceiving",
            Self::Analyzing => "analyzing",
            Self::Planning => "planning",
            Self::Executing => "executing",
            Self::Reporting => "reporting",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}
