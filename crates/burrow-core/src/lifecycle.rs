use crate::CoreError;
use serde::Serialize;
use std::fmt;

/// Where a session is in its single pass from manifest to active environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivationState {
    Unresolved,
    Resolving,
    Resolved,
    Composing,
    Composed,
    Active,
    Deactivated,
    Failed,
}

impl ActivationState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ActivationState::Deactivated | ActivationState::Failed)
    }
}

impl fmt::Display for ActivationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ActivationState::Unresolved => "unresolved",
            ActivationState::Resolving => "resolving",
            ActivationState::Resolved => "resolved",
            ActivationState::Composing => "composing",
            ActivationState::Composed => "composed",
            ActivationState::Active => "active",
            ActivationState::Deactivated => "deactivated",
            ActivationState::Failed => "failed",
        };
        f.write_str(s)
    }
}

pub fn validate_transition(from: ActivationState, to: ActivationState) -> Result<(), CoreError> {
    use ActivationState::{
        Active, Composed, Composing, Deactivated, Failed, Resolved, Resolving, Unresolved,
    };

    let valid = matches!(
        (from, to),
        (Unresolved, Resolving)
            | (Resolving, Resolved | Failed)
            | (Resolved, Composing)
            | (Composing, Composed | Failed)
            | (Composed, Active)
            | (Active, Deactivated)
    );

    if valid {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}
