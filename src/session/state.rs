//! Session lifecycle states and the transitions allowed between them

use crate::error::{CrmError, CrmResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a pipeline session is in its lifecycle
///
/// ```text
/// Unselected ──► Loading ──► Viewing ⇄ Editing ──► Committing
///                   ▲           │                      │
///                   └───────────┘        Viewing ◄─────┤ success
///                                        Editing ◄─────┘ failure
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    /// No pipeline chosen for the enquiry
    Unselected,
    Loading,
    /// Read-only rendering of the active stage
    Viewing,
    /// A draft of the active stage is being edited
    Editing,
    Committing,
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Unselected => "Unselected",
            SessionState::Loading => "Loading",
            SessionState::Viewing => "Viewing",
            SessionState::Editing => "Editing",
            SessionState::Committing => "Committing",
        }
    }

    /// Whether a store operation is in flight
    pub fn is_busy(&self) -> bool {
        matches!(self, SessionState::Loading | SessionState::Committing)
    }

    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Unselected, Loading)
                | (Viewing, Loading)
                | (Loading, Viewing)
                | (Loading, Unselected)
                | (Viewing, Editing)
                | (Editing, Viewing)
                | (Editing, Committing)
                | (Committing, Viewing)
                | (Committing, Editing)
        )
    }

    /// Validate a transition, naming the attempted action on failure
    pub fn transition(self, next: SessionState, action: &str) -> CrmResult<SessionState> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(CrmError::InvalidStateTransition(format!(
                "Cannot {} from {} state",
                action,
                self.name()
            )))
        }
    }

    /// Reject `action` unless the session is in `expected`
    pub fn require(self, expected: SessionState, action: &str) -> CrmResult<()> {
        if self == expected {
            Ok(())
        } else {
            Err(CrmError::InvalidStateTransition(format!(
                "Cannot {} from {} state",
                action,
                self.name()
            )))
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
