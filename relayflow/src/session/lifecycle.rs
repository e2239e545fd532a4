//! Session lifecycle state machine.

use crate::errors::SessionError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Phase of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    /// Nothing has been set up yet.
    #[default]
    Uninitialized,
    /// State and pipeline are built.
    Initialized,
    /// The pipeline is executing.
    Running,
    /// The pipeline finished, possibly partially.
    Completed,
    /// The session died or failed fatally and may be resumed.
    Crashed,
}

impl SessionPhase {
    /// Returns true if moving to `next` is allowed.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Uninitialized, Self::Initialized)
                | (Self::Initialized, Self::Running)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Crashed)
                | (Self::Crashed, Self::Running)
        )
    }

    /// Returns true for phases nothing is executing in.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Crashed)
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Uninitialized => "uninitialized",
            Self::Initialized => "initialized",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Crashed => "crashed",
        };
        f.write_str(label)
    }
}

/// Tracks the phase of one run and rejects invalid transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionLifecycle {
    run_id: String,
    phase: SessionPhase,
    transitions: Vec<SessionPhase>,
}

impl SessionLifecycle {
    /// Creates a lifecycle in [`SessionPhase::Uninitialized`].
    #[must_use]
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            phase: SessionPhase::Uninitialized,
            transitions: vec![SessionPhase::Uninitialized],
        }
    }

    /// Creates a lifecycle for a run known only from its checkpoints, e.g.
    /// after a process restart. It starts in [`SessionPhase::Crashed`].
    #[must_use]
    pub fn orphaned(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            phase: SessionPhase::Crashed,
            transitions: vec![SessionPhase::Crashed],
        }
    }

    /// Returns the run.
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Returns the current phase.
    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Returns every phase entered, oldest first.
    #[must_use]
    pub fn transitions(&self) -> &[SessionPhase] {
        &self.transitions
    }

    /// Moves to `next`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidTransition`] if the move is not allowed.
    pub fn transition(&mut self, next: SessionPhase) -> Result<(), SessionError> {
        if !self.phase.can_transition_to(next) {
            return Err(SessionError::InvalidTransition {
                run_id: self.run_id.clone(),
                from: self.phase,
                to: next,
            });
        }
        self.phase = next;
        self.transitions.push(next);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_happy_path() {
        let mut lifecycle = SessionLifecycle::new("run-1");
        lifecycle.transition(SessionPhase::Initialized).unwrap();
        lifecycle.transition(SessionPhase::Running).unwrap();
        lifecycle.transition(SessionPhase::Completed).unwrap();

        assert_eq!(lifecycle.phase(), SessionPhase::Completed);
        assert_eq!(lifecycle.transitions().len(), 4);
    }

    #[test]
    fn test_crashed_session_can_resume() {
        let mut lifecycle = SessionLifecycle::new("run-1");
        lifecycle.transition(SessionPhase::Initialized).unwrap();
        lifecycle.transition(SessionPhase::Running).unwrap();
        lifecycle.transition(SessionPhase::Crashed).unwrap();
        lifecycle.transition(SessionPhase::Running).unwrap();
        assert_eq!(lifecycle.phase(), SessionPhase::Running);
    }

    #[test]
    fn test_invalid_transition_is_rejected() {
        let mut lifecycle = SessionLifecycle::new("run-1");
        let err = lifecycle.transition(SessionPhase::Running).unwrap_err();

        assert_eq!(
            err,
            SessionError::InvalidTransition {
                run_id: "run-1".to_string(),
                from: SessionPhase::Uninitialized,
                to: SessionPhase::Running,
            }
        );
        assert_eq!(lifecycle.phase(), SessionPhase::Uninitialized);
        assert!(err.to_string().contains("uninitialized -> running"));
    }

    #[test]
    fn test_completed_is_final() {
        assert!(!SessionPhase::Completed.can_transition_to(SessionPhase::Running));
        assert!(SessionPhase::Completed.is_terminal());
        assert!(!SessionPhase::Running.is_terminal());
    }
}
