//! Tagged result of running one stage.

use crate::context::StateField;
use crate::errors::RelayflowError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a stage was not executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The stage's circuit breaker is open.
    BreakerOpen,
    /// The stage's pipeline condition evaluated to false.
    ConditionNotMet,
    /// The stage's own entry check returned false.
    EntryConditionsNotMet,
    /// Every field the stage produces is already populated.
    AlreadyCompleted,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BreakerOpen => write!(f, "breaker_open"),
            Self::ConditionNotMet => write!(f, "condition_not_met"),
            Self::EntryConditionsNotMet => write!(f, "entry_conditions_not_met"),
            Self::AlreadyCompleted => write!(f, "already_completed"),
        }
    }
}

/// Failure details kept in a stage outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageFailure {
    /// Stable error code.
    pub code: String,
    /// Error message.
    pub message: String,
    /// Retries performed before giving up.
    pub retry_count: u32,
}

impl StageFailure {
    /// Builds failure details from an error.
    #[must_use]
    pub fn from_error(error: &RelayflowError, retry_count: u32) -> Self {
        Self {
            code: error.code().to_string(),
            message: error.to_string(),
            retry_count,
        }
    }
}

/// Outcome of one stage in a pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StageOutcome {
    /// The stage ran and its fields were absorbed.
    Success {
        /// Fields written by the stage.
        fields: Vec<StateField>,
        /// Retries needed.
        retry_count: u32,
        /// Wall time including retries.
        duration_ms: f64,
    },
    /// The stage did not run.
    Skipped {
        /// Why it was skipped.
        reason: SkipReason,
    },
    /// The stage failed after exhausting its options.
    Failed(StageFailure),
}

impl StageOutcome {
    /// Creates a skipped outcome.
    #[must_use]
    pub fn skipped(reason: SkipReason) -> Self {
        Self::Skipped { reason }
    }

    /// Returns true for a success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Returns true for a skip.
    #[must_use]
    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped { .. })
    }

    /// Returns true for a failure.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// Returns the skip reason, if skipped.
    #[must_use]
    pub fn skip_reason(&self) -> Option<SkipReason> {
        match self {
            Self::Skipped { reason } => Some(*reason),
            _ => None,
        }
    }

    /// Returns the retry count for runs that reached the retry policy.
    #[must_use]
    pub fn retry_count(&self) -> Option<u32> {
        match self {
            Self::Success { retry_count, .. } => Some(*retry_count),
            Self::Failed(failure) => Some(failure.retry_count),
            Self::Skipped { .. } => None,
        }
    }

    /// Short status label for logs and events.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::Skipped { .. } => "skipped",
            Self::Failed(_) => "failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_accessors() {
        let ok = StageOutcome::Success {
            fields: vec![StateField::Data],
            retry_count: 2,
            duration_ms: 12.0,
        };
        assert!(ok.is_success());
        assert_eq!(ok.retry_count(), Some(2));
        assert_eq!(ok.label(), "success");

        let skipped = StageOutcome::skipped(SkipReason::BreakerOpen);
        assert!(skipped.is_skipped());
        assert_eq!(skipped.skip_reason(), Some(SkipReason::BreakerOpen));
        assert_eq!(skipped.retry_count(), None);
    }

    #[test]
    fn test_failure_from_error() {
        let err = RelayflowError::StageNotRegistered {
            stage: "data".into(),
        };
        let failure = StageFailure::from_error(&err, 0);
        assert_eq!(failure.code, "RELAY-004-UNREGISTERED");
        assert!(StageOutcome::Failed(failure).is_failed());
    }

    #[test]
    fn test_outcome_serializes_tagged() {
        let json = serde_json::to_value(StageOutcome::skipped(SkipReason::AlreadyCompleted)).unwrap();
        assert_eq!(json["outcome"], "skipped");
        assert_eq!(json["reason"], "already_completed");
    }
}
