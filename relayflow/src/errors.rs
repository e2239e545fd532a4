//! Error types for the relayflow orchestrator.
//!
//! Errors fall into two groups: fatal errors that surface to the session
//! caller through [`RelayflowError`], and non-fatal errors (transport,
//! checkpoint tier, hook failures) that are logged and recorded in audit
//! structures but never abort a pipeline.

use crate::session::SessionPhase;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// The main error type for relayflow operations.
#[derive(Debug, Error)]
pub enum RelayflowError {
    /// A pipeline definition failed validation.
    #[error("{0}")]
    Validation(#[from] PipelineValidationError),

    /// Two stages declared ownership of the same state field.
    #[error("{0}")]
    OutputConflict(#[from] OutputConflictError),

    /// A stage tried to overwrite an already-populated state field.
    #[error("{0}")]
    DataConflict(#[from] DataConflictError),

    /// A pipeline referenced a stage that has no registered worker.
    #[error("Stage not registered: {stage}")]
    StageNotRegistered {
        /// The missing stage name.
        stage: String,
    },

    /// The stage's circuit breaker refused execution.
    #[error("Circuit breaker open for stage '{stage}'")]
    BreakerOpen {
        /// The gated stage.
        stage: String,
    },

    /// Retries for a stage (or the session retry budget) ran out.
    #[error("Retries exhausted for stage '{stage}' after {attempts} attempt(s): {last_error}")]
    RetryBudgetExhausted {
        /// The failing stage.
        stage: String,
        /// Total attempts made.
        attempts: u32,
        /// The error from the final attempt.
        last_error: StageError,
    },

    /// A stage failed with a non-retryable error.
    #[error("Stage '{stage}' failed: {source}")]
    StageFailed {
        /// The failing stage.
        stage: String,
        /// The underlying stage error.
        #[source]
        source: StageError,
    },

    /// An inter-stage handoff failed required-field validation.
    #[error("{0}")]
    Handoff(#[from] HandoffValidationError),

    /// The session was cancelled.
    #[error("Session cancelled: {0}")]
    Cancelled(String),

    /// Checkpoint persistence failed where it was not advisory.
    #[error("{0}")]
    Checkpoint(#[from] CheckpointError),

    /// A session lifecycle violation.
    #[error("{0}")]
    Session(#[from] SessionError),

    /// State recovery could not reconstruct the run.
    #[error("Recovery failed for run '{run_id}': {status}")]
    RecoveryFailed {
        /// The run being recovered.
        run_id: String,
        /// The terminal recovery status.
        status: String,
    },

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RelayflowError {
    /// Returns the stable error code used in client-facing summaries.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "RELAY-001-PIPELINE",
            Self::OutputConflict(_) => "RELAY-002-OWNERSHIP",
            Self::DataConflict(_) => "RELAY-003-WRITE_ONCE",
            Self::StageNotRegistered { .. } => "RELAY-004-UNREGISTERED",
            Self::BreakerOpen { .. } => "RELAY-005-BREAKER_OPEN",
            Self::RetryBudgetExhausted { .. } => "RELAY-006-RETRY_EXHAUSTED",
            Self::StageFailed { .. } => "RELAY-007-STAGE_FAILED",
            Self::Handoff(_) => "RELAY-008-HANDOFF",
            Self::Cancelled(_) => "RELAY-009-CANCELLED",
            Self::Checkpoint(_) => "RELAY-010-CHECKPOINT",
            Self::Session(_) => "RELAY-011-SESSION",
            Self::RecoveryFailed { .. } => "RELAY-012-RECOVERY",
            Self::Serialization(_) => "RELAY-013-SERIALIZATION",
            Self::Config(_) => "RELAY-014-CONFIG",
            Self::Internal(_) => "RELAY-000-INTERNAL",
        }
    }

    /// Returns true if the error terminates the whole pipeline.
    ///
    /// Breaker skips are the only stage-level error that is never fatal.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::BreakerOpen { .. })
    }

    /// Builds structured error info for diagnostics.
    #[must_use]
    pub fn error_info(&self) -> ContractErrorInfo {
        let info = ContractErrorInfo::new(self.code(), self.to_string());
        match self {
            Self::StageNotRegistered { stage } => info
                .with_fix_hint("Register a worker for the stage before building the pipeline.")
                .with_context_entry("stage", stage),
            Self::RetryBudgetExhausted {
                stage, attempts, ..
            } => info
                .with_context_entry("stage", stage)
                .with_context_entry("attempts", attempts.to_string()),
            Self::Handoff(err) => info
                .with_context_entry("from_stage", &err.from_stage)
                .with_context_entry("to_stage", &err.to_stage)
                .with_context_entry("run_id", &err.run_id),
            _ => info,
        }
    }
}

impl From<serde_json::Error> for RelayflowError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Error produced by a single worker-stage invocation.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum StageError {
    /// A failure worth retrying (network blip, rate limit, model hiccup).
    #[error("transient failure: {0}")]
    Transient(String),

    /// A failure that will not go away on retry.
    #[error("permanent failure: {0}")]
    Permanent(String),

    /// The stage call exceeded its timeout.
    #[error("timed out after {0} ms")]
    Timeout(u64),

    /// The session was cancelled while the stage was in flight.
    #[error("cancelled: {0}")]
    Cancelled(String),
}

impl StageError {
    /// Creates a transient error.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    /// Creates a permanent error.
    #[must_use]
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent(message.into())
    }

    /// Returns true if the retry policy may attempt the stage again.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Timeout(_))
    }
}

impl From<anyhow::Error> for StageError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<StageError>() {
            Ok(stage_error) => stage_error,
            Err(other) => Self::Transient(format!("{other:#}")),
        }
    }
}

/// Metadata about an error for client-facing diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ContractErrorInfo {
    /// Error code (e.g., "RELAY-008-HANDOFF").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ContractErrorInfo {
    /// Creates a new error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Converts to a JSON object.
    #[must_use]
    pub fn to_dict(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        map.insert("code".to_string(), serde_json::json!(self.code));
        map.insert("summary".to_string(), serde_json::json!(self.summary));
        if let Some(ref hint) = self.fix_hint {
            map.insert("fix_hint".to_string(), serde_json::json!(hint));
        }
        if !self.context.is_empty() {
            map.insert("context".to_string(), serde_json::json!(self.context));
        }
        serde_json::Value::Object(map)
    }
}

/// Error raised when a pipeline definition is invalid.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct PipelineValidationError {
    /// The error message.
    pub message: String,
    /// The stages involved in the error.
    pub stages: Vec<String>,
}

impl PipelineValidationError {
    /// Creates a new pipeline validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stages: Vec::new(),
        }
    }

    /// Sets the stages involved.
    #[must_use]
    pub fn with_stages(mut self, stages: Vec<String>) -> Self {
        self.stages = stages;
        self
    }
}

/// Error raised when two stages claim the same output field.
#[derive(Debug, Clone, Error)]
#[error("Output conflict for field '{field}': produced by both '{first_stage}' and '{second_stage}'")]
pub struct OutputConflictError {
    /// The contested field.
    pub field: String,
    /// The stage that registered the field first.
    pub first_stage: String,
    /// The stage that tried to register it again.
    pub second_stage: String,
}

impl OutputConflictError {
    /// Creates a new output conflict error.
    #[must_use]
    pub fn new(
        field: impl Into<String>,
        first_stage: impl Into<String>,
        second_stage: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            first_stage: first_stage.into(),
            second_stage: second_stage.into(),
        }
    }
}

/// Error raised when writing to an already-populated state field.
#[derive(Debug, Clone, Error)]
#[error("Data conflict: field '{field}' already populated (write attempted by '{stage}')")]
pub struct DataConflictError {
    /// The field that was already set.
    pub field: String,
    /// The stage attempting the write.
    pub stage: String,
}

impl DataConflictError {
    /// Creates a new data conflict error.
    #[must_use]
    pub fn new(field: impl Into<String>, stage: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            stage: stage.into(),
        }
    }
}

/// Error raised when required-field validation fails at a stage boundary.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("Handoff validation failed {from_stage} -> {to_stage} (run {run_id}): {}", field_errors.join("; "))]
pub struct HandoffValidationError {
    /// Stage whose output was validated.
    pub from_stage: String,
    /// Stage that would have received the output.
    pub to_stage: String,
    /// The run being executed.
    pub run_id: String,
    /// Required-field failures.
    pub field_errors: Vec<String>,
}

/// Errors raised by a [`Transport`](crate::events::Transport).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The message could not be delivered.
    #[error("send to '{user_id}' failed: {reason}")]
    Send {
        /// Recipient.
        user_id: String,
        /// Failure reason.
        reason: String,
    },

    /// The recipient has no open connection.
    #[error("user '{user_id}' is disconnected")]
    Disconnected {
        /// Recipient.
        user_id: String,
    },
}

impl TransportError {
    /// Returns true if a resend may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Send { .. })
    }
}

/// Errors raised by checkpoint tiers.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// A tier rejected or failed a read/write.
    #[error("checkpoint tier '{tier}' failed: {reason}")]
    Tier {
        /// Tier name.
        tier: String,
        /// Failure reason.
        reason: String,
    },

    /// A snapshot could not be (de)serialized.
    #[error("checkpoint serialization error: {0}")]
    Serialization(String),

    /// Filesystem error in a file-backed tier.
    #[error("checkpoint IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for CheckpointError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Session lifecycle errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    /// The lifecycle state machine refused a transition.
    #[error("invalid session transition for run '{run_id}': {from} -> {to}")]
    InvalidTransition {
        /// The run.
        run_id: String,
        /// Current phase.
        from: SessionPhase,
        /// Requested phase.
        to: SessionPhase,
    },

    /// No session is tracked for the run.
    #[error("unknown session for run '{0}'")]
    UnknownSession(String),

    /// A session for the run is already in flight.
    #[error("session for run '{0}' is already running")]
    AlreadyRunning(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contract_error_info_creation() {
        let info = ContractErrorInfo::new("TEST-001", "Test error")
            .with_fix_hint("Fix this by doing that")
            .with_context_entry("stage", "triage");

        assert_eq!(info.code, "TEST-001");
        assert_eq!(info.fix_hint, Some("Fix this by doing that".to_string()));
        assert_eq!(info.context.get("stage"), Some(&"triage".to_string()));

        let dict = info.to_dict();
        assert_eq!(dict["code"], "TEST-001");
        assert_eq!(dict["context"]["stage"], "triage");
    }

    #[test]
    fn test_stage_error_retryability() {
        assert!(StageError::transient("rate limited").is_retryable());
        assert!(StageError::Timeout(500).is_retryable());
        assert!(!StageError::permanent("bad input").is_retryable());
        assert!(!StageError::Cancelled("client left".into()).is_retryable());
    }

    #[test]
    fn test_stage_error_from_anyhow_keeps_context() {
        let err = anyhow::anyhow!("connection reset").context("querying warehouse");
        let stage_err = StageError::from(err);
        match stage_err {
            StageError::Transient(msg) => {
                assert!(msg.contains("querying warehouse"));
                assert!(msg.contains("connection reset"));
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn test_handoff_error_display() {
        let err = HandoffValidationError {
            from_stage: "triage".into(),
            to_stage: "data".into(),
            run_id: "run-1".into(),
            field_errors: vec!["category must not be 'unknown'".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("triage -> data"));
        assert!(msg.contains("unknown"));
    }

    #[test]
    fn test_error_codes_and_fatality() {
        let skip = RelayflowError::BreakerOpen { stage: "data".into() };
        assert!(!skip.is_fatal());
        assert_eq!(skip.code(), "RELAY-005-BREAKER_OPEN");

        let exhausted = RelayflowError::RetryBudgetExhausted {
            stage: "data".into(),
            attempts: 3,
            last_error: StageError::transient("boom"),
        };
        assert!(exhausted.is_fatal());
        let info = exhausted.error_info();
        assert_eq!(info.context.get("attempts"), Some(&"3".to_string()));
    }

    #[test]
    fn test_transport_error_transience() {
        let send = TransportError::Send {
            user_id: "u1".into(),
            reason: "socket busy".into(),
        };
        assert!(send.is_transient());
        assert!(!TransportError::Disconnected { user_id: "u1".into() }.is_transient());
    }
}
