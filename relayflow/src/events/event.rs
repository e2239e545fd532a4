//! Lifecycle events delivered to the requesting client.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// The kind of a lifecycle event.
///
/// Within one session, events follow the causal order
/// `Started -> (Thinking | ToolExecuting | ToolCompleted)* -> (Completed | Failed)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEventType {
    /// The session started processing.
    Started,
    /// Progress narration.
    Thinking,
    /// A stage began executing.
    ToolExecuting,
    /// A stage finished executing.
    ToolCompleted,
    /// The session completed (possibly partially).
    Completed,
    /// The session failed.
    Failed,
}

impl LifecycleEventType {
    /// Returns true for events that close the session stream.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Returns true for progress events between start and end.
    #[must_use]
    pub fn is_intermediate(self) -> bool {
        matches!(self, Self::Thinking | Self::ToolExecuting | Self::ToolCompleted)
    }
}

impl fmt::Display for LifecycleEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Started => "started",
            Self::Thinking => "thinking",
            Self::ToolExecuting => "tool_executing",
            Self::ToolCompleted => "tool_completed",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A sequenced progress notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleEvent {
    /// Event kind.
    #[serde(rename = "type")]
    pub event_type: LifecycleEventType,
    /// Session the event belongs to.
    pub session_id: String,
    /// Stage the event concerns, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage_name: Option<String>,
    /// Event data.
    #[serde(default)]
    pub payload: serde_json::Value,
    /// When the event was emitted.
    pub timestamp: DateTime<Utc>,
    /// Per-session sequence number, strictly increasing.
    pub sequence_number: u64,
}

impl LifecycleEvent {
    /// Creates an unsequenced event (sequence number 0).
    #[must_use]
    pub fn new(
        event_type: LifecycleEventType,
        session_id: impl Into<String>,
        stage_name: Option<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            event_type,
            session_id: session_id.into(),
            stage_name,
            payload,
            timestamp: Utc::now(),
            sequence_number: 0,
        }
    }

    /// Content fingerprint ignoring timestamp and sequence number.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.event_type.to_string().as_bytes());
        hasher.update([0]);
        hasher.update(self.stage_name.as_deref().unwrap_or_default().as_bytes());
        hasher.update([0]);
        hasher.update(self.payload.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }
}
