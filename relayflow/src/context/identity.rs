//! Run identity for correlating a session across stages, events and checkpoints.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Identifies one session run with its correlation IDs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct RunIdentity {
    /// Session ID (one per client connection).
    pub session_id: String,
    /// Conversation thread ID.
    pub thread_id: String,
    /// Requesting user.
    pub user_id: String,
    /// The run ID keying checkpoints and retry budgets.
    pub run_id: String,
}

impl RunIdentity {
    /// Creates an identity with a generated session ID.
    #[must_use]
    pub fn new(
        user_id: impl Into<String>,
        thread_id: impl Into<String>,
        run_id: impl Into<String>,
    ) -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            thread_id: thread_id.into(),
            user_id: user_id.into(),
            run_id: run_id.into(),
        }
    }

    /// Creates an identity where every ID is freshly generated.
    #[must_use]
    pub fn generate() -> Self {
        Self::new(
            Uuid::new_v4().to_string(),
            Uuid::new_v4().to_string(),
            Uuid::now_v7().to_string(),
        )
    }

    /// Sets the session ID.
    #[must_use]
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    /// Converts to a dictionary of string values.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("session_id".to_string(), serde_json::json!(self.session_id));
        map.insert("thread_id".to_string(), serde_json::json!(self.thread_id));
        map.insert("user_id".to_string(), serde_json::json!(self.user_id));
        map.insert("run_id".to_string(), serde_json::json!(self.run_id));
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_identity_new() {
        let identity = RunIdentity::new("user-1", "thread-1", "run-1");
        assert_eq!(identity.run_id, "run-1");
        assert!(Uuid::parse_str(&identity.session_id).is_ok());
    }

    #[test]
    fn test_generated_identities_are_distinct() {
        let a = RunIdentity::generate();
        let b = RunIdentity::generate();
        assert_ne!(a.run_id, b.run_id);
        assert_ne!(a.session_id, b.session_id);
    }

    #[test]
    fn test_run_identity_to_dict() {
        let identity = RunIdentity::new("u", "t", "r").with_session_id("s");
        let dict = identity.to_dict();
        assert_eq!(dict["session_id"], "s");
        assert_eq!(dict["run_id"], "r");
    }
}
