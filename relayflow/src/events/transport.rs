//! Real-time transport trait and implementations.

use crate::errors::TransportError;
use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, info, Level};

/// A reliable `send(user, message)` primitive to a connected client.
///
/// Handshake and connection management live outside the orchestrator.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends one message to a user.
    async fn send(&self, user_id: &str, message: serde_json::Value) -> Result<(), TransportError>;
}

/// A transport that discards every message.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpTransport;

#[async_trait]
impl Transport for NoOpTransport {
    async fn send(&self, _user_id: &str, _message: serde_json::Value) -> Result<(), TransportError> {
        Ok(())
    }
}

/// A transport that writes messages to the tracing log.
#[derive(Debug, Clone)]
pub struct LoggingTransport {
    level: Level,
}

impl Default for LoggingTransport {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingTransport {
    /// Creates a logging transport with the specified level.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level logging transport.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }
}

#[async_trait]
impl Transport for LoggingTransport {
    async fn send(&self, user_id: &str, message: serde_json::Value) -> Result<(), TransportError> {
        if self.level == Level::DEBUG {
            debug!(user_id = %user_id, message = %message, "Transport send");
        } else {
            info!(user_id = %user_id, message = %message, "Transport send");
        }
        Ok(())
    }
}

/// A transport that records messages in memory, for tests and demos.
#[derive(Debug, Default)]
pub struct CollectingTransport {
    messages: RwLock<Vec<(String, serde_json::Value)>>,
}

impl CollectingTransport {
    /// Creates a new collecting transport.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every `(user_id, message)` pair sent.
    #[must_use]
    pub fn messages(&self) -> Vec<(String, serde_json::Value)> {
        self.messages.read().clone()
    }

    /// Returns the messages sent to one user.
    #[must_use]
    pub fn messages_for(&self, user_id: &str) -> Vec<serde_json::Value> {
        self.messages
            .read()
            .iter()
            .filter(|(u, _)| u == user_id)
            .map(|(_, m)| m.clone())
            .collect()
    }

    /// Returns the `type` field of each message sent to a user.
    #[must_use]
    pub fn event_types_for(&self, user_id: &str) -> Vec<String> {
        self.messages_for(user_id)
            .iter()
            .filter_map(|m| m.get("type").and_then(|t| t.as_str()).map(str::to_string))
            .collect()
    }

    /// Returns the messages sent to a user that parse as lifecycle events.
    #[must_use]
    pub fn events_for(&self, user_id: &str) -> Vec<super::LifecycleEvent> {
        self.messages_for(user_id)
            .into_iter()
            .filter_map(|m| serde_json::from_value(m).ok())
            .collect()
    }

    /// Returns the number of messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.read().len()
    }

    /// Returns true if nothing was sent.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.read().is_empty()
    }

    /// Clears all messages.
    pub fn clear(&self) {
        self.messages.write().clear();
    }
}

#[async_trait]
impl Transport for CollectingTransport {
    async fn send(&self, user_id: &str, message: serde_json::Value) -> Result<(), TransportError> {
        self.messages.write().push((user_id.to_string(), message));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_noop_and_logging_transports_accept_everything() {
        NoOpTransport.send("u", serde_json::json!({})).await.unwrap();
        LoggingTransport::default()
            .send("u", serde_json::json!({"type": "started"}))
            .await
            .unwrap();
        LoggingTransport::debug().send("u", serde_json::json!(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_collecting_transport_filters_by_user() {
        let transport = CollectingTransport::new();
        assert!(transport.is_empty());

        transport.send("a", serde_json::json!({"type": "started"})).await.unwrap();
        transport.send("b", serde_json::json!({"type": "started"})).await.unwrap();
        transport.send("a", serde_json::json!({"type": "completed"})).await.unwrap();

        assert_eq!(transport.len(), 3);
        assert_eq!(transport.event_types_for("a"), vec!["started", "completed"]);
        assert_eq!(transport.messages_for("b").len(), 1);

        transport.clear();
        assert!(transport.is_empty());
    }
}
