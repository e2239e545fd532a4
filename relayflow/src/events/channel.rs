//! Per-session ordered event channel.
//!
//! One channel exists per session. Sends are serialized through an async
//! mutex so there is never more than one in-flight send per session, which
//! keeps sequence numbers and delivery order aligned. Transport failures
//! are retried a bounded number of times and then absorbed.

use super::event::{LifecycleEvent, LifecycleEventType};
use super::sanitize::sanitize_error;
use super::transport::Transport;
use crate::errors::{RelayflowError, TransportError};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Event channel configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventChannelConfig {
    /// Extra send attempts after a transient transport failure.
    pub max_send_retries: u32,
    /// Pause between send attempts.
    pub send_retry_delay_ms: u64,
    /// Suppress an event identical to the previous one.
    pub suppress_duplicates: bool,
}

impl Default for EventChannelConfig {
    fn default() -> Self {
        Self {
            max_send_retries: 2,
            send_retry_delay_ms: 50,
            suppress_duplicates: true,
        }
    }
}

impl EventChannelConfig {
    /// Sets the send retry count.
    #[must_use]
    pub fn with_max_send_retries(mut self, retries: u32) -> Self {
        self.max_send_retries = retries;
        self
    }

    /// Sets the delay between send attempts.
    #[must_use]
    pub fn with_send_retry_delay_ms(mut self, delay_ms: u64) -> Self {
        self.send_retry_delay_ms = delay_ms;
        self
    }

    /// Enables or disables duplicate suppression.
    #[must_use]
    pub fn with_suppress_duplicates(mut self, enabled: bool) -> Self {
        self.suppress_duplicates = enabled;
        self
    }
}

/// Delivery counters for one channel.
#[derive(Debug, Default)]
pub struct EventChannelMetrics {
    sent: AtomicU64,
    failed: AtomicU64,
    send_retries: AtomicU64,
    suppressed_duplicates: AtomicU64,
    suppressed_quiet: AtomicU64,
    rejected_out_of_order: AtomicU64,
}

impl EventChannelMetrics {
    /// Events delivered.
    #[must_use]
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Events dropped after exhausting send retries.
    #[must_use]
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Extra send attempts made.
    #[must_use]
    pub fn send_retries(&self) -> u64 {
        self.send_retries.load(Ordering::Relaxed)
    }

    /// Events suppressed as duplicates.
    #[must_use]
    pub fn suppressed_duplicates(&self) -> u64 {
        self.suppressed_duplicates.load(Ordering::Relaxed)
    }

    /// Progress events withheld because streaming is off.
    #[must_use]
    pub fn suppressed_quiet(&self) -> u64 {
        self.suppressed_quiet.load(Ordering::Relaxed)
    }

    /// Events refused because they broke causal order.
    #[must_use]
    pub fn rejected_out_of_order(&self) -> u64 {
        self.rejected_out_of_order.load(Ordering::Relaxed)
    }

    /// Converts metrics to a dictionary.
    #[must_use]
    pub fn to_dict(&self) -> serde_json::Value {
        serde_json::json!({
            "sent": self.sent(),
            "failed": self.failed(),
            "send_retries": self.send_retries(),
            "suppressed_duplicates": self.suppressed_duplicates(),
            "suppressed_quiet": self.suppressed_quiet(),
            "rejected_out_of_order": self.rejected_out_of_order(),
        })
    }
}

/// Result of one emit call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmitOutcome {
    /// Delivered with this sequence number.
    Delivered(u64),
    /// Identical to the previous event and not resent.
    Duplicate,
    /// A progress event withheld because streaming is disabled.
    Quiet,
    /// Refused because it would break the causal order.
    OutOfOrder,
    /// The transport gave up; the sequence number was consumed.
    Failed(TransportError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChannelPhase {
    Idle,
    Open,
    Closed,
}

#[derive(Debug)]
struct ChannelState {
    phase: ChannelPhase,
    next_sequence: u64,
    last_fingerprint: Option<String>,
}

/// Ordered, deduplicated lifecycle-event emitter for one session.
pub struct EventChannel {
    session_id: String,
    user_id: String,
    stream_updates: bool,
    transport: Arc<dyn Transport>,
    config: EventChannelConfig,
    state: Mutex<ChannelState>,
    metrics: EventChannelMetrics,
}

impl EventChannel {
    /// Creates a channel for a session.
    ///
    /// With `stream_updates` off, only `Started` and the terminal event
    /// are delivered.
    #[must_use]
    pub fn new(
        session_id: impl Into<String>,
        user_id: impl Into<String>,
        transport: Arc<dyn Transport>,
        config: EventChannelConfig,
        stream_updates: bool,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
            stream_updates,
            transport,
            config,
            state: Mutex::new(ChannelState {
                phase: ChannelPhase::Idle,
                next_sequence: 1,
                last_fingerprint: None,
            }),
            metrics: EventChannelMetrics::default(),
        }
    }

    /// Returns the session ID.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Returns the channel metrics.
    #[must_use]
    pub fn metrics(&self) -> &EventChannelMetrics {
        &self.metrics
    }

    /// Returns true once a terminal event was accepted.
    pub async fn is_closed(&self) -> bool {
        self.state.lock().await.phase == ChannelPhase::Closed
    }

    /// Emits one event. Never fails the caller.
    pub async fn emit(
        &self,
        event_type: LifecycleEventType,
        stage_name: Option<&str>,
        payload: serde_json::Value,
    ) -> EmitOutcome {
        let mut state = self.state.lock().await;

        let next_phase = match (state.phase, event_type) {
            (ChannelPhase::Idle, LifecycleEventType::Started) => ChannelPhase::Open,
            (ChannelPhase::Open, t) if t.is_intermediate() => ChannelPhase::Open,
            (ChannelPhase::Open, t) if t.is_terminal() => ChannelPhase::Closed,
            (phase, t) => {
                self.metrics.rejected_out_of_order.fetch_add(1, Ordering::Relaxed);
                warn!(
                    session_id = %self.session_id,
                    event_type = %t,
                    phase = ?phase,
                    "Rejected out-of-order lifecycle event"
                );
                return EmitOutcome::OutOfOrder;
            }
        };

        if event_type.is_intermediate() && !self.stream_updates {
            self.metrics.suppressed_quiet.fetch_add(1, Ordering::Relaxed);
            return EmitOutcome::Quiet;
        }

        let mut event = LifecycleEvent::new(
            event_type,
            self.session_id.clone(),
            stage_name.map(str::to_string),
            payload,
        );
        let fingerprint = event.fingerprint();
        if self.config.suppress_duplicates
            && state.last_fingerprint.as_deref() == Some(fingerprint.as_str())
        {
            self.metrics.suppressed_duplicates.fetch_add(1, Ordering::Relaxed);
            debug!(session_id = %self.session_id, event_type = %event_type, "Suppressed duplicate event");
            return EmitOutcome::Duplicate;
        }

        event.sequence_number = state.next_sequence;
        state.next_sequence += 1;
        state.phase = next_phase;
        state.last_fingerprint = Some(fingerprint);

        let message = match serde_json::to_value(&event) {
            Ok(message) => message,
            Err(e) => {
                self.metrics.failed.fetch_add(1, Ordering::Relaxed);
                warn!(session_id = %self.session_id, error = %e, "Failed to serialize lifecycle event");
                return EmitOutcome::Failed(TransportError::Send {
                    user_id: self.user_id.clone(),
                    reason: e.to_string(),
                });
            }
        };

        match self.send_with_retries(message).await {
            Ok(()) => {
                self.metrics.sent.fetch_add(1, Ordering::Relaxed);
                EmitOutcome::Delivered(event.sequence_number)
            }
            Err(err) => {
                self.metrics.failed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    session_id = %self.session_id,
                    sequence_number = event.sequence_number,
                    error = %err,
                    "Dropped lifecycle event after transport failure"
                );
                EmitOutcome::Failed(err)
            }
        }
    }

    async fn send_with_retries(&self, message: serde_json::Value) -> Result<(), TransportError> {
        let mut attempt = 0;
        loop {
            match self.transport.send(&self.user_id, message.clone()).await {
                Ok(()) => return Ok(()),
                Err(err) if err.is_transient() && attempt < self.config.max_send_retries => {
                    attempt += 1;
                    self.metrics.send_retries.fetch_add(1, Ordering::Relaxed);
                    debug!(session_id = %self.session_id, attempt, error = %err, "Retrying event send");
                    tokio::time::sleep(Duration::from_millis(self.config.send_retry_delay_ms)).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Emits `Started`.
    pub async fn started(&self, payload: serde_json::Value) -> EmitOutcome {
        self.emit(LifecycleEventType::Started, None, payload).await
    }

    /// Emits `Thinking` for a stage.
    pub async fn thinking(&self, stage: &str, message: impl Into<String>) -> EmitOutcome {
        self.emit(
            LifecycleEventType::Thinking,
            Some(stage),
            serde_json::json!({ "message": message.into() }),
        )
        .await
    }

    /// Emits `ToolExecuting` for a stage.
    pub async fn stage_executing(&self, stage: &str) -> EmitOutcome {
        self.emit(
            LifecycleEventType::ToolExecuting,
            Some(stage),
            serde_json::json!({ "stage": stage }),
        )
        .await
    }

    /// Emits `ToolCompleted` for a stage.
    pub async fn stage_completed(&self, stage: &str, payload: serde_json::Value) -> EmitOutcome {
        self.emit(LifecycleEventType::ToolCompleted, Some(stage), payload).await
    }

    /// Emits `Completed`, flagging partial runs.
    pub async fn completed(&self, partial: bool, payload: serde_json::Value) -> EmitOutcome {
        let mut body = match payload {
            serde_json::Value::Object(map) => map,
            serde_json::Value::Null => serde_json::Map::new(),
            other => {
                let mut map = serde_json::Map::new();
                map.insert("result".to_string(), other);
                map
            }
        };
        body.insert("partial".to_string(), serde_json::json!(partial));
        self.emit(LifecycleEventType::Completed, None, serde_json::Value::Object(body))
            .await
    }

    /// Emits `Failed` with a sanitized error summary.
    pub async fn failed(&self, error: &RelayflowError) -> EmitOutcome {
        let payload = serde_json::json!({
            "code": error.code(),
            "error": sanitize_error(&error.to_string()),
        });
        self.emit(LifecycleEventType::Failed, None, payload).await
    }
}

impl std::fmt::Debug for EventChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventChannel")
            .field("session_id", &self.session_id)
            .field("user_id", &self.user_id)
            .field("stream_updates", &self.stream_updates)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{CollectingTransport, MockTransport};
    use pretty_assertions::assert_eq;

    fn channel(transport: Arc<dyn Transport>, stream: bool) -> EventChannel {
        EventChannel::new(
            "session-1",
            "user-1",
            transport,
            EventChannelConfig::default().with_send_retry_delay_ms(1),
            stream,
        )
    }

    #[tokio::test]
    async fn test_sequence_numbers_strictly_increase() {
        let transport = Arc::new(CollectingTransport::new());
        let ch = channel(transport.clone(), true);

        assert_eq!(ch.started(serde_json::json!({})).await, EmitOutcome::Delivered(1));
        assert_eq!(ch.stage_executing("triage").await, EmitOutcome::Delivered(2));
        assert_eq!(ch.thinking("triage", "classifying").await, EmitOutcome::Delivered(3));
        assert_eq!(ch.stage_completed("triage", serde_json::json!({})).await, EmitOutcome::Delivered(4));
        assert_eq!(ch.completed(false, serde_json::Value::Null).await, EmitOutcome::Delivered(5));

        let seqs: Vec<u64> = transport
            .messages_for("user-1")
            .iter()
            .map(|m| m["sequenceNumber"].as_u64().unwrap())
            .collect();
        assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
        assert!(ch.is_closed().await);
    }

    #[tokio::test]
    async fn test_causal_order_is_enforced() {
        let transport = Arc::new(CollectingTransport::new());
        let ch = channel(transport.clone(), true);

        assert_eq!(ch.thinking("triage", "too early").await, EmitOutcome::OutOfOrder);
        assert_eq!(ch.completed(false, serde_json::Value::Null).await, EmitOutcome::OutOfOrder);

        ch.started(serde_json::json!({})).await;
        assert_eq!(ch.started(serde_json::json!({})).await, EmitOutcome::OutOfOrder);

        ch.completed(false, serde_json::Value::Null).await;
        assert_eq!(ch.thinking("data", "late").await, EmitOutcome::OutOfOrder);

        assert_eq!(transport.event_types_for("user-1"), vec!["started", "completed"]);
        assert_eq!(ch.metrics().rejected_out_of_order(), 4);
    }

    #[tokio::test]
    async fn test_consecutive_duplicates_suppressed() {
        let transport = Arc::new(CollectingTransport::new());
        let ch = channel(transport.clone(), true);

        ch.started(serde_json::json!({})).await;
        assert_eq!(ch.thinking("data", "querying").await, EmitOutcome::Delivered(2));
        assert_eq!(ch.thinking("data", "querying").await, EmitOutcome::Duplicate);
        assert_eq!(ch.thinking("data", "summarizing").await, EmitOutcome::Delivered(3));

        assert_eq!(transport.len(), 3);
        assert_eq!(ch.metrics().suppressed_duplicates(), 1);
    }

    #[tokio::test]
    async fn test_quiet_mode_only_sends_bookends() {
        let transport = Arc::new(CollectingTransport::new());
        let ch = channel(transport.clone(), false);

        ch.started(serde_json::json!({})).await;
        assert_eq!(ch.stage_executing("triage").await, EmitOutcome::Quiet);
        ch.completed(true, serde_json::Value::Null).await;

        let messages = transport.messages_for("user-1");
        assert_eq!(transport.event_types_for("user-1"), vec!["started", "completed"]);
        assert_eq!(messages[1]["sequenceNumber"], 2);
        assert_eq!(messages[1]["payload"]["partial"], true);
    }

    #[tokio::test]
    async fn test_transient_send_failure_is_retried() {
        let mut mock = MockTransport::new();
        let mut seq = mockall::Sequence::new();
        mock.expect_send()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|user, _| {
                Err(TransportError::Send {
                    user_id: user.to_string(),
                    reason: "buffer full".into(),
                })
            });
        mock.expect_send()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));

        let ch = channel(Arc::new(mock), true);
        assert_eq!(ch.started(serde_json::json!({})).await, EmitOutcome::Delivered(1));
        assert_eq!(ch.metrics().send_retries(), 1);
        assert_eq!(ch.metrics().sent(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_is_absorbed_and_sequence_consumed() {
        let mut mock = MockTransport::new();
        mock.expect_send().times(1).returning(|user, _| {
            Err(TransportError::Disconnected {
                user_id: user.to_string(),
            })
        });
        mock.expect_send().returning(|_, _| Ok(()));

        let ch = channel(Arc::new(mock), true);
        assert!(matches!(
            ch.started(serde_json::json!({})).await,
            EmitOutcome::Failed(TransportError::Disconnected { .. })
        ));
        assert_eq!(ch.thinking("triage", "hi").await, EmitOutcome::Delivered(2));
        assert_eq!(ch.metrics().failed(), 1);
    }

    #[tokio::test]
    async fn test_failed_payload_is_sanitized() {
        let transport = Arc::new(CollectingTransport::new());
        let ch = channel(transport.clone(), true);
        ch.started(serde_json::json!({})).await;

        let err = RelayflowError::Internal("cannot read /etc/relayflow/creds.toml".into());
        ch.failed(&err).await;

        let last = transport.messages_for("user-1").pop().unwrap();
        assert_eq!(last["type"], "failed");
        assert_eq!(last["payload"]["code"], "RELAY-000-INTERNAL");
        assert!(!last["payload"]["error"].as_str().unwrap().contains("/etc"));
    }

    #[tokio::test]
    async fn test_concurrent_emitters_keep_order() {
        let transport = Arc::new(CollectingTransport::new());
        let ch = Arc::new(channel(transport.clone(), true));
        ch.started(serde_json::json!({})).await;

        let handles: Vec<_> = (0..20)
            .map(|i| {
                let ch = ch.clone();
                tokio::spawn(async move { ch.thinking("data", format!("step {i}")).await })
            })
            .collect();
        for h in handles {
            h.await.unwrap();
        }

        let seqs: Vec<u64> = transport
            .messages_for("user-1")
            .iter()
            .map(|m| m["sequenceNumber"].as_u64().unwrap())
            .collect();
        let expected: Vec<u64> = (1..=21).collect();
        assert_eq!(seqs, expected);
    }
}
