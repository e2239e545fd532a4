//! Session cancellation token.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

/// Why and when a session was cancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cancellation {
    /// Caller-supplied reason, e.g. "client disconnected".
    pub reason: String,
    /// When the first cancel request arrived.
    pub requested_at: DateTime<Utc>,
}

/// Cooperative cancellation for one session run.
///
/// The first request wins; later requests are ignored. Stages are not
/// interrupted directly: the retry loop races each attempt against
/// [`CancellationToken::cancelled`] and the orchestrator checks the token
/// between stages.
#[derive(Debug, Default)]
pub struct CancellationToken {
    state: RwLock<Option<Cancellation>>,
    notify: Notify,
}

impl CancellationToken {
    /// Creates an untriggered token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Returns false if the token had already fired.
    pub fn cancel(&self, reason: impl Into<String>) -> bool {
        {
            let mut state = self.state.write();
            if state.is_some() {
                return false;
            }
            *state = Some(Cancellation {
                reason: reason.into(),
                requested_at: Utc::now(),
            });
        }
        self.notify.notify_waiters();
        true
    }

    /// Returns true once cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state.read().is_some()
    }

    /// Returns the reason of the first request.
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        self.state.read().as_ref().map(|c| c.reason.clone())
    }

    /// Returns the full cancellation record.
    #[must_use]
    pub fn cancellation(&self) -> Option<Cancellation> {
        self.state.read().clone()
    }

    /// Resolves once the token fires. Resolves immediately if it already has.
    pub async fn cancelled(&self) {
        loop {
            // Register interest before checking, so a cancel landing between
            // the check and the await still wakes us.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_first_reason_wins() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        assert!(token.cancellation().is_none());

        assert!(token.cancel("client disconnected"));
        assert!(!token.cancel("server shutdown"));

        assert!(token.is_cancelled());
        assert_eq!(token.reason().as_deref(), Some("client disconnected"));
        assert!(token.cancellation().unwrap().requested_at <= Utc::now());
    }

    #[tokio::test]
    async fn test_cancelled_wakes_every_waiter() {
        let token = Arc::new(CancellationToken::new());
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let token = Arc::clone(&token);
                tokio::spawn(async move { token.cancelled().await })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel("user pressed stop");

        for waiter in waiters {
            tokio::time::timeout(Duration::from_secs(1), waiter)
                .await
                .unwrap()
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_cancelled_is_ready_after_cancel() {
        let token = CancellationToken::new();
        let mut pending = tokio_test::task::spawn(token.cancelled());
        tokio_test::assert_pending!(pending.poll());
        drop(pending);

        token.cancel("done");
        tokio_test::assert_ready!(tokio_test::task::spawn(token.cancelled()).poll());
    }
}
