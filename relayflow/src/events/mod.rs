//! Lifecycle events and their per-session delivery.
//!
//! Each session owns one [`EventChannel`] over a shared [`Transport`].
//! Channels of different sessions never share state.

mod channel;
mod event;
mod sanitize;
mod transport;

pub use channel::{EmitOutcome, EventChannel, EventChannelConfig, EventChannelMetrics};
pub use event::{LifecycleEvent, LifecycleEventType};
pub use sanitize::{sanitize_error, MAX_SUMMARY_LEN};
#[cfg(test)]
pub use transport::MockTransport;
pub use transport::{CollectingTransport, LoggingTransport, NoOpTransport, Transport};
