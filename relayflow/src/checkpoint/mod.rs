//! Checkpointing and recovery of execution state.
//!
//! The write path fans a snapshot out to a fast [`CheckpointTier`], the
//! durable [`StateStore`] and an in-process fallback. The read path in
//! [`RecoveryManager`] queries them in that order and merges the first hit
//! per field.

mod heartbeat;
mod model;
mod recovery;
mod state_store;
mod store;
mod tier;

pub use heartbeat::HeartbeatMonitor;
pub use model::{Checkpoint, CheckpointType};
pub use recovery::{RecoveryConfig, RecoveryManager, RecoveryReport, RecoverySource, RecoveryStatus};
#[cfg(test)]
pub use state_store::MockStateStore;
pub use state_store::{InMemoryStateStore, StateStore};
pub use store::{CheckpointConfig, CheckpointMetrics, CheckpointStore};
pub use tier::{CheckpointTier, InMemoryCheckpointTier, JsonFileCheckpointTier, DEFAULT_MAX_PER_RUN};
