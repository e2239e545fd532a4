//! Session coordination.
//!
//! This module provides:
//! - [`SessionCoordinator`] turning a user request into a pipeline run
//! - The [`SessionLifecycle`] state machine with crash and resume support

mod coordinator;
mod lifecycle;

pub use coordinator::{SessionConfig, SessionCoordinator, SessionOutcome, SessionRequest};
pub use lifecycle::{SessionLifecycle, SessionPhase};
