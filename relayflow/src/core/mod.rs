//! Core domain types shared across the orchestrator.

mod outcome;

pub use outcome::{SkipReason, StageFailure, StageOutcome};
