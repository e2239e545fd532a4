//! Execution state for pipeline runs.
//!
//! This module provides:
//! - The per-request [`ExecutionState`] and its typed stage outputs
//! - Run identity and the [`StateField`] ownership slots
//! - Per-invocation stage contexts and a bounded execution history

#[cfg(test)]
mod context_tests;
mod execution;
mod field;
mod history;
mod identity;
mod outputs;

pub use execution::ExecutionState;
pub use field::{stage_names, StateField};
pub use history::{ExecutionHistory, StageExecutionContext, DEFAULT_HISTORY_CAPACITY};
pub use identity::RunIdentity;
pub use outputs::{
    ActionPlanResult, ActionStep, DataResult, Effort, OptimizationResult, Priority,
    Recommendation, ReportResult, ReportSection, TriageResult,
};
