//! Testing utilities for relayflow pipelines.
//!
//! This module provides:
//! - Mock worker stages
//! - Valid sample outputs and states
//! - Assertions for pipeline outcomes and event streams

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{
    assert_causal_order, assert_stage_failed, assert_stage_skipped, assert_stage_succeeded,
};
pub use fixtures::{
    fill_sample, sample_action_plan, sample_data, sample_optimization, sample_report,
    sample_triage, standard_stage_names, test_state,
};
pub use mocks::{FailingStage, RecordingStage, ScriptedStage, SlowStage};
