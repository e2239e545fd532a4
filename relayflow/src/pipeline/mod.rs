//! Pipeline definitions and the orchestrator.
//!
//! This module provides:
//! - [`PipelineBuilder`] validating definitions against a [`StageRegistry`](crate::stages::StageRegistry)
//! - [`Orchestrator`] running sequential, parallel and conditional strategies
//! - [`StageHook`] extension points

mod builder;
mod hooks;
mod orchestrator;
mod spec;


pub use builder::PipelineBuilder;
pub use hooks::{HookChain, StageHook};
pub use orchestrator::{Orchestrator, OrchestratorConfig, PipelineOutcome, PipelineRun, END_PHASE};
pub use spec::{
    ExecutionMode, ExecutionStrategy, PipelineDefinition, StageCondition, StageSpec,
    StatePredicate,
};
