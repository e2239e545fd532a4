//! # Relayflow
//!
//! Resilient orchestration of multi-stage AI task pipelines.
//!
//! A user request is turned into a pipeline of worker stages (triage, data
//! analysis, optimization, action planning, reporting) that share one
//! typed execution state. Relayflow provides:
//!
//! - **Failure isolation**: a circuit breaker per stage, shared across sessions
//! - **Retries**: exponential backoff with jitter under a per-session budget
//! - **Ordered progress events**: sequenced delivery to the connected client
//! - **Checkpointing and recovery**: tiered checkpoints and crash resume
//! - **Handoff validation**: quality gates between stages
//! - **Strategies**: sequential, parallel and conditional execution
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use relayflow::prelude::*;
//!
//! let registry = Arc::new(StageRegistry::new());
//! registry.register(Arc::new(TriageStage::new(model)));
//! // ... register the remaining stages
//!
//! let coordinator = RelayflowConfig::default()
//!     .build_coordinator(registry, Arc::new(LoggingTransport::default()));
//! let outcome = coordinator
//!     .start_session(SessionRequest::new("user-1", "thread-1", "Cut our cloud bill"), None, true)
//!     .await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod checkpoint;
pub mod config;
pub mod context;
pub mod core;
pub mod errors;
pub mod events;
pub mod observability;
pub mod pipeline;
pub mod resilience;
pub mod session;
pub mod stages;
pub mod testing;
pub mod validation;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::checkpoint::{
        Checkpoint, CheckpointStore, CheckpointType, RecoveryManager, RecoveryReport,
        RecoveryStatus, StateStore,
    };
    pub use crate::config::RelayflowConfig;
    pub use crate::context::{
        stage_names, ExecutionState, RunIdentity, StageExecutionContext, StateField,
    };
    pub use crate::core::{SkipReason, StageOutcome};
    pub use crate::errors::{HandoffValidationError, RelayflowError, StageError};
    pub use crate::events::{
        EventChannel, LifecycleEvent, LifecycleEventType, LoggingTransport, Transport,
    };
    pub use crate::pipeline::{
        ExecutionMode, ExecutionStrategy, Orchestrator, PipelineBuilder, PipelineDefinition,
        PipelineRun, StageCondition, StageHook, StageSpec,
    };
    pub use crate::resilience::{
        CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState, RetryBudget,
        RetryConfig, RetryPolicy,
    };
    pub use crate::session::{SessionCoordinator, SessionOutcome, SessionPhase, SessionRequest};
    pub use crate::stages::{StageRegistry, WorkerStage};
    pub use crate::validation::{HandoffValidator, ValidationReport};
    pub use std::sync::Arc;
}

#[cfg(test)]
mod tests {
    use crate::prelude::*;

    #[test]
    fn test_prelude_wires_a_coordinator() {
        let registry = Arc::new(StageRegistry::new());
        registry.register(Arc::new(crate::stages::NoOpStage::new(stage_names::TRIAGE)));

        let coordinator = RelayflowConfig::default()
            .build_coordinator(registry, Arc::new(LoggingTransport::default()));
        assert!(coordinator.standard_pipeline().is_err());
        assert_eq!(coordinator.session_phase("run-1"), None);
    }
}
