//! Test assertions for pipeline outcomes and event streams.

use crate::core::{SkipReason, StageOutcome};
use crate::events::{LifecycleEvent, LifecycleEventType};
use crate::pipeline::PipelineOutcome;

fn outcome_of<'a>(outcome: &'a PipelineOutcome, stage: &str) -> &'a StageOutcome {
    match outcome.outcome(stage) {
        Some(o) => o,
        None => panic!(
            "No outcome recorded for stage '{stage}'. Stages: {:?}",
            outcome.outcomes.iter().map(|(name, _)| name).collect::<Vec<_>>()
        ),
    }
}

/// Asserts that a stage succeeded.
pub fn assert_stage_succeeded(outcome: &PipelineOutcome, stage: &str) {
    let stage_outcome = outcome_of(outcome, stage);
    assert!(
        stage_outcome.is_success(),
        "Expected '{stage}' to succeed, got {stage_outcome:?}"
    );
}

/// Asserts that a stage was skipped for `reason`.
pub fn assert_stage_skipped(outcome: &PipelineOutcome, stage: &str, reason: SkipReason) {
    let stage_outcome = outcome_of(outcome, stage);
    assert_eq!(
        stage_outcome.skip_reason(),
        Some(reason),
        "Expected '{stage}' to be skipped ({reason}), got {stage_outcome:?}"
    );
}

/// Asserts that a stage failed.
pub fn assert_stage_failed(outcome: &PipelineOutcome, stage: &str) {
    let stage_outcome = outcome_of(outcome, stage);
    assert!(
        stage_outcome.is_failed(),
        "Expected '{stage}' to fail, got {stage_outcome:?}"
    );
}

/// Asserts that events follow `Started, intermediates*, terminal?` with
/// strictly increasing sequence numbers.
pub fn assert_causal_order(events: &[LifecycleEvent]) {
    for (index, event) in events.iter().enumerate() {
        match index {
            0 => assert_eq!(
                event.event_type,
                LifecycleEventType::Started,
                "First event must be Started, got {:?}",
                event.event_type
            ),
            _ if event.event_type.is_terminal() => assert_eq!(
                index,
                events.len() - 1,
                "Terminal event {:?} must be last",
                event.event_type
            ),
            _ => assert!(
                event.event_type.is_intermediate(),
                "Unexpected {:?} at position {index}",
                event.event_type
            ),
        }
    }
    for pair in events.windows(2) {
        assert!(
            pair[0].sequence_number < pair[1].sequence_number,
            "Sequence numbers must strictly increase: {} then {}",
            pair[0].sequence_number,
            pair[1].sequence_number
        );
    }
}
