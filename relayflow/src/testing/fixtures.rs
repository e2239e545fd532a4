//! Sample stage outputs and ready-made states.

use crate::context::{
    stage_names, ActionPlanResult, ActionStep, DataResult, ExecutionState, OptimizationResult,
    Priority, Recommendation, ReportResult, RunIdentity, StateField, TriageResult,
};

/// Creates a state for `run_id` with a fixed user and thread.
#[must_use]
pub fn test_state(run_id: &str) -> ExecutionState {
    ExecutionState::new(
        &RunIdentity::new("user-1", "thread-1", run_id),
        "Reduce our monthly cloud spend",
    )
}

/// A triage result that passes validation without warnings.
#[must_use]
pub fn sample_triage() -> TriageResult {
    TriageResult::new("cost_optimization", 0.92)
        .with_priority(Priority::High)
        .with_intent("reduce spend")
}

/// A data result that passes validation without warnings.
#[must_use]
pub fn sample_data(run_id: &str) -> DataResult {
    DataResult::new(42.0, 1_250)
        .with_insight(format!("compute dominates spend for {run_id}"))
        .with_metric("monthly_spend", 18_400.0)
        .with_quality_score(0.95)
}

/// An optimization result that passes validation without warnings.
#[must_use]
pub fn sample_optimization() -> OptimizationResult {
    OptimizationResult::new(
        vec![
            Recommendation::new("Rightsize idle instances", 2_100.0),
            Recommendation::new("Move cold data to archive tier", 640.0),
        ],
        0.85,
    )
}

/// An action plan that passes validation without warnings.
#[must_use]
pub fn sample_action_plan() -> ActionPlanResult {
    ActionPlanResult {
        steps: vec![
            ActionStep::new(1, "Tag idle instances").with_owner("platform"),
            ActionStep::new(2, "Schedule downsizing window").with_owner("ops"),
        ],
        estimated_duration_hours: 12.0,
    }
}

/// A report that passes validation without warnings.
#[must_use]
pub fn sample_report() -> ReportResult {
    ReportResult::new("Cloud savings plan", "Two changes save about $2.7k per month")
        .with_section("Findings", "Compute is 70% of spend")
}

/// Writes a valid sample value for `field` into `state`.
pub fn fill_sample(state: &mut ExecutionState, field: StateField) {
    match field {
        StateField::Triage => state.triage_result = Some(sample_triage()),
        StateField::Data => state.data_result = Some(sample_data(&state.run_id)),
        StateField::Optimization => state.optimization_result = Some(sample_optimization()),
        StateField::ActionPlan => state.action_plan_result = Some(sample_action_plan()),
        StateField::Report => state.report_result = Some(sample_report()),
    }
}

/// The standard stage names in pipeline order.
#[must_use]
pub fn standard_stage_names() -> [&'static str; 5] {
    [
        stage_names::TRIAGE,
        stage_names::DATA,
        stage_names::OPTIMIZATION,
        stage_names::ACTION_PLAN,
        stage_names::REPORTING,
    ]
}
