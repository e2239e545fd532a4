//! Tests for the context module.

#[cfg(test)]
mod tests {
    use crate::context::{
        ActionPlanResult, ActionStep, DataResult, ExecutionHistory, ExecutionState,
        OptimizationResult, Recommendation, ReportResult, RunIdentity, StageExecutionContext,
        StateField, TriageResult,
    };
    use pretty_assertions::assert_eq;

    fn state() -> ExecutionState {
        ExecutionState::new(
            &RunIdentity::new("user-1", "thread-1", "run-1"),
            "Why did our cloud bill spike?",
        )
    }

    fn full_state() -> ExecutionState {
        let mut s = state();
        s.step_count = 5;
        s.thread_context = Some(serde_json::json!({"previous_topic": "storage"}));
        s.triage_result = Some(TriageResult::new("cost_optimization", 0.92).with_intent("reduce spend"));
        s.data_result = Some(
            DataResult::new(412.5, 1_284)
                .with_insight("egress doubled")
                .with_metric("monthly_cost", 18_250.75)
                .with_quality_score(0.88),
        );
        s.optimization_result = Some(OptimizationResult::new(
            vec![
                Recommendation::new("Enable CDN caching", 2_400.0),
                Recommendation::new("Rightsize instances", 1_100.5),
            ],
            0.81,
        ));
        s.action_plan_result = Some(ActionPlanResult {
            steps: vec![ActionStep::new(1, "Turn on CDN").with_owner("platform")],
            estimated_duration_hours: 6.5,
        });
        s.report_result = Some(ReportResult::new("Cost review", "Egress drove the spike").with_section("Findings", "..."));
        s
    }

    #[test]
    fn test_state_serialization_roundtrip() {
        let original = full_state();
        let json = serde_json::to_string(&original).unwrap();
        let restored: ExecutionState = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, original);

        let snapshot = original.to_snapshot().unwrap();
        assert_eq!(ExecutionState::from_snapshot(snapshot).unwrap(), original);
    }

    #[test]
    fn test_empty_fields_are_omitted_and_restored() {
        let original = state();
        let value = original.to_snapshot().unwrap();
        assert!(value.get("triage_result").is_none());
        assert_eq!(ExecutionState::from_snapshot(value).unwrap(), original);
    }

    #[test]
    fn test_identity_roundtrip() {
        let s = state();
        let identity = s.identity();
        assert_eq!(identity.run_id, "run-1");
        assert_eq!(identity.session_id, s.session_id);
    }

    #[test]
    fn test_populated_fields_in_pipeline_order() {
        let mut s = state();
        s.data_result = Some(DataResult::new(1.0, 1));
        s.triage_result = Some(TriageResult::new("billing", 0.9));
        assert_eq!(s.populated_fields(), vec![StateField::Triage, StateField::Data]);
    }

    #[test]
    fn test_absorb_copies_only_owned_fields() {
        let mut shared = state();
        let mut copy = shared.clone();
        copy.triage_result = Some(TriageResult::new("billing", 0.9));
        copy.data_result = Some(DataResult::new(1.0, 1));

        let written = shared.absorb(&copy, &[StateField::Triage], "triage").unwrap();
        assert_eq!(written, vec![StateField::Triage]);
        assert!(shared.triage_result.is_some());
        assert!(shared.data_result.is_none());
    }

    #[test]
    fn test_absorb_rejects_overwrite_with_different_value() {
        let mut shared = state();
        shared.triage_result = Some(TriageResult::new("billing", 0.9));
        let mut copy = shared.clone();
        copy.triage_result = Some(TriageResult::new("security", 0.7));

        let err = shared.absorb(&copy, &[StateField::Triage], "triage").unwrap_err();
        assert_eq!(err.field, "triage_result");
        assert_eq!(err.stage, "triage");
    }

    #[test]
    fn test_absorb_unchanged_field_is_noop() {
        let mut shared = state();
        shared.triage_result = Some(TriageResult::new("billing", 0.9));
        let copy = shared.clone();

        let written = shared.absorb(&copy, &[StateField::Triage], "triage").unwrap();
        assert!(written.is_empty());
    }

    #[test]
    fn test_fill_missing_keeps_first_hit() {
        let mut target = state();
        target.triage_result = Some(TriageResult::new("first", 0.9));

        let mut later = state();
        later.triage_result = Some(TriageResult::new("second", 0.8));
        later.data_result = Some(DataResult::new(3.0, 7));

        let filled = target.fill_missing_from(&later);
        assert_eq!(filled, vec![StateField::Data]);
        assert_eq!(target.triage_result.unwrap().category, "first");
    }

    #[test]
    fn test_digest_tracks_content() {
        let a = full_state();
        let b = a.clone();
        assert_eq!(a.digest(), b.digest());

        let mut c = a.clone();
        c.step_count += 1;
        assert_ne!(a.digest(), c.digest());
    }

    #[test]
    fn test_state_field_lookup() {
        assert_eq!(StateField::for_standard_stage("action_plan"), Some(StateField::ActionPlan));
        assert_eq!(StateField::for_standard_stage("nope"), None);
        assert_eq!(StateField::Report.standard_stage(), "reporting");
        assert_eq!(StateField::Optimization.key(), "optimization_result");
    }

    #[test]
    fn test_history_is_bounded() {
        let history = ExecutionHistory::new(2);
        for stage in ["triage", "data", "optimization"] {
            let mut ctx = StageExecutionContext::new(stage, "run-1", "u", "t", 3);
            ctx.mark_completed(1.0);
            history.record(ctx);
        }

        let names: Vec<_> = history.entries().into_iter().map(|c| c.stage_name).collect();
        assert_eq!(names, vec!["data".to_string(), "optimization".to_string()]);
        assert_eq!(history.capacity(), 2);
    }

    #[test]
    fn test_history_queries() {
        let history = ExecutionHistory::default();
        let mut ok = StageExecutionContext::new("triage", "run-1", "u", "t", 3);
        ok.mark_completed(2.0);
        let mut failed = StageExecutionContext::new("triage", "run-2", "u", "t", 3);
        failed.mark_failed("boom", 3.0);
        history.record(ok);
        history.record(failed);

        assert_eq!(history.for_run("run-1").len(), 1);
        assert!(history.latest("run-1", "triage").unwrap().succeeded());
        assert!(!history.latest("run-2", "triage").unwrap().succeeded());
        assert!(history.latest("run-3", "triage").is_none());
    }
}
