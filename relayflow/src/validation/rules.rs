//! Fixed required-field and quality rules per artifact type.

use super::report::ValidatorConfig;
use crate::context::{
    ActionPlanResult, DataResult, ExecutionState, OptimizationResult, ReportResult, StateField,
    TriageResult,
};

/// Errors and warnings raised by one rule pass.
#[derive(Debug, Default)]
pub(crate) struct Findings {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl Findings {
    fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }
}

fn in_unit_range(value: f64) -> bool {
    (0.0..=1.0).contains(&value)
}

fn is_non_negative(value: f64) -> bool {
    value.is_finite() && value >= 0.0
}

pub(crate) fn check(field: StateField, state: &ExecutionState, config: &ValidatorConfig) -> Findings {
    let mut findings = Findings::default();
    match field {
        StateField::Triage => match &state.triage_result {
            Some(triage) => check_triage(triage, config, &mut findings),
            None => findings.error("triage_result is missing"),
        },
        StateField::Data => match &state.data_result {
            Some(data) => check_data(data, config, &mut findings),
            None => findings.error("data_result is missing"),
        },
        StateField::Optimization => match &state.optimization_result {
            Some(optimization) => check_optimization(optimization, config, &mut findings),
            None => findings.error("optimization_result is missing"),
        },
        StateField::ActionPlan => match &state.action_plan_result {
            Some(plan) => check_action_plan(plan, &mut findings),
            None => findings.error("action_plan_result is missing"),
        },
        StateField::Report => match &state.report_result {
            Some(report) => check_report(report, &mut findings),
            None => findings.error("report_result is missing"),
        },
    }
    findings
}

fn check_triage(triage: &TriageResult, config: &ValidatorConfig, findings: &mut Findings) {
    let category = triage.category.trim();
    if category.is_empty() {
        findings.error("triage category must not be empty");
    } else if category.eq_ignore_ascii_case("unknown") {
        findings.error("triage category must not be 'unknown'");
    }

    if !in_unit_range(triage.confidence) {
        findings.error(format!(
            "triage confidence {} must be between 0 and 1",
            triage.confidence
        ));
    } else if triage.confidence < config.min_triage_confidence {
        findings.error(format!(
            "triage confidence {} is below the minimum {}",
            triage.confidence, config.min_triage_confidence
        ));
    } else if triage.confidence < config.confidence_warning_threshold {
        findings.warn(format!(
            "triage confidence {} is below {}",
            triage.confidence, config.confidence_warning_threshold
        ));
    }
}

fn check_data(data: &DataResult, config: &ValidatorConfig, findings: &mut Findings) {
    if !is_non_negative(data.execution_time_ms) {
        findings.error(format!(
            "execution_time_ms must be a finite non-negative number, got {}",
            data.execution_time_ms
        ));
    }
    if data.row_count < 0 {
        findings.error(format!("row_count must be non-negative, got {}", data.row_count));
    }
    if let Some(score) = data.data_quality_score {
        if !in_unit_range(score) {
            findings.error(format!("data_quality_score {score} must be between 0 and 1"));
        } else if score < config.data_quality_warning_threshold {
            findings.warn(format!(
                "data quality {score} is below {}",
                config.data_quality_warning_threshold
            ));
        }
    }
    if data.insights.is_empty() {
        findings.warn("data result carries no insights");
    }
}

fn check_optimization(
    optimization: &OptimizationResult,
    config: &ValidatorConfig,
    findings: &mut Findings,
) {
    if optimization.recommendations.is_empty() {
        findings.error("optimization must carry at least one recommendation");
    }
    if !in_unit_range(optimization.confidence) {
        findings.error(format!(
            "optimization confidence {} must be between 0 and 1",
            optimization.confidence
        ));
    } else if optimization.confidence < config.confidence_warning_threshold {
        findings.warn(format!(
            "optimization confidence {} is below {}",
            optimization.confidence, config.confidence_warning_threshold
        ));
    }
    for (index, rec) in optimization.recommendations.iter().enumerate() {
        if rec.title.trim().is_empty() {
            findings.error(format!("recommendation #{index} has an empty title"));
        }
        if !is_non_negative(rec.estimated_savings) {
            findings.error(format!(
                "recommendation #{index} estimated_savings must be a finite non-negative number, got {}",
                rec.estimated_savings
            ));
        }
    }
}

fn check_action_plan(plan: &ActionPlanResult, findings: &mut Findings) {
    if plan.steps.is_empty() {
        findings.error("action plan must carry at least one step");
    }
    if !is_non_negative(plan.estimated_duration_hours) {
        findings.error(format!(
            "estimated_duration_hours must be a finite non-negative number, got {}",
            plan.estimated_duration_hours
        ));
    }
    let mut unowned = 0;
    for step in &plan.steps {
        if step.description.trim().is_empty() {
            findings.error(format!("step {} has an empty description", step.order));
        }
        if step.owner.is_none() {
            unowned += 1;
        }
    }
    if unowned > 0 {
        findings.warn(format!("{unowned} step(s) have no owner"));
    }
}

fn check_report(report: &ReportResult, findings: &mut Findings) {
    if report.title.trim().is_empty() {
        findings.error("report title must not be empty");
    }
    if report.summary.trim().is_empty() {
        findings.error("report summary must not be empty");
    }
    if report.sections.is_empty() {
        findings.warn("report has no sections");
    }
}
