//! Handoff validator with a bounded audit history.

use super::report::{ValidationReport, ValidationStats, ValidatorConfig};
use super::rules;
use crate::context::{ExecutionState, StateField};
use crate::errors::HandoffValidationError;
use crate::observability::SpanTimer;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, VecDeque};
use tracing::{debug, warn};

/// Gates inter-stage transitions on the artifacts the upstream stage produced.
#[derive(Debug)]
pub struct HandoffValidator {
    config: ValidatorConfig,
    history: RwLock<HashMap<StateField, VecDeque<ValidationReport>>>,
    stage_fields: RwLock<HashMap<String, Vec<StateField>>>,
}

impl HandoffValidator {
    /// Creates a validator.
    #[must_use]
    pub fn new(config: ValidatorConfig) -> Self {
        Self {
            config,
            history: RwLock::new(HashMap::new()),
            stage_fields: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the config.
    #[must_use]
    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    /// Declares which fields a stage produces.
    pub fn register_stage_fields(&self, stage: impl Into<String>, fields: Vec<StateField>) {
        self.stage_fields.write().insert(stage.into(), fields);
    }

    /// Returns the fields checked when leaving `stage`.
    ///
    /// Falls back to the standard stage names when nothing was registered.
    #[must_use]
    pub fn fields_for_stage(&self, stage: &str) -> Vec<StateField> {
        if let Some(fields) = self.stage_fields.read().get(stage) {
            return fields.clone();
        }
        StateField::for_standard_stage(stage).into_iter().collect()
    }

    /// Validates one artifact and records the report.
    pub fn validate(
        &self,
        artifact_type: StateField,
        state: &ExecutionState,
        context: BTreeMap<String, String>,
    ) -> ValidationReport {
        let timer = SpanTimer::start("validation");
        let findings = rules::check(artifact_type, state, &self.config);
        let report = ValidationReport::new(
            artifact_type,
            findings.errors,
            findings.warnings,
            context,
            timer.elapsed_ms(),
        );
        self.record(report.clone());
        report
    }

    /// Validates everything `from_stage` produced before handing off to `to_stage`.
    ///
    /// Warnings are logged and returned; only errors block.
    ///
    /// # Errors
    ///
    /// Returns [`HandoffValidationError`] listing every required-field failure.
    pub fn validate_pipeline_handoff(
        &self,
        state: &ExecutionState,
        from_stage: &str,
        to_stage: &str,
        run_id: &str,
    ) -> Result<Vec<ValidationReport>, HandoffValidationError> {
        let fields = self.fields_for_stage(from_stage);
        if fields.is_empty() {
            debug!(from_stage, to_stage, "No artifacts to validate for handoff");
            return Ok(Vec::new());
        }

        let context: BTreeMap<String, String> = [
            ("from_stage".to_string(), from_stage.to_string()),
            ("to_stage".to_string(), to_stage.to_string()),
            ("run_id".to_string(), run_id.to_string()),
        ]
        .into_iter()
        .collect();

        let mut reports = Vec::with_capacity(fields.len());
        let mut field_errors = Vec::new();
        for field in fields {
            let report = self.validate(field, state, context.clone());
            for warning in &report.warnings {
                warn!(
                    run_id = %run_id,
                    from_stage,
                    to_stage,
                    artifact = %field,
                    warning = %warning,
                    "Handoff quality warning"
                );
            }
            field_errors.extend(report.errors.iter().map(|e| format!("{field}: {e}")));
            reports.push(report);
        }

        if field_errors.is_empty() {
            Ok(reports)
        } else {
            Err(HandoffValidationError {
                from_stage: from_stage.to_string(),
                to_stage: to_stage.to_string(),
                run_id: run_id.to_string(),
                field_errors,
            })
        }
    }

    fn record(&self, report: ValidationReport) {
        let capacity = self.config.history_capacity.max(1);
        let mut history = self.history.write();
        let entries = history.entry(report.artifact_type).or_default();
        if entries.len() >= capacity {
            entries.pop_front();
        }
        entries.push_back(report);
    }

    /// Returns retained reports for an artifact type, oldest first.
    #[must_use]
    pub fn history(&self, artifact_type: StateField) -> Vec<ValidationReport> {
        self.history
            .read()
            .get(&artifact_type)
            .map(|entries| entries.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns aggregates for an artifact type.
    #[must_use]
    pub fn stats(&self, artifact_type: StateField) -> ValidationStats {
        self.history
            .read()
            .get(&artifact_type)
            .map(|entries| ValidationStats::from_reports(entries.iter()))
            .unwrap_or_default()
    }

    /// Drops all retained reports.
    pub fn clear_history(&self) {
        self.history.write().clear();
    }
}

impl Default for HandoffValidator {
    fn default() -> Self {
        Self::new(ValidatorConfig::default())
    }
}
