//! Validation reports and validator configuration.

use crate::context::StateField;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Thresholds used by the handoff rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Triage confidence below this is an error.
    pub min_triage_confidence: f64,
    /// Confidence below this is a warning.
    pub confidence_warning_threshold: f64,
    /// Data quality below this is a warning.
    pub data_quality_warning_threshold: f64,
    /// Reports kept per artifact type.
    pub history_capacity: usize,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            min_triage_confidence: 0.5,
            confidence_warning_threshold: 0.7,
            data_quality_warning_threshold: 0.6,
            history_capacity: 100,
        }
    }
}

impl ValidatorConfig {
    /// Sets the minimum triage confidence.
    #[must_use]
    pub fn with_min_triage_confidence(mut self, value: f64) -> Self {
        self.min_triage_confidence = value;
        self
    }

    /// Sets the confidence warning threshold.
    #[must_use]
    pub fn with_confidence_warning_threshold(mut self, value: f64) -> Self {
        self.confidence_warning_threshold = value;
        self
    }

    /// Sets the data quality warning threshold.
    #[must_use]
    pub fn with_data_quality_warning_threshold(mut self, value: f64) -> Self {
        self.data_quality_warning_threshold = value;
        self
    }

    /// Sets the history capacity.
    #[must_use]
    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }
}

/// Result of validating one artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    /// True when no errors were found.
    pub is_valid: bool,
    /// What was validated.
    pub artifact_type: StateField,
    /// Blocking failures.
    pub errors: Vec<String>,
    /// Non-blocking quality concerns.
    pub warnings: Vec<String>,
    /// Caller-supplied context (stages, run).
    pub context: BTreeMap<String, String>,
    /// Time spent validating.
    pub duration_ms: f64,
    /// When validation ran.
    pub validated_at: DateTime<Utc>,
}

impl ValidationReport {
    pub(crate) fn new(
        artifact_type: StateField,
        errors: Vec<String>,
        warnings: Vec<String>,
        context: BTreeMap<String, String>,
        duration_ms: f64,
    ) -> Self {
        Self {
            is_valid: errors.is_empty(),
            artifact_type,
            errors,
            warnings,
            context,
            duration_ms,
            validated_at: Utc::now(),
        }
    }

    /// Returns true if any warning was raised.
    #[must_use]
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    /// Converts to a JSON object.
    #[must_use]
    pub fn to_dict(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Aggregates over the retained reports of one artifact type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationStats {
    /// Reports retained.
    pub total: usize,
    /// Valid reports.
    pub valid: usize,
    /// Invalid reports.
    pub invalid: usize,
    /// Reports carrying at least one warning.
    pub with_warnings: usize,
    /// Mean validation time.
    pub average_duration_ms: f64,
}

impl ValidationStats {
    pub(crate) fn from_reports<'a>(reports: impl IntoIterator<Item = &'a ValidationReport>) -> Self {
        let mut stats = Self::default();
        let mut total_ms = 0.0;
        for report in reports {
            stats.total += 1;
            if report.is_valid {
                stats.valid += 1;
            } else {
                stats.invalid += 1;
            }
            if report.has_warnings() {
                stats.with_warnings += 1;
            }
            total_ms += report.duration_ms;
        }
        if stats.total > 0 {
            #[allow(clippy::cast_precision_loss)]
            let count = stats.total as f64;
            stats.average_duration_ms = total_ms / count;
        }
        stats
    }

    /// Fraction of valid reports, 1.0 when empty.
    #[must_use]
    pub fn pass_rate(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let rate = self.valid as f64 / self.total as f64;
        rate
    }
}
