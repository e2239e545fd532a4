//! Typed outputs produced by the worker stages.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Urgency assigned by triage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Low urgency.
    Low,
    /// Normal urgency.
    #[default]
    Medium,
    /// High urgency.
    High,
    /// Needs immediate attention.
    Critical,
}

/// Output of the triage stage.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TriageResult {
    /// Request category.
    pub category: String,
    /// Classifier confidence in [0, 1].
    pub confidence: f64,
    /// Assigned priority.
    #[serde(default)]
    pub priority: Priority,
    /// Detected user intent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
    /// Extracted entities.
    #[serde(default)]
    pub entities: Vec<String>,
}

impl TriageResult {
    /// Creates a triage result.
    #[must_use]
    pub fn new(category: impl Into<String>, confidence: f64) -> Self {
        Self {
            category: category.into(),
            confidence,
            ..Default::default()
        }
    }

    /// Sets the priority.
    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the intent.
    #[must_use]
    pub fn with_intent(mut self, intent: impl Into<String>) -> Self {
        self.intent = Some(intent.into());
        self
    }

    /// Sets the entities.
    #[must_use]
    pub fn with_entities(mut self, entities: Vec<String>) -> Self {
        self.entities = entities;
        self
    }
}

/// Output of the data analysis stage.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DataResult {
    /// Query execution time in milliseconds.
    pub execution_time_ms: f64,
    /// Rows returned.
    pub row_count: i64,
    /// Human-readable findings.
    #[serde(default)]
    pub insights: Vec<String>,
    /// Named numeric metrics.
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
    /// Data quality in [0, 1].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_quality_score: Option<f64>,
}

impl DataResult {
    /// Creates a data result.
    #[must_use]
    pub fn new(execution_time_ms: f64, row_count: i64) -> Self {
        Self {
            execution_time_ms,
            row_count,
            ..Default::default()
        }
    }

    /// Adds an insight.
    #[must_use]
    pub fn with_insight(mut self, insight: impl Into<String>) -> Self {
        self.insights.push(insight.into());
        self
    }

    /// Adds a metric.
    #[must_use]
    pub fn with_metric(mut self, name: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(name.into(), value);
        self
    }

    /// Sets the quality score.
    #[must_use]
    pub fn with_quality_score(mut self, score: f64) -> Self {
        self.data_quality_score = Some(score);
        self
    }
}

/// Implementation effort of a recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Effort {
    /// Little work.
    Low,
    /// Moderate work.
    #[default]
    Medium,
    /// Significant work.
    High,
}

/// A single optimization recommendation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Recommendation {
    /// Short title.
    pub title: String,
    /// Longer description.
    #[serde(default)]
    pub description: String,
    /// Estimated savings (currency units).
    pub estimated_savings: f64,
    /// Effort estimate.
    #[serde(default)]
    pub effort: Effort,
}

impl Recommendation {
    /// Creates a recommendation.
    #[must_use]
    pub fn new(title: impl Into<String>, estimated_savings: f64) -> Self {
        Self {
            title: title.into(),
            estimated_savings,
            ..Default::default()
        }
    }
}

/// Output of the optimization stage.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OptimizationResult {
    /// Ranked recommendations.
    pub recommendations: Vec<Recommendation>,
    /// Confidence in [0, 1].
    pub confidence: f64,
    /// Sum of projected savings.
    #[serde(default)]
    pub projected_savings: f64,
}

impl OptimizationResult {
    /// Creates an optimization result, deriving projected savings.
    #[must_use]
    pub fn new(recommendations: Vec<Recommendation>, confidence: f64) -> Self {
        let projected_savings = recommendations.iter().map(|r| r.estimated_savings).sum();
        Self {
            recommendations,
            confidence,
            projected_savings,
        }
    }
}

/// One step of an action plan.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ActionStep {
    /// 1-based position.
    pub order: u32,
    /// What to do.
    pub description: String,
    /// Who does it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
}

impl ActionStep {
    /// Creates a step.
    #[must_use]
    pub fn new(order: u32, description: impl Into<String>) -> Self {
        Self {
            order,
            description: description.into(),
            owner: None,
        }
    }

    /// Sets the owner.
    #[must_use]
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }
}

/// Output of the action planning stage.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ActionPlanResult {
    /// Ordered steps.
    pub steps: Vec<ActionStep>,
    /// Expected duration.
    pub estimated_duration_hours: f64,
}

/// A report section.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReportSection {
    /// Section heading.
    pub heading: String,
    /// Section body.
    pub body: String,
}

/// Output of the reporting stage.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReportResult {
    /// Report title.
    pub title: String,
    /// Executive summary.
    pub summary: String,
    /// Body sections.
    #[serde(default)]
    pub sections: Vec<ReportSection>,
}

impl ReportResult {
    /// Creates a report.
    #[must_use]
    pub fn new(title: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            summary: summary.into(),
            sections: Vec::new(),
        }
    }

    /// Adds a section.
    #[must_use]
    pub fn with_section(mut self, heading: impl Into<String>, body: impl Into<String>) -> Self {
        self.sections.push(ReportSection {
            heading: heading.into(),
            body: body.into(),
        });
        self
    }
}
