//! Names of the typed output slots in [`ExecutionState`](super::ExecutionState).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Standard stage names, in pipeline order.
pub mod stage_names {
    /// Request classification.
    pub const TRIAGE: &str = "triage";
    /// Data analysis.
    pub const DATA: &str = "data";
    /// Optimization recommendations.
    pub const OPTIMIZATION: &str = "optimization";
    /// Action planning.
    pub const ACTION_PLAN: &str = "action_plan";
    /// Final report.
    pub const REPORTING: &str = "reporting";
}

/// An output slot of the execution state. Each slot has exactly one
/// producing stage per pipeline. Also used as the validator's artifact type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateField {
    /// `triage_result`
    Triage,
    /// `data_result`
    Data,
    /// `optimization_result`
    Optimization,
    /// `action_plan_result`
    ActionPlan,
    /// `report_result`
    Report,
}

impl StateField {
    /// Every field, in pipeline order.
    pub const ALL: [Self; 5] = [
        Self::Triage,
        Self::Data,
        Self::Optimization,
        Self::ActionPlan,
        Self::Report,
    ];

    /// The field's key in serialized state.
    #[must_use]
    pub fn key(self) -> &'static str {
        match self {
            Self::Triage => "triage_result",
            Self::Data => "data_result",
            Self::Optimization => "optimization_result",
            Self::ActionPlan => "action_plan_result",
            Self::Report => "report_result",
        }
    }

    /// The standard stage that produces this field.
    #[must_use]
    pub fn standard_stage(self) -> &'static str {
        match self {
            Self::Triage => stage_names::TRIAGE,
            Self::Data => stage_names::DATA,
            Self::Optimization => stage_names::OPTIMIZATION,
            Self::ActionPlan => stage_names::ACTION_PLAN,
            Self::Report => stage_names::REPORTING,
        }
    }

    /// Looks up the field produced by a standard stage name.
    #[must_use]
    pub fn for_standard_stage(stage: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.standard_stage() == stage)
    }
}

impl fmt::Display for StateField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Triage => "triage",
            Self::Data => "data",
            Self::Optimization => "optimization",
            Self::ActionPlan => "action_plan",
            Self::Report => "report",
        };
        f.write_str(s)
    }
}
