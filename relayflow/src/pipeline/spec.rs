//! Pipeline and stage specifications.

use crate::context::{ExecutionState, StateField};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// How stages are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStrategy {
    /// One after another in definition order.
    #[default]
    Sequential,
    /// All at once over independent state copies.
    Parallel,
    /// In order, each gated by its condition.
    Conditional,
}

impl fmt::Display for ExecutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sequential => write!(f, "sequential"),
            Self::Parallel => write!(f, "parallel"),
            Self::Conditional => write!(f, "conditional"),
        }
    }
}

/// Whether an exhausted failure ends the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Failure aborts the pipeline.
    #[default]
    Required,
    /// Failure is recorded and the pipeline continues.
    Optional,
}

/// Predicate type for [`StageCondition::Custom`].
pub type StatePredicate = Arc<dyn Fn(&ExecutionState) -> bool + Send + Sync>;

/// Gate evaluated before a stage under the conditional strategy.
#[derive(Clone, Default)]
pub enum StageCondition {
    /// Always run.
    #[default]
    Always,
    /// Run when the field is populated.
    HasField(StateField),
    /// Run when every field is populated.
    AllFields(Vec<StateField>),
    /// Run when the predicate returns true.
    Custom(StatePredicate),
}

impl StageCondition {
    /// Wraps a predicate.
    pub fn custom<F>(predicate: F) -> Self
    where
        F: Fn(&ExecutionState) -> bool + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(predicate))
    }

    /// Evaluates the condition against a state.
    #[must_use]
    pub fn evaluate(&self, state: &ExecutionState) -> bool {
        match self {
            Self::Always => true,
            Self::HasField(field) => state.is_populated(*field),
            Self::AllFields(fields) => fields.iter().all(|f| state.is_populated(*f)),
            Self::Custom(predicate) => predicate(state),
        }
    }
}

impl fmt::Debug for StageCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Always => write!(f, "Always"),
            Self::HasField(field) => f.debug_tuple("HasField").field(field).finish(),
            Self::AllFields(fields) => f.debug_tuple("AllFields").field(fields).finish(),
            Self::Custom(_) => write!(f, "Custom(<predicate>)"),
        }
    }
}

/// Specification for a single stage in a pipeline.
#[derive(Debug, Clone)]
pub struct StageSpec {
    /// The unique name of the stage, also its registry key.
    pub name: String,
    /// Gate for the conditional strategy.
    pub condition: StageCondition,
    /// Whether failure is fatal.
    pub execution_mode: ExecutionMode,
    /// Fields the stage owns.
    pub produces: Vec<StateField>,
    /// Per-call timeout overriding the orchestrator default.
    pub timeout_ms: Option<u64>,
}

impl StageSpec {
    /// Creates a required stage with no owned fields.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            condition: StageCondition::Always,
            execution_mode: ExecutionMode::Required,
            produces: Vec::new(),
            timeout_ms: None,
        }
    }

    /// Creates a spec for a standard stage name, owning its standard field.
    #[must_use]
    pub fn standard(name: &str) -> Self {
        let spec = Self::new(name);
        match StateField::for_standard_stage(name) {
            Some(field) => spec.produces(field),
            None => spec,
        }
    }

    /// Adds an owned field.
    #[must_use]
    pub fn produces(mut self, field: StateField) -> Self {
        if !self.produces.contains(&field) {
            self.produces.push(field);
        }
        self
    }

    /// Sets the condition.
    #[must_use]
    pub fn with_condition(mut self, condition: StageCondition) -> Self {
        self.condition = condition;
        self
    }

    /// Marks the stage optional.
    #[must_use]
    pub fn optional(mut self) -> Self {
        self.execution_mode = ExecutionMode::Optional;
        self
    }

    /// Sets the per-call timeout.
    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Returns true if the stage is required.
    #[must_use]
    pub fn is_required(&self) -> bool {
        self.execution_mode == ExecutionMode::Required
    }

    /// Resolves the timeout against a default.
    #[must_use]
    pub fn timeout_or(&self, default_ms: u64) -> Duration {
        Duration::from_millis(self.timeout_ms.unwrap_or(default_ms))
    }

    /// Returns true if every owned field is already populated.
    #[must_use]
    pub fn is_already_completed(&self, state: &ExecutionState) -> bool {
        !self.produces.is_empty() && self.produces.iter().all(|f| state.is_populated(*f))
    }
}

/// A validated pipeline. Built by [`PipelineBuilder`](super::PipelineBuilder).
#[derive(Debug, Clone)]
pub struct PipelineDefinition {
    pub(crate) name: String,
    pub(crate) strategy: ExecutionStrategy,
    pub(crate) stages: Vec<StageSpec>,
}

impl PipelineDefinition {
    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the strategy.
    #[must_use]
    pub fn strategy(&self) -> ExecutionStrategy {
        self.strategy
    }

    /// Returns the stages in definition order.
    #[must_use]
    pub fn stages(&self) -> &[StageSpec] {
        &self.stages
    }

    /// Looks up a stage.
    #[must_use]
    pub fn stage(&self, name: &str) -> Option<&StageSpec> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// Returns stage names in definition order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name.as_str()).collect()
    }

    /// Returns the stage owning a field.
    #[must_use]
    pub fn producer_of(&self, field: StateField) -> Option<&StageSpec> {
        self.stages.iter().find(|s| s.produces.contains(&field))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{RunIdentity, TriageResult};

    fn state() -> ExecutionState {
        ExecutionState::new(&RunIdentity::new("u", "t", "r"), "req")
    }

    #[test]
    fn test_standard_spec_owns_its_field() {
        let spec = StageSpec::standard("triage");
        assert_eq!(spec.produces, vec![StateField::Triage]);
        assert!(spec.is_required());

        let custom = StageSpec::standard("enrich").optional().with_timeout_ms(5);
        assert!(custom.produces.is_empty());
        assert!(!custom.is_required());
        assert_eq!(custom.timeout_or(100), Duration::from_millis(5));
    }

    #[test]
    fn test_conditions() {
        let mut s = state();
        assert!(StageCondition::Always.evaluate(&s));
        assert!(!StageCondition::HasField(StateField::Triage).evaluate(&s));

        s.triage_result = Some(TriageResult::new("billing", 0.9));
        assert!(StageCondition::HasField(StateField::Triage).evaluate(&s));
        assert!(!StageCondition::AllFields(vec![StateField::Triage, StateField::Data]).evaluate(&s));

        let billing_only = StageCondition::custom(|s| {
            s.triage_result.as_ref().is_some_and(|t| t.category == "billing")
        });
        assert!(billing_only.evaluate(&s));
        assert_eq!(format!("{billing_only:?}"), "Custom(<predicate>)");
    }

    #[test]
    fn test_already_completed() {
        let mut s = state();
        let spec = StageSpec::standard("triage");
        assert!(!spec.is_already_completed(&s));
        s.triage_result = Some(TriageResult::new("billing", 0.9));
        assert!(spec.is_already_completed(&s));
        assert!(!StageSpec::new("side-effect").is_already_completed(&s));
    }
}
