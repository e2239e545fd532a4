//! Pipeline builder with validation.

use super::spec::{ExecutionStrategy, PipelineDefinition, StageSpec};
use crate::context::StateField;
use crate::errors::{OutputConflictError, PipelineValidationError, RelayflowError};
use crate::stages::StageRegistry;
use std::collections::{HashMap, HashSet};

/// Builder for validated pipeline definitions.
#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    name: String,
    strategy: ExecutionStrategy,
    stages: Vec<StageSpec>,
}

impl PipelineBuilder {
    /// Creates a new sequential pipeline builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            strategy: ExecutionStrategy::Sequential,
            stages: Vec::new(),
        }
    }

    /// Sets the execution strategy.
    #[must_use]
    pub fn with_strategy(mut self, strategy: ExecutionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Appends a stage.
    #[must_use]
    pub fn stage(mut self, spec: StageSpec) -> Self {
        self.stages.push(spec);
        self
    }

    /// Appends several stages.
    #[must_use]
    pub fn stages(mut self, specs: impl IntoIterator<Item = StageSpec>) -> Self {
        self.stages.extend(specs);
        self
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Validates and builds the definition.
    ///
    /// # Errors
    ///
    /// - [`RelayflowError::Validation`] for an empty pipeline or duplicate names
    /// - [`RelayflowError::StageNotRegistered`] for a stage missing from `registry`
    /// - [`RelayflowError::OutputConflict`] when two stages own the same field
    pub fn build(self, registry: &StageRegistry) -> Result<PipelineDefinition, RelayflowError> {
        if self.name.trim().is_empty() {
            return Err(PipelineValidationError::new(
                "Pipeline name cannot be empty or whitespace-only",
            )
            .into());
        }
        if self.stages.is_empty() {
            return Err(PipelineValidationError::new(format!(
                "Pipeline '{}' has no stages",
                self.name
            ))
            .into());
        }

        let mut seen = HashSet::new();
        for spec in &self.stages {
            if !seen.insert(spec.name.as_str()) {
                return Err(PipelineValidationError::new(format!(
                    "Duplicate stage '{}' in pipeline '{}'",
                    spec.name, self.name
                ))
                .with_stages(vec![spec.name.clone()])
                .into());
            }
        }

        for spec in &self.stages {
            if !registry.contains(&spec.name) {
                return Err(RelayflowError::StageNotRegistered {
                    stage: spec.name.clone(),
                });
            }
        }

        let mut owners: HashMap<StateField, &str> = HashMap::new();
        for spec in &self.stages {
            for field in &spec.produces {
                if let Some(first) = owners.insert(*field, spec.name.as_str()) {
                    return Err(OutputConflictError::new(field.key(), first, &spec.name).into());
                }
            }
        }

        Ok(PipelineDefinition {
            name: self.name,
            strategy: self.strategy,
            stages: self.stages,
        })
    }
}
