//! Inter-stage handoff validation.
//!
//! Each artifact type has fixed required-field rules (blocking) and quality
//! rules (warnings only). Every validation is kept in a bounded history per
//! artifact type.

mod report;
mod rules;
mod validator;

pub use report::{ValidationReport, ValidationStats, ValidatorConfig};
pub use validator::HandoffValidator;
