//! Validation errors raised under strict policy

use serde_json::Value;
use thiserror::Error;

use super::checker::{CheckerError, PropertyScore};
use super::report::{Metadata, Stage, ValidationReport};
use super::write_intent::WriteOperation;

fn join_operations(operations: &[WriteOperation]) -> String {
    operations
        .iter()
        .map(|op| op.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn render(metadata: &Metadata) -> String {
    Value::Object(metadata.clone()).to_string()
}

/// A query rejected by the validation pipeline.
///
/// Every stage failure carries the full report, so callers can branch on
/// the failing stage without parsing the message.
#[derive(Error, Debug)]
pub enum ValidationError {
    /// The query contains write constructs
    #[error(
        "query contains write operations and is not read-only; detected operations: {}",
        join_operations(.operations)
    )]
    ReadOnlyViolation {
        operations: Vec<WriteOperation>,
        report: Box<ValidationReport>,
    },

    /// The checker rejected the query grammar
    #[error("cypher syntax validation failed: {}", render(.metadata))]
    SyntaxInvalid {
        metadata: Metadata,
        report: Box<ValidationReport>,
    },

    /// Labels, relationship types or patterns are not in the schema
    #[error("cypher schema validation failed (score: {score}): {}", render(.metadata))]
    SchemaMismatch {
        score: f64,
        metadata: Metadata,
        report: Box<ValidationReport>,
    },

    /// Property accesses do not match the known properties
    #[error("cypher property validation failed (score: {score}): {}", render(.metadata))]
    PropertyMismatch {
        score: PropertyScore,
        metadata: Metadata,
        report: Box<ValidationReport>,
    },

    /// The checker itself failed while running a stage
    #[error("{stage} validation error: {source}")]
    StageFailed {
        stage: Stage,
        #[source]
        source: CheckerError,
        report: Box<ValidationReport>,
    },

    /// No structural checker and strict policy without the bypass flag
    #[error(
        "cypher validation is required but the structural checker is unavailable: {reason}; \
         set CYPHER_ALLOW_UNCHECKED=true to run with the read-only check only"
    )]
    CheckerUnavailable { reason: String },
}

pub type ValidationResult<T> = Result<T, ValidationError>;

impl ValidationError {
    /// Distinguishes write-intent rejections from other validation failures.
    pub fn is_read_only_violation(&self) -> bool {
        matches!(self, ValidationError::ReadOnlyViolation { .. })
    }

    /// Report accumulated up to the failing stage.
    pub fn report(&self) -> Option<&ValidationReport> {
        match self {
            ValidationError::ReadOnlyViolation { report, .. }
            | ValidationError::SyntaxInvalid { report, .. }
            | ValidationError::SchemaMismatch { report, .. }
            | ValidationError::PropertyMismatch { report, .. }
            | ValidationError::StageFailed { report, .. } => Some(report),
            ValidationError::CheckerUnavailable { .. } => None,
        }
    }

    /// Stage that rejected the query.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            ValidationError::ReadOnlyViolation { .. } => Some(Stage::ReadOnly),
            ValidationError::SyntaxInvalid { .. } => Some(Stage::Syntax),
            ValidationError::SchemaMismatch { .. } => Some(Stage::Schema),
            ValidationError::PropertyMismatch { .. } => Some(Stage::Properties),
            ValidationError::StageFailed { stage, .. } => Some(*stage),
            ValidationError::CheckerUnavailable { .. } => None,
        }
    }
}
