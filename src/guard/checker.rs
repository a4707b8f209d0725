//! Structural checker seam
//!
//! The syntax, schema and property stages delegate to a [`StructuralChecker`]
//! bound to a live database. The backend is optional infrastructure: whether
//! it could be built is decided once, when the pipeline is constructed, and
//! stored as a [`CheckerAvailability`].

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

use super::report::Metadata;
use crate::db::{ConnectionProvider, DbError};

/// Failures of the checker backend itself, as opposed to a query failing a
/// check.
#[derive(Error, Debug)]
pub enum CheckerError {
    /// Database call made by the checker failed
    #[error("database error: {0}")]
    Database(#[from] DbError),

    /// Checker answered with something outside its contract
    #[error("malformed checker response: {0}")]
    Malformed(String),

    /// Schema snapshot could not be loaded
    #[error("schema introspection failed: {0}")]
    Introspection(String),
}

pub type CheckerResult<T> = Result<T, CheckerError>;

#[derive(Debug, Clone, PartialEq)]
pub struct SyntaxCheck {
    pub passed: bool,
    pub metadata: Metadata,
}

/// Schema conformance; only `1.0` passes.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaCheck {
    pub score: f64,
    pub metadata: Metadata,
}

/// Property conformance score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyScore {
    Score(f64),
    /// The query accesses no properties the checker can verify.
    NotApplicable,
}

impl PropertyScore {
    /// Exactly `1.0` or not applicable.
    pub fn is_passing(self) -> bool {
        match self {
            PropertyScore::Score(score) => score == 1.0,
            PropertyScore::NotApplicable => true,
        }
    }
}

impl fmt::Display for PropertyScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyScore::Score(score) => write!(f, "{score}"),
            PropertyScore::NotApplicable => f.write_str("n/a"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PropertyCheck {
    pub score: PropertyScore,
    pub metadata: Metadata,
}

/// Reject scores outside `[0, 1]`, NaN included.
pub(crate) fn ensure_unit_score(score: f64, what: &str) -> CheckerResult<f64> {
    if (0.0..=1.0).contains(&score) {
        Ok(score)
    } else {
        Err(CheckerError::Malformed(format!(
            "{what} score {score} is outside [0, 1]"
        )))
    }
}

/// Schema-aware checker bound to a database.
///
/// Implementations are read-only after construction and shared across
/// concurrent validation calls.
#[async_trait]
pub trait StructuralChecker: Send + Sync {
    async fn check_syntax(&self, query: &str, database: Option<&str>) -> CheckerResult<SyntaxCheck>;

    async fn check_schema(&self, query: &str, database: Option<&str>) -> CheckerResult<SchemaCheck>;

    async fn check_properties(
        &self,
        query: &str,
        database: Option<&str>,
    ) -> CheckerResult<PropertyCheck>;
}

/// Result of the one-time capability probe.
#[derive(Clone)]
pub enum CheckerAvailability {
    Available(Arc<dyn StructuralChecker>),
    Unavailable { reason: String },
}

impl CheckerAvailability {
    pub fn available(checker: impl StructuralChecker + 'static) -> Self {
        CheckerAvailability::Available(Arc::new(checker))
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        CheckerAvailability::Unavailable {
            reason: reason.into(),
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, CheckerAvailability::Available(_))
    }

    /// Build the schema-aware checker against `provider`. Any failure is
    /// recorded as unavailability rather than returned.
    #[cfg(feature = "structural-checks")]
    pub async fn probe(provider: Arc<ConnectionProvider>) -> Self {
        match super::schema_checker::SchemaAwareChecker::load(provider).await {
            Ok(checker) => Self::available(checker),
            Err(e) => {
                warn!(error = %e, "structural checker unavailable");
                Self::unavailable(e.to_string())
            }
        }
    }

    #[cfg(not(feature = "structural-checks"))]
    pub async fn probe(_provider: Arc<ConnectionProvider>) -> Self {
        warn!("structural checker unavailable: built without the structural-checks feature");
        Self::unavailable("built without the structural-checks feature")
    }
}

impl fmt::Debug for CheckerAvailability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckerAvailability::Available(_) => f.write_str("Available"),
            CheckerAvailability::Unavailable { reason } => {
                f.debug_struct("Unavailable").field("reason", reason).finish()
            }
        }
    }
}
