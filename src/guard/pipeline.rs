//! Validation pipeline
//!
//! Stages run in a fixed order and stop at the first failure:
//!
//! ```text
//! READ_ONLY -> SYNTAX -> SCHEMA -> PROPERTIES -> VALID
//!     \          \         \          \
//!      +----------+---------+----------+---> INVALID
//! ```
//!
//! When the structural checker is unavailable the three structural stages
//! are recorded as skipped. Under strict policy that is only allowed with
//! the caller's explicit bypass flag.

use std::sync::Arc;
use tracing::{debug, error, warn};

use super::checker::{
    ensure_unit_score, CheckerAvailability, CheckerError, PropertyScore, StructuralChecker,
};
use super::error::{ValidationError, ValidationResult};
use super::report::{Stage, StageStatus, ValidationReport};
use super::write_intent::check_read_only;
use crate::db::ConnectionProvider;

/// Per-call validation behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationPolicy {
    /// Return an error on failure instead of `Ok((false, report))`.
    pub strict: bool,
    pub enforce_read_only: bool,
    /// Overrides the pipeline's default database.
    pub database: Option<String>,
    /// Under strict policy, accept an unavailable checker and skip the
    /// structural stages.
    pub allow_unchecked: bool,
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self {
            strict: true,
            enforce_read_only: true,
            database: None,
            allow_unchecked: false,
        }
    }
}

impl ValidationPolicy {
    /// Non-strict policy: failures come back as `Ok((false, report))`.
    pub fn lenient() -> Self {
        Self {
            strict: false,
            ..Self::default()
        }
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn allowing_unchecked(mut self, allow: bool) -> Self {
        self.allow_unchecked = allow;
        self
    }
}

/// Orchestrates the read-only, syntax, schema and property stages.
///
/// Constructed once and shared; holds no per-call state.
#[derive(Debug, Clone)]
pub struct ValidationPipeline {
    checker: CheckerAvailability,
    default_database: Option<String>,
}

impl ValidationPipeline {
    pub fn new(checker: CheckerAvailability) -> Self {
        Self {
            checker,
            default_database: None,
        }
    }

    pub fn with_default_database(mut self, database: Option<String>) -> Self {
        self.default_database = database;
        self
    }

    /// Probe for the schema-aware checker once and bind the pipeline to the
    /// provider's default database.
    pub async fn connect(provider: Arc<ConnectionProvider>) -> Self {
        let default_database = provider.default_database().map(str::to_string);
        let checker = CheckerAvailability::probe(provider).await;
        Self::new(checker).with_default_database(default_database)
    }

    pub fn checker(&self) -> &CheckerAvailability {
        &self.checker
    }

    /// Run the read-only stage only, always strictly.
    ///
    /// Used when the caller bypasses validation: a write-intent query still
    /// never reaches execution.
    pub fn read_only_gate(&self, query: &str) -> ValidationResult<ValidationReport> {
        let mut report = ValidationReport::new();
        let finding = check_read_only(query);
        report.record_read_only(&finding);
        if finding.is_read_only {
            return Ok(report);
        }
        error!(operations = ?finding.detected_operations, "read-only violation");
        Err(ValidationError::ReadOnlyViolation {
            operations: finding.detected_operations,
            report: Box::new(report),
        })
    }

    /// Validate a candidate query.
    ///
    /// Returns `(is_valid, report)`. Under strict policy every failure is an
    /// error instead, and `Ok` always carries `true`.
    pub async fn validate(
        &self,
        query: &str,
        policy: &ValidationPolicy,
    ) -> ValidationResult<(bool, ValidationReport)> {
        let mut report = ValidationReport::new();

        if policy.enforce_read_only {
            let finding = check_read_only(query);
            report.record_read_only(&finding);
            if !finding.is_read_only {
                error!(operations = ?finding.detected_operations, "read-only violation");
                let operations = finding.detected_operations;
                return reject(policy, report, |report| ValidationError::ReadOnlyViolation {
                    operations,
                    report,
                });
            }
        } else {
            report.read_only = StageStatus::Skipped {
                reason: "read-only enforcement disabled by policy".to_string(),
            };
        }

        let checker = match &self.checker {
            CheckerAvailability::Available(checker) => Arc::clone(checker),
            CheckerAvailability::Unavailable { reason } => {
                if policy.strict && !policy.allow_unchecked {
                    return Err(ValidationError::CheckerUnavailable {
                        reason: reason.clone(),
                    });
                }
                warn!(%reason, "structural checker unavailable, skipping structural validation");
                report.skip_structural(reason);
                report.is_valid = true;
                return Ok((true, report));
            }
        };

        let database = policy
            .database
            .as_deref()
            .or(self.default_database.as_deref());

        self.run_structural(checker.as_ref(), query, database, policy, report)
            .await
    }

    async fn run_structural(
        &self,
        checker: &dyn StructuralChecker,
        query: &str,
        database: Option<&str>,
        policy: &ValidationPolicy,
        mut report: ValidationReport,
    ) -> ValidationResult<(bool, ValidationReport)> {
        // Syntax
        match checker.check_syntax(query, database).await {
            Ok(check) => {
                report.syntax_metadata = check.metadata.clone();
                if check.passed {
                    report.syntax = StageStatus::Passed;
                } else {
                    report.syntax = StageStatus::Failed;
                    warn!(metadata = ?check.metadata, "cypher syntax validation failed");
                    return reject(policy, report, |report| ValidationError::SyntaxInvalid {
                        metadata: check.metadata,
                        report,
                    });
                }
            }
            Err(e) => return stage_failed(policy, report, Stage::Syntax, e),
        }

        // Schema
        let schema = checker
            .check_schema(query, database)
            .await
            .and_then(|check| ensure_unit_score(check.score, "schema").map(|_| check));
        match schema {
            Ok(check) => {
                report.schema_score = Some(check.score);
                report.schema_metadata = check.metadata.clone();
                if check.score == 1.0 {
                    report.schema = StageStatus::Passed;
                } else {
                    report.schema = StageStatus::Failed;
                    warn!(score = check.score, metadata = ?check.metadata, "cypher schema validation failed");
                    return reject(policy, report, |report| ValidationError::SchemaMismatch {
                        score: check.score,
                        metadata: check.metadata,
                        report,
                    });
                }
            }
            Err(e) => return stage_failed(policy, report, Stage::Schema, e),
        }

        // Properties
        let properties = checker
            .check_properties(query, database)
            .await
            .and_then(|check| match check.score {
                PropertyScore::Score(score) => {
                    ensure_unit_score(score, "property").map(|_| check)
                }
                PropertyScore::NotApplicable => Ok(check),
            });
        match properties {
            Ok(check) => {
                report.property_score = Some(check.score);
                report.property_metadata = check.metadata.clone();
                if check.score.is_passing() {
                    report.properties = StageStatus::Passed;
                } else {
                    report.properties = StageStatus::Failed;
                    warn!(score = %check.score, metadata = ?check.metadata, "cypher property validation failed");
                    return reject(policy, report, |report| ValidationError::PropertyMismatch {
                        score: check.score,
                        metadata: check.metadata,
                        report,
                    });
                }
            }
            Err(e) => return stage_failed(policy, report, Stage::Properties, e),
        }

        report.is_valid = true;
        debug!("cypher query validation passed");
        Ok((true, report))
    }
}

fn reject<F>(
    policy: &ValidationPolicy,
    mut report: ValidationReport,
    into_error: F,
) -> ValidationResult<(bool, ValidationReport)>
where
    F: FnOnce(Box<ValidationReport>) -> ValidationError,
{
    report.is_valid = false;
    if policy.strict {
        Err(into_error(Box::new(report)))
    } else {
        Ok((false, report))
    }
}

fn stage_failed(
    policy: &ValidationPolicy,
    mut report: ValidationReport,
    stage: Stage,
    source: CheckerError,
) -> ValidationResult<(bool, ValidationReport)> {
    error!(%stage, error = %source, "validation stage failed");
    *report.status_mut(stage) = StageStatus::Failed;
    if let Some(metadata) = report.metadata_mut(stage) {
        metadata.insert("error".to_string(), source.to_string().into());
    }
    reject(policy, report, |report| ValidationError::StageFailed {
        stage,
        source,
        report,
    })
}
