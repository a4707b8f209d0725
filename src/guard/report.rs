//! Validation report: the structured outcome of one validation call

use serde::Serialize;
use serde_json::Value;
use std::fmt;

use super::checker::PropertyScore;
use super::write_intent::{WriteIntentFinding, WriteOperation};

/// Free-form detail returned by a checker (offending clause, unknown label).
pub type Metadata = serde_json::Map<String, Value>;

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    ReadOnly,
    Syntax,
    Schema,
    Properties,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::ReadOnly => "read-only",
            Stage::Syntax => "syntax",
            Stage::Schema => "schema",
            Stage::Properties => "properties",
        };
        f.write_str(name)
    }
}

/// Outcome of a single stage.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageStatus {
    /// Not reached: an earlier stage failed.
    #[default]
    NotRun,
    Passed,
    Failed,
    /// Deliberately not checked. Counts as passed, with a caveat.
    Skipped { reason: String },
}

impl StageStatus {
    pub fn is_passed(&self) -> bool {
        matches!(self, StageStatus::Passed)
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, StageStatus::Skipped { .. })
    }
}

/// Aggregate result of running the enabled stages against one query.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct ValidationReport {
    pub read_only: StageStatus,
    pub read_only_violation: Option<WriteOperation>,
    pub read_only_violations: Vec<WriteOperation>,

    pub syntax: StageStatus,
    pub syntax_metadata: Metadata,

    pub schema: StageStatus,
    /// Meaningful only when syntax passed.
    pub schema_score: Option<f64>,
    pub schema_metadata: Metadata,

    pub properties: StageStatus,
    pub property_score: Option<PropertyScore>,
    pub property_metadata: Metadata,

    pub is_valid: bool,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self, stage: Stage) -> &StageStatus {
        match stage {
            Stage::ReadOnly => &self.read_only,
            Stage::Syntax => &self.syntax,
            Stage::Schema => &self.schema,
            Stage::Properties => &self.properties,
        }
    }

    pub(crate) fn status_mut(&mut self, stage: Stage) -> &mut StageStatus {
        match stage {
            Stage::ReadOnly => &mut self.read_only,
            Stage::Syntax => &mut self.syntax,
            Stage::Schema => &mut self.schema,
            Stage::Properties => &mut self.properties,
        }
    }

    pub(crate) fn metadata_mut(&mut self, stage: Stage) -> Option<&mut Metadata> {
        match stage {
            Stage::ReadOnly => None,
            Stage::Syntax => Some(&mut self.syntax_metadata),
            Stage::Schema => Some(&mut self.schema_metadata),
            Stage::Properties => Some(&mut self.property_metadata),
        }
    }

    pub(crate) fn record_read_only(&mut self, finding: &WriteIntentFinding) {
        self.read_only = if finding.is_read_only {
            StageStatus::Passed
        } else {
            StageStatus::Failed
        };
        self.read_only_violation = finding.violation;
        self.read_only_violations = finding.detected_operations.clone();
    }

    pub(crate) fn skip_structural(&mut self, reason: &str) {
        for stage in [Stage::Syntax, Stage::Schema, Stage::Properties] {
            *self.status_mut(stage) = StageStatus::Skipped {
                reason: reason.to_string(),
            };
        }
    }

    /// Stages that were skipped rather than checked.
    pub fn skipped_stages(&self) -> Vec<Stage> {
        [Stage::ReadOnly, Stage::Syntax, Stage::Schema, Stage::Properties]
            .into_iter()
            .filter(|stage| self.status(*stage).is_skipped())
            .collect()
    }

    /// True when the query was valid but at least one stage went unchecked.
    pub fn is_partially_checked(&self) -> bool {
        self.is_valid && !self.skipped_stages().is_empty()
    }
}
