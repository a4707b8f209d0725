//! Write-intent detection for Cypher text
//!
//! A pattern classifier, not a parser: it decides from text alone whether a
//! query would mutate the graph. It is deliberately conservative. Borderline
//! text (a keyword inside a string literal, a property named `set`) is
//! flagged as a write rather than risk missing a real one.
//!
//! Three rule families are evaluated independently over the normalized text:
//!
//! 1. whole-word write keywords (`CREATE`, `SET`, `DELETE`, `DETACH DELETE`,
//!    `REMOVE`, `MERGE`), then the GQL `INSERT` synonym and the `DROP` and
//!    `ALTER` schema and administration commands;
//! 2. `CALL` of a `db.*`, `apoc.*` or `gds.*` procedure whose name implies a
//!    write (`create`, `merge`, `delete`, `remove`, `set`, `update`, `write`,
//!    `mutate`);
//! 3. a `FOREACH (` followed within [`FOREACH_LOOKAHEAD`] characters by one
//!    of the core write keywords, reported as a composite `FOREACH_*` kind.

use serde::Serialize;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use super::lexical::normalize_for_matching;

/// Number of characters after `FOREACH (` searched for a nested write.
pub const FOREACH_LOOKAHEAD: usize = 200;

/// A category of write construct found in a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum WriteOperation {
    #[serde(rename = "CREATE")]
    Create,
    #[serde(rename = "SET")]
    Set,
    #[serde(rename = "DELETE")]
    Delete,
    #[serde(rename = "DETACH DELETE")]
    DetachDelete,
    #[serde(rename = "REMOVE")]
    Remove,
    #[serde(rename = "MERGE")]
    Merge,
    #[serde(rename = "INSERT")]
    Insert,
    #[serde(rename = "DROP")]
    Drop,
    #[serde(rename = "ALTER")]
    Alter,
    #[serde(rename = "CALL_WRITE_PROCEDURE")]
    CallWriteProcedure,
    #[serde(rename = "FOREACH_CREATE")]
    ForeachCreate,
    #[serde(rename = "FOREACH_SET")]
    ForeachSet,
    #[serde(rename = "FOREACH_DELETE")]
    ForeachDelete,
    #[serde(rename = "FOREACH_REMOVE")]
    ForeachRemove,
}

impl WriteOperation {
    /// Stable label, identical to the serialized form.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Set => "SET",
            Self::Delete => "DELETE",
            Self::DetachDelete => "DETACH DELETE",
            Self::Remove => "REMOVE",
            Self::Merge => "MERGE",
            Self::Insert => "INSERT",
            Self::Drop => "DROP",
            Self::Alter => "ALTER",
            Self::CallWriteProcedure => "CALL_WRITE_PROCEDURE",
            Self::ForeachCreate => "FOREACH_CREATE",
            Self::ForeachSet => "FOREACH_SET",
            Self::ForeachDelete => "FOREACH_DELETE",
            Self::ForeachRemove => "FOREACH_REMOVE",
        }
    }

    /// Whether the write sits inside a `FOREACH` iteration.
    pub fn is_iteration_write(self) -> bool {
        matches!(
            self,
            Self::ForeachCreate | Self::ForeachSet | Self::ForeachDelete | Self::ForeachRemove
        )
    }
}

impl fmt::Display for WriteOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of classifying one query.
///
/// `detected_operations` is empty exactly when `is_read_only` is true.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WriteIntentFinding {
    pub is_read_only: bool,
    /// First category matched, in rule-evaluation order.
    pub violation: Option<WriteOperation>,
    /// Every category matched, first occurrence per category.
    pub detected_operations: Vec<WriteOperation>,
}

impl WriteIntentFinding {
    fn from_operations(detected_operations: Vec<WriteOperation>) -> Self {
        Self {
            is_read_only: detected_operations.is_empty(),
            violation: detected_operations.first().copied(),
            detected_operations,
        }
    }
}

fn keyword(pattern: &str) -> Regex {
    Regex::new(pattern).expect("write keyword pattern is a valid regex")
}

static KEYWORD_RULES: LazyLock<Vec<(Regex, WriteOperation)>> = LazyLock::new(|| {
    vec![
        (keyword(r"\bCREATE\b"), WriteOperation::Create),
        (keyword(r"\bSET\b"), WriteOperation::Set),
        (keyword(r"\bDELETE\b"), WriteOperation::Delete),
        (keyword(r"\bDETACH\s+DELETE\b"), WriteOperation::DetachDelete),
        (keyword(r"\bREMOVE\b"), WriteOperation::Remove),
        (keyword(r"\bMERGE\b"), WriteOperation::Merge),
        (keyword(r"\bINSERT\b"), WriteOperation::Insert),
        (keyword(r"\bDROP\b"), WriteOperation::Drop),
        (keyword(r"\bALTER\b"), WriteOperation::Alter),
    ]
});

// Any dotted segment may carry the write verb: apoc.create.node,
// gds.pageRank.write, db.createLabel.
static WRITE_PROCEDURE: LazyLock<Regex> = LazyLock::new(|| {
    keyword(r"\bCALL\s+(?:DB|APOC|GDS)(?:\.\w+)*?\.(?:CREATE|MERGE|DELETE|REMOVE|SET|UPDATE|WRITE|MUTATE)\w*")
});

static FOREACH_OPEN: LazyLock<Regex> = LazyLock::new(|| keyword(r"\bFOREACH\s*\("));

static FOREACH_RULES: LazyLock<Vec<(Regex, WriteOperation)>> = LazyLock::new(|| {
    vec![
        (keyword(r"\bCREATE\b"), WriteOperation::ForeachCreate),
        (keyword(r"\bSET\b"), WriteOperation::ForeachSet),
        (keyword(r"\bDELETE\b"), WriteOperation::ForeachDelete),
        (keyword(r"\bREMOVE\b"), WriteOperation::ForeachRemove),
    ]
});

/// Classify a query as read-only or not.
///
/// Pure and deterministic. An empty or whitespace-only query is read-only;
/// rejecting it is the executor's job.
pub fn check_read_only(query: &str) -> WriteIntentFinding {
    let upper = normalize_for_matching(query);
    let mut detected = Vec::new();

    for (pattern, operation) in KEYWORD_RULES.iter() {
        if pattern.is_match(&upper) {
            detected.push(*operation);
        }
    }

    if WRITE_PROCEDURE.is_match(&upper) {
        detected.push(WriteOperation::CallWriteProcedure);
    }

    for open in FOREACH_OPEN.find_iter(&upper) {
        let window: String = upper[open.end()..].chars().take(FOREACH_LOOKAHEAD).collect();
        for (pattern, operation) in FOREACH_RULES.iter() {
            if !detected.contains(operation) && pattern.is_match(&window) {
                detected.push(*operation);
            }
        }
    }

    WriteIntentFinding::from_operations(detected)
}
