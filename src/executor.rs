//! Query executor
//!
//! The only path from a candidate query to the database. A candidate runs
//! only after the validation pipeline approves it under strict policy, or,
//! when validation is explicitly skipped, after the read-only gate alone.

use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::ValidationSettings;
use crate::db::{ConnectionProvider, DbError, Row};
use crate::guard::{ValidationError, ValidationPipeline, ValidationPolicy};

/// Executor errors
#[derive(Error, Debug)]
pub enum RunError {
    /// Rejected by validation; the pipeline error is passed through unchanged
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Blank query text
    #[error("query is empty")]
    EmptyQuery,

    /// The database failed to run a validated query
    #[error("query execution failed: {0}")]
    Execution(#[source] DbError),
}

impl RunError {
    pub fn is_validation(&self) -> bool {
        matches!(self, RunError::Validation(_))
    }

    pub fn is_execution(&self) -> bool {
        matches!(self, RunError::Execution(_))
    }
}

pub type RunResult<T> = Result<T, RunError>;

/// Per-call execution behavior.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionPolicy {
    /// Skip structural validation entirely. The read-only gate still runs.
    pub skip_validation: bool,
    /// Accept an unavailable structural checker.
    pub allow_unchecked: bool,
    pub database: Option<String>,
}

impl ExecutionPolicy {
    pub fn from_settings(settings: &ValidationSettings) -> Self {
        Self {
            skip_validation: settings.skip_validation,
            allow_unchecked: settings.allow_unchecked,
            database: None,
        }
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn skipping_validation(mut self, skip: bool) -> Self {
        self.skip_validation = skip;
        self
    }

    fn validation_policy(&self) -> ValidationPolicy {
        ValidationPolicy {
            strict: true,
            enforce_read_only: true,
            database: self.database.clone(),
            allow_unchecked: self.allow_unchecked,
        }
    }
}

/// Validates, then runs, read-only queries.
#[derive(Clone)]
pub struct QueryExecutor {
    provider: Arc<ConnectionProvider>,
    pipeline: Arc<ValidationPipeline>,
}

impl QueryExecutor {
    pub fn new(provider: Arc<ConnectionProvider>, pipeline: Arc<ValidationPipeline>) -> Self {
        Self { provider, pipeline }
    }

    /// Probe the structural checker against `provider` and build an executor
    /// around the resulting pipeline.
    pub async fn connect(provider: Arc<ConnectionProvider>) -> Self {
        let pipeline = ValidationPipeline::connect(Arc::clone(&provider)).await;
        Self::new(provider, Arc::new(pipeline))
    }

    pub fn pipeline(&self) -> &ValidationPipeline {
        &self.pipeline
    }

    pub fn provider(&self) -> &Arc<ConnectionProvider> {
        &self.provider
    }

    /// Run `query` and return every record.
    ///
    /// An empty `Vec` is a successful query with no results.
    pub async fn run(&self, query: &str, policy: &ExecutionPolicy) -> RunResult<Vec<Row>> {
        if query.trim().is_empty() {
            return Err(RunError::EmptyQuery);
        }

        if policy.skip_validation {
            warn!(
                target: "graphrag::audit",
                query_len = query.len(),
                "structural validation skipped by execution policy"
            );
            self.pipeline.read_only_gate(query)?;
        } else {
            self.pipeline
                .validate(query, &policy.validation_policy())
                .await?;
        }

        let database = policy
            .database
            .as_deref()
            .or(self.provider.default_database());
        debug!(database = ?database, "executing validated query");

        let rows = self
            .provider
            .fetch_all(database, query)
            .await
            .map_err(RunError::Execution)?;

        info!(rows = rows.len(), "query executed");
        Ok(rows)
    }
}
