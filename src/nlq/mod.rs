//! Natural Language Querying (NLQ)
//!
//! Text-to-Cypher generation with an LLM, gated by the write-intent
//! detector, plus optional execution and summarization of the results.

pub mod client;
pub mod summary;

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::NLQConfig;
use crate::db::Row;
use crate::executor::{ExecutionPolicy, QueryExecutor};
use crate::guard::{check_read_only, WriteOperation};

pub use client::NLQClient;
pub use summary::{fallback_summary, summarize};

#[derive(Error, Debug)]
pub enum NLQError {
    #[error("LLM API error: {0}")]
    ApiError(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Network error: {0}")]
    NetworkError(String),
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("LLM returned an empty response")]
    EmptyResponse,
    #[error("generated query is not read-only; detected operations: {}", join(.operations))]
    Unsafe { operations: Vec<WriteOperation> },
}

fn join(operations: &[WriteOperation]) -> String {
    operations
        .iter()
        .map(|op| op.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

pub type NLQResult<T> = Result<T, NLQError>;

/// Sampling parameters for one completion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            max_tokens: 1200,
        }
    }
}

impl From<&NLQConfig> for GenerationParams {
    fn from(config: &NLQConfig) -> Self {
        Self {
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }
}

/// A text completion backend.
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, prompt: &str, params: &GenerationParams) -> NLQResult<String>;

    /// Offline backends return canned text; callers skip free-form
    /// generation such as summaries.
    fn is_offline(&self) -> bool {
        false
    }
}

/// A question/query pair shown to the model as guidance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FewShotExample {
    pub question: String,
    pub cypher: String,
}

impl FewShotExample {
    pub fn new(question: impl Into<String>, cypher: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            cypher: cypher.into(),
        }
    }
}

/// What `answer` returns besides the generated query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// Raw rows
    #[default]
    Json,
    /// Natural-language summary
    Chat,
    Both,
}

impl OutputMode {
    fn wants_rows(self) -> bool {
        matches!(self, OutputMode::Json | OutputMode::Both)
    }

    fn wants_summary(self) -> bool {
        matches!(self, OutputMode::Chat | OutputMode::Both)
    }
}

impl FromStr for OutputMode {
    type Err = NLQError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputMode::Json),
            "chat" => Ok(OutputMode::Chat),
            "both" => Ok(OutputMode::Both),
            other => Err(NLQError::ConfigError(format!("unknown output mode: {other}"))),
        }
    }
}

impl fmt::Display for OutputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputMode::Json => f.write_str("json"),
            OutputMode::Chat => f.write_str("chat"),
            OutputMode::Both => f.write_str("both"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AskOptions {
    /// Schema text rendered into the prompt.
    pub schema: String,
    pub examples: Vec<FewShotExample>,
    /// Run the generated query through the executor.
    pub execute: bool,
    pub output: OutputMode,
    pub policy: ExecutionPolicy,
}

/// Outcome of one question. Failures after generation land in `error`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Answer {
    pub question: String,
    pub cypher: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<Vec<Row>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct NLQPipeline {
    completion: Arc<dyn CompletionService>,
    params: GenerationParams,
    executor: Option<QueryExecutor>,
}

impl NLQPipeline {
    pub fn new(config: NLQConfig) -> NLQResult<Self> {
        let params = GenerationParams::from(&config);
        let client = NLQClient::new(&config)?;
        Ok(Self::with_completion(Arc::new(client)).with_params(params))
    }

    pub fn with_completion(completion: Arc<dyn CompletionService>) -> Self {
        Self {
            completion,
            params: GenerationParams::default(),
            executor: None,
        }
    }

    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_executor(mut self, executor: QueryExecutor) -> Self {
        self.executor = Some(executor);
        self
    }

    fn build_prompt(question: &str, schema_summary: &str, examples: &[FewShotExample]) -> String {
        let mut prompt = format!("Given this graph schema:\n{schema_summary}\n\n");
        if !examples.is_empty() {
            prompt.push_str("Example questions and queries:\n");
            for example in examples {
                prompt.push_str(&format!(
                    "Question: {}\nCypher: {}\n\n",
                    example.question, example.cypher
                ));
            }
        }
        prompt.push_str(&format!(
            "Translate this question into a read-only OpenCypher query:\n\"{question}\"\n\n\
             Return ONLY the Cypher query, no markdown, no explanations."
        ));
        prompt
    }

    /// Generate a read-only query for `question`.
    pub async fn text_to_cypher(
        &self,
        question: &str,
        schema_summary: &str,
        examples: &[FewShotExample],
    ) -> NLQResult<String> {
        let prompt = Self::build_prompt(question, schema_summary, examples);
        let response = self.completion.complete(&prompt, &self.params).await?;

        let cypher = Self::extract_cypher(&response);
        if cypher.is_empty() {
            return Err(NLQError::EmptyResponse);
        }

        let finding = check_read_only(&cypher);
        if !finding.is_read_only {
            warn!(operations = ?finding.detected_operations, "generated query rejected");
            return Err(NLQError::Unsafe {
                operations: finding.detected_operations,
            });
        }
        debug!(%cypher, "generated query");
        Ok(cypher)
    }

    /// Generate, optionally execute, and optionally summarize.
    ///
    /// Generation failures are returned as errors. Anything that fails
    /// afterwards is recorded in [`Answer::error`].
    pub async fn answer(&self, question: &str, options: &AskOptions) -> NLQResult<Answer> {
        let cypher = self
            .text_to_cypher(question, &options.schema, &options.examples)
            .await?;
        let mut answer = Answer {
            question: question.to_string(),
            cypher: Some(cypher.clone()),
            ..Answer::default()
        };

        if !options.execute {
            return Ok(answer);
        }
        let Some(executor) = &self.executor else {
            answer.error = Some("no database connection configured for execution".to_string());
            return Ok(answer);
        };

        let rows = match executor.run(&cypher, &options.policy).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "generated query failed");
                answer.error = Some(e.to_string());
                return Ok(answer);
            }
        };

        if options.output.wants_summary() {
            answer.summary = Some(
                summarize(self.completion.as_ref(), question, &cypher, &rows, &self.params).await,
            );
        }
        if options.output.wants_rows() {
            answer.rows = Some(rows);
        }
        Ok(answer)
    }

    /// Extract a Cypher query from an LLM response that may contain markdown
    /// fences, explanations, or multiple code blocks.
    fn extract_cypher(response: &str) -> String {
        let trimmed = response.trim();

        // First fenced block wins
        if let Some(start) = trimmed.find("```") {
            let after_fence = &trimmed[start + 3..];
            // Skip language tag (e.g. "cypher\n")
            let code_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(0);
            if let Some(end) = after_fence[code_start..].find("```") {
                return after_fence[code_start..code_start + end].trim().to_string();
            }
        }

        // No fences: the query runs from the first clause line to the end
        let clause_keywords = [
            "MATCH", "OPTIONAL", "WITH", "UNWIND", "CALL", "RETURN", "EXPLAIN", "PROFILE",
        ];
        let lines: Vec<&str> = trimmed.lines().collect();
        let start = lines.iter().position(|line| {
            let upper = line.trim_start().to_uppercase();
            clause_keywords.iter().any(|kw| {
                upper.starts_with(kw)
                    && !upper[kw.len()..]
                        .starts_with(|c: char| c.is_alphanumeric() || c == '_')
            })
        });

        match start {
            Some(start) => lines[start..].join("\n").trim().to_string(),
            None => trimmed.to_string(),
        }
    }
}
