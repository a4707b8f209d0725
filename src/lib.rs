//! GraphRAG query guard
//!
//! Validation and execution gate for Cypher queries produced by language
//! models or other untrusted sources. Only read-only queries that pass the
//! staged validation pipeline ever reach the graph database.
//!
//! # Architecture
//!
//! - [`guard`]: write-intent detection, the structural checker seam and the
//!   validation pipeline (read-only, syntax, schema, properties)
//! - [`db`]: connection provider, sessions, HTTP transactional connection,
//!   schema snapshot
//! - [`executor`]: validates, then runs, a candidate query
//! - [`nlq`]: text-to-Cypher generation and result summarization
//! - [`config`]: settings from the environment and `.env`
//!
//! ## Example Usage
//!
//! ```rust
//! use graphrag::guard::{check_read_only, WriteOperation};
//!
//! let finding = check_read_only("MATCH (n:Person) RETURN n.name LIMIT 5");
//! assert!(finding.is_read_only);
//!
//! let finding = check_read_only(
//!     "MATCH (a)-[r]->(b) FOREACH (x IN [1,2,3] | CREATE (c:Node))",
//! );
//! assert!(!finding.is_read_only);
//! assert!(finding.detected_operations.contains(&WriteOperation::ForeachCreate));
//! ```

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod db;
pub mod executor;
pub mod guard;
pub mod nlq;

// Re-export main types for convenience
pub use config::{ConfigError, ConfigResult, Environment, NLQConfig, LLMProvider, Settings};

pub use db::{
    ConnectionProvider, DbError, DbResult, GraphConnection, GraphSchema, GraphSession,
    HttpConnection, Row,
};

pub use executor::{ExecutionPolicy, QueryExecutor, RunError, RunResult};

pub use guard::{
    check_read_only, CheckerAvailability, StructuralChecker, ValidationError, ValidationPipeline,
    ValidationPolicy, ValidationReport, WriteIntentFinding, WriteOperation,
};

pub use nlq::{Answer, AskOptions, NLQError, NLQPipeline, NLQResult, OutputMode};

/// Install a `tracing` subscriber writing to stderr, filtered by `RUST_LOG`
/// or `default_filter` when it is unset. A no-op if one is already set.
pub fn init_tracing(default_filter: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get version string
pub fn version() -> &'static str {
    VERSION
}
