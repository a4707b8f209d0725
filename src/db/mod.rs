//! Graph database access
//!
//! - [`GraphConnection`]: a long-lived, shareable handle that opens sessions
//! - [`GraphSession`]: a single-use, single-owner unit of work
//! - [`ConnectionProvider`]: constructs the connection lazily, once, and
//!   hands out scoped sessions
//!
//! The provider is an ordinary value passed to whoever needs the database;
//! there is no process-global driver.

pub mod http;
pub mod schema;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::config::{ConfigError, DatabaseSettings};

pub use http::HttpConnection;
pub use schema::{GraphSchema, RelationshipPattern};

/// One result record: column name to value, in column order.
pub type Row = IndexMap<String, Value>;

/// Database errors
#[derive(Error, Debug)]
pub enum DbError {
    /// Connection settings are incomplete or invalid
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The server could not be reached or refused the connection
    #[error("Connection error: {0}")]
    Connection(String),

    /// The request exceeded its timeout
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The server rejected the statement
    #[error("Query error [{code}]: {message}")]
    Query { code: String, message: String },

    /// Unexpected response shape
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Session used after close
    #[error("Session already closed")]
    SessionClosed,

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[source] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<reqwest::Error> for DbError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            DbError::Timeout(e.to_string())
        } else if e.is_connect() {
            DbError::Connection(e.to_string())
        } else {
            DbError::Http(e)
        }
    }
}

impl DbError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, DbError::Timeout(_))
    }

    /// Server status code, when the server reported one.
    pub fn code(&self) -> Option<&str> {
        match self {
            DbError::Query { code, .. } => Some(code),
            _ => None,
        }
    }
}

pub type DbResult<T> = Result<T, DbError>;

/// Shareable connection handle; any task may open independent sessions.
#[async_trait]
pub trait GraphConnection: Send + Sync {
    /// Open a session bound to `database`, or the server default.
    async fn open_session(&self, database: Option<&str>) -> DbResult<Box<dyn GraphSession>>;

    async fn verify_connectivity(&self) -> DbResult<()>;
}

/// A single-use session: run one query, drain its records, close.
#[async_trait]
pub trait GraphSession: Send {
    async fn run(&mut self, query: &str) -> DbResult<()>;

    /// Next record of the last `run`, `None` when exhausted.
    async fn next_record(&mut self) -> DbResult<Option<Row>>;

    /// Release server-side resources. Must be safe to call more than once.
    async fn close(&mut self) -> DbResult<()>;
}

/// Run `query` and materialize every record.
pub async fn collect_rows(session: &mut dyn GraphSession, query: &str) -> DbResult<Vec<Row>> {
    session.run(query).await?;
    let mut rows = Vec::new();
    while let Some(row) = session.next_record().await? {
        rows.push(row);
    }
    Ok(rows)
}

type Connector = Box<dyn Fn() -> DbResult<Arc<dyn GraphConnection>> + Send + Sync>;

/// Lazily creates one connection and reuses it for every session.
pub struct ConnectionProvider {
    connector: Connector,
    connection: OnceCell<Arc<dyn GraphConnection>>,
    default_database: Option<String>,
    verify_on_init: bool,
}

impl ConnectionProvider {
    pub fn new<F>(connector: F, default_database: Option<String>) -> Self
    where
        F: Fn() -> DbResult<Arc<dyn GraphConnection>> + Send + Sync + 'static,
    {
        Self {
            connector: Box::new(connector),
            connection: OnceCell::new(),
            default_database,
            verify_on_init: false,
        }
    }

    /// Wrap an existing connection.
    pub fn from_connection(
        connection: Arc<dyn GraphConnection>,
        default_database: Option<String>,
    ) -> Self {
        Self::new(move || Ok(Arc::clone(&connection)), default_database)
    }

    /// HTTP connection built from settings on first use.
    ///
    /// Fails immediately if credentials are missing.
    pub fn from_settings(settings: &DatabaseSettings) -> DbResult<Self> {
        let credentials = settings.credentials()?;
        let default_database = settings.database.clone();
        let verify_on_init = settings.verify_on_init;
        let settings = settings.clone();
        let provider = Self::new(
            move || {
                let connection = HttpConnection::new(&credentials, &settings)?;
                Ok(Arc::new(connection) as Arc<dyn GraphConnection>)
            },
            default_database,
        );
        Ok(provider.with_verify_on_init(verify_on_init))
    }

    pub fn with_verify_on_init(mut self, verify: bool) -> Self {
        self.verify_on_init = verify;
        self
    }

    pub fn default_database(&self) -> Option<&str> {
        self.default_database.as_deref()
    }

    /// The shared connection, created on first call. A failed attempt is
    /// not cached.
    pub async fn connection(&self) -> DbResult<Arc<dyn GraphConnection>> {
        let connection = self
            .connection
            .get_or_try_init(|| async {
                let connection = (self.connector)()?;
                if self.verify_on_init {
                    connection.verify_connectivity().await.map_err(|e| {
                        DbError::Connection(format!("connectivity check failed: {e}"))
                    })?;
                }
                info!("graph database connection initialised");
                Ok::<_, DbError>(connection)
            })
            .await?;
        Ok(Arc::clone(connection))
    }

    /// Open a session on `database`, falling back to the default database.
    pub async fn session(&self, database: Option<&str>) -> DbResult<Box<dyn GraphSession>> {
        let database = database.or(self.default_database());
        self.connection().await?.open_session(database).await
    }

    /// Open a session, run `query`, materialize all rows and close the
    /// session on every path.
    pub async fn fetch_all(&self, database: Option<&str>, query: &str) -> DbResult<Vec<Row>> {
        let mut session = self.session(database).await?;
        let outcome = collect_rows(session.as_mut(), query).await;
        if let Err(e) = session.close().await {
            warn!(error = %e, "failed to close session");
        }
        debug!(rows = outcome.as_ref().map(Vec::len).unwrap_or(0), "session closed");
        outcome
    }
}
