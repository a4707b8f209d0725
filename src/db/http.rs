//! HttpConnection: graph database access over the HTTP transactional API
//!
//! A session owns one explicit transaction:
//!
//! - open:  `POST {base}/db/{database}/tx` with no statements
//! - run:   `POST {base}/db/{database}/tx/{id}`
//! - close: `DELETE {base}/db/{database}/tx/{id}` (rollback)
//!
//! Sessions never commit.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use tracing::{debug, warn};

use super::{DbError, DbResult, GraphConnection, GraphSession, Row};
use crate::config::{Credentials, DatabaseSettings, Secret};

/// Database used when neither the caller nor the settings name one.
pub const DEFAULT_DATABASE: &str = "neo4j";

#[derive(Serialize)]
struct TxRequest<'a> {
    statements: Vec<Statement<'a>>,
}

#[derive(Serialize)]
struct Statement<'a> {
    statement: &'a str,
}

#[derive(Deserialize)]
struct TxResponse {
    #[serde(default)]
    commit: Option<String>,
    #[serde(default)]
    results: Vec<StatementResult>,
    #[serde(default)]
    errors: Vec<ServerError>,
}

#[derive(Deserialize)]
struct StatementResult {
    columns: Vec<String>,
    #[serde(default)]
    data: Vec<RowData>,
}

#[derive(Deserialize)]
struct RowData {
    row: Vec<Value>,
}

#[derive(Deserialize)]
struct ServerError {
    code: String,
    message: String,
}

impl TxResponse {
    fn into_rows(self) -> DbResult<VecDeque<Row>> {
        if let Some(error) = self.errors.into_iter().next() {
            return Err(DbError::Query {
                code: error.code,
                message: error.message,
            });
        }
        let mut rows = VecDeque::new();
        for result in self.results {
            for data in result.data {
                if data.row.len() != result.columns.len() {
                    return Err(DbError::Protocol(format!(
                        "row has {} values for {} columns",
                        data.row.len(),
                        result.columns.len()
                    )));
                }
                rows.push_back(result.columns.iter().cloned().zip(data.row).collect());
            }
        }
        Ok(rows)
    }
}

/// Translate a driver-style URI into an HTTP base URL.
///
/// `neo4j+s://` and `bolt+s://` map to `https://`, `neo4j://` and `bolt://`
/// to `http://`; the default Bolt port 7687 becomes 7474 (7473 when secure).
pub fn http_base_url(uri: &str) -> DbResult<String> {
    let (scheme, rest) = uri
        .split_once("://")
        .ok_or_else(|| DbError::Connection(format!("invalid database URI: {uri}")))?;
    let secure = match scheme.to_ascii_lowercase().as_str() {
        "http" | "neo4j" | "bolt" => false,
        "https" | "neo4j+s" | "neo4j+ssc" | "bolt+s" | "bolt+ssc" => true,
        other => {
            return Err(DbError::Connection(format!(
                "unsupported URI scheme: {other}"
            )))
        }
    };
    let host = rest.trim_end_matches('/');
    let host = match host.strip_suffix(":7687") {
        Some(h) if secure => format!("{h}:7473"),
        Some(h) => format!("{h}:7474"),
        None => host.to_string(),
    };
    let scheme = if secure { "https" } else { "http" };
    Ok(format!("{scheme}://{host}"))
}

/// Connection to a graph database's HTTP endpoint.
///
/// Cheap to share; the underlying client pools connections.
pub struct HttpConnection {
    base_url: String,
    user: String,
    password: Secret,
    client: Client,
}

impl HttpConnection {
    pub fn new(credentials: &Credentials, settings: &DatabaseSettings) -> DbResult<Self> {
        let client = Client::builder()
            .connect_timeout(settings.connection_timeout)
            .timeout(settings.query_timeout)
            .pool_idle_timeout(settings.max_connection_lifetime)
            .pool_max_idle_per_host(settings.max_connection_pool_size)
            .build()
            .map_err(|e| DbError::Connection(e.to_string()))?;

        Ok(Self {
            base_url: http_base_url(&credentials.uri)?,
            user: credentials.user.clone(),
            password: credentials.password.clone(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl GraphConnection for HttpConnection {
    async fn open_session(&self, database: Option<&str>) -> DbResult<Box<dyn GraphSession>> {
        let database = database.unwrap_or(DEFAULT_DATABASE);
        let url = format!("{}/db/{}/tx", self.base_url, database);

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.user, Some(self.password.expose()))
            .json(&TxRequest { statements: vec![] })
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(DbError::Connection(format!(
                "authentication failed for user {}",
                self.user
            )));
        }
        if !status.is_success() {
            return Err(DbError::Connection(format!(
                "opening a transaction on {database} returned {status}"
            )));
        }

        let location = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body: TxResponse = response.json().await?;
        if let Some(error) = body.errors.into_iter().next() {
            return Err(DbError::Query {
                code: error.code,
                message: error.message,
            });
        }

        let tx_url = body
            .commit
            .map(|commit| commit.trim_end_matches("/commit").to_string())
            .or(location)
            .ok_or_else(|| DbError::Protocol("transaction response has no location".to_string()))?;

        debug!(%tx_url, "transaction opened");
        Ok(Box::new(HttpSession {
            client: self.client.clone(),
            user: self.user.clone(),
            password: self.password.clone(),
            tx_url,
            pending: VecDeque::new(),
            open: true,
        }))
    }

    async fn verify_connectivity(&self) -> DbResult<()> {
        let response = self
            .client
            .get(format!("{}/", self.base_url))
            .basic_auth(&self.user, Some(self.password.expose()))
            .send()
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(DbError::Connection(format!(
                "discovery endpoint returned {}",
                response.status()
            )))
        }
    }
}

/// One open transaction.
pub struct HttpSession {
    client: Client,
    user: String,
    password: Secret,
    tx_url: String,
    pending: VecDeque<Row>,
    open: bool,
}

#[async_trait]
impl GraphSession for HttpSession {
    async fn run(&mut self, query: &str) -> DbResult<()> {
        if !self.open {
            return Err(DbError::SessionClosed);
        }
        let response = self
            .client
            .post(&self.tx_url)
            .basic_auth(&self.user, Some(self.password.expose()))
            .json(&TxRequest {
                statements: vec![Statement { statement: query }],
            })
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            self.open = false;
            return Err(DbError::Protocol("transaction expired or unknown".to_string()));
        }
        if !response.status().is_success() {
            return Err(DbError::Protocol(format!(
                "statement request returned {}",
                response.status()
            )));
        }

        let body: TxResponse = response.json().await?;
        match body.into_rows() {
            Ok(rows) => {
                self.pending = rows;
                Ok(())
            }
            Err(e) => {
                // The server rolls the transaction back on statement errors.
                self.open = false;
                Err(e)
            }
        }
    }

    async fn next_record(&mut self) -> DbResult<Option<Row>> {
        Ok(self.pending.pop_front())
    }

    async fn close(&mut self) -> DbResult<()> {
        self.pending.clear();
        if !self.open {
            return Ok(());
        }
        self.open = false;
        let response = self
            .client
            .delete(&self.tx_url)
            .basic_auth(&self.user, Some(self.password.expose()))
            .send()
            .await?;
        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            debug!(tx_url = %self.tx_url, "transaction rolled back");
            Ok(())
        } else {
            Err(DbError::Protocol(format!("rollback returned {status}")))
        }
    }
}

impl Drop for HttpSession {
    fn drop(&mut self) {
        if self.open {
            warn!(tx_url = %self.tx_url, "session dropped without close; transaction left to expire");
        }
    }
}
