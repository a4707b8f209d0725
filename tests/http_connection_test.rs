//! HttpConnection against an in-process fake of the transactional HTTP API.

use axum::{
    extract::{Path, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use graphrag::config::{Credentials, DatabaseSettings, Secret};
use graphrag::db::{ConnectionProvider, DbError, GraphConnection, GraphSchema, HttpConnection};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const BASIC_AUTH: &str = "Basic bmVvNGo6c2VjcmV0"; // neo4j:secret

struct FakeServer {
    base: String,
    next_tx: AtomicUsize,
    rolled_back: AtomicUsize,
    databases: Mutex<Vec<String>>,
    statements: Mutex<Vec<String>>,
}

fn result(columns: &[&str], rows: Vec<Value>) -> Value {
    let data: Vec<Value> = rows.into_iter().map(|row| json!({ "row": row, "meta": [] })).collect();
    json!({ "results": [{ "columns": columns, "data": data }], "errors": [] })
}

fn server_error(code: &str, message: &str) -> Value {
    json!({ "results": [], "errors": [{ "code": code, "message": message }] })
}

fn respond(statement: &str) -> Value {
    if statement.starts_with("EXPLAIN") {
        if statement.contains("RETUR ") {
            return server_error(
                "Neo.ClientError.Statement.SyntaxError",
                "Invalid input 'RETUR'",
            );
        }
        return result(&[], vec![]);
    }
    if statement.contains("db.labels()") {
        return result(&["label"], vec![json!(["Person"]), json!(["Actor"]), json!(["Movie"])]);
    }
    if statement.contains("db.relationshipTypes()") {
        return result(&["relationshipType"], vec![json!(["ACTED_IN"])]);
    }
    if statement.contains("db.schema.nodeTypeProperties()") {
        return result(
            &["nodeLabels", "propertyName", "propertyTypes"],
            vec![
                json!([["Person", "Actor"], "name", ["String"]]),
                json!([["Movie"], "title", ["String"]]),
            ],
        );
    }
    if statement.contains("db.schema.relTypeProperties()") {
        return result(
            &["relType", "propertyName", "propertyTypes"],
            vec![json!([":`ACTED_IN`", "roles", ["StringArray"]])],
        );
    }
    if statement.contains("UNWIND labels(a) AS source") {
        return result(
            &["source", "type", "target"],
            vec![
                json!(["Person", "ACTED_IN", "Movie"]),
                json!(["Actor", "ACTED_IN", "Movie"]),
            ],
        );
    }
    if statement.contains("boom") {
        return server_error("Neo.DatabaseError.General.UnknownError", "boom");
    }
    result(&["name"], vec![json!(["Alice"]), json!(["Bob"])])
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == BASIC_AUTH)
}

async fn discovery(headers: HeaderMap) -> StatusCode {
    if authorized(&headers) {
        StatusCode::OK
    } else {
        StatusCode::UNAUTHORIZED
    }
}

async fn open_tx(
    State(state): State<Arc<FakeServer>>,
    Path(db): Path<String>,
    headers: HeaderMap,
) -> (StatusCode, Json<Value>) {
    if !authorized(&headers) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(server_error("Neo.ClientError.Security.Unauthorized", "bad credentials")),
        );
    }
    let id = state.next_tx.fetch_add(1, Ordering::SeqCst) + 1;
    state.databases.lock().unwrap().push(db.clone());
    let commit = format!("{}/db/{}/tx/{}/commit", state.base, db, id);
    (
        StatusCode::CREATED,
        Json(json!({ "commit": commit, "results": [], "errors": [] })),
    )
}

async fn run_in_tx(
    State(state): State<Arc<FakeServer>>,
    Path((_db, _id)): Path<(String, usize)>,
    Json(body): Json<Value>,
) -> Json<Value> {
    let statement = body["statements"][0]["statement"]
        .as_str()
        .unwrap_or_default()
        .to_string();
    state.statements.lock().unwrap().push(statement.clone());
    if statement.contains("slow") {
        tokio::time::sleep(Duration::from_secs(5)).await;
    }
    Json(respond(&statement))
}

async fn rollback(
    State(state): State<Arc<FakeServer>>,
    Path((_db, _id)): Path<(String, usize)>,
) -> Json<Value> {
    state.rolled_back.fetch_add(1, Ordering::SeqCst);
    Json(json!({ "results": [], "errors": [] }))
}

async fn start_fake() -> Arc<FakeServer> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = Arc::new(FakeServer {
        base: format!("http://{}", addr),
        next_tx: AtomicUsize::new(0),
        rolled_back: AtomicUsize::new(0),
        databases: Mutex::new(Vec::new()),
        statements: Mutex::new(Vec::new()),
    });

    let app = Router::new()
        .route("/", get(discovery))
        .route("/db/:db/tx", post(open_tx))
        .route("/db/:db/tx/:id", post(run_in_tx).delete(rollback))
        .with_state(Arc::clone(&state));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    state
}

fn credentials(server: &FakeServer, password: &str) -> Credentials {
    Credentials {
        uri: server.base.clone(),
        user: "neo4j".to_string(),
        password: Secret::new(password),
    }
}

fn connection_provider(server: &FakeServer, settings: DatabaseSettings) -> ConnectionProvider {
    let credentials = credentials(server, "secret");
    let database = settings.database.clone();
    ConnectionProvider::new(
        move || {
            let connection = HttpConnection::new(&credentials, &settings)?;
            Ok(Arc::new(connection) as Arc<dyn GraphConnection>)
        },
        database,
    )
}

fn provider(server: &FakeServer, settings: DatabaseSettings) -> Arc<ConnectionProvider> {
    Arc::new(connection_provider(server, settings))
}

#[tokio::test]
async fn test_fetch_all_reads_rows_and_rolls_back() {
    let server = start_fake().await;
    let provider = provider(&server, DatabaseSettings::default());

    let rows = provider
        .fetch_all(None, "MATCH (p:Person) RETURN p.name AS name")
        .await
        .unwrap();

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["name"], "Alice");
    assert_eq!(rows[1]["name"], "Bob");
    assert_eq!(server.rolled_back.load(Ordering::SeqCst), 1);
    assert_eq!(*server.databases.lock().unwrap(), vec!["neo4j".to_string()]);
}

#[tokio::test]
async fn test_configured_database_is_used() {
    let server = start_fake().await;
    let settings = DatabaseSettings {
        database: Some("movies".to_string()),
        ..DatabaseSettings::default()
    };
    let provider = provider(&server, settings);

    provider.fetch_all(None, "MATCH (n) RETURN n").await.unwrap();
    provider
        .fetch_all(Some("archive"), "MATCH (n) RETURN n")
        .await
        .unwrap();

    assert_eq!(
        *server.databases.lock().unwrap(),
        vec!["movies".to_string(), "archive".to_string()]
    );
}

#[tokio::test]
async fn test_server_error_is_query_error() {
    let server = start_fake().await;
    let provider = provider(&server, DatabaseSettings::default());

    let err = provider.fetch_all(None, "RETURN boom").await.unwrap_err();

    assert_eq!(err.code(), Some("Neo.DatabaseError.General.UnknownError"));
    assert!(matches!(err, DbError::Query { .. }));
}

#[tokio::test]
async fn test_request_timeout_is_timeout_error_and_session_is_released() {
    let server = start_fake().await;
    let settings = DatabaseSettings {
        query_timeout: Duration::from_millis(200),
        ..DatabaseSettings::default()
    };
    let provider = provider(&server, settings);

    let err = provider.fetch_all(None, "CALL slow()").await.unwrap_err();

    assert!(err.is_timeout(), "{err}");
    assert_eq!(server.rolled_back.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_bad_credentials_fail_to_open_session() {
    let server = start_fake().await;
    let connection =
        HttpConnection::new(&credentials(&server, "wrong"), &DatabaseSettings::default()).unwrap();

    let err = connection.open_session(None).await.err().unwrap();
    assert!(matches!(err, DbError::Connection(_)));
    assert!(connection.verify_connectivity().await.is_err());
}

#[tokio::test]
async fn test_verify_on_init() {
    let server = start_fake().await;
    let provider =
        connection_provider(&server, DatabaseSettings::default()).with_verify_on_init(true);

    assert!(provider.connection().await.is_ok());
}

#[tokio::test]
async fn test_schema_fetch() {
    let server = start_fake().await;
    let provider = provider(&server, DatabaseSettings::default());

    let schema = GraphSchema::fetch(&provider, None).await.unwrap();

    assert!(schema.has_label("Person"));
    assert!(schema.has_relationship_type("ACTED_IN"));
    assert!(schema.has_pattern("Person", "ACTED_IN", "Movie"));
    assert!(schema.has_pattern("Actor", "ACTED_IN", "Movie"));
    assert!(schema.node_has_property("Actor", "name"));
    assert!(!schema.patterns_truncated);
    assert!(schema.node_has_property("Movie", "title"));
    assert!(schema.relationship_has_property("ACTED_IN", "roles"));
    // Five introspection statements in one transaction.
    assert_eq!(server.statements.lock().unwrap().len(), 5);
    assert_eq!(server.rolled_back.load(Ordering::SeqCst), 1);
}

#[cfg(feature = "structural-checks")]
mod structural {
    use super::*;
    use graphrag::guard::{
        CheckerAvailability, PropertyScore, StageStatus, ValidationError, ValidationPipeline,
        ValidationPolicy,
    };
    use graphrag::{ExecutionPolicy, QueryExecutor};

    #[tokio::test]
    async fn test_pipeline_probe_finds_checker() {
        let server = start_fake().await;
        let pipeline = ValidationPipeline::connect(provider(&server, DatabaseSettings::default())).await;

        assert!(pipeline.checker().is_available());

        let (is_valid, report) = pipeline
            .validate(
                "MATCH (p:Person)-[r:ACTED_IN]->(m:Movie) RETURN p.name, r.roles, m.title",
                &ValidationPolicy::default(),
            )
            .await
            .unwrap();
        assert!(is_valid);
        assert_eq!(report.schema_score, Some(1.0));
        assert_eq!(report.property_score, Some(PropertyScore::Score(1.0)));
    }

    #[tokio::test]
    async fn test_secondary_label_pattern_passes_strict_validation() {
        let server = start_fake().await;
        let pipeline = ValidationPipeline::connect(provider(&server, DatabaseSettings::default())).await;

        let (is_valid, report) = pipeline
            .validate(
                "MATCH (a:Actor)-[:ACTED_IN]->(m:Movie) RETURN a.name, m.title",
                &ValidationPolicy::default(),
            )
            .await
            .unwrap();
        assert!(is_valid);
        assert_eq!(report.schema_score, Some(1.0));
    }

    #[tokio::test]
    async fn test_syntax_error_from_explain() {
        let server = start_fake().await;
        let pipeline = ValidationPipeline::connect(provider(&server, DatabaseSettings::default())).await;

        let (is_valid, report) = pipeline
            .validate("MATCH (p:Person) RETUR p.name", &ValidationPolicy::lenient())
            .await
            .unwrap();

        assert!(!is_valid);
        assert_eq!(report.syntax, StageStatus::Failed);
        assert_eq!(
            report.syntax_metadata["code"],
            "Neo.ClientError.Statement.SyntaxError"
        );
    }

    #[tokio::test]
    async fn test_unknown_property_is_rejected() {
        let server = start_fake().await;
        let pipeline = ValidationPipeline::connect(provider(&server, DatabaseSettings::default())).await;

        let err = pipeline
            .validate("MATCH (p:Person) RETURN p.age", &ValidationPolicy::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ValidationError::PropertyMismatch { .. }));
    }

    #[tokio::test]
    async fn test_probe_failure_is_unavailable() {
        let provider = Arc::new(ConnectionProvider::new(
            || Err(DbError::Connection("connection refused".to_string())),
            None,
        ));

        let checker = CheckerAvailability::probe(provider).await;
        assert!(!checker.is_available());
    }

    #[tokio::test]
    async fn test_executor_end_to_end() {
        let server = start_fake().await;
        let executor = QueryExecutor::connect(provider(&server, DatabaseSettings::default())).await;

        let rows = executor
            .run("MATCH (p:Person) RETURN p.name AS name", &ExecutionPolicy::default())
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);

        let statements = server.statements.lock().unwrap();
        assert!(statements.iter().any(|s| s.starts_with("EXPLAIN MATCH (p:Person)")));
        assert_eq!(
            statements.last().map(String::as_str),
            Some("MATCH (p:Person) RETURN p.name AS name")
        );
    }
}
