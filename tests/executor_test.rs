use async_trait::async_trait;
use graphrag::db::{ConnectionProvider, DbError, DbResult, GraphConnection, GraphSession, Row};
use graphrag::guard::{
    CheckerAvailability, CheckerResult, Metadata, PropertyCheck, PropertyScore, SchemaCheck,
    StructuralChecker, SyntaxCheck, ValidationError,
};
use graphrag::{ExecutionPolicy, QueryExecutor, RunError, ValidationPipeline};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Clone)]
enum Script {
    Rows(Vec<Row>),
    /// Yield these rows, then time out.
    TimeoutAfter(Vec<Row>),
    RunFails,
}

#[derive(Default)]
struct Counters {
    opened: AtomicUsize,
    closed: AtomicUsize,
    queries: Mutex<Vec<(Option<String>, String)>>,
}

struct MockConnection {
    script: Script,
    counters: Arc<Counters>,
}

struct MockSession {
    script: Script,
    database: Option<String>,
    counters: Arc<Counters>,
    yielded: usize,
}

#[async_trait]
impl GraphConnection for MockConnection {
    async fn open_session(&self, database: Option<&str>) -> DbResult<Box<dyn GraphSession>> {
        self.counters.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockSession {
            script: self.script.clone(),
            database: database.map(str::to_string),
            counters: Arc::clone(&self.counters),
            yielded: 0,
        }))
    }

    async fn verify_connectivity(&self) -> DbResult<()> {
        Ok(())
    }
}

#[async_trait]
impl GraphSession for MockSession {
    async fn run(&mut self, query: &str) -> DbResult<()> {
        self.counters
            .queries
            .lock()
            .unwrap()
            .push((self.database.clone(), query.to_string()));
        match self.script {
            Script::RunFails => Err(DbError::Query {
                code: "Neo.DatabaseError.General.UnknownError".to_string(),
                message: "boom".to_string(),
            }),
            _ => Ok(()),
        }
    }

    async fn next_record(&mut self) -> DbResult<Option<Row>> {
        let (rows, timeout) = match &self.script {
            Script::Rows(rows) => (rows, false),
            Script::TimeoutAfter(rows) => (rows, true),
            Script::RunFails => return Ok(None),
        };
        if let Some(row) = rows.get(self.yielded) {
            self.yielded += 1;
            return Ok(Some(row.clone()));
        }
        if timeout {
            Err(DbError::Timeout("operation timed out".to_string()))
        } else {
            Ok(None)
        }
    }

    async fn close(&mut self) -> DbResult<()> {
        self.counters.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct PassingChecker;

#[async_trait]
impl StructuralChecker for PassingChecker {
    async fn check_syntax(&self, _query: &str, _database: Option<&str>) -> CheckerResult<SyntaxCheck> {
        Ok(SyntaxCheck {
            passed: true,
            metadata: Metadata::new(),
        })
    }

    async fn check_schema(&self, _query: &str, _database: Option<&str>) -> CheckerResult<SchemaCheck> {
        Ok(SchemaCheck {
            score: 1.0,
            metadata: Metadata::new(),
        })
    }

    async fn check_properties(
        &self,
        _query: &str,
        _database: Option<&str>,
    ) -> CheckerResult<PropertyCheck> {
        Ok(PropertyCheck {
            score: PropertyScore::NotApplicable,
            metadata: Metadata::new(),
        })
    }
}

fn executor(script: Script, checker: CheckerAvailability) -> (QueryExecutor, Arc<Counters>) {
    let counters = Arc::new(Counters::default());
    let connection = Arc::new(MockConnection {
        script,
        counters: Arc::clone(&counters),
    });
    let provider = Arc::new(ConnectionProvider::from_connection(
        connection,
        Some("movies".to_string()),
    ));
    let pipeline = ValidationPipeline::new(checker).with_default_database(Some("movies".to_string()));
    (QueryExecutor::new(provider, Arc::new(pipeline)), counters)
}

fn person(name: &str) -> Row {
    [("name".to_string(), json!(name))].into_iter().collect()
}

#[tokio::test]
async fn test_validated_query_returns_rows_in_order() {
    let (executor, counters) = executor(
        Script::Rows(vec![person("Alice"), person("Bob")]),
        CheckerAvailability::available(PassingChecker),
    );

    let rows = executor
        .run("MATCH (p:Person) RETURN p.name AS name", &ExecutionPolicy::default())
        .await
        .unwrap();

    assert_eq!(rows, vec![person("Alice"), person("Bob")]);
    assert_eq!(counters.opened.load(Ordering::SeqCst), 1);
    assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
    let queries = counters.queries.lock().unwrap();
    assert_eq!(queries[0].0.as_deref(), Some("movies"));
}

#[tokio::test]
async fn test_empty_result_is_success() {
    let (executor, counters) = executor(
        Script::Rows(vec![]),
        CheckerAvailability::available(PassingChecker),
    );

    let rows = executor
        .run("MATCH (p:Person) WHERE p.name = 'nobody' RETURN p", &ExecutionPolicy::default())
        .await
        .unwrap();

    assert!(rows.is_empty());
    assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_validation_failure_never_opens_session() {
    let (executor, counters) = executor(
        Script::Rows(vec![person("Alice")]),
        CheckerAvailability::available(PassingChecker),
    );

    let err = executor
        .run("MATCH (n) SET n.flag = true RETURN n", &ExecutionPolicy::default())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        RunError::Validation(ValidationError::ReadOnlyViolation { .. })
    ));
    assert_eq!(counters.opened.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_validation_error_message_is_unchanged() {
    let (executor, _) = executor(
        Script::Rows(vec![]),
        CheckerAvailability::unavailable("checker not installed"),
    );

    let err = executor
        .run("MATCH (n) RETURN n", &ExecutionPolicy::default())
        .await
        .unwrap_err();

    let RunError::Validation(inner) = &err else {
        panic!("unexpected error: {err}");
    };
    assert_eq!(err.to_string(), inner.to_string());
}

#[tokio::test]
async fn test_timeout_mid_iteration_is_execution_failure_and_closes_once() {
    let (executor, counters) = executor(
        Script::TimeoutAfter(vec![person("Alice")]),
        CheckerAvailability::available(PassingChecker),
    );

    let err = executor
        .run("MATCH (p:Person) RETURN p.name AS name", &ExecutionPolicy::default())
        .await
        .unwrap_err();

    assert!(err.is_execution());
    assert!(!err.is_validation());
    match err {
        RunError::Execution(source) => assert!(source.is_timeout()),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(counters.opened.load(Ordering::SeqCst), 1);
    assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_run_failure_still_closes_session() {
    let (executor, counters) = executor(
        Script::RunFails,
        CheckerAvailability::available(PassingChecker),
    );

    let err = executor
        .run("MATCH (n) RETURN n", &ExecutionPolicy::default())
        .await
        .unwrap_err();

    match err {
        RunError::Execution(source) => {
            assert_eq!(source.code(), Some("Neo.DatabaseError.General.UnknownError"))
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_skip_validation_bypasses_structural_checks_only() {
    let (executor, counters) = executor(
        Script::Rows(vec![person("Alice")]),
        CheckerAvailability::unavailable("checker not installed"),
    );
    let policy = ExecutionPolicy::default().skipping_validation(true);

    let rows = executor.run("MATCH (p) RETURN p.name AS name", &policy).await.unwrap();
    assert_eq!(rows.len(), 1);

    let err = executor
        .run("MATCH (p) DETACH DELETE p", &policy)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RunError::Validation(ValidationError::ReadOnlyViolation { .. })
    ));
    assert_eq!(counters.opened.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_policy_database_overrides_default() {
    let (executor, counters) = executor(
        Script::Rows(vec![]),
        CheckerAvailability::available(PassingChecker),
    );
    let policy = ExecutionPolicy::default().with_database("archive");

    executor.run("MATCH (n) RETURN n", &policy).await.unwrap();

    let queries = counters.queries.lock().unwrap();
    assert_eq!(queries[0], (Some("archive".to_string()), "MATCH (n) RETURN n".to_string()));
}

#[tokio::test]
async fn test_empty_query_never_opens_session() {
    let (executor, counters) = executor(
        Script::Rows(vec![]),
        CheckerAvailability::available(PassingChecker),
    );

    let err = executor.run("", &ExecutionPolicy::default()).await.unwrap_err();
    assert!(matches!(err, RunError::EmptyQuery));
    assert_eq!(counters.opened.load(Ordering::SeqCst), 0);
}
