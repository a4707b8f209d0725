//! Schema-aware structural checker
//!
//! - syntax: the database compiles the query under `EXPLAIN`; a
//!   `Neo.ClientError.Statement.*` status is a syntax failure
//! - schema: labels, relationship types and typed single-hop patterns are
//!   looked up in a [`GraphSchema`] snapshot
//! - properties: `var.prop` accesses and inline map keys on label-bound
//!   variables are looked up in the same snapshot
//!
//! Pattern extraction is regex based and runs over comment-free text with
//! string literal contents blanked out.

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, LazyLock};
use tokio::sync::RwLock;
use tracing::debug;

use super::checker::{
    CheckerError, CheckerResult, PropertyCheck, PropertyScore, SchemaCheck, StructuralChecker,
    SyntaxCheck,
};
use super::lexical::{mask_string_literals, strip_comments};
use super::report::Metadata;
use crate::db::{collect_rows, ConnectionProvider, DbError, GraphSchema};

const SYNTAX_ERROR_PREFIX: &str = "Neo.ClientError.Statement.";

fn pattern(source: &str) -> Regex {
    Regex::new(source).expect("pattern extraction regex is valid")
}

// `(inner)` with no nested parentheses.
static NODE: LazyLock<Regex> = LazyLock::new(|| pattern(r"\((?P<inner>[^()]*)\)"));

static NODE_INNER: LazyLock<Regex> = LazyLock::new(|| {
    pattern(
        r"^\s*(?P<var>[A-Za-z_]\w*)?\s*(?P<labels>(?:[:|&]\s*(?:`[^`]+`|[A-Za-z_]\w*)\s*)*)(?P<props>\{.*\})?\s*$",
    )
});

// `-[inner]-`, so list literals and subscripts are never taken for relationships.
static RELATIONSHIP: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"-\s*\[(?P<inner>[^\[\]]*)\]\s*-"));

static REL_INNER: LazyLock<Regex> = LazyLock::new(|| {
    pattern(
        r"^\s*(?P<var>[A-Za-z_]\w*)?\s*(?::\s*(?P<types>(?:`[^`]+`|[A-Za-z_]\w*)(?:\s*\|\s*:?\s*(?:`[^`]+`|[A-Za-z_]\w*))*))?\s*(?P<hops>\*[\d.\s]*)?\s*(?P<props>\{.*\})?\s*$",
    )
});

static HOP: LazyLock<Regex> = LazyLock::new(|| {
    pattern(
        r"\((?P<start>[^()]*)\)\s*(?P<incoming><)?-\s*\[(?P<rel>[^\[\]]*)\]\s*-(?P<outgoing>>)?\s*(?P<end>\([^()]*\))",
    )
});

static NAME: LazyLock<Regex> = LazyLock::new(|| pattern(r"`[^`]+`|[A-Za-z_]\w*"));

static MAP_KEY: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"[{,]\s*(?P<key>`[^`]+`|[A-Za-z_]\w*)\s*:"));

static PROPERTY_ACCESS: LazyLock<Regex> = LazyLock::new(|| {
    pattern(r"(?:^|[^\w.$`])(?P<var>[A-Za-z_]\w*)\s*\.\s*(?P<prop>`[^`]+`|[A-Za-z_]\w*)")
});

fn unquote(name: &str) -> String {
    name.trim_matches('`').to_string()
}

fn names(text: &str) -> Vec<String> {
    NAME.find_iter(text).map(|m| unquote(m.as_str())).collect()
}

fn map_keys(map: &str) -> Vec<String> {
    MAP_KEY
        .captures_iter(map)
        .filter_map(|c| c.name("key"))
        .map(|m| unquote(m.as_str()))
        .collect()
}

#[derive(Debug, Default)]
struct NodePattern {
    var: Option<String>,
    labels: Vec<String>,
    keys: Vec<String>,
}

fn parse_node(inner: &str) -> Option<NodePattern> {
    let caps = NODE_INNER.captures(inner)?;
    Some(NodePattern {
        var: caps.name("var").map(|m| m.as_str().to_string()),
        labels: caps.name("labels").map(|m| names(m.as_str())).unwrap_or_default(),
        keys: caps.name("props").map(|m| map_keys(m.as_str())).unwrap_or_default(),
    })
}

#[derive(Debug, Default)]
struct RelPattern {
    var: Option<String>,
    types: Vec<String>,
    variable_length: bool,
    keys: Vec<String>,
}

fn parse_relationship(inner: &str) -> Option<RelPattern> {
    let caps = REL_INNER.captures(inner)?;
    Some(RelPattern {
        var: caps.name("var").map(|m| m.as_str().to_string()),
        types: caps.name("types").map(|m| names(m.as_str())).unwrap_or_default(),
        variable_length: caps.name("hops").is_some(),
        keys: caps.name("props").map(|m| map_keys(m.as_str())).unwrap_or_default(),
    })
}

/// Direction of a hop as written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Outgoing,
    Incoming,
    Either,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct Hop {
    start: String,
    rel_type: String,
    end: String,
    either: bool,
}

/// Identifiers a query refers to.
#[derive(Debug, Default)]
struct QueryPatterns {
    labels: BTreeSet<String>,
    relationship_types: BTreeSet<String>,
    hops: BTreeSet<Hop>,
    node_bindings: HashMap<String, BTreeSet<String>>,
    rel_bindings: HashMap<String, BTreeSet<String>>,
    /// `(variable, property)` pairs, from accesses and inline maps.
    properties: BTreeSet<(String, String)>,
}

impl QueryPatterns {
    fn extract(query: &str) -> Self {
        let text = mask_string_literals(&strip_comments(query));
        let mut patterns = QueryPatterns::default();
        let mut anonymous = 0usize;

        for caps in NODE.captures_iter(&text) {
            let Some(node) = caps.name("inner").and_then(|m| parse_node(m.as_str())) else {
                continue;
            };
            patterns.labels.extend(node.labels.iter().cloned());
            let var = node.var.unwrap_or_else(|| {
                anonymous += 1;
                format!(" node{anonymous}")
            });
            if !node.labels.is_empty() {
                patterns
                    .node_bindings
                    .entry(var.clone())
                    .or_default()
                    .extend(node.labels);
            }
            for key in node.keys {
                patterns.properties.insert((var.clone(), key));
            }
        }

        for caps in RELATIONSHIP.captures_iter(&text) {
            let Some(rel) = caps.name("inner").and_then(|m| parse_relationship(m.as_str())) else {
                continue;
            };
            patterns.relationship_types.extend(rel.types.iter().cloned());
            let var = rel.var.unwrap_or_else(|| {
                anonymous += 1;
                format!(" rel{anonymous}")
            });
            if !rel.types.is_empty() {
                patterns
                    .rel_bindings
                    .entry(var.clone())
                    .or_default()
                    .extend(rel.types);
            }
            for key in rel.keys {
                patterns.properties.insert((var.clone(), key));
            }
        }

        for caps in PROPERTY_ACCESS.captures_iter(&text) {
            if let (Some(var), Some(prop)) = (caps.name("var"), caps.name("prop")) {
                patterns
                    .properties
                    .insert((var.as_str().to_string(), unquote(prop.as_str())));
            }
        }

        // Consecutive hops share a node, so each search resumes at the end
        // node of the previous match.
        let mut position = 0;
        while let Some(caps) = HOP.captures_at(&text, position) {
            let Some(end) = caps.name("end") else { break };
            position = end.start();
            if let Some(hop) = patterns.resolve_hop(&caps) {
                patterns.hops.insert(hop);
            }
        }

        patterns
    }

    /// First label of a node pattern, falling back to the variable's binding.
    fn node_label(&self, inner: &str) -> Option<String> {
        let node = parse_node(inner)?;
        if let Some(label) = node.labels.into_iter().next() {
            return Some(label);
        }
        let bound = self.node_bindings.get(&node.var?)?;
        match bound.len() {
            1 => bound.iter().next().cloned(),
            _ => None,
        }
    }

    fn resolve_hop(&self, caps: &regex::Captures<'_>) -> Option<Hop> {
        let rel = parse_relationship(caps.name("rel")?.as_str())?;
        if rel.variable_length || rel.types.len() != 1 {
            return None;
        }
        let start = self.node_label(caps.name("start")?.as_str())?;
        let end_node = caps.name("end")?.as_str();
        let end = self.node_label(&end_node[1..end_node.len() - 1])?;
        let rel_type = rel.types.into_iter().next()?;

        let direction = match (caps.name("incoming"), caps.name("outgoing")) {
            (Some(_), None) => Direction::Incoming,
            (None, Some(_)) => Direction::Outgoing,
            _ => Direction::Either,
        };
        let (start, end) = match direction {
            Direction::Incoming => (end, start),
            _ => (start, end),
        };
        Some(Hop {
            start,
            rel_type,
            end,
            either: direction == Direction::Either,
        })
    }
}

fn ratio(valid: usize, total: usize) -> f64 {
    if total == 0 {
        1.0
    } else {
        valid as f64 / total as f64
    }
}

fn into_metadata(value: Value) -> Metadata {
    match value {
        Value::Object(map) => map,
        _ => Metadata::new(),
    }
}

/// Score the labels, relationship types and hops `query` uses.
pub fn score_schema(schema: &GraphSchema, query: &str) -> SchemaCheck {
    let patterns = QueryPatterns::extract(query);

    let unknown_labels: Vec<&String> = patterns
        .labels
        .iter()
        .filter(|l| !schema.has_label(l))
        .collect();
    let unknown_types: Vec<&String> = patterns
        .relationship_types
        .iter()
        .filter(|t| !schema.has_relationship_type(t))
        .collect();
    let missing_patterns: Vec<String> = patterns
        .hops
        .iter()
        .filter(|hop| {
            let forward = schema.has_pattern(&hop.start, &hop.rel_type, &hop.end);
            let backward = hop.either && schema.has_pattern(&hop.end, &hop.rel_type, &hop.start);
            !(forward || backward)
        })
        .map(|hop| {
            let arrow = if hop.either { "-" } else { "->" };
            format!("(:{})-[:{}]{}(:{})", hop.start, hop.rel_type, arrow, hop.end)
        })
        .collect();

    // A truncated snapshot cannot prove a pattern absent.
    let (unknown_patterns, unchecked_patterns) = if schema.patterns_truncated {
        (Vec::new(), missing_patterns)
    } else {
        (missing_patterns, Vec::new())
    };

    let total = patterns.labels.len() + patterns.relationship_types.len() + patterns.hops.len()
        - unchecked_patterns.len();
    let invalid = unknown_labels.len() + unknown_types.len() + unknown_patterns.len();
    let score = ratio(total - invalid, total);

    SchemaCheck {
        score,
        metadata: into_metadata(json!({
            "checked": total,
            "unknown_labels": unknown_labels,
            "unknown_relationship_types": unknown_types,
            "unknown_patterns": unknown_patterns,
            "unchecked_patterns": unchecked_patterns,
        })),
    }
}

/// Score the properties `query` reads or matches on label-bound variables.
///
/// Variables bound only to labels or types missing from the schema are not
/// scored here; the schema stage already rejects them.
pub fn score_properties(schema: &GraphSchema, query: &str) -> PropertyCheck {
    let patterns = QueryPatterns::extract(query);
    let mut checked = 0usize;
    let mut unknown = Vec::new();

    for (var, property) in &patterns.properties {
        if let Some(labels) = patterns.node_bindings.get(var) {
            let known: Vec<&String> = labels.iter().filter(|l| schema.has_label(l)).collect();
            if known.is_empty() {
                continue;
            }
            checked += 1;
            if !known.iter().any(|l| schema.node_has_property(l, property)) {
                unknown.push(format!("{}.{property}", join(&known)));
            }
        } else if let Some(types) = patterns.rel_bindings.get(var) {
            let known: Vec<&String> = types
                .iter()
                .filter(|t| schema.has_relationship_type(t))
                .collect();
            if known.is_empty() {
                continue;
            }
            checked += 1;
            if !known
                .iter()
                .any(|t| schema.relationship_has_property(t, property))
            {
                unknown.push(format!("{}.{property}", join(&known)));
            }
        }
    }

    let score = if checked == 0 {
        PropertyScore::NotApplicable
    } else {
        PropertyScore::Score(ratio(checked - unknown.len(), checked))
    };

    PropertyCheck {
        score,
        metadata: into_metadata(json!({
            "checked": checked,
            "unknown_properties": unknown,
        })),
    }
}

fn join(names: &[&String]) -> String {
    names
        .iter()
        .map(|n| n.as_str())
        .collect::<Vec<_>>()
        .join("|")
}

/// Strip a leading `EXPLAIN` or `PROFILE` so the query can be re-explained.
fn explainable(query: &str) -> String {
    let trimmed = query.trim_start();
    let upper = trimmed.to_ascii_uppercase();
    for keyword in ["EXPLAIN", "PROFILE"] {
        if upper.starts_with(keyword)
            && trimmed[keyword.len()..]
                .chars()
                .next()
                .is_some_and(char::is_whitespace)
        {
            return format!("EXPLAIN {}", trimmed[keyword.len()..].trim_start());
        }
    }
    format!("EXPLAIN {trimmed}")
}

/// Structural checker backed by a live database and cached schema
/// snapshots, one per database.
pub struct SchemaAwareChecker {
    provider: Arc<ConnectionProvider>,
    schemas: RwLock<HashMap<String, Arc<GraphSchema>>>,
}

impl SchemaAwareChecker {
    /// Load the default database's schema. Fails when the database is
    /// unreachable or does not support schema introspection.
    pub async fn load(provider: Arc<ConnectionProvider>) -> CheckerResult<Self> {
        let database = provider.default_database().map(str::to_string);
        let schema = GraphSchema::fetch(&provider, database.as_deref())
            .await
            .map_err(|e| CheckerError::Introspection(e.to_string()))?;
        Ok(Self::with_schema(provider, schema))
    }

    /// Use `schema` for the provider's default database.
    pub fn with_schema(provider: Arc<ConnectionProvider>, schema: GraphSchema) -> Self {
        let key = provider.default_database().unwrap_or_default().to_string();
        let schemas = HashMap::from([(key, Arc::new(schema))]);
        Self {
            provider,
            schemas: RwLock::new(schemas),
        }
    }

    async fn schema_for(&self, database: Option<&str>) -> CheckerResult<Arc<GraphSchema>> {
        let database = database.or(self.provider.default_database());
        let key = database.unwrap_or_default().to_string();
        if let Some(schema) = self.schemas.read().await.get(&key) {
            return Ok(Arc::clone(schema));
        }

        let schema = GraphSchema::fetch(&self.provider, database)
            .await
            .map_err(|e| CheckerError::Introspection(e.to_string()))?;
        let schema = Arc::new(schema);
        self.schemas
            .write()
            .await
            .entry(key)
            .or_insert_with(|| Arc::clone(&schema));
        Ok(schema)
    }
}

#[async_trait]
impl StructuralChecker for SchemaAwareChecker {
    async fn check_syntax(&self, query: &str, database: Option<&str>) -> CheckerResult<SyntaxCheck> {
        let mut session = self.provider.session(database).await?;
        let outcome = collect_rows(session.as_mut(), &explainable(query)).await;
        session.close().await?;

        match outcome {
            Ok(_) => Ok(SyntaxCheck {
                passed: true,
                metadata: Metadata::new(),
            }),
            Err(DbError::Query { code, message }) if code.starts_with(SYNTAX_ERROR_PREFIX) => {
                debug!(%code, "query rejected by EXPLAIN");
                Ok(SyntaxCheck {
                    passed: false,
                    metadata: into_metadata(json!({ "code": code, "message": message })),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn check_schema(&self, query: &str, database: Option<&str>) -> CheckerResult<SchemaCheck> {
        let schema = self.schema_for(database).await?;
        Ok(score_schema(&schema, query))
    }

    async fn check_properties(
        &self,
        query: &str,
        database: Option<&str>,
    ) -> CheckerResult<PropertyCheck> {
        let schema = self.schema_for(database).await?;
        Ok(score_properties(&schema, query))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn movies() -> GraphSchema {
        GraphSchema::new()
            .with_label("Person", &[("name", "String"), ("born", "Long")])
            .with_label("Movie", &[("title", "String"), ("released", "Long")])
            .with_relationship("Person", "ACTED_IN", "Movie", &[("roles", "StringArray")])
            .with_relationship("Person", "DIRECTED", "Movie", &[])
            .with_relationship("Person", "FOLLOWS", "Person", &[])
    }

    #[test]
    fn test_known_pattern_scores_one() {
        let check = score_schema(
            &movies(),
            "MATCH (p:Person)-[:ACTED_IN]->(m:Movie) RETURN p.name, m.title",
        );
        assert_eq!(check.score, 1.0);
        assert_eq!(check.metadata["checked"], 4);
    }

    #[test]
    fn test_unknown_label_lowers_score() {
        let check = score_schema(&movies(), "MATCH (p:Person), (x:Planet) RETURN p, x");
        assert_eq!(check.score, 0.5);
        assert_eq!(check.metadata["unknown_labels"], json!(["Planet"]));
    }

    #[test]
    fn test_secondary_labels_match_recorded_patterns() {
        // What the topology scan records for nodes labelled [Person, Actor].
        let schema = movies()
            .with_label("Actor", &[("name", "String")])
            .with_relationship("Actor", "ACTED_IN", "Movie", &[]);

        let check = score_schema(
            &schema,
            "MATCH (a:Actor)-[:ACTED_IN]->(m:Movie) RETURN a.name, m.title",
        );
        assert_eq!(check.score, 1.0);
        assert_eq!(check.metadata["unknown_patterns"], json!([]));
    }

    #[test]
    fn test_truncated_snapshot_leaves_missing_patterns_unchecked() {
        let mut schema = movies().with_label("Actor", &[("name", "String")]);
        let query = "MATCH (a:Actor)-[:ACTED_IN]->(m:Movie) RETURN a.name";

        assert_eq!(score_schema(&schema, query).score, 0.75);

        schema.patterns_truncated = true;
        let check = score_schema(&schema, query);
        assert_eq!(check.score, 1.0);
        assert_eq!(check.metadata["checked"], 3);
        assert_eq!(
            check.metadata["unchecked_patterns"],
            json!(["(:Actor)-[:ACTED_IN]->(:Movie)"])
        );
    }

    #[test]
    fn test_truncated_snapshot_still_rejects_unknown_labels() {
        let mut schema = movies();
        schema.patterns_truncated = true;
        let check = score_schema(&schema, "MATCH (p:Person)-[:ACTED_IN]->(x:Planet) RETURN x");
        assert!(check.score < 1.0);
        assert_eq!(check.metadata["unknown_labels"], json!(["Planet"]));
    }

    #[test]
    fn test_wrong_direction_is_reported() {
        let check = score_schema(&movies(), "MATCH (m:Movie)-[:ACTED_IN]->(p:Person) RETURN p");
        assert!(check.score < 1.0);
        assert_eq!(
            check.metadata["unknown_patterns"],
            json!(["(:Movie)-[:ACTED_IN]->(:Person)"])
        );
    }

    #[test]
    fn test_incoming_and_undirected_hops() {
        let schema = movies();
        assert_eq!(
            score_schema(&schema, "MATCH (m:Movie)<-[:DIRECTED]-(p:Person) RETURN p").score,
            1.0
        );
        assert_eq!(
            score_schema(&schema, "MATCH (m:Movie)-[:DIRECTED]-(p:Person) RETURN p").score,
            1.0
        );
    }

    #[test]
    fn test_chained_hops_resolve_bound_variables() {
        let check = score_schema(
            &movies(),
            "MATCH (a:Person)-[:FOLLOWS]->(b:Person)-[:ACTED_IN]->(m:Movie) \
             MATCH (a)-[:DIRECTED]->(m) RETURN a, b, m",
        );
        assert_eq!(check.score, 1.0);
    }

    #[test]
    fn test_labels_inside_literals_and_comments_are_ignored() {
        let check = score_schema(
            &movies(),
            "// (x:Ghost)\nMATCH (p:Person) WHERE p.name = '(y:Planet)' RETURN p",
        );
        assert_eq!(check.score, 1.0);
    }

    #[test]
    fn test_query_without_patterns_scores_one() {
        assert_eq!(score_schema(&movies(), "RETURN 1 AS one").score, 1.0);
    }

    #[test]
    fn test_property_accesses() {
        let schema = movies();
        let ok = score_properties(
            &schema,
            "MATCH (p:Person {name: 'Tom Hanks'})-[r:ACTED_IN]->(m:Movie) \
             RETURN m.title, r.roles, p.born",
        );
        assert_eq!(ok.score, PropertyScore::Score(1.0));

        let bad = score_properties(&schema, "MATCH (p:Person) RETURN p.name, p.age");
        assert_eq!(bad.score, PropertyScore::Score(0.5));
        assert_eq!(bad.metadata["unknown_properties"], json!(["Person.age"]));
    }

    #[test]
    fn test_properties_not_applicable_without_bound_accesses() {
        let check = score_properties(&movies(), "MATCH (n) RETURN n.anything, count(*)");
        assert_eq!(check.score, PropertyScore::NotApplicable);
    }

    #[test]
    fn test_parameters_and_procedures_are_not_property_accesses() {
        let check = score_properties(
            &movies(),
            "CALL db.labels() YIELD label MATCH (p:Person) WHERE p.name = $person.name RETURN p.born",
        );
        assert_eq!(check.score, PropertyScore::Score(1.0));
        assert_eq!(check.metadata["checked"], 2);
    }

    #[test]
    fn test_explainable_prefixes_once() {
        assert_eq!(explainable("MATCH (n) RETURN n"), "EXPLAIN MATCH (n) RETURN n");
        assert_eq!(explainable("  explain MATCH (n) RETURN n"), "EXPLAIN MATCH (n) RETURN n");
        assert_eq!(explainable("PROFILE MATCH (n) RETURN n"), "EXPLAIN MATCH (n) RETURN n");
        assert_eq!(explainable("EXPLAINED"), "EXPLAIN EXPLAINED");
    }
}
