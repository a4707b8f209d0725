//! Graph schema snapshot
//!
//! Labels, relationship types, property names and observed
//! `(start)-[type]->(end)` patterns, read through the standard schema
//! procedures. Used by the schema-aware checker and rendered into prompts
//! for query generation.

use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use tracing::info;

use super::{collect_rows, ConnectionProvider, DbResult, GraphSession, Row};

const LABELS_QUERY: &str = "CALL db.labels() YIELD label RETURN label";
const REL_TYPES_QUERY: &str =
    "CALL db.relationshipTypes() YIELD relationshipType RETURN relationshipType";
const NODE_PROPERTIES_QUERY: &str = "CALL db.schema.nodeTypeProperties() \
     YIELD nodeLabels, propertyName, propertyTypes \
     RETURN nodeLabels, propertyName, propertyTypes";
const REL_PROPERTIES_QUERY: &str = "CALL db.schema.relTypeProperties() \
     YIELD relType, propertyName, propertyTypes \
     RETURN relType, propertyName, propertyTypes";
/// Upper bound on distinct `(label, type, label)` triples read.
pub const TOPOLOGY_LIMIT: usize = 5000;

// Every label of a multi-label node yields its own triple.
fn topology_query() -> String {
    format!(
        "MATCH (a)-[r]->(b) \
         UNWIND labels(a) AS source UNWIND labels(b) AS target \
         RETURN DISTINCT source, type(r) AS type, target \
         LIMIT {TOPOLOGY_LIMIT}"
    )
}

/// One observed relationship pattern.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct RelationshipPattern {
    pub start: String,
    pub rel_type: String,
    pub end: String,
}

impl RelationshipPattern {
    pub fn new(
        start: impl Into<String>,
        rel_type: impl Into<String>,
        end: impl Into<String>,
    ) -> Self {
        Self {
            start: start.into(),
            rel_type: rel_type.into(),
            end: end.into(),
        }
    }
}

/// Property name to type name.
pub type PropertyTypes = BTreeMap<String, String>;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GraphSchema {
    pub labels: BTreeSet<String>,
    pub relationship_types: BTreeSet<String>,
    pub node_properties: BTreeMap<String, PropertyTypes>,
    pub relationship_properties: BTreeMap<String, PropertyTypes>,
    pub relationships: BTreeSet<RelationshipPattern>,
    /// The topology scan hit [`TOPOLOGY_LIMIT`], so `relationships` may
    /// miss real patterns.
    pub patterns_truncated: bool,
}

fn text(row: &Row, column: &str) -> Option<String> {
    row.get(column).and_then(Value::as_str).map(str::to_string)
}

fn type_name(row: &Row) -> String {
    match row.get("propertyTypes") {
        Some(Value::Array(types)) => types
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join("|"),
        Some(Value::String(t)) => t.clone(),
        _ => "ANY".to_string(),
    }
}

/// `":`Person`"` -> `"Person"`
fn strip_type_marker(rel_type: &str) -> String {
    rel_type
        .trim_start_matches(':')
        .trim_matches('`')
        .to_string()
}

impl GraphSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the schema from `database` in a single session.
    pub async fn fetch(provider: &ConnectionProvider, database: Option<&str>) -> DbResult<Self> {
        let mut session = provider.session(database).await?;
        let outcome = Self::read(session.as_mut()).await;
        let closed = session.close().await;
        let schema = outcome?;
        closed?;
        info!(
            labels = schema.labels.len(),
            relationship_types = schema.relationship_types.len(),
            patterns = schema.relationships.len(),
            patterns_truncated = schema.patterns_truncated,
            "graph schema loaded"
        );
        Ok(schema)
    }

    async fn read(session: &mut dyn GraphSession) -> DbResult<Self> {
        let mut schema = GraphSchema::new();

        for row in collect_rows(session, LABELS_QUERY).await? {
            if let Some(label) = text(&row, "label") {
                schema.labels.insert(label);
            }
        }
        for row in collect_rows(session, REL_TYPES_QUERY).await? {
            if let Some(rel_type) = text(&row, "relationshipType") {
                schema.relationship_types.insert(rel_type);
            }
        }
        for row in collect_rows(session, NODE_PROPERTIES_QUERY).await? {
            let Some(property) = text(&row, "propertyName") else {
                continue;
            };
            let labels = match row.get("nodeLabels") {
                Some(Value::Array(labels)) => labels
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect::<Vec<_>>(),
                _ => continue,
            };
            let ty = type_name(&row);
            for label in labels {
                schema
                    .node_properties
                    .entry(label)
                    .or_default()
                    .insert(property.clone(), ty.clone());
            }
        }
        for row in collect_rows(session, REL_PROPERTIES_QUERY).await? {
            let (Some(rel_type), Some(property)) =
                (text(&row, "relType"), text(&row, "propertyName"))
            else {
                continue;
            };
            schema
                .relationship_properties
                .entry(strip_type_marker(&rel_type))
                .or_default()
                .insert(property, type_name(&row));
        }
        let topology = collect_rows(session, &topology_query()).await?;
        schema.patterns_truncated = topology.len() >= TOPOLOGY_LIMIT;
        for row in topology {
            if let (Some(start), Some(rel_type), Some(end)) =
                (text(&row, "source"), text(&row, "type"), text(&row, "target"))
            {
                schema
                    .relationships
                    .insert(RelationshipPattern::new(start, rel_type, end));
            }
        }

        Ok(schema)
    }

    pub fn with_label(mut self, label: &str, properties: &[(&str, &str)]) -> Self {
        self.labels.insert(label.to_string());
        let entry = self.node_properties.entry(label.to_string()).or_default();
        for (name, ty) in properties {
            entry.insert(name.to_string(), ty.to_string());
        }
        self
    }

    pub fn with_relationship(
        mut self,
        start: &str,
        rel_type: &str,
        end: &str,
        properties: &[(&str, &str)],
    ) -> Self {
        self.relationship_types.insert(rel_type.to_string());
        self.relationships
            .insert(RelationshipPattern::new(start, rel_type, end));
        if !properties.is_empty() {
            let entry = self
                .relationship_properties
                .entry(rel_type.to_string())
                .or_default();
            for (name, ty) in properties {
                entry.insert(name.to_string(), ty.to_string());
            }
        }
        self
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.labels.contains(label)
    }

    pub fn has_relationship_type(&self, rel_type: &str) -> bool {
        self.relationship_types.contains(rel_type)
    }

    pub fn has_pattern(&self, start: &str, rel_type: &str, end: &str) -> bool {
        self.relationships
            .contains(&RelationshipPattern::new(start, rel_type, end))
    }

    pub fn node_has_property(&self, label: &str, property: &str) -> bool {
        self.node_properties
            .get(label)
            .is_some_and(|props| props.contains_key(property))
    }

    pub fn relationship_has_property(&self, rel_type: &str, property: &str) -> bool {
        self.relationship_properties
            .get(rel_type)
            .is_some_and(|props| props.contains_key(property))
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty() && self.relationship_types.is_empty()
    }

    /// Schema description for query-generation prompts.
    pub fn to_prompt_text(&self) -> String {
        let mut out = String::from("Node properties:\n");
        for (label, props) in &self.node_properties {
            out.push_str(&format!("{label} {{{}}}\n", render_properties(props)));
        }
        out.push_str("Relationship properties:\n");
        for (rel_type, props) in &self.relationship_properties {
            out.push_str(&format!("{rel_type} {{{}}}\n", render_properties(props)));
        }
        out.push_str("The relationships:\n");
        for pattern in &self.relationships {
            out.push_str(&format!(
                "(:{})-[:{}]->(:{})\n",
                pattern.start, pattern.rel_type, pattern.end
            ));
        }
        out
    }
}

fn render_properties(props: &PropertyTypes) -> String {
    props
        .iter()
        .map(|(name, ty)| format!("{name}: {ty}"))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn movies() -> GraphSchema {
        GraphSchema::new()
            .with_label("Person", &[("name", "String"), ("born", "Long")])
            .with_label("Movie", &[("title", "String")])
            .with_relationship("Person", "ACTED_IN", "Movie", &[("roles", "StringArray")])
    }

    #[test]
    fn test_lookup_helpers() {
        let schema = movies();
        assert!(schema.has_label("Person"));
        assert!(!schema.has_label("Planet"));
        assert!(schema.has_pattern("Person", "ACTED_IN", "Movie"));
        assert!(!schema.has_pattern("Movie", "ACTED_IN", "Person"));
        assert!(schema.node_has_property("Movie", "title"));
        assert!(schema.relationship_has_property("ACTED_IN", "roles"));
        assert!(!schema.relationship_has_property("ACTED_IN", "since"));
    }

    #[test]
    fn test_prompt_text_sections() {
        let text = movies().to_prompt_text();
        assert!(text.starts_with("Node properties:\n"));
        assert!(text.contains("Person {born: Long, name: String}"));
        assert!(text.contains("Relationship properties:\nACTED_IN {roles: StringArray}"));
        assert!(text.contains("The relationships:\n(:Person)-[:ACTED_IN]->(:Movie)"));
    }

    #[test]
    fn test_strip_type_marker() {
        assert_eq!(strip_type_marker(":`ACTED_IN`"), "ACTED_IN");
        assert_eq!(strip_type_marker("KNOWS"), "KNOWS");
    }
}
