//! Result summarization

use serde_json::Value;
use tracing::warn;

use super::{CompletionService, GenerationParams};
use crate::db::Row;

/// Rows included in the summarization prompt.
pub const PREVIEW_ROWS: usize = 10;

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Deterministic summary used when no model is available.
pub fn fallback_summary(rows: &[Row]) -> String {
    match rows {
        [] => "No results found.".to_string(),
        [row] if row.len() == 1 => row
            .iter()
            .map(|(key, value)| format!("{key}: {}", render_value(value)))
            .collect(),
        [first, ..] => {
            let first = serde_json::to_string(first).unwrap_or_default();
            format!("Returned {} rows. Showing first: {first}", rows.len())
        }
    }
}

/// Summarize `rows`, returned by `cypher`, as an answer to `question`.
///
/// Falls back to [`fallback_summary`] for empty results, offline backends
/// and completion failures.
pub async fn summarize(
    completion: &dyn CompletionService,
    question: &str,
    cypher: &str,
    rows: &[Row],
    params: &GenerationParams,
) -> String {
    if rows.is_empty() || completion.is_offline() {
        return fallback_summary(rows);
    }

    let preview = &rows[..rows.len().min(PREVIEW_ROWS)];
    let preview = serde_json::to_string_pretty(preview).unwrap_or_default();
    let prompt = format!(
        "Question: {question}\n\n\
         Cypher query:\n{cypher}\n\n\
         Query results ({} rows, first {} shown):\n{preview}\n\n\
         Answer the question in a few sentences using only these results.",
        rows.len(),
        rows.len().min(PREVIEW_ROWS)
    );

    match completion.complete(&prompt, params).await {
        Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
        Ok(_) => fallback_summary(rows),
        Err(e) => {
            warn!(error = %e, "summarization failed, using fallback");
            fallback_summary(rows)
        }
    }
}
