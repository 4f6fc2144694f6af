//! Ranked full-text search.
//!
//! The query string uses FTS5 grammar directly (phrases, `*` prefixes,
//! `AND`/`OR`/`NOT`, column-qualified `heading:`/`content:`). Results are
//! ordered by a composite score:
//!
//! ```text
//! score = bm25 × type_boost × recency_boost × heading_boost × status_boost
//! ```
//!
//! FTS5's bm25 is more negative for better matches, so it is negated first;
//! larger composite scores are better. Ties break by `indexed_at` descending
//! and then chunk id ascending, which keeps result order deterministic.

use serde::Serialize;
use sqlx::Row;

use crate::error::{Error, Result};
use crate::store::IndexStore;

pub const DEFAULT_LIMIT: i64 = 20;

/// Snippet configuration for FTS5 `snippet()` over the content column.
const SNIPPET_COLUMN: i64 = 2;
const SNIPPET_START: &str = ">>>";
const SNIPPET_END: &str = "<<<";
const SNIPPET_ELLIPSIS: &str = "...";
const SNIPPET_MAX_TOKENS: i64 = 64;

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub project: String,
    pub path: String,
    pub folder: String,
    pub heading: Option<String>,
    pub snippet: String,
    pub score: f64,
}

fn base_sql() -> String {
    let snippet = format!(
        "snippet(chunks_fts, {}, '{}', '{}', '{}', {})",
        SNIPPET_COLUMN, SNIPPET_START, SNIPPET_END, SNIPPET_ELLIPSIS, SNIPPET_MAX_TOKENS
    );
    format!(
        r#"
SELECT
    p.name AS project,
    d.path AS path,
    d.folder AS folder,
    c.heading AS heading,
    {snippet} AS snip,
    (-bm25(chunks_fts)) *
    CASE
        WHEN d.folder = '' AND d.filename = 'status.md' THEN 3.0
        WHEN d.folder = 'tasks' THEN 2.0
        WHEN d.folder = 'plans' THEN 1.8
        WHEN d.folder = 'sessions' THEN 1.5
        WHEN d.folder = 'changelog' THEN 1.2
        WHEN d.folder = 'reports' THEN 1.0
        WHEN d.folder = 'references' THEN 0.8
        WHEN d.folder = 'scratch' THEN 0.5
        ELSE 0.3
    END *
    CASE
        WHEN julianday('now') - julianday(COALESCE(d.updated, datetime(d.mtime, 'unixepoch'))) <= 1 THEN 2.0
        WHEN julianday('now') - julianday(COALESCE(d.updated, datetime(d.mtime, 'unixepoch'))) <= 7 THEN 1.5
        WHEN julianday('now') - julianday(COALESCE(d.updated, datetime(d.mtime, 'unixepoch'))) <= 30 THEN 1.2
        WHEN julianday('now') - julianday(COALESCE(d.updated, datetime(d.mtime, 'unixepoch'))) <= 90 THEN 1.0
        ELSE 0.8
    END *
    CASE
        WHEN c.is_priority_heading = 1 THEN 2.5
        WHEN c.heading LIKE '%Objective%' THEN 1.5
        WHEN c.heading LIKE '%Acceptance%' THEN 1.5
        ELSE 1.0
    END *
    CASE
        WHEN d.status = 'in-progress' THEN 2.0
        WHEN d.status = 'blocked' THEN 1.8
        WHEN d.status = 'pending' THEN 1.2
        WHEN d.status = 'done' THEN 0.6
        ELSE 1.0
    END AS score
FROM chunks_fts
JOIN chunks c ON c.id = chunks_fts.chunk_id
JOIN documents d ON d.id = c.document_id
JOIN projects p ON p.id = d.project_id
WHERE chunks_fts MATCH ?
"#
    )
}

/// Run a ranked search, optionally scoped to one project.
pub async fn search(
    store: &IndexStore,
    query: &str,
    project: Option<&str>,
    limit: Option<i64>,
) -> Result<Vec<SearchResult>> {
    if query.trim().is_empty() {
        return Err(Error::InvalidArgument("query must not be empty".to_string()));
    }
    let limit = limit.unwrap_or(DEFAULT_LIMIT).max(1);

    let mut sql = base_sql();
    if project.is_some() {
        sql.push_str(" AND p.name = ?");
    }
    sql.push_str(" ORDER BY score DESC, d.indexed_at DESC, c.id ASC LIMIT ?");

    let mut q = sqlx::query(&sql).bind(query);
    if let Some(p) = project {
        q = q.bind(p);
    }
    q = q.bind(limit);

    let rows = q.fetch_all(store.pool()).await.map_err(|e| {
        let message = e.to_string();
        // FTS5 reports bad query grammar as a database error at execution.
        if message.contains("fts5") || message.contains("syntax error") {
            Error::InvalidArgument(format!("invalid search query: {}", message))
        } else {
            Error::Transient(message)
        }
    })?;

    Ok(rows
        .iter()
        .map(|row| SearchResult {
            project: row.get("project"),
            path: row.get("path"),
            folder: row.get("folder"),
            heading: row.get("heading"),
            snippet: row.get("snip"),
            score: row.get("score"),
        })
        .collect())
}
