//! Read-side operations: whole-document reads, plan reads, and task
//! listings. Documents are read from the filesystem (the source of truth)
//! with the same path-safety checks as the write path; listings come from
//! the index.

use chrono::DateTime;
use serde::Serialize;
use std::sync::Arc;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::parser;
use crate::paths;
use crate::store::{DocumentFilter, IndexStore};
use crate::writer::TASK_STATUSES;

/// Metadata block returned with every document read.
#[derive(Debug, Clone, Serialize)]
pub struct DocMetadata {
    #[serde(rename = "type")]
    pub doc_type: Option<String>,
    pub status: Option<String>,
    pub updated: Option<String>,
    pub tags: Vec<String>,
    pub owner: Option<String>,
    pub feature: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DocContent {
    pub project: String,
    pub folder: String,
    pub filename: String,
    pub path: String,
    pub metadata: DocMetadata,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskRow {
    pub project: String,
    pub path: String,
    pub filename: String,
    pub status: Option<String>,
    pub owner: Option<String>,
    pub updated: Option<String>,
}

/// Read a complete document with its derived metadata.
pub fn read_doc(config: &Config, project: &str, folder: &str, filename: &str) -> Result<DocContent> {
    paths::validate_project_name(project)?;
    paths::validate_folder(folder)?;
    paths::validate_filename(filename)?;
    let filename = paths::ensure_md(filename);

    let candidate = if folder.is_empty() {
        config.root.join(project).join(&filename)
    } else {
        config.root.join(project).join(folder).join(&filename)
    };
    let abs = paths::resolve_under_root(&config.root, &candidate)?;

    let relative_path = if folder.is_empty() {
        format!("{}/{}", project, filename)
    } else {
        format!("{}/{}/{}", project, folder, filename)
    };

    if !abs.is_file() {
        return Err(Error::NotFound(format!(
            "document not found: {}",
            relative_path
        )));
    }

    let bytes = std::fs::read(&abs)?;
    let content = String::from_utf8_lossy(&bytes).to_string();
    let (frontmatter, _, _) = parser::parse_document(&content, &relative_path);

    // Fall back to the file's mtime when frontmatter has no updated date.
    let updated = match frontmatter.updated {
        Some(date) => Some(date),
        None => std::fs::metadata(&abs)
            .ok()
            .and_then(|m| m.modified().ok())
            .and_then(|t| t.duration_since(std::time::SystemTime::UNIX_EPOCH).ok())
            .and_then(|d| DateTime::from_timestamp(d.as_secs() as i64, 0))
            .map(|dt| dt.format("%Y-%m-%d").to_string()),
    };

    Ok(DocContent {
        project: project.to_string(),
        folder: folder.to_string(),
        filename: filename.clone(),
        path: relative_path,
        metadata: DocMetadata {
            doc_type: frontmatter.doc_type,
            status: frontmatter.status,
            updated,
            tags: frontmatter.tags,
            owner: frontmatter.owner,
            feature: frontmatter.feature,
        },
        content,
    })
}

/// Read a plan from `plans/`, defaulting to `execution-plan.md`.
pub fn get_plan(config: &Config, project: &str, filename: Option<&str>) -> Result<DocContent> {
    read_doc(
        config,
        project,
        "plans",
        filename.unwrap_or("execution-plan.md"),
    )
}

/// List tasks from the index, optionally filtered by project and status.
pub async fn list_tasks(
    store: &Arc<IndexStore>,
    project: Option<&str>,
    status: Option<&str>,
) -> Result<Vec<TaskRow>> {
    if let Some(status) = status {
        if !TASK_STATUSES.contains(&status) {
            return Err(Error::InvalidArgument(format!(
                "invalid status filter: {}",
                status
            )));
        }
    }

    let filter = DocumentFilter {
        project: project.map(str::to_string),
        folder: Some("tasks".to_string()),
        status: status.map(str::to_string),
        ..Default::default()
    };

    let docs = store.list_documents(&filter).await?;
    Ok(docs
        .into_iter()
        .map(|doc| TaskRow {
            project: doc.project,
            path: doc.path,
            filename: doc.filename,
            status: doc.status,
            owner: doc.owner,
            updated: doc.updated,
        })
        .collect())
}
