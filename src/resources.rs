//! Read-only resource views rendered as markdown: the projects list, a
//! per-project detail page, and raw file reads with a metadata header. All
//! aggregates come from the index.

use chrono::DateTime;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::reader;
use crate::store::IndexStore;

/// `vibe://projects` — all projects with activity aggregates.
pub async fn projects_overview(store: &IndexStore) -> Result<String> {
    let summaries = store.project_summaries().await?;

    let mut out = String::from("# Vibe Projects\n\n");
    out.push_str(&format!("Total projects: {}\n\n", summaries.len()));

    for summary in &summaries {
        out.push_str(&format!("## {}\n", summary.name));
        out.push_str(&format!("- Path: `{}`\n", summary.path));
        out.push_str(&format!(
            "- Last updated: {}\n",
            summary.last_updated.as_deref().unwrap_or("unknown")
        ));
        out.push_str(&format!("- Open tasks: {}\n", summary.open_tasks));
        if let Some(mtime) = summary.last_session_mtime {
            if let Some(dt) = DateTime::from_timestamp(mtime, 0) {
                out.push_str(&format!(
                    "- Last session: {}\n",
                    dt.format("%Y-%m-%dT%H:%M:%SZ")
                ));
            }
        }
        let counts: Vec<String> = summary
            .folder_counts
            .iter()
            .map(|(folder, n)| {
                let name = if folder.is_empty() { "(root)" } else { folder };
                format!("{}={}", name, n)
            })
            .collect();
        out.push_str(&format!("- Files: {}\n\n", counts.join(", ")));
    }

    Ok(out)
}

/// `vibe://projects/{name}` — folder structure and task status breakdown.
pub async fn project_detail(store: &IndexStore, name: &str) -> Result<String> {
    let detail = store
        .project_detail(name)
        .await?
        .ok_or_else(|| Error::NotFound(format!("project not found: {}", name)))?;

    let mut out = format!("# Project: {}\n\n", detail.project.name);
    out.push_str(&format!("**Path:** `{}`\n", detail.project.path));
    out.push_str(&format!("**Created:** {}\n", detail.project.created_at));
    out.push_str(&format!("**Updated:** {}\n\n", detail.project.updated_at));

    out.push_str("## Folders\n\n");
    if detail.folder_counts.is_empty() {
        out.push_str("_No indexed files_\n");
    }
    for (folder, count) in &detail.folder_counts {
        let name = if folder.is_empty() { "(root)" } else { folder };
        let word = if *count == 1 { "file" } else { "files" };
        out.push_str(&format!("- `{}/` ({} {})\n", name, count, word));
    }

    out.push_str("\n## Task Status\n\n");
    if detail.task_statuses.is_empty() {
        out.push_str("_No tasks_\n");
    }
    for (status, count) in &detail.task_statuses {
        out.push_str(&format!("- {}: {}\n", status, count));
    }

    Ok(out)
}

/// `vibe://projects/{name}/{folder}/{file}` — raw content prefixed with a
/// derived metadata block.
pub fn file_resource(config: &Config, project: &str, folder: &str, file: &str) -> Result<String> {
    let doc = reader::read_doc(config, project, folder, file)?;

    let mut out = format!("# {}\n\n", doc.filename);
    out.push_str(&format!("**Project:** {}\n", doc.project));
    out.push_str(&format!("**Folder:** {}\n", doc.folder));
    out.push_str(&format!("**Path:** `{}`\n", doc.path));
    if let Some(doc_type) = &doc.metadata.doc_type {
        out.push_str(&format!("**Type:** {}\n", doc_type));
    }
    if let Some(status) = &doc.metadata.status {
        out.push_str(&format!("**Status:** {}\n", status));
    }
    if let Some(updated) = &doc.metadata.updated {
        out.push_str(&format!("**Updated:** {}\n", updated));
    }
    if !doc.metadata.tags.is_empty() {
        out.push_str(&format!("**Tags:** {}\n", doc.metadata.tags.join(", ")));
    }
    out.push_str("\n---\n\n");
    out.push_str(&doc.content);

    Ok(out)
}
