//! Canned context documents assembled from the index and the workspace.
//!
//! Two templates: a compact project briefing (status, active tasks, recent
//! sessions) and a fuller session-start document (status, execution plan,
//! every in-progress and blocked task in full, pending summary, latest
//! session).

use std::path::Path;
use std::sync::Arc;

use crate::config::Config;
use crate::store::{DocumentFilter, DocumentRow, IndexStore};

/// Session sections worth surfacing in a briefing.
const BRIEFING_SECTIONS: &[(&str, &str)] = &[
    ("Done", "## Done"),
    ("Blocked by", "## Blockers"),
    ("Next", "## Next Steps"),
    ("Decisions", "## Decisions"),
];

const RECENT_SESSION_COUNT: usize = 3;
const PENDING_PREVIEW_COUNT: usize = 5;

/// A concise briefing of a project's current state.
pub async fn project_briefing(
    config: &Config,
    store: &Arc<IndexStore>,
    project: &str,
) -> crate::error::Result<String> {
    let Some(_) = store.get_project(project).await? else {
        return Ok(format!(
            "# Project Briefing: {}\n\nProject '{}' not found in index. It may not exist or has not been indexed yet.\n",
            project, project
        ));
    };

    let project_path = config.root.join(project);
    let mut out = format!("# Project Briefing: {}\n\n", project);

    out.push_str("## Current Status\n\n");
    out.push_str(&read_or_placeholder(
        &project_path.join("status.md"),
        "_No status file found_",
    ));
    out.push_str("\n\n");

    let tasks = list_folder(store, project, "tasks").await?;
    out.push_str("## Active Tasks\n\n");
    let mut any = false;
    for status in ["in-progress", "blocked", "pending"] {
        for task in tasks.iter().filter(|t| t.status.as_deref() == Some(status)) {
            any = true;
            let objective = read_task_objective(&config.root, task);
            out.push_str(&format!("- **[{}]** {}: {}\n", status, task.filename, objective));
        }
    }
    if !any {
        out.push_str("_No active tasks_\n");
    }
    out.push('\n');

    let mut sessions = list_folder(store, project, "sessions").await?;
    // Session filenames are dates, so name order is date order.
    sessions.sort_by(|a, b| b.filename.cmp(&a.filename));

    out.push_str("## Recent Sessions\n\n");
    if sessions.is_empty() {
        out.push_str("_No recent sessions_\n");
    }
    for session in sessions.iter().take(RECENT_SESSION_COUNT) {
        let date = session.filename.trim_end_matches(".md");
        out.push_str(&format!("### {}\n\n", date));
        match std::fs::read_to_string(config.root.join(&session.path)) {
            Ok(content) => {
                let mut found = false;
                for (label, heading) in BRIEFING_SECTIONS {
                    let text = extract_section(&content, heading);
                    if !text.is_empty() {
                        found = true;
                        out.push_str(&format!("**{}:** {}\n\n", label, text));
                    }
                }
                if !found {
                    out.push_str(&format!("{}\n\n", truncate(&content, 400)));
                }
            }
            Err(_) => out.push_str("_Could not read session_\n\n"),
        }
    }

    Ok(out)
}

/// Complete context for starting work on a project.
pub async fn session_start(
    config: &Config,
    store: &Arc<IndexStore>,
    project: &str,
) -> crate::error::Result<String> {
    let Some(_) = store.get_project(project).await? else {
        return Ok(format!(
            "# Session Start: {}\n\nProject '{}' not found in index. It may not exist or has not been indexed yet.\n",
            project, project
        ));
    };

    let project_path = config.root.join(project);
    let mut out = format!("# Session Start: {}\n\n", project);

    out.push_str("## Current Status\n\n");
    out.push_str(&read_or_placeholder(
        &project_path.join("status.md"),
        "_No status file found_",
    ));
    out.push_str("\n\n");

    let plan_path = project_path.join("plans").join("execution-plan.md");
    if plan_path.is_file() {
        out.push_str("## Execution Plan\n\n");
        out.push_str(&read_or_placeholder(&plan_path, "_Plan could not be read_"));
        out.push_str("\n\n");
    }

    let tasks = list_folder(store, project, "tasks").await?;

    for (heading, status) in [
        ("## In-Progress Tasks", "in-progress"),
        ("## Blocked Tasks", "blocked"),
    ] {
        out.push_str(heading);
        out.push_str("\n\n");
        let matching: Vec<&DocumentRow> = tasks
            .iter()
            .filter(|t| t.status.as_deref() == Some(status))
            .collect();
        if matching.is_empty() {
            out.push_str(&format!("_No {} tasks_\n\n", status));
        }
        for task in matching {
            out.push_str(&format!("### {}\n\n", task.filename));
            out.push_str(&read_or_placeholder(
                &config.root.join(&task.path),
                "_Could not read task_",
            ));
            out.push_str("\n\n");
        }
    }

    out.push_str("## Pending Tasks\n\n");
    let pending: Vec<&DocumentRow> = tasks
        .iter()
        .filter(|t| t.status.as_deref() == Some("pending"))
        .collect();
    if pending.is_empty() {
        out.push_str("_No pending tasks_\n\n");
    } else {
        for task in pending.iter().take(PENDING_PREVIEW_COUNT) {
            let objective = read_task_objective(&config.root, task);
            out.push_str(&format!("- **{}**: {}\n", task.filename, objective));
        }
        if pending.len() > PENDING_PREVIEW_COUNT {
            out.push_str(&format!(
                "\n_...and {} more pending tasks_\n",
                pending.len() - PENDING_PREVIEW_COUNT
            ));
        }
        out.push('\n');
    }

    let mut sessions = list_folder(store, project, "sessions").await?;
    sessions.sort_by(|a, b| b.filename.cmp(&a.filename));
    if let Some(latest) = sessions.first() {
        let date = latest.filename.trim_end_matches(".md");
        out.push_str(&format!("## Latest Session ({})\n\n", date));
        out.push_str(&read_or_placeholder(
            &config.root.join(&latest.path),
            "_Could not read latest session_",
        ));
        out.push_str("\n\n");
    }

    out.push_str("---\n\nReady to work. The context above shows where the project is and what needs to happen next.\n");
    Ok(out)
}

async fn list_folder(
    store: &Arc<IndexStore>,
    project: &str,
    folder: &str,
) -> crate::error::Result<Vec<DocumentRow>> {
    store
        .list_documents(&DocumentFilter {
            project: Some(project.to_string()),
            folder: Some(folder.to_string()),
            ..Default::default()
        })
        .await
}

fn read_or_placeholder(path: &Path, placeholder: &str) -> String {
    match std::fs::read_to_string(path) {
        Ok(content) => content.trim().to_string(),
        Err(_) => placeholder.to_string(),
    }
}

fn read_task_objective(root: &Path, task: &DocumentRow) -> String {
    match std::fs::read_to_string(root.join(&task.path)) {
        Ok(content) => {
            let objective = extract_section(&content, "## Objective");
            if objective.is_empty() {
                "_No objective found_".to_string()
            } else {
                truncate(&objective, 200)
            }
        }
        Err(_) => "_Could not read task_".to_string(),
    }
}

/// Content under `heading` up to the next heading, whitespace-collapsed.
fn extract_section(content: &str, heading: &str) -> String {
    let mut lines = Vec::new();
    let mut in_section = false;

    for line in content.lines() {
        if line.trim() == heading {
            in_section = true;
            continue;
        }
        if in_section {
            if line.starts_with('#') {
                break;
            }
            lines.push(line);
        }
    }

    let mut text = lines.join("\n").trim().to_string();
    while text.contains("\n\n\n") {
        text = text.replace("\n\n\n", "\n\n");
    }
    text
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{}...", cut.trim_end())
}
