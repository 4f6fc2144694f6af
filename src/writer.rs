//! The write path.
//!
//! Every mutation of the workspace goes through [`Writer`]: path validation
//! first, then an atomic temp-file-and-rename write, then a single-file
//! index refresh, then the webhook event. Events fire only after a
//! successful write and refresh. A refresh failure leaves the file in place
//! (the next full reindex reconciles) but surfaces to the caller.

use chrono::{Local, Utc};
use regex::Regex;
use serde::Serialize;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::OnceLock;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::indexer::Indexer;
use crate::paths;
use crate::walker::compute_hash;
use crate::webhooks::WebhookDispatcher;

pub const TASK_STATUSES: &[&str] = &["pending", "in-progress", "done", "blocked"];

/// Folder set created by `init_project`.
pub const PROJECT_FOLDERS: &[&str] = &[
    "tasks",
    "plans",
    "sessions",
    "reports",
    "changelog",
    "references",
    "scratch",
    "assets",
];

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteAction {
    Created,
    Updated,
    Appended,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatedDoc {
    pub path: String,
    pub absolute_path: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdatedDoc {
    pub path: String,
    pub content_hash: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatedTask {
    pub task_number: i64,
    pub filename: String,
    pub path: String,
    pub feature: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusChange {
    pub path: String,
    pub previous_status: Option<String>,
    pub new_status: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanWrite {
    pub action: WriteAction,
    pub filename: String,
    pub path: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionWrite {
    pub action: WriteAction,
    pub date: String,
    pub path: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReindexReport {
    pub document_count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct InitializedProject {
    pub project: String,
    pub path: String,
    pub folders: Vec<String>,
}

fn status_rewrite_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^Status:\s*(\S+).*$").unwrap())
}

fn task_number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d{3,})-.*\.md$").unwrap())
}

pub struct Writer {
    config: Arc<Config>,
    indexer: Arc<Indexer>,
    dispatcher: Option<Arc<WebhookDispatcher>>,
}

impl Writer {
    pub fn new(
        config: Arc<Config>,
        indexer: Arc<Indexer>,
        dispatcher: Option<Arc<WebhookDispatcher>>,
    ) -> Writer {
        Writer {
            config,
            indexer,
            dispatcher,
        }
    }

    // ---- operations ----

    /// Create a new document in a project folder. `.md` is appended when
    /// missing; an existing file is an error.
    pub async fn create_doc(
        &self,
        project: &str,
        folder: &str,
        filename: &str,
        content: &str,
    ) -> Result<CreatedDoc> {
        self.ensure_writable()?;
        let (abs, rel) = self.target_file(project, folder, filename)?;

        if abs.exists() {
            return Err(Error::AlreadyExists(format!("file already exists: {}", rel)));
        }
        self.write_atomic(&abs, content, false)?;
        tracing::info!(path = rel, "created document");

        self.indexer.refresh_file(&abs).await?;
        self.fire(
            "doc.created",
            Some(project),
            serde_json::json!({
                "folder": folder,
                "filename": abs.file_name().map(|n| n.to_string_lossy().to_string()),
                "path": rel,
            }),
        )
        .await;

        Ok(CreatedDoc {
            path: rel,
            absolute_path: abs.to_string_lossy().to_string(),
        })
    }

    /// Overwrite an existing document identified by its project-relative
    /// path (e.g. `tasks/001-setup.md`).
    pub async fn update_doc(
        &self,
        project: &str,
        relative_path: &str,
        content: &str,
    ) -> Result<UpdatedDoc> {
        self.ensure_writable()?;
        paths::validate_project_name(project)?;
        for component in relative_path.split('/') {
            if component.is_empty() {
                return Err(Error::InvalidPath(format!(
                    "invalid document path: {}",
                    relative_path
                )));
            }
            paths::validate_filename(component)?;
        }

        let root = self.ensure_root()?;
        let candidate = root.join(project).join(relative_path);
        let abs = paths::resolve_under_root(&self.config.root, &candidate)?;
        let rel = paths::relative_to_root(&root, &abs)?;

        if !abs.is_file() {
            return Err(Error::NotFound(format!("document not found: {}", rel)));
        }
        self.write_atomic(&abs, content, true)?;
        tracing::info!(path = rel, "updated document");

        self.indexer.refresh_file(&abs).await?;
        self.fire(
            "doc.updated",
            Some(project),
            serde_json::json!({
                "filename": abs.file_name().map(|n| n.to_string_lossy().to_string()),
                "path": rel,
            }),
        )
        .await;

        Ok(UpdatedDoc {
            path: rel,
            content_hash: compute_hash(content.as_bytes()),
        })
    }

    /// Create an auto-numbered task file in the standard format.
    pub async fn create_task(
        &self,
        project: &str,
        title: &str,
        objective: &str,
        steps: &[String],
        feature: Option<&str>,
    ) -> Result<CreatedTask> {
        self.ensure_writable()?;
        let project_dir = self.project_dir(project)?;

        let task_number = next_task_number(&project_dir)?;
        let slug = slugify(title);
        let filename = format!("{:03}-{}.md", task_number, slug);
        let content = render_task(title, objective, steps, feature);

        let candidate = project_dir.join("tasks").join(&filename);
        let abs = paths::resolve_under_root(&self.config.root, &candidate)?;
        let rel = paths::relative_to_root(&self.ensure_root()?, &abs)?;

        if abs.exists() {
            return Err(Error::AlreadyExists(format!(
                "task file already exists: {}",
                filename
            )));
        }
        self.write_atomic(&abs, &content, false)?;
        tracing::info!(path = rel, task = task_number, "created task");

        self.indexer.refresh_file(&abs).await?;

        let mut data = serde_json::json!({
            "task_number": task_number,
            "title": title,
            "filename": filename,
            "path": rel,
            "status": "pending",
        });
        if let Some(feature) = feature {
            data["feature"] = serde_json::Value::String(feature.to_string());
        }
        self.fire("task.created", Some(project), data).await;

        Ok(CreatedTask {
            task_number,
            filename,
            path: rel,
            feature: feature.map(str::to_string),
        })
    }

    /// Rewrite the first `Status:` line of a task file, or insert one after
    /// the title when none exists.
    pub async fn update_task_status(
        &self,
        project: &str,
        task_file: &str,
        new_status: &str,
    ) -> Result<StatusChange> {
        self.ensure_writable()?;
        if !TASK_STATUSES.contains(&new_status) {
            return Err(Error::InvalidArgument(format!(
                "invalid status: {} (expected one of: {})",
                new_status,
                TASK_STATUSES.join(", ")
            )));
        }

        let (abs, rel) = self.target_file(project, "tasks", task_file)?;
        if !abs.is_file() {
            return Err(Error::NotFound(format!("task file not found: {}", rel)));
        }

        let content = std::fs::read_to_string(&abs)?;
        let (updated, previous_status) = rewrite_status(&content, new_status);

        self.write_atomic(&abs, &updated, true)?;
        tracing::info!(path = rel, status = new_status, "updated task status");

        self.indexer.refresh_file(&abs).await?;
        self.fire(
            "task.updated",
            Some(project),
            serde_json::json!({
                "filename": abs.file_name().map(|n| n.to_string_lossy().to_string()),
                "path": rel,
                "new_status": new_status,
                "previous_status": previous_status,
            }),
        )
        .await;

        Ok(StatusChange {
            path: rel,
            previous_status,
            new_status: new_status.to_string(),
        })
    }

    /// Create or overwrite a plan file in `plans/`.
    pub async fn create_plan(
        &self,
        project: &str,
        content: &str,
        filename: Option<&str>,
    ) -> Result<PlanWrite> {
        self.ensure_writable()?;
        let filename = filename.unwrap_or("execution-plan.md");
        let (abs, rel) = self.target_file(project, "plans", filename)?;

        let action = if abs.exists() {
            WriteAction::Updated
        } else {
            WriteAction::Created
        };
        self.write_atomic(&abs, content, true)?;
        tracing::info!(path = rel, ?action, "wrote plan");

        self.indexer.refresh_file(&abs).await?;
        let event_type = match action {
            WriteAction::Updated => "plan.updated",
            _ => "plan.created",
        };
        let filename = abs
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        self.fire(
            event_type,
            Some(project),
            serde_json::json!({ "filename": filename, "path": rel }),
        )
        .await;

        Ok(PlanWrite {
            action,
            filename,
            path: rel,
        })
    }

    /// Create or append to today's session log. The first entry writes the
    /// dated header; later entries append a `---`-separated timestamped
    /// block.
    pub async fn log_session(&self, project: &str, content: &str) -> Result<SessionWrite> {
        self.ensure_writable()?;

        let (date, time) = if self.config.session_utc {
            let now = Utc::now();
            (
                now.format("%Y-%m-%d").to_string(),
                now.format("%H:%M:%S").to_string(),
            )
        } else {
            let now = Local::now();
            (
                now.format("%Y-%m-%d").to_string(),
                now.format("%H:%M:%S").to_string(),
            )
        };

        let (abs, rel) = self.target_file(project, "sessions", &format!("{}.md", date))?;

        let (new_content, action) = if abs.is_file() {
            let existing = std::fs::read_to_string(&abs)?;
            (
                format!("{}\n\n---\n**{}**\n\n{}\n", existing, time, content),
                WriteAction::Appended,
            )
        } else {
            (
                format!("# Session Log - {}\n\n{}\n", date, content),
                WriteAction::Created,
            )
        };

        self.write_atomic(&abs, &new_content, true)?;
        tracing::info!(path = rel, ?action, "logged session");

        self.indexer.refresh_file(&abs).await?;
        self.fire(
            "session.logged",
            Some(project),
            serde_json::json!({ "date": date, "path": rel, "action": action }),
        )
        .await;

        Ok(SessionWrite {
            action,
            date,
            path: rel,
        })
    }

    /// Full index rebuild from the workspace.
    pub async fn reindex(&self) -> Result<ReindexReport> {
        self.ensure_writable()?;
        let document_count = self.indexer.reindex().await?;

        self.fire(
            "index.reindexed",
            None,
            serde_json::json!({ "document_count": document_count }),
        )
        .await;

        Ok(ReindexReport { document_count })
    }

    /// Create a project directory with the standard folder set and a seed
    /// `status.md`.
    pub async fn init_project(&self, project: &str) -> Result<InitializedProject> {
        self.ensure_writable()?;
        let project_dir = self.project_dir(project)?;

        if project_dir.exists() {
            return Err(Error::AlreadyExists(format!(
                "project already exists: {}",
                project
            )));
        }

        for folder in PROJECT_FOLDERS {
            std::fs::create_dir_all(project_dir.join(folder))?;
        }

        let status_path = project_dir.join("status.md");
        let status_content = format!("# {}\n\nStatus: setup\n", project);
        self.write_atomic(&status_path, &status_content, false)?;
        tracing::info!(project, "initialized project");

        self.indexer.refresh_file(&status_path).await?;

        let folders: Vec<String> = PROJECT_FOLDERS.iter().map(|f| f.to_string()).collect();
        self.fire(
            "project.initialized",
            Some(project),
            serde_json::json!({ "project": project, "path": project, "folders": folders }),
        )
        .await;

        Ok(InitializedProject {
            project: project.to_string(),
            path: project.to_string(),
            folders,
        })
    }

    // ---- helpers ----

    fn ensure_writable(&self) -> Result<()> {
        if self.config.read_only {
            return Err(Error::PermissionDenied(
                "server is in read-only mode".to_string(),
            ));
        }
        Ok(())
    }

    /// Create the workspace root on demand and return its resolved path.
    fn ensure_root(&self) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.config.root)?;
        self.config.root.canonicalize().map_err(|e| {
            Error::InvalidPath(format!(
                "cannot resolve root {}: {}",
                self.config.root.display(),
                e
            ))
        })
    }

    fn project_dir(&self, project: &str) -> Result<PathBuf> {
        paths::validate_project_name(project)?;
        let root = self.ensure_root()?;
        paths::resolve_under_root(&self.config.root, &root.join(project))
    }

    fn target_file(&self, project: &str, folder: &str, filename: &str) -> Result<(PathBuf, String)> {
        paths::validate_folder(folder)?;
        paths::validate_filename(filename)?;
        let filename = paths::ensure_md(filename);

        let project_dir = self.project_dir(project)?;
        let candidate = if folder.is_empty() {
            project_dir.join(&filename)
        } else {
            project_dir.join(folder).join(&filename)
        };

        let abs = paths::resolve_under_root(&self.config.root, &candidate)?;
        let rel = paths::relative_to_root(&self.ensure_root()?, &abs)?;
        Ok((abs, rel))
    }

    /// Write to a sibling temporary file, then rename into place. With
    /// `overwrite` off, a target that appears between the existence check
    /// and the rename is a [`Error::Conflict`].
    fn write_atomic(&self, path: &Path, content: &str, overwrite: bool) -> Result<()> {
        let parent = path
            .parent()
            .ok_or_else(|| Error::InvalidPath(format!("no parent: {}", path.display())))?;
        std::fs::create_dir_all(parent)?;

        let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
        tmp.write_all(content.as_bytes())?;
        tmp.flush()?;

        if overwrite {
            tmp.persist(path).map_err(|e| Error::from(e.error))?;
        } else {
            tmp.persist_noclobber(path).map_err(|e| {
                if path.exists() {
                    Error::Conflict(format!("file appeared during create: {}", path.display()))
                } else {
                    Error::from(e.error)
                }
            })?;
        }
        Ok(())
    }

    async fn fire(&self, event_type: &str, project: Option<&str>, data: serde_json::Value) {
        if let Some(dispatcher) = &self.dispatcher {
            dispatcher.fire_event(event_type, project, data).await;
        }
    }
}

/// Scan `tasks/` for `NNN-*.md` filenames and return max + 1.
fn next_task_number(project_dir: &Path) -> Result<i64> {
    let tasks_dir = project_dir.join("tasks");
    if !tasks_dir.is_dir() {
        return Ok(1);
    }

    let mut max = 0i64;
    for entry in std::fs::read_dir(&tasks_dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if let Some(caps) = task_number_re().captures(&name) {
            if let Ok(n) = caps[1].parse::<i64>() {
                max = max.max(n);
            }
        }
    }
    Ok(max + 1)
}

/// Lowercase the title, collapse runs of non-alphanumerics into single
/// hyphens, and strip hyphens from both ends.
fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut last_hyphen = false;
    for ch in title.to_lowercase().chars() {
        if ch.is_alphanumeric() {
            slug.push(ch);
            last_hyphen = false;
        } else if !last_hyphen {
            slug.push('-');
            last_hyphen = true;
        }
    }
    slug.trim_matches('-').to_string()
}

fn render_task(title: &str, objective: &str, steps: &[String], feature: Option<&str>) -> String {
    let mut lines: Vec<String> = Vec::new();

    if let Some(feature) = feature {
        lines.extend([
            "---".to_string(),
            "type: task".to_string(),
            "status: pending".to_string(),
            format!("feature: {}", feature),
            "---".to_string(),
            String::new(),
        ]);
    }

    lines.push(format!("# Task: {}", title));
    lines.push(String::new());

    // Frontmatter already carries the status; avoid stating it twice.
    if feature.is_none() {
        lines.push("Status: pending".to_string());
        lines.push(String::new());
    }

    lines.push("## Objective".to_string());
    lines.push(objective.to_string());
    lines.push(String::new());

    if !steps.is_empty() {
        lines.push("## Steps".to_string());
        for (i, step) in steps.iter().enumerate() {
            lines.push(format!("{}. [ ] {}", i + 1, step));
        }
        lines.push(String::new());
    }

    lines.join("\n")
}

/// Replace the first `Status:` line, or insert one after the title line.
/// Returns the new content and the previous status when one was present.
fn rewrite_status(content: &str, new_status: &str) -> (String, Option<String>) {
    if let Some(caps) = status_rewrite_re().captures(content) {
        let previous = caps[1].to_string();
        let updated = status_rewrite_re()
            .replace(content, format!("Status: {}", new_status))
            .into_owned();
        return (updated, Some(previous));
    }

    let mut lines: Vec<&str> = content.lines().collect();
    let status_line = format!("Status: {}", new_status);
    match lines.iter().position(|l| l.starts_with('#')) {
        Some(i) => {
            lines.insert(i + 1, "");
            lines.insert(i + 2, &status_line);
        }
        None => {
            lines.insert(0, &status_line);
            lines.insert(1, "");
        }
    }
    let mut updated = lines.join("\n");
    if content.ends_with('\n') && !updated.ends_with('\n') {
        updated.push('\n');
    }
    (updated, None)
}
