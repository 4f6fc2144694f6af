//! The index store.
//!
//! A single-file SQLite database mirroring the workspace: projects own
//! documents, documents own chunks, and every chunk has a full-text entry.
//! The store is never the source of truth; it is rebuilt from the filesystem
//! on demand.
//!
//! Reads go straight to the pool and run in parallel. Every mutation takes
//! the writer lock for the duration of exactly one transaction, so the
//! chunk/FTS mirror can never be observed half-updated.

use sqlx::{Row, SqlitePool};
use std::path::Path;
use tokio::sync::Mutex;

use crate::chunker::Chunk;
use crate::db;
use crate::error::{Error, Result};
use crate::migrate;
use crate::parser::Frontmatter;
use crate::walker::FileInfo;

/// A fully parsed workspace file, ready to be written to the index.
#[derive(Debug, Clone)]
pub struct ParsedDocument {
    pub info: FileInfo,
    pub frontmatter: Frontmatter,
    pub chunks: Vec<Chunk>,
}

#[derive(Debug, Clone)]
pub struct ProjectRow {
    pub id: i64,
    pub name: String,
    pub path: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct DocumentRow {
    pub id: i64,
    pub project_id: i64,
    pub project: String,
    pub path: String,
    pub folder: String,
    pub filename: String,
    pub doc_type: Option<String>,
    pub status: Option<String>,
    pub owner: Option<String>,
    pub tags: Vec<String>,
    pub feature: Option<String>,
    pub content_hash: String,
    pub mtime: i64,
    pub updated: Option<String>,
    pub indexed_at: String,
}

#[derive(Debug, Clone)]
pub struct ChunkRow {
    pub id: i64,
    pub document_id: i64,
    pub heading: Option<String>,
    pub heading_level: i64,
    pub content: String,
    pub chunk_order: i64,
    pub char_offset: i64,
    pub is_priority_heading: bool,
}

/// Filters for [`IndexStore::list_documents`]. All fields are conjunctive.
#[derive(Debug, Clone, Default)]
pub struct DocumentFilter {
    pub project: Option<String>,
    pub folder: Option<String>,
    pub doc_type: Option<String>,
    pub status: Option<String>,
    pub feature: Option<String>,
}

/// Per-folder file counts and task-status breakdown for one project.
#[derive(Debug, Clone)]
pub struct ProjectDetail {
    pub project: ProjectRow,
    pub folder_counts: Vec<(String, i64)>,
    pub task_statuses: Vec<(String, i64)>,
}

/// Aggregates for the projects-list resource.
#[derive(Debug, Clone)]
pub struct ProjectSummary {
    pub name: String,
    pub path: String,
    /// Max of document `updated` / mtime dates, `YYYY-MM-DD`.
    pub last_updated: Option<String>,
    /// Tasks with status `pending` or `in-progress`.
    pub open_tasks: i64,
    /// mtime of the newest file in `sessions/`, seconds.
    pub last_session_mtime: Option<i64>,
    pub folder_counts: Vec<(String, i64)>,
}

#[derive(Debug, Clone)]
pub struct SubscriptionRow {
    pub id: i64,
    pub url: String,
    pub secret: String,
    pub event_types: Vec<String>,
    pub project: Option<String>,
    pub active: bool,
    pub description: Option<String>,
    pub created_at: String,
}

/// One webhook delivery outcome, appended to `webhook_logs`.
#[derive(Debug, Clone)]
pub struct DeliveryAttempt {
    pub subscription_id: i64,
    pub event_type: String,
    pub event_id: String,
    pub payload: String,
    pub status_code: Option<i64>,
    pub success: bool,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DeliveryLogRow {
    pub id: i64,
    pub subscription_id: i64,
    pub event_type: String,
    pub event_id: String,
    pub payload: String,
    pub status_code: Option<i64>,
    pub success: bool,
    pub error_message: Option<String>,
    pub created_at: String,
}

pub struct IndexStore {
    pool: SqlitePool,
    writer: Mutex<()>,
}

impl IndexStore {
    /// Open (and migrate) the index database at `db_path`.
    pub async fn open(db_path: &Path) -> Result<IndexStore> {
        let pool = db::connect(db_path).await?;
        migrate::run_migrations(&pool).await?;
        Ok(IndexStore {
            pool,
            writer: Mutex::new(()),
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ---- projects ----

    pub async fn list_projects(&self) -> Result<Vec<ProjectRow>> {
        let rows = sqlx::query("SELECT id, name, path, created_at, updated_at FROM projects ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_project).collect())
    }

    pub async fn get_project(&self, name: &str) -> Result<Option<ProjectRow>> {
        let row =
            sqlx::query("SELECT id, name, path, created_at, updated_at FROM projects WHERE name = ?")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.as_ref().map(row_to_project))
    }

    pub async fn project_count(&self) -> Result<i64> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM projects")
            .fetch_one(&self.pool)
            .await?)
    }

    pub async fn document_count(&self) -> Result<i64> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await?)
    }

    pub async fn project_detail(&self, name: &str) -> Result<Option<ProjectDetail>> {
        let Some(project) = self.get_project(name).await? else {
            return Ok(None);
        };

        let folder_counts = sqlx::query(
            "SELECT folder, COUNT(*) AS n FROM documents WHERE project_id = ? GROUP BY folder ORDER BY folder",
        )
        .bind(project.id)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(|row| (row.get::<String, _>("folder"), row.get::<i64, _>("n")))
        .collect();

        let task_statuses = sqlx::query(
            r#"
            SELECT COALESCE(status, 'unknown') AS status, COUNT(*) AS n
            FROM documents
            WHERE project_id = ? AND folder = 'tasks'
            GROUP BY COALESCE(status, 'unknown')
            ORDER BY status
            "#,
        )
        .bind(project.id)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(|row| (row.get::<String, _>("status"), row.get::<i64, _>("n")))
        .collect();

        Ok(Some(ProjectDetail {
            project,
            folder_counts,
            task_statuses,
        }))
    }

    pub async fn project_summaries(&self) -> Result<Vec<ProjectSummary>> {
        let mut summaries = Vec::new();

        for project in self.list_projects().await? {
            let last_updated: Option<String> = sqlx::query_scalar(
                "SELECT MAX(COALESCE(updated, date(mtime, 'unixepoch'))) FROM documents WHERE project_id = ?",
            )
            .bind(project.id)
            .fetch_one(&self.pool)
            .await?;

            let open_tasks: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM documents WHERE project_id = ? AND folder = 'tasks' AND status IN ('pending', 'in-progress')",
            )
            .bind(project.id)
            .fetch_one(&self.pool)
            .await?;

            let last_session_mtime: Option<i64> = sqlx::query_scalar(
                "SELECT MAX(mtime) FROM documents WHERE project_id = ? AND folder = 'sessions'",
            )
            .bind(project.id)
            .fetch_one(&self.pool)
            .await?;

            let folder_counts = sqlx::query(
                "SELECT folder, COUNT(*) AS n FROM documents WHERE project_id = ? GROUP BY folder ORDER BY folder",
            )
            .bind(project.id)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(|row| (row.get::<String, _>("folder"), row.get::<i64, _>("n")))
            .collect();

            summaries.push(ProjectSummary {
                name: project.name,
                path: project.path,
                last_updated,
                open_tasks,
                last_session_mtime,
                folder_counts,
            });
        }

        Ok(summaries)
    }

    // ---- documents ----

    pub async fn get_document(&self, path: &str) -> Result<Option<DocumentRow>> {
        let row = sqlx::query(
            "SELECT d.*, p.name AS project_name FROM documents d JOIN projects p ON d.project_id = p.id WHERE d.path = ?",
        )
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(row_to_document))
    }

    /// `(mtime, content_hash)` for change detection, or `None` when the path
    /// is not indexed.
    pub async fn document_sync_state(&self, path: &str) -> Result<Option<(i64, String)>> {
        let row = sqlx::query("SELECT mtime, content_hash FROM documents WHERE path = ?")
            .bind(path)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| (r.get("mtime"), r.get("content_hash"))))
    }

    pub async fn list_documents(&self, filter: &DocumentFilter) -> Result<Vec<DocumentRow>> {
        let mut sql = String::from(
            "SELECT d.*, p.name AS project_name FROM documents d JOIN projects p ON d.project_id = p.id WHERE 1=1",
        );
        let mut binds: Vec<&str> = Vec::new();

        if let Some(project) = &filter.project {
            sql.push_str(" AND p.name = ?");
            binds.push(project);
        }
        if let Some(folder) = &filter.folder {
            sql.push_str(" AND d.folder = ?");
            binds.push(folder);
        }
        if let Some(doc_type) = &filter.doc_type {
            sql.push_str(" AND d.type = ?");
            binds.push(doc_type);
        }
        if let Some(status) = &filter.status {
            sql.push_str(" AND d.status = ?");
            binds.push(status);
        }
        if let Some(feature) = &filter.feature {
            sql.push_str(" AND d.feature = ?");
            binds.push(feature);
        }
        sql.push_str(" ORDER BY d.path");

        let mut query = sqlx::query(&sql);
        for bind in binds {
            query = query.bind(bind);
        }
        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.iter().map(row_to_document).collect())
    }

    pub async fn indexed_paths(&self) -> Result<Vec<String>> {
        let rows = sqlx::query_scalar("SELECT path FROM documents ORDER BY path")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    pub async fn get_chunks(&self, document_id: i64) -> Result<Vec<ChunkRow>> {
        let rows = sqlx::query("SELECT * FROM chunks WHERE document_id = ? ORDER BY chunk_order")
            .bind(document_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|row| ChunkRow {
                id: row.get("id"),
                document_id: row.get("document_id"),
                heading: row.get("heading"),
                heading_level: row.get("heading_level"),
                content: row.get("content"),
                chunk_order: row.get("chunk_order"),
                char_offset: row.get("char_offset"),
                is_priority_heading: row.get::<i64, _>("is_priority_heading") != 0,
            })
            .collect())
    }

    /// Count of full-text entries for one document, used by consistency
    /// checks and tests.
    pub async fn fts_entry_count(&self, document_id: i64) -> Result<i64> {
        Ok(
            sqlx::query_scalar("SELECT COUNT(*) FROM chunks_fts WHERE document_id = ?")
                .bind(document_id)
                .fetch_one(&self.pool)
                .await?,
        )
    }

    // ---- mutations ----

    /// Replace the entire index with `files` in one transaction. Partial
    /// failure rolls everything back, leaving the previous index intact.
    pub async fn rebuild(&self, root: &Path, files: &[ParsedDocument]) -> Result<u64> {
        let _guard = self.writer.lock().await;
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM chunks_fts").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM chunks").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM documents").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM projects").execute(&mut *tx).await?;

        let mut count = 0u64;
        for doc in files {
            let project_path = root.join(&doc.info.project);
            let project_id =
                upsert_project_tx(&mut tx, &doc.info.project, &project_path.to_string_lossy())
                    .await?;
            upsert_document_tx(&mut tx, project_id, doc).await?;
            count += 1;
        }

        tx.commit().await?;
        Ok(count)
    }

    /// Upsert a single parsed file: document row, chunks, and full-text
    /// entries are replaced atomically.
    pub async fn upsert_file(&self, root: &Path, doc: &ParsedDocument) -> Result<i64> {
        let _guard = self.writer.lock().await;
        let mut tx = self.pool.begin().await?;

        let project_path = root.join(&doc.info.project);
        let project_id =
            upsert_project_tx(&mut tx, &doc.info.project, &project_path.to_string_lossy()).await?;
        let document_id = upsert_document_tx(&mut tx, project_id, doc).await?;

        tx.commit().await?;
        Ok(document_id)
    }

    /// Delete a document by workspace-relative path, cascading to chunks and
    /// full-text entries. Returns whether a row existed.
    pub async fn delete_document(&self, path: &str) -> Result<bool> {
        let _guard = self.writer.lock().await;
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "DELETE FROM chunks_fts WHERE document_id IN (SELECT id FROM documents WHERE path = ?)",
        )
        .bind(path)
        .execute(&mut *tx)
        .await?;

        let result = sqlx::query("DELETE FROM documents WHERE path = ?")
            .bind(path)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    /// Fast-path mtime update when content is unchanged.
    pub async fn touch_mtime(&self, path: &str, mtime: i64) -> Result<()> {
        let _guard = self.writer.lock().await;
        sqlx::query("UPDATE documents SET mtime = ? WHERE path = ?")
            .bind(mtime)
            .bind(path)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ---- webhook subscriptions ----

    pub async fn create_subscription(
        &self,
        url: &str,
        secret: &str,
        event_types: &[String],
        project: Option<&str>,
        description: Option<&str>,
    ) -> Result<i64> {
        let _guard = self.writer.lock().await;
        let event_types_json = serde_json::to_string(event_types)
            .map_err(|e| Error::InvalidArgument(e.to_string()))?;
        let result = sqlx::query(
            "INSERT INTO webhook_subscriptions (url, secret, event_types, project, description) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(url)
        .bind(secret)
        .bind(event_types_json)
        .bind(project)
        .bind(description)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn delete_subscription(&self, id: i64) -> Result<bool> {
        let _guard = self.writer.lock().await;
        let result = sqlx::query("DELETE FROM webhook_subscriptions WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// All active subscriptions, optionally narrowed to those that would
    /// match events from `project` (its own plus all-project subscriptions).
    pub async fn list_subscriptions(&self, project: Option<&str>) -> Result<Vec<SubscriptionRow>> {
        let rows = match project {
            Some(p) => {
                sqlx::query("SELECT * FROM webhook_subscriptions WHERE active = 1 AND (project IS NULL OR project = ?) ORDER BY id")
                    .bind(p)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("SELECT * FROM webhook_subscriptions WHERE active = 1 ORDER BY id")
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        Ok(rows.iter().map(row_to_subscription).collect())
    }

    /// Active subscriptions matching one event: the subscription lists the
    /// event type (or `*`), and is either unscoped or scoped to the event's
    /// project. A project-less event matches only unscoped subscriptions.
    pub async fn subscriptions_for_event(
        &self,
        event_type: &str,
        project: Option<&str>,
    ) -> Result<Vec<SubscriptionRow>> {
        let subs = self.list_subscriptions(project).await?;
        Ok(subs
            .into_iter()
            .filter(|sub| sub.project.is_none() || sub.project.as_deref() == project)
            .filter(|sub| {
                sub.event_types.iter().any(|t| t == event_type || t == "*")
            })
            .collect())
    }

    /// Number of active subscriptions scoped to `project`, or unscoped ones
    /// when `project` is `None`. Used to enforce registration caps.
    pub async fn count_subscriptions(&self, project: Option<&str>) -> Result<i64> {
        let count = match project {
            Some(p) => {
                sqlx::query_scalar("SELECT COUNT(*) FROM webhook_subscriptions WHERE active = 1 AND project = ?")
                    .bind(p)
                    .fetch_one(&self.pool)
                    .await?
            }
            None => {
                sqlx::query_scalar("SELECT COUNT(*) FROM webhook_subscriptions WHERE active = 1 AND project IS NULL")
                    .fetch_one(&self.pool)
                    .await?
            }
        };
        Ok(count)
    }

    pub async fn log_delivery(&self, attempt: &DeliveryAttempt) -> Result<()> {
        let _guard = self.writer.lock().await;
        sqlx::query(
            r#"
            INSERT INTO webhook_logs
                (subscription_id, event_type, event_id, payload, status_code, success, error_message)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(attempt.subscription_id)
        .bind(&attempt.event_type)
        .bind(&attempt.event_id)
        .bind(&attempt.payload)
        .bind(attempt.status_code)
        .bind(attempt.success as i64)
        .bind(&attempt.error_message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delivery_logs(&self, subscription_id: i64) -> Result<Vec<DeliveryLogRow>> {
        let rows = sqlx::query("SELECT * FROM webhook_logs WHERE subscription_id = ? ORDER BY id")
            .bind(subscription_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|row| DeliveryLogRow {
                id: row.get("id"),
                subscription_id: row.get("subscription_id"),
                event_type: row.get("event_type"),
                event_id: row.get("event_id"),
                payload: row.get("payload"),
                status_code: row.get("status_code"),
                success: row.get::<i64, _>("success") != 0,
                error_message: row.get("error_message"),
                created_at: row.get("created_at"),
            })
            .collect())
    }
}

// ---- transaction helpers ----

async fn upsert_project_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    name: &str,
    path: &str,
) -> Result<i64> {
    let existing: Option<i64> = sqlx::query_scalar("SELECT id FROM projects WHERE name = ?")
        .bind(name)
        .fetch_optional(&mut **tx)
        .await?;

    match existing {
        Some(id) => {
            sqlx::query("UPDATE projects SET path = ?, updated_at = datetime('now') WHERE id = ?")
                .bind(path)
                .bind(id)
                .execute(&mut **tx)
                .await?;
            Ok(id)
        }
        None => {
            let result = sqlx::query("INSERT INTO projects (name, path) VALUES (?, ?)")
                .bind(name)
                .bind(path)
                .execute(&mut **tx)
                .await?;
            Ok(result.last_insert_rowid())
        }
    }
}

async fn upsert_document_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    project_id: i64,
    doc: &ParsedDocument,
) -> Result<i64> {
    let tags_json = serde_json::to_string(&doc.frontmatter.tags)
        .map_err(|e| Error::InvalidArgument(e.to_string()))?;

    sqlx::query(
        r#"
        INSERT INTO documents
            (project_id, path, folder, filename, type, status, owner, tags, feature, content_hash, mtime, updated)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(path) DO UPDATE SET
            project_id = excluded.project_id,
            folder = excluded.folder,
            filename = excluded.filename,
            type = excluded.type,
            status = excluded.status,
            owner = excluded.owner,
            tags = excluded.tags,
            feature = excluded.feature,
            content_hash = excluded.content_hash,
            mtime = excluded.mtime,
            updated = excluded.updated,
            indexed_at = datetime('now')
        "#,
    )
    .bind(project_id)
    .bind(&doc.info.relative_path)
    .bind(&doc.info.folder)
    .bind(&doc.info.filename)
    .bind(&doc.frontmatter.doc_type)
    .bind(&doc.frontmatter.status)
    .bind(&doc.frontmatter.owner)
    .bind(tags_json)
    .bind(&doc.frontmatter.feature)
    .bind(&doc.info.content_hash)
    .bind(doc.info.mtime)
    .bind(&doc.frontmatter.updated)
    .execute(&mut **tx)
    .await?;

    let document_id: i64 = sqlx::query_scalar("SELECT id FROM documents WHERE path = ?")
        .bind(&doc.info.relative_path)
        .fetch_one(&mut **tx)
        .await?;

    sqlx::query("DELETE FROM chunks_fts WHERE document_id = ?")
        .bind(document_id)
        .execute(&mut **tx)
        .await?;
    sqlx::query("DELETE FROM chunks WHERE document_id = ?")
        .bind(document_id)
        .execute(&mut **tx)
        .await?;

    for chunk in &doc.chunks {
        let result = sqlx::query(
            r#"
            INSERT INTO chunks
                (document_id, heading, heading_level, content, chunk_order, char_offset, is_priority_heading)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(document_id)
        .bind(&chunk.heading)
        .bind(chunk.heading_level)
        .bind(&chunk.content)
        .bind(chunk.chunk_order)
        .bind(chunk.char_offset)
        .bind(chunk.is_priority_heading as i64)
        .execute(&mut **tx)
        .await?;

        sqlx::query(
            "INSERT INTO chunks_fts (chunk_id, document_id, content, heading) VALUES (?, ?, ?, ?)",
        )
        .bind(result.last_insert_rowid())
        .bind(document_id)
        .bind(&chunk.content)
        .bind(&chunk.heading)
        .execute(&mut **tx)
        .await?;
    }

    Ok(document_id)
}

// ---- row mapping ----

fn row_to_project(row: &sqlx::sqlite::SqliteRow) -> ProjectRow {
    ProjectRow {
        id: row.get("id"),
        name: row.get("name"),
        path: row.get("path"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn row_to_document(row: &sqlx::sqlite::SqliteRow) -> DocumentRow {
    let tags_json: String = row.get("tags");
    DocumentRow {
        id: row.get("id"),
        project_id: row.get("project_id"),
        project: row.get("project_name"),
        path: row.get("path"),
        folder: row.get("folder"),
        filename: row.get("filename"),
        doc_type: row.get("type"),
        status: row.get("status"),
        owner: row.get("owner"),
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
        feature: row.get("feature"),
        content_hash: row.get("content_hash"),
        mtime: row.get("mtime"),
        updated: row.get("updated"),
        indexed_at: row.get("indexed_at"),
    }
}

fn row_to_subscription(row: &sqlx::sqlite::SqliteRow) -> SubscriptionRow {
    let event_types_json: String = row.get("event_types");
    SubscriptionRow {
        id: row.get("id"),
        url: row.get("url"),
        secret: row.get("secret"),
        event_types: serde_json::from_str(&event_types_json).unwrap_or_default(),
        project: row.get("project"),
        active: row.get::<i64, _>("active") != 0,
        description: row.get("description"),
        created_at: row.get("created_at"),
    }
}
