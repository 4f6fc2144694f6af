//! Index schema.
//!
//! The index is disposable: any corruption is repaired by a full reindex
//! from the workspace. All statements are idempotent so opening the store
//! repeatedly is safe.
//!
//! # Tables
//!
//! | Table | Purpose |
//! |-------|---------|
//! | `projects` | One row per workspace project directory |
//! | `documents` | Markdown file metadata and frontmatter fields |
//! | `chunks` | Heading-labeled document slices |
//! | `chunks_fts` | FTS5 full-text mirror of chunk content and heading |
//! | `webhook_subscriptions` | Registered outgoing webhook endpoints |
//! | `webhook_logs` | One row per delivery attempt |
//! | `meta` | Schema version bookkeeping |

use sqlx::SqlitePool;

use crate::error::Result;

pub const SCHEMA_VERSION: &str = "1.0";

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS projects (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            name        TEXT NOT NULL UNIQUE,
            path        TEXT NOT NULL UNIQUE,
            created_at  TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at  TEXT NOT NULL DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            project_id   INTEGER NOT NULL,
            path         TEXT NOT NULL UNIQUE,
            folder       TEXT NOT NULL,
            filename     TEXT NOT NULL,
            type         TEXT,
            status       TEXT,
            owner        TEXT,
            tags         TEXT NOT NULL DEFAULT '[]',
            feature      TEXT,
            content_hash TEXT NOT NULL,
            mtime        INTEGER NOT NULL,
            updated      TEXT,
            indexed_at   TEXT NOT NULL DEFAULT (datetime('now')),
            FOREIGN KEY (project_id) REFERENCES projects(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id                  INTEGER PRIMARY KEY AUTOINCREMENT,
            document_id         INTEGER NOT NULL,
            heading             TEXT,
            heading_level       INTEGER NOT NULL DEFAULT 0,
            content             TEXT NOT NULL,
            chunk_order         INTEGER NOT NULL,
            char_offset         INTEGER NOT NULL,
            is_priority_heading INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    // FTS5 virtual tables cannot use IF NOT EXISTS on older SQLite builds,
    // so probe sqlite_master first.
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='chunks_fts'",
    )
    .fetch_one(pool)
    .await?;

    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE chunks_fts USING fts5(
                chunk_id UNINDEXED,
                document_id UNINDEXED,
                content,
                heading
            )
            "#,
        )
        .execute(pool)
        .await?;
    }

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS webhook_subscriptions (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            url         TEXT NOT NULL,
            secret      TEXT NOT NULL,
            event_types TEXT NOT NULL,
            project     TEXT,
            active      INTEGER NOT NULL DEFAULT 1,
            description TEXT,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS webhook_logs (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            subscription_id INTEGER NOT NULL,
            event_type      TEXT NOT NULL,
            event_id        TEXT NOT NULL,
            payload         TEXT NOT NULL,
            status_code     INTEGER,
            success         INTEGER NOT NULL DEFAULT 0,
            error_message   TEXT,
            created_at      TEXT NOT NULL DEFAULT (datetime('now')),
            FOREIGN KEY (subscription_id) REFERENCES webhook_subscriptions(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS meta (
            key   TEXT PRIMARY KEY,
            value TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("INSERT OR REPLACE INTO meta (key, value) VALUES ('schema_version', ?)")
        .bind(SCHEMA_VERSION)
        .execute(pool)
        .await?;

    for statement in [
        "CREATE INDEX IF NOT EXISTS idx_documents_project ON documents(project_id)",
        "CREATE INDEX IF NOT EXISTS idx_documents_folder ON documents(folder)",
        "CREATE INDEX IF NOT EXISTS idx_documents_type ON documents(type)",
        "CREATE INDEX IF NOT EXISTS idx_documents_status ON documents(status)",
        "CREATE INDEX IF NOT EXISTS idx_documents_mtime ON documents(mtime DESC)",
        "CREATE INDEX IF NOT EXISTS idx_documents_project_folder ON documents(project_id, folder)",
        "CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(document_id)",
        "CREATE INDEX IF NOT EXISTS idx_chunks_document_order ON chunks(document_id, chunk_order)",
        "CREATE INDEX IF NOT EXISTS idx_webhook_subs_project ON webhook_subscriptions(project)",
        "CREATE INDEX IF NOT EXISTS idx_webhook_logs_subscription ON webhook_logs(subscription_id)",
    ] {
        sqlx::query(statement).execute(pool).await?;
    }

    Ok(())
}
