//! Indexer orchestration: walk → parse → chunk → store.
//!
//! The workspace is always the source of truth. A full rebuild replaces the
//! entire index inside one transaction; a single-file refresh re-indexes (or
//! deletes) exactly one document after a write.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::paths;
use crate::store::{IndexStore, ParsedDocument};
use crate::{chunker, parser, walker};

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SyncStats {
    pub added: u64,
    pub updated: u64,
    pub deleted: u64,
}

pub struct Indexer {
    root: PathBuf,
    store: Arc<IndexStore>,
}

impl Indexer {
    pub fn new(root: impl Into<PathBuf>, store: Arc<IndexStore>) -> Indexer {
        Indexer {
            root: root.into(),
            store,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Rebuild the whole index from the workspace. The previous contents are
    /// dropped and every discovered file re-indexed in a single transaction;
    /// partial failure rolls back to the old index.
    pub async fn reindex(&self) -> Result<u64> {
        tracing::info!(root = %self.root.display(), "starting full reindex");

        let mut docs = Vec::new();
        for info in walker::walk_root(&self.root)? {
            match self.parse_file(info) {
                Ok(doc) => docs.push(doc),
                Err(e) => tracing::warn!(error = %e, "skipping file during reindex"),
            }
        }

        let count = self.store.rebuild(&self.root, &docs).await?;
        tracing::info!(documents = count, "reindex complete");
        Ok(count)
    }

    /// Re-index one file by absolute path, which must resolve under the
    /// workspace root. A path that no longer exists deletes the document row
    /// instead.
    pub async fn refresh_file(&self, path: &Path) -> Result<()> {
        let resolved = paths::resolve_under_root(&self.root, path)?;
        let resolved_root = self.root.canonicalize().map_err(|e| {
            Error::InvalidPath(format!("cannot resolve root {}: {}", self.root.display(), e))
        })?;
        let relative = paths::relative_to_root(&resolved_root, &resolved)?;

        if !resolved.exists() {
            self.store.delete_document(&relative).await?;
            tracing::debug!(path = relative, "removed deleted file from index");
            return Ok(());
        }

        let info = walker::file_info(&resolved_root, &resolved)?.ok_or_else(|| {
            Error::InvalidPath(format!("not a project file: {}", relative))
        })?;
        let expected_hash = info.content_hash.clone();
        let doc = self.parse_file(info)?;
        self.store.upsert_file(&self.root, &doc).await?;

        // A hash that still disagrees after the refresh means the store is
        // not reflecting its own writes; a reindex will not repair that.
        match self.store.document_sync_state(&relative).await? {
            Some((_, stored_hash)) if stored_hash == expected_hash => {}
            other => {
                return Err(Error::Corrupt(format!(
                    "index disagrees with {} after refresh (stored: {:?})",
                    relative,
                    other.map(|(_, h)| h)
                )))
            }
        }

        tracing::debug!(path = relative, "refreshed file");
        Ok(())
    }

    /// Reconcile the index with out-of-band filesystem changes. Compares
    /// mtime first and recomputes hashes only for files whose mtime moved.
    pub async fn sync(&self) -> Result<SyncStats> {
        let mut stats = SyncStats::default();
        let mut seen: Vec<String> = Vec::new();

        for info in walker::walk_root(&self.root)? {
            seen.push(info.relative_path.clone());

            match self.store.document_sync_state(&info.relative_path).await? {
                None => {
                    let doc = self.parse_file(info)?;
                    self.store.upsert_file(&self.root, &doc).await?;
                    stats.added += 1;
                }
                Some((mtime, hash)) if mtime != info.mtime => {
                    if hash != info.content_hash {
                        let doc = self.parse_file(info)?;
                        self.store.upsert_file(&self.root, &doc).await?;
                        stats.updated += 1;
                    } else {
                        self.store
                            .touch_mtime(&info.relative_path, info.mtime)
                            .await?;
                    }
                }
                Some(_) => {}
            }
        }

        for path in self.store.indexed_paths().await? {
            if !seen.contains(&path) {
                self.store.delete_document(&path).await?;
                stats.deleted += 1;
            }
        }

        if stats != SyncStats::default() {
            tracing::info!(
                added = stats.added,
                updated = stats.updated,
                deleted = stats.deleted,
                "sync complete"
            );
        }
        Ok(stats)
    }

    /// Startup check: a store with zero projects triggers a full rebuild
    /// before the server starts answering.
    pub async fn ensure_indexed(&self) -> Result<()> {
        if self.store.project_count().await? == 0 {
            self.reindex().await?;
        }
        Ok(())
    }

    fn parse_file(&self, info: walker::FileInfo) -> Result<ParsedDocument> {
        let bytes = std::fs::read(&info.path)?;
        let text = String::from_utf8_lossy(&bytes);
        let (frontmatter, body, _) = parser::parse_document(&text, &info.relative_path);
        let chunks = chunker::chunk_body(&body);
        Ok(ParsedDocument {
            info,
            frontmatter,
            chunks,
        })
    }
}

/// Periodic background sync, started by `serve` when an interval is
/// configured. The task runs until aborted; errors are logged and the loop
/// continues.
pub fn spawn_sync_loop(indexer: Arc<Indexer>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!(interval_secs = interval.as_secs(), "background sync started");
        loop {
            tokio::time::sleep(interval).await;
            if let Err(e) = indexer.sync().await {
                tracing::error!(error = %e, "background sync failed");
            }
        }
    })
}
