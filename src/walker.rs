//! Workspace traversal.
//!
//! Enumerates every `.md` file beneath the workspace root and derives the
//! `(project, folder, filename)` triple from its relative path. Components
//! beginning with `.` are skipped, which keeps the index database and VCS
//! metadata out of the index.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::{Error, Result};

/// A discovered workspace file, ready for parsing and indexing.
#[derive(Debug, Clone)]
pub struct FileInfo {
    /// Absolute path on disk.
    pub path: PathBuf,
    /// Path relative to the workspace root, `/`-separated.
    pub relative_path: String,
    /// First path component under the root.
    pub project: String,
    /// Second path component, or `""` for project-root files like `status.md`.
    pub folder: String,
    pub filename: String,
    /// Filesystem modification time, seconds since the epoch.
    pub mtime: i64,
    /// Hex SHA-256 of the raw file bytes.
    pub content_hash: String,
}

pub fn compute_hash(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

/// Enumerate `.md` files under `root` in deterministic order.
///
/// A missing root yields an empty listing; the root is only created by the
/// write path. An unreadable file is logged and skipped; directory-level
/// traversal errors propagate.
pub fn walk_root(root: &Path) -> Result<Vec<FileInfo>> {
    if !root.exists() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();

    for entry in WalkDir::new(root).into_iter().filter_entry(|e| {
        // Never descend into dot-directories; also drops dot-files.
        e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.')
    }) {
        let entry = entry.map_err(|e| Error::Transient(format!("walk failed: {}", e)))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("md") {
            continue;
        }

        match file_info(root, path) {
            Ok(Some(info)) => files.push(info),
            Ok(None) => continue,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping unreadable file");
                continue;
            }
        }
    }

    files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(files)
}

/// Build a [`FileInfo`] for a single file under `root`. Returns `Ok(None)`
/// for files directly at the root (no project component).
pub fn file_info(root: &Path, path: &Path) -> Result<Option<FileInfo>> {
    let relative = path
        .strip_prefix(root)
        .map_err(|_| Error::InvalidPath(format!("path outside root: {}", path.display())))?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect();

    if parts.len() < 2 {
        // Files at the workspace root belong to no project.
        return Ok(None);
    }

    let project = parts[0].clone();
    let folder = if parts.len() > 2 {
        parts[1].clone()
    } else {
        String::new()
    };
    let filename = parts.last().cloned().unwrap_or_default();

    let metadata = std::fs::metadata(path)?;
    let mtime = metadata
        .modified()
        .unwrap_or(std::time::SystemTime::UNIX_EPOCH)
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64;

    let content = std::fs::read(path)?;
    let content_hash = compute_hash(&content);

    Ok(Some(FileInfo {
        path: path.to_path_buf(),
        relative_path: relative.to_string_lossy().replace('\\', "/"),
        project,
        folder,
        filename,
        mtime,
        content_hash,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn walk_missing_root_is_empty() {
        let tmp = TempDir::new().unwrap();
        let files = walk_root(&tmp.path().join("nope")).unwrap();
        assert!(files.is_empty());
    }

    #[test]
    fn walk_derives_project_and_folder() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "demo/tasks/001-setup.md", "# Task");
        write(tmp.path(), "demo/status.md", "# Demo");
        write(tmp.path(), "other/plans/execution-plan.md", "# Plan");

        let files = walk_root(tmp.path()).unwrap();
        assert_eq!(files.len(), 3);

        let task = files
            .iter()
            .find(|f| f.filename == "001-setup.md")
            .unwrap();
        assert_eq!(task.project, "demo");
        assert_eq!(task.folder, "tasks");
        assert_eq!(task.relative_path, "demo/tasks/001-setup.md");

        let status = files.iter().find(|f| f.filename == "status.md").unwrap();
        assert_eq!(status.folder, "");
    }

    #[test]
    fn walk_skips_non_markdown_and_dot_components() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "demo/tasks/keep.md", "keep");
        write(tmp.path(), "demo/tasks/skip.txt", "skip");
        write(tmp.path(), "demo/.git/config.md", "skip");
        write(tmp.path(), ".hidden/tasks/skip.md", "skip");
        std::fs::write(tmp.path().join("index.db"), b"binary").unwrap();

        let files = walk_root(tmp.path()).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].filename, "keep.md");
    }

    #[test]
    fn hash_matches_content_bytes() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "demo/tasks/a.md", "hello");
        let files = walk_root(tmp.path()).unwrap();
        assert_eq!(files[0].content_hash, compute_hash(b"hello"));
    }

    #[test]
    fn walk_is_deterministically_sorted() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "b/tasks/z.md", "z");
        write(tmp.path(), "a/tasks/y.md", "y");
        write(tmp.path(), "a/plans/x.md", "x");

        let files = walk_root(tmp.path()).unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.relative_path.as_str()).collect();
        assert_eq!(paths, vec!["a/plans/x.md", "a/tasks/y.md", "b/tasks/z.md"]);
    }
}
