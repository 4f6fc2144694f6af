//! Path validation shared by every operation that composes a
//! `project/folder/filename` triple.
//!
//! The hard invariant: after full symlink resolution, any path the server
//! reads or writes must still lie under the resolved workspace root.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Reject project names containing separators or parent references.
pub fn validate_project_name(project: &str) -> Result<()> {
    if project.is_empty() {
        return Err(Error::InvalidPath("project name is empty".to_string()));
    }
    if project.contains('/') || project.contains('\\') || project.contains("..") {
        return Err(Error::InvalidPath(format!(
            "invalid project name: {}",
            project
        )));
    }
    Ok(())
}

/// Reject folder names containing separators or parent references. An empty
/// folder addresses project-root files like `status.md`.
pub fn validate_folder(folder: &str) -> Result<()> {
    if folder.contains('/') || folder.contains('\\') || folder.contains("..") {
        return Err(Error::InvalidPath(format!("invalid folder: {}", folder)));
    }
    Ok(())
}

/// Reject filenames containing separators or parent references.
pub fn validate_filename(filename: &str) -> Result<()> {
    if filename.is_empty() {
        return Err(Error::InvalidPath("filename is empty".to_string()));
    }
    if filename.contains('/') || filename.contains('\\') || filename.contains("..") {
        return Err(Error::InvalidPath(format!(
            "invalid filename: {}",
            filename
        )));
    }
    Ok(())
}

/// Append `.md` when the filename does not already carry it.
pub fn ensure_md(filename: &str) -> String {
    if filename.ends_with(".md") {
        filename.to_string()
    } else {
        format!("{}.md", filename)
    }
}

/// Resolve `candidate` and verify it lies under `root` after following
/// symlinks.
///
/// The candidate may not exist yet (writes create files); in that case the
/// nearest existing ancestor is resolved and the remaining components are
/// re-joined lexically. Those trailing components have already passed the
/// per-component checks above, so they cannot climb back out.
pub fn resolve_under_root(root: &Path, candidate: &Path) -> Result<PathBuf> {
    let resolved_root = root
        .canonicalize()
        .map_err(|e| Error::InvalidPath(format!("cannot resolve root {}: {}", root.display(), e)))?;

    let mut existing = candidate.to_path_buf();
    let mut pending: Vec<std::ffi::OsString> = Vec::new();
    while !existing.exists() {
        match existing.file_name() {
            Some(name) => {
                pending.push(name.to_os_string());
                existing.pop();
            }
            None => {
                return Err(Error::InvalidPath(format!(
                    "cannot resolve path: {}",
                    candidate.display()
                )))
            }
        }
    }

    let mut resolved = existing
        .canonicalize()
        .map_err(|e| Error::InvalidPath(format!("cannot resolve {}: {}", existing.display(), e)))?;
    for component in pending.into_iter().rev() {
        resolved.push(component);
    }

    if resolved != resolved_root && !resolved.starts_with(&resolved_root) {
        return Err(Error::InvalidPath(format!(
            "path outside workspace root: {}",
            candidate.display()
        )));
    }
    Ok(resolved)
}

/// The workspace-relative path of `absolute`, with `/` separators.
pub fn relative_to_root(root: &Path, absolute: &Path) -> Result<String> {
    let rel = absolute.strip_prefix(root).map_err(|_| {
        Error::InvalidPath(format!(
            "path outside workspace root: {}",
            absolute.display()
        ))
    })?;
    Ok(rel.to_string_lossy().replace('\\', "/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn rejects_traversal_components() {
        assert!(validate_project_name("..").is_err());
        assert!(validate_project_name("a/b").is_err());
        assert!(validate_project_name("a\\b").is_err());
        assert!(validate_project_name("demo").is_ok());
        assert!(validate_folder("../etc").is_err());
        assert!(validate_folder("tasks").is_ok());
        assert!(validate_folder("").is_ok());
        assert!(validate_filename("../passwd").is_err());
        assert!(validate_filename("notes.md").is_ok());
    }

    #[test]
    fn ensure_md_appends_suffix_once() {
        assert_eq!(ensure_md("notes"), "notes.md");
        assert_eq!(ensure_md("notes.md"), "notes.md");
    }

    #[test]
    fn resolve_allows_missing_leaf() {
        let tmp = TempDir::new().unwrap();
        let candidate = tmp.path().join("proj").join("tasks").join("001.md");
        let resolved = resolve_under_root(tmp.path(), &candidate).unwrap();
        assert!(resolved.ends_with("proj/tasks/001.md"));
    }

    #[test]
    fn resolve_rejects_symlink_escape() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("root");
        let outside = tmp.path().join("outside");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::create_dir_all(&outside).unwrap();
        std::os::unix::fs::symlink(&outside, root.join("escape")).unwrap();

        let candidate = root.join("escape").join("x.md");
        assert!(matches!(
            resolve_under_root(&root, &candidate),
            Err(Error::InvalidPath(_))
        ));
    }

    #[test]
    fn relative_path_uses_forward_slashes() {
        let tmp = TempDir::new().unwrap();
        let abs = tmp.path().join("demo").join("tasks").join("001.md");
        let rel = relative_to_root(tmp.path(), &abs).unwrap();
        assert_eq!(rel, "demo/tasks/001.md");
    }
}
