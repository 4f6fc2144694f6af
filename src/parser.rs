//! YAML frontmatter parsing with path-based inference.
//!
//! Frontmatter is recognized only when the file begins with a line that is
//! exactly `---`, closed by another such line. Anything else, including
//! leading blank lines or YAML that fails to parse, means the document has no
//! frontmatter; malformed YAML is logged as a warning, never an error.

use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Parsed document metadata. Absent fields fall back to path inference.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Frontmatter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub doc_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feature: Option<String>,
}

impl Frontmatter {
    /// Render as a `---`-delimited block suitable for prepending to a body.
    /// Re-parsing the result yields an equal `Frontmatter`.
    pub fn to_block(&self) -> String {
        let yaml = serde_yaml::to_string(self).unwrap_or_default();
        format!("---\n{}---\n", yaml)
    }
}

/// Folder name → singular document type.
const FOLDER_TYPES: &[(&str, &str)] = &[
    ("tasks", "task"),
    ("plans", "plan"),
    ("sessions", "session"),
    ("reports", "report"),
    ("changelog", "changelog"),
    ("references", "reference"),
    ("scratch", "scratch"),
    ("assets", "asset"),
];

/// How many non-blank body lines the task status scan inspects.
const STATUS_SCAN_LINES: usize = 10;

fn status_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^status:\s*(\w[\w-]*)\s*$").unwrap())
}

/// Split off the frontmatter block, if present.
///
/// Returns `(yaml_source, body, body_offset_in_text)`; `yaml_source` is
/// `None` when the text does not start with a frontmatter delimiter.
pub fn extract_frontmatter(text: &str) -> (Option<&str>, &str, usize) {
    let mut lines = text.split_inclusive('\n');
    let Some(first) = lines.next() else {
        return (None, text, 0);
    };
    if first.trim_end_matches(|c| c == '\n' || c == '\r') != "---" {
        return (None, text, 0);
    }

    let mut offset = first.len();
    let yaml_start = offset;
    for line in lines {
        if line.trim_end_matches(|c| c == '\n' || c == '\r') == "---" {
            let yaml = &text[yaml_start..offset];
            let mut body_start = offset + line.len();
            // A single blank line after the closing delimiter is part of the
            // delimiter, not the body.
            if text[body_start..].starts_with('\n') {
                body_start += 1;
            } else if text[body_start..].starts_with("\r\n") {
                body_start += 2;
            }
            return (Some(yaml), &text[body_start..], body_start);
        }
        offset += line.len();
    }

    // Opening delimiter without a closing one: not frontmatter.
    (None, text, 0)
}

/// Parse a document into `(Frontmatter, body, body_offset)`, applying path
/// inference for absent fields.
///
/// `relative_path` is the workspace-relative path (`project/folder/file.md`)
/// used both for inference and for warning context.
pub fn parse_document(text: &str, relative_path: &str) -> (Frontmatter, String, usize) {
    let (yaml, body, body_offset) = extract_frontmatter(text);

    let mut fm = match yaml {
        Some(src) => match serde_yaml::from_str::<Frontmatter>(src) {
            Ok(fm) => fm,
            Err(e) => {
                tracing::warn!(path = relative_path, error = %e, "malformed frontmatter, indexing without it");
                Frontmatter::default()
            }
        },
        None => Frontmatter::default(),
    };

    fm.tags = fm.tags.iter().map(|t| t.to_lowercase()).collect();

    if let Some(updated) = &fm.updated {
        if NaiveDate::parse_from_str(updated, "%Y-%m-%d").is_err() {
            tracing::warn!(path = relative_path, updated = %updated, "ignoring non-ISO updated date");
            fm.updated = None;
        }
    }

    let parts: Vec<&str> = relative_path.split('/').collect();
    if fm.project.is_none() {
        fm.project = parts.first().map(|p| p.to_string());
    }
    if fm.doc_type.is_none() {
        fm.doc_type = infer_type(&parts);
    }

    // Tasks without an explicit status may declare one near the top of the
    // body; an explicit frontmatter status always wins.
    if fm.doc_type.as_deref() == Some("task") && fm.status.is_none() {
        fm.status = scan_body_status(body);
    }

    (fm, body.to_string(), body_offset)
}

fn infer_type(parts: &[&str]) -> Option<String> {
    match parts {
        [_, filename] if *filename == "status.md" => Some("status".to_string()),
        [_, folder, ..] if !folder.ends_with(".md") => FOLDER_TYPES
            .iter()
            .find(|(name, _)| name == folder)
            .map(|(_, ty)| ty.to_string()),
        _ => None,
    }
}

fn scan_body_status(body: &str) -> Option<String> {
    body.lines()
        .filter(|l| !l.trim().is_empty())
        .take(STATUS_SCAN_LINES)
        .find_map(|line| {
            status_line_re()
                .captures(line)
                .map(|c| c[1].to_lowercase())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_frontmatter_fields() {
        let text = "---\ntype: task\nstatus: in-progress\nupdated: 2026-01-15\ntags: [Backend, API]\nowner: sam\n---\n\n# Body\n";
        let (fm, body, _) = parse_document(text, "demo/tasks/001-x.md");
        assert_eq!(fm.doc_type.as_deref(), Some("task"));
        assert_eq!(fm.status.as_deref(), Some("in-progress"));
        assert_eq!(fm.updated.as_deref(), Some("2026-01-15"));
        assert_eq!(fm.tags, vec!["backend", "api"]);
        assert_eq!(fm.owner.as_deref(), Some("sam"));
        assert_eq!(fm.project.as_deref(), Some("demo"));
        assert_eq!(body, "# Body\n");
    }

    #[test]
    fn leading_blank_line_means_no_frontmatter() {
        let text = "\n---\ntype: task\n---\nbody";
        let (yaml, body, offset) = extract_frontmatter(text);
        assert!(yaml.is_none());
        assert_eq!(body, text);
        assert_eq!(offset, 0);
    }

    #[test]
    fn unclosed_delimiter_means_no_frontmatter() {
        let text = "---\ntype: task\nbody continues";
        let (yaml, _, _) = extract_frontmatter(text);
        assert!(yaml.is_none());
    }

    #[test]
    fn malformed_yaml_is_ignored() {
        let text = "---\n[unclosed\n---\nbody";
        let (fm, body, _) = parse_document(text, "demo/tasks/a.md");
        // Inference still applies even though the YAML was dropped.
        assert_eq!(fm.doc_type.as_deref(), Some("task"));
        assert_eq!(body, "body");
    }

    #[test]
    fn infers_type_from_folder() {
        for (folder, ty) in [("tasks", "task"), ("plans", "plan"), ("sessions", "session")] {
            let (fm, _, _) = parse_document("body", &format!("p/{}/f.md", folder));
            assert_eq!(fm.doc_type.as_deref(), Some(ty), "folder {}", folder);
        }
        let (fm, _, _) = parse_document("body", "p/status.md");
        assert_eq!(fm.doc_type.as_deref(), Some("status"));
        let (fm, _, _) = parse_document("body", "p/unknown/f.md");
        assert!(fm.doc_type.is_none());
    }

    #[test]
    fn scans_body_status_for_tasks_only() {
        let (fm, _, _) = parse_document("# Task: x\n\nStatus: in-progress\n", "p/tasks/x.md");
        assert_eq!(fm.status.as_deref(), Some("in-progress"));

        // Same body in plans/ never yields a status.
        let (fm, _, _) = parse_document("# Plan\n\nStatus: in-progress\n", "p/plans/x.md");
        assert!(fm.status.is_none());
    }

    #[test]
    fn status_scan_stops_after_ten_nonblank_lines() {
        let mut body = String::from("# Task\n");
        for i in 0..10 {
            body.push_str(&format!("line {}\n", i));
        }
        body.push_str("Status: pending\n");
        let (fm, _, _) = parse_document(&body, "p/tasks/x.md");
        assert!(fm.status.is_none());
    }

    #[test]
    fn status_line_must_fill_whole_line() {
        let (fm, _, _) = parse_document("Status: pending and more words\n", "p/tasks/x.md");
        assert!(fm.status.is_none());
    }

    #[test]
    fn explicit_frontmatter_status_beats_body_line() {
        let text = "---\ntype: task\nstatus: done\n---\n# T\n\nStatus: pending\n";
        let (fm, _, _) = parse_document(text, "p/tasks/x.md");
        assert_eq!(fm.status.as_deref(), Some("done"));
    }

    #[test]
    fn invalid_updated_date_is_dropped() {
        let text = "---\nupdated: last tuesday\n---\nbody";
        let (fm, _, _) = parse_document(text, "p/tasks/x.md");
        assert!(fm.updated.is_none());
    }

    #[test]
    fn block_round_trips() {
        let fm = Frontmatter {
            project: Some("p".to_string()),
            doc_type: Some("task".to_string()),
            status: Some("pending".to_string()),
            feature: Some("rate-limiting".to_string()),
            tags: vec!["backend".to_string()],
            ..Default::default()
        };
        let text = format!("{}\n# Task: x\n", fm.to_block());
        let (reparsed, _, _) = parse_document(&text, "p/tasks/x.md");
        assert_eq!(reparsed, fm);
    }
}
