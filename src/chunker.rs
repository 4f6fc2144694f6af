//! Heading-aware chunking.
//!
//! A document body is split into sections at each level-1 or level-2
//! heading. Each section begins with its heading line and runs up to the
//! next level-1/2 heading, so the chunks reassembled in order cover the body
//! exactly. Oversized sections fall back to paragraph packing, then line
//! packing, then a hard character split.

use regex::Regex;
use std::sync::OnceLock;

/// Maximum characters per chunk (~1500 tokens).
pub const MAX_CHUNK_CHARS: usize = 6000;

/// Headings that indicate project state and get boosted in search.
pub const PRIORITY_HEADINGS: &[&str] = &[
    "current status",
    "next",
    "next steps",
    "blockers",
    "blocked by",
    "decisions",
];

/// A bounded, heading-labeled slice of a document body.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// Heading text without `#` markers; `None` for preamble content.
    pub heading: Option<String>,
    /// 1 or 2 for headed sections, 0 for preamble.
    pub heading_level: i64,
    pub content: String,
    /// Contiguous from 0 per document.
    pub chunk_order: i64,
    /// Character offset of the section within the body. Sub-chunks of an
    /// oversized section share their section's offset.
    pub char_offset: i64,
    pub is_priority_heading: bool,
}

fn heading_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(#{1,2})\s+(.+)$").unwrap())
}

pub fn is_priority_heading(heading: Option<&str>) -> bool {
    match heading {
        Some(text) => {
            let normalized = text.trim().to_lowercase();
            PRIORITY_HEADINGS.contains(&normalized.as_str())
        }
        None => false,
    }
}

struct Section {
    heading: Option<String>,
    level: i64,
    content: String,
    char_offset: usize,
}

/// Split a body (frontmatter already stripped) into ordered chunks.
pub fn chunk_body(body: &str) -> Vec<Chunk> {
    let sections = split_sections(body);

    let mut chunks = Vec::new();
    let mut order: i64 = 0;

    for section in sections {
        let priority = is_priority_heading(section.heading.as_deref());

        if section.content.chars().count() <= MAX_CHUNK_CHARS {
            chunks.push(Chunk {
                heading: section.heading,
                heading_level: section.level,
                content: section.content,
                chunk_order: order,
                char_offset: section.char_offset as i64,
                is_priority_heading: priority,
            });
            order += 1;
            continue;
        }

        // The heading line is the section's first paragraph, so the first
        // sub-chunk retains it; later sub-chunks inherit the label only.
        for piece in split_paragraphs(&section.content, MAX_CHUNK_CHARS) {
            chunks.push(Chunk {
                heading: section.heading.clone(),
                heading_level: section.level,
                content: piece,
                chunk_order: order,
                char_offset: section.char_offset as i64,
                is_priority_heading: priority,
            });
            order += 1;
        }
    }

    chunks
}

/// Split at each level-1/2 heading. A section starts at its heading line
/// and extends up to (not including) the next one; text before the first
/// heading becomes a preamble section when non-empty.
fn split_sections(body: &str) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut heading: Option<(String, i64)> = None;
    let mut lines: Vec<&str> = Vec::new();
    let mut section_offset = 0usize;
    let mut char_pos = 0usize;

    let flush =
        |heading: &Option<(String, i64)>, lines: &[&str], offset: usize, out: &mut Vec<Section>| {
            let content = lines.join("\n").trim().to_string();
            if content.is_empty() && heading.is_none() {
                return;
            }
            out.push(Section {
                heading: heading.as_ref().map(|(h, _)| h.clone()),
                level: heading.as_ref().map(|(_, l)| *l).unwrap_or(0),
                content,
                char_offset: offset,
            });
        };

    for line in body.split('\n') {
        if let Some(caps) = heading_re().captures(line) {
            flush(&heading, &lines, section_offset, &mut sections);
            heading = Some((caps[2].trim().to_string(), caps[1].len() as i64));
            lines.clear();
            lines.push(line);
            section_offset = char_pos;
        } else {
            lines.push(line);
        }
        char_pos += line.chars().count() + 1;
    }
    flush(&heading, &lines, section_offset, &mut sections);

    if sections.is_empty() {
        sections.push(Section {
            heading: None,
            level: 0,
            content: body.trim().to_string(),
            char_offset: 0,
        });
    }

    sections
}

/// Greedily pack blank-line-delimited paragraphs into pieces of at most
/// `max` characters. Oversized paragraphs fall back to line packing.
fn split_paragraphs(content: &str, max: usize) -> Vec<String> {
    let mut pieces: Vec<String> = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_len = 0usize;

    for para in content.split("\n\n") {
        let para = para.trim();
        if para.is_empty() {
            continue;
        }
        let para_len = para.chars().count();

        if para_len > max {
            if !current.is_empty() {
                pieces.push(current.join("\n\n"));
                current.clear();
                current_len = 0;
            }
            pieces.extend(split_lines(para, max));
            continue;
        }

        let joined = current_len + para_len + if current.is_empty() { 0 } else { 2 };
        if joined > max && !current.is_empty() {
            pieces.push(current.join("\n\n"));
            current.clear();
            current_len = 0;
        }
        if !current.is_empty() {
            current_len += 2;
        }
        current.push(para);
        current_len += para_len;
    }

    if !current.is_empty() {
        pieces.push(current.join("\n\n"));
    }
    pieces
}

/// Greedily pack lines into pieces of at most `max` characters. A single
/// oversized line is hard-split at the character limit.
fn split_lines(content: &str, max: usize) -> Vec<String> {
    let mut pieces: Vec<String> = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_len = 0usize;

    for line in content.split('\n') {
        let line_len = line.chars().count();

        if line_len > max {
            if !current.is_empty() {
                pieces.push(current.join("\n"));
                current.clear();
                current_len = 0;
            }
            pieces.extend(hard_split(line, max));
            continue;
        }

        let joined = current_len + line_len + if current.is_empty() { 0 } else { 1 };
        if joined > max && !current.is_empty() {
            pieces.push(current.join("\n"));
            current.clear();
            current_len = 0;
        }
        if !current.is_empty() {
            current_len += 1;
        }
        current.push(line);
        current_len += line_len;
    }

    if !current.is_empty() {
        pieces.push(current.join("\n"));
    }
    pieces
}

fn hard_split(line: &str, max: usize) -> Vec<String> {
    let chars: Vec<char> = line.chars().collect();
    chars
        .chunks(max)
        .map(|piece| piece.iter().collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_body_single_chunk() {
        let chunks = chunk_body("Just a short note.");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].heading, None);
        assert_eq!(chunks[0].heading_level, 0);
        assert_eq!(chunks[0].chunk_order, 0);
        assert_eq!(chunks[0].content, "Just a short note.");
    }

    #[test]
    fn empty_body_yields_one_preamble_chunk() {
        let chunks = chunk_body("");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].heading, None);
        assert_eq!(chunks[0].content, "");
    }

    #[test]
    fn splits_on_level_one_and_two_headings() {
        let body = "preamble text\n\n# First\nalpha\n\n## Second\nbeta\n\n### Third stays\ngamma\n";
        let chunks = chunk_body(body);
        assert_eq!(chunks.len(), 3);

        assert_eq!(chunks[0].heading, None);
        assert_eq!(chunks[0].content, "preamble text");

        assert_eq!(chunks[1].heading.as_deref(), Some("First"));
        assert_eq!(chunks[1].heading_level, 1);
        assert_eq!(chunks[1].content, "# First\nalpha");

        assert_eq!(chunks[2].heading.as_deref(), Some("Second"));
        assert_eq!(chunks[2].heading_level, 2);
        // Level-3 headings stay inside their parent section.
        assert!(chunks[2].content.starts_with("## Second\nbeta"));
        assert!(chunks[2].content.contains("### Third stays"));
        assert!(chunks[2].content.contains("gamma"));
    }

    #[test]
    fn heading_with_no_content_still_emits_chunk() {
        let chunks = chunk_body("# Lonely heading");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].heading.as_deref(), Some("Lonely heading"));
        assert_eq!(chunks[0].content, "# Lonely heading");
    }

    #[test]
    fn priority_headings_are_flagged() {
        let body = "# Current Status\nfine\n\n## Next Steps\nship it\n\n## Background\nhistory\n";
        let chunks = chunk_body(body);
        assert!(chunks[0].is_priority_heading);
        assert!(chunks[1].is_priority_heading);
        assert!(!chunks[2].is_priority_heading);
    }

    #[test]
    fn priority_match_is_case_insensitive_and_trimmed() {
        assert!(is_priority_heading(Some("  BLOCKERS ")));
        assert!(is_priority_heading(Some("Decisions")));
        assert!(!is_priority_heading(Some("Blockers and more")));
        assert!(!is_priority_heading(None));
    }

    #[test]
    fn body_at_limit_is_one_chunk_and_one_over_splits() {
        let para = "x".repeat(2999);
        let body = format!("{}\n\n{}", para, para); // 2999 + 2 + 2999 = 6000
        assert_eq!(body.chars().count(), MAX_CHUNK_CHARS);
        assert_eq!(chunk_body(&body).len(), 1);

        let body = format!("{}\n\n{}y", para, para);
        let chunks = chunk_body(&body);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].content, para);
    }

    #[test]
    fn oversized_paragraph_splits_at_lines() {
        let line = "y".repeat(2500);
        let para = format!("{}\n{}\n{}", line, line, line); // one paragraph, 7502 chars
        let chunks = chunk_body(&para);
        assert!(chunks.len() > 1);
        // No chunk exceeds the limit and no characters are lost.
        assert!(chunks.iter().all(|c| c.content.chars().count() <= MAX_CHUNK_CHARS));
        let total_y: usize = chunks
            .iter()
            .map(|c| c.content.chars().filter(|&ch| ch == 'y').count())
            .sum();
        assert_eq!(total_y, 7500);
    }

    #[test]
    fn oversized_line_is_hard_split() {
        let line = "z".repeat(MAX_CHUNK_CHARS + 500);
        let chunks = chunk_body(&line);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].content.chars().count(), MAX_CHUNK_CHARS);
        assert_eq!(chunks[1].content.chars().count(), 500);
        let rejoined: String = chunks.iter().map(|c| c.content.as_str()).collect();
        assert_eq!(rejoined, line);
    }

    #[test]
    fn first_sub_chunk_keeps_heading_line_and_all_inherit_label() {
        let para = "w".repeat(4000);
        let body = format!("## Blockers\n{}\n\n{}", para, para);
        let chunks = chunk_body(&body);
        assert!(chunks.len() >= 2);
        assert!(chunks[0].content.starts_with("## Blockers"));
        assert!(!chunks[1].content.contains("## Blockers"));
        for chunk in &chunks {
            assert_eq!(chunk.heading.as_deref(), Some("Blockers"));
            assert_eq!(chunk.heading_level, 2);
            assert!(chunk.is_priority_heading);
        }
    }

    #[test]
    fn chunk_order_is_contiguous_and_offsets_grow() {
        let body = (0..20)
            .map(|i| format!("# Heading {}\ncontent {}", i, i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let chunks = chunk_body(&body);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_order, i as i64);
        }
        for pair in chunks.windows(2) {
            assert!(pair[0].char_offset <= pair[1].char_offset);
        }
    }

    #[test]
    fn chunks_cover_body_lines_in_order() {
        let body = "intro line\n\n# One\nfirst section\nsecond line\n\n## Two\nmore content\n";
        let chunks = chunk_body(body);

        let expected: Vec<&str> = body
            .lines()
            .map(|l| l.trim())
            .filter(|l| !l.is_empty())
            .collect();
        let actual: Vec<String> = chunks
            .iter()
            .flat_map(|c| c.content.lines())
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect();
        assert_eq!(actual, expected);
    }

    #[test]
    fn deterministic() {
        let body = "# A\nalpha\n\n## B\nbeta";
        assert_eq!(chunk_body(body), chunk_body(body));
    }
}
