//! Heading-based chunking of documentation files.

use std::path::Path;

use semindex_core::hash::content_hash;

pub const DOC_EXTENSIONS: &[&str] = &["md", "mdx", "markdown", "rst", "adoc", "txt"];

pub fn is_documentation(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| DOC_EXTENSIONS.iter().any(|d| d.eq_ignore_ascii_case(e)))
}

#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub index: usize,
    pub heading: Option<String>,
    /// Section text including its heading line.
    pub content: String,
    /// 1-based.
    pub start_line: usize,
    pub hash: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChunkedDocument {
    pub title: String,
    pub chunks: Vec<Chunk>,
}

impl ChunkedDocument {
    /// Chunk hashes, sorted, for multiset comparison.
    pub fn sorted_hashes(&self) -> Vec<String> {
        let mut h: Vec<String> = self.chunks.iter().map(|c| c.hash.clone()).collect();
        h.sort();
        h
    }
}

/// `# Title` style heading: level and text. Up to three leading spaces.
fn atx_heading(line: &str) -> Option<(usize, String)> {
    let indent = line.len() - line.trim_start_matches(' ').len();
    if indent > 3 {
        return None;
    }
    let rest = &line[indent..];
    let level = rest.chars().take_while(|c| *c == '#').count();
    if level == 0 || level > 6 {
        return None;
    }
    let after = &rest[level..];
    if !after.is_empty() && !after.starts_with([' ', '\t']) {
        return None;
    }
    let text = after.trim().trim_end_matches('#').trim().to_string();
    Some((level, text))
}

fn is_fence(line: &str) -> bool {
    let t = line.trim_start();
    t.starts_with("```") || t.starts_with("~~~")
}

struct Section {
    heading: Option<String>,
    start_line: usize,
    lines: Vec<String>,
    has_body: bool,
}

/// Split on ATX headings outside fenced code. Text before the first heading
/// becomes a chunk headed by the document title. Sections with no body text
/// are dropped. The title is the first H1, else `fallback_title`.
pub fn chunk_document(text: &str, fallback_title: &str) -> ChunkedDocument {
    let mut title: Option<String> = None;
    let mut sections: Vec<Section> = Vec::new();
    let mut current = Section { heading: None, start_line: 1, lines: Vec::new(), has_body: false };
    let mut in_fence = false;

    for (i, line) in text.lines().enumerate() {
        if is_fence(line) {
            in_fence = !in_fence;
        }
        let heading = if in_fence { None } else { atx_heading(line) };
        match heading {
            Some((level, text)) => {
                if level == 1 && title.is_none() && !text.is_empty() {
                    title = Some(text.clone());
                }
                sections.push(std::mem::replace(
                    &mut current,
                    Section { heading: Some(text), start_line: i + 1, lines: vec![line.to_string()], has_body: false },
                ));
            }
            None => {
                if !line.trim().is_empty() {
                    current.has_body = true;
                }
                current.lines.push(line.to_string());
            }
        }
    }
    sections.push(current);

    let title = title.unwrap_or_else(|| fallback_title.to_string());
    let chunks = sections
        .into_iter()
        .filter(|s| s.has_body)
        .enumerate()
        .map(|(index, s)| {
            let content = s.lines.join("\n").trim().to_string();
            Chunk {
                index,
                heading: Some(s.heading.unwrap_or_else(|| title.clone())),
                hash: content_hash(&content),
                content,
                start_line: s.start_line,
            }
        })
        .collect();
    ChunkedDocument { title, chunks }
}
