//! Design-document loading and chunking.
//!
//! Splits a markdown document into overlapping chunks for indexing. Split
//! points prefer headings, then blank lines, then sentence endings, then
//! whitespace. Every size is counted in chars, not bytes, so multilingual
//! documents chunk predictably.

use std::fs;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::core::errors::ApiError;

/// A chunk of the source document, ready for embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// Stable id: SHA-256 over document id, sequence index and content.
    /// Re-loading an unchanged document reproduces the same ids.
    pub id: String,
    pub document_id: String,
    /// Nearest preceding heading line, e.g. `"## Gacha"`. Empty when no
    /// heading precedes the chunk.
    pub section: String,
    pub sequence_index: usize,
    pub content: String,
}

pub struct DocumentLoader {
    path: PathBuf,
    chunk_size: usize,
    chunk_overlap: usize,
}

impl DocumentLoader {
    pub fn new(path: impl Into<PathBuf>, chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            path: path.into(),
            chunk_size,
            chunk_overlap,
        }
    }

    /// Reads the document and splits it into chunks. Missing, unreadable
    /// or effectively empty files are load failures.
    pub fn load(&self) -> Result<Vec<Chunk>, ApiError> {
        let text = fs::read_to_string(&self.path)
            .map_err(|e| ApiError::Load(format!("cannot read {}: {}", self.path.display(), e)))?;
        if text.trim().is_empty() {
            return Err(ApiError::Load(format!(
                "document {} is empty",
                self.path.display()
            )));
        }
        let document_id = self.path.to_string_lossy().to_string();
        Ok(self.split_text(&text, &document_id))
    }

    pub fn document_id(&self) -> String {
        self.path.to_string_lossy().to_string()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Pure splitting step. Deterministic: the same text always yields the
    /// same chunks, ids included.
    pub fn split_text(&self, text: &str, document_id: &str) -> Vec<Chunk> {
        let mut builder = ChunkBuilder::new(self.chunk_size, self.chunk_overlap);
        for (section, paragraph) in collect_paragraphs(text) {
            builder.push_paragraph(&section, &paragraph);
        }

        builder
            .finish()
            .into_iter()
            .enumerate()
            .map(|(i, (section, content))| Chunk {
                id: chunk_id(document_id, i, &content),
                document_id: document_id.to_string(),
                section,
                sequence_index: i,
                content,
            })
            .collect()
    }
}

fn chunk_id(document_id: &str, sequence_index: usize, content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(document_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(sequence_index.to_le_bytes());
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// A markdown heading line: one to six `#` followed by a space.
fn is_heading(line: &str) -> bool {
    let hashes = line.bytes().take_while(|b| *b == b'#').count();
    (1..=6).contains(&hashes) && line.as_bytes().get(hashes) == Some(&b' ')
}

/// Scans the text line by line into `(section, paragraph)` pairs. A heading
/// opens a new paragraph (keeping the heading as its first line) and becomes
/// the section tag for everything until the next heading. Blank lines close
/// paragraphs.
fn collect_paragraphs(text: &str) -> Vec<(String, String)> {
    let mut paragraphs = Vec::new();
    let mut section = String::new();
    let mut para_section = String::new();
    let mut para_lines: Vec<&str> = Vec::new();

    let mut flush = |para_section: &str, para_lines: &mut Vec<&str>| {
        let body = para_lines.join("\n");
        if !body.trim().is_empty() {
            paragraphs.push((para_section.to_string(), body));
        }
        para_lines.clear();
    };

    for raw_line in text.lines() {
        let line = raw_line.trim_end_matches('\r');
        if is_heading(line) {
            flush(&para_section, &mut para_lines);
            section = line.trim().to_string();
            para_section = section.clone();
            para_lines.push(line);
        } else if line.trim().is_empty() {
            flush(&para_section, &mut para_lines);
        } else {
            if para_lines.is_empty() {
                para_section = section.clone();
            }
            para_lines.push(line);
        }
    }
    flush(&para_section, &mut para_lines);

    paragraphs
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn tail_chars(s: &str, n: usize) -> String {
    let chars: Vec<char> = s.chars().collect();
    chars[chars.len().saturating_sub(n)..].iter().collect()
}

/// Accumulates paragraphs into chunks of at most `chunk_size` chars. When a
/// chunk is flushed, the next one starts with the last `overlap` chars of it
/// so consecutive chunks share content.
struct ChunkBuilder {
    chunk_size: usize,
    overlap: usize,
    finished: Vec<(String, String)>,
    buf: String,
    buf_chars: usize,
    carry_chars: usize,
    fresh_section: Option<String>,
}

impl ChunkBuilder {
    fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        // The carry must leave room for a separator and at least one new
        // char, or the builder cannot make progress.
        let overlap = chunk_overlap.min(chunk_size.saturating_sub(3));
        Self {
            chunk_size,
            overlap,
            finished: Vec::new(),
            buf: String::new(),
            buf_chars: 0,
            carry_chars: 0,
            fresh_section: None,
        }
    }

    fn has_fresh(&self) -> bool {
        self.buf_chars > self.carry_chars
    }

    fn sep_for(&self, continuation: bool) -> &'static str {
        if self.buf.is_empty() || continuation {
            ""
        } else {
            "\n\n"
        }
    }

    fn append(&mut self, section: &str, text: &str, continuation: bool) {
        let sep = self.sep_for(continuation);
        self.buf.push_str(sep);
        self.buf.push_str(text);
        self.buf_chars += sep.len() + char_len(text);
        if self.fresh_section.is_none() {
            self.fresh_section = Some(section.to_string());
        }
    }

    /// Emits the buffer as a chunk and seeds the next buffer with the
    /// overlap tail. A buffer holding only carried text is never emitted.
    fn flush(&mut self) {
        if !self.has_fresh() {
            return;
        }
        let content = std::mem::take(&mut self.buf);
        let carry = tail_chars(&content, self.overlap);
        let section = self.fresh_section.take().unwrap_or_default();
        self.finished.push((section, content));
        self.buf_chars = char_len(&carry);
        self.carry_chars = self.buf_chars;
        self.buf = carry;
    }

    fn push_paragraph(&mut self, section: &str, text: &str) {
        let text_chars = char_len(text);
        // Prefer a paragraph boundary: when the paragraph would overflow the
        // current buffer but fits a fresh one, cut here. Paragraphs too big
        // for any buffer fill the current chunk first and then get split.
        if self.has_fresh()
            && self.buf_chars + 2 + text_chars > self.chunk_size
            && text_chars + self.overlap + 2 <= self.chunk_size
        {
            self.flush();
        }

        let mut rest = text.to_string();
        let mut continuation = false;
        loop {
            let sep_chars = self.sep_for(continuation).len();
            let budget = self.chunk_size.saturating_sub(self.buf_chars + sep_chars);
            if char_len(&rest) <= budget {
                if !rest.is_empty() {
                    self.append(section, &rest, continuation);
                }
                break;
            }
            if budget == 0 {
                self.flush();
                continue;
            }
            let (piece, tail) = split_at_boundary(&rest, budget);
            self.append(section, &piece, continuation);
            self.flush();
            rest = tail;
            continuation = true;
        }
    }

    fn finish(mut self) -> Vec<(String, String)> {
        self.flush();
        self.finished
    }
}

/// Cuts at most `max_chars` off the front of `text`, preferring a sentence
/// ending, then a newline, then a space, as long as the cut lands past a
/// third of the window. Returns the piece and the remaining text.
fn split_at_boundary(text: &str, max_chars: usize) -> (String, String) {
    let max_chars = max_chars.max(1);
    let window_bytes = match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => byte_idx,
        None => return (text.to_string(), String::new()),
    };
    let window = &text[..window_bytes];
    let min_pos = window_bytes / 3;

    let sentence_endings = [". ", ".\n", "。", "! ", "!\n", "? ", "?\n"];
    let mut cut = None;
    for ending in sentence_endings {
        if let Some(pos) = window.rfind(ending) {
            let candidate = pos + ending.len();
            if candidate > min_pos {
                cut = Some(cut.map_or(candidate, |c: usize| c.max(candidate)));
            }
        }
    }
    let cut = cut
        .or_else(|| {
            window
                .rfind('\n')
                .map(|p| p + 1)
                .filter(|p| *p > min_pos)
        })
        .or_else(|| {
            window
                .rfind(' ')
                .map(|p| p + 1)
                .filter(|p| *p > min_pos)
        })
        .unwrap_or(window_bytes);

    // Boundary whitespace stays with the piece so a continuation chunk can
    // butt the carry tail directly against the remainder.
    let piece = text[..cut].to_string();
    let rest = text[cut..].trim_start().to_string();
    (piece, rest)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loader(chunk_size: usize, overlap: usize) -> DocumentLoader {
        DocumentLoader::new("design.md", chunk_size, overlap)
    }

    #[test]
    fn single_section_yields_one_chunk() {
        let chunks = loader(1000, 200).split_text("## Gacha\nPity after 100 pulls.", "design.md");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].section, "## Gacha");
        assert_eq!(chunks[0].content, "## Gacha\nPity after 100 pulls.");
        assert_eq!(chunks[0].sequence_index, 0);
    }

    #[test]
    fn chunks_stay_within_bounds() {
        let text = "## Rules\n\n".to_string() + &"The drop rate doubles after every miss. ".repeat(60);
        let chunks = loader(300, 60).split_text(&text, "design.md");
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            let len = chunk.content.chars().count();
            assert!(len >= 1, "empty chunk");
            assert!(len <= 300, "chunk too long: {}", len);
        }
    }

    #[test]
    fn consecutive_chunks_share_the_overlap_tail() {
        let text = "One sentence about combat. ".repeat(80);
        let overlap = 40;
        let chunks = loader(250, overlap).split_text(&text, "design.md");
        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            let prev: Vec<char> = pair[0].content.chars().collect();
            let tail: String = prev[prev.len().saturating_sub(overlap)..].iter().collect();
            assert!(
                pair[1].content.starts_with(&tail),
                "chunk did not begin with the previous tail"
            );
        }
    }

    #[test]
    fn sections_follow_headings() {
        let text = "\
## Combat

Attack values scale with weapon tier and character level over time.

## Economy

Currency drops are tuned around the daily quest loop for casual players.";
        let chunks = loader(90, 20).split_text(text, "design.md");
        assert!(chunks.len() >= 2);
        assert_eq!(chunks[0].section, "## Combat");
        assert!(chunks.iter().any(|c| c.section == "## Economy"));
    }

    #[test]
    fn text_before_any_heading_has_empty_section() {
        let chunks = loader(500, 50).split_text("intro text without headings", "design.md");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].section, "");
    }

    #[test]
    fn splitting_is_deterministic() {
        let text = "## Guilds\n\n".to_string() + &"Members donate once per day. ".repeat(50);
        let a = loader(200, 40).split_text(&text, "design.md");
        let b = loader(200, 40).split_text(&text, "design.md");
        assert_eq!(a, b);
        let ids: Vec<&str> = a.iter().map(|c| c.id.as_str()).collect();
        let mut deduped = ids.clone();
        deduped.dedup();
        assert_eq!(ids, deduped);
    }

    #[test]
    fn oversized_paragraph_is_hard_split() {
        let text = "x".repeat(1200);
        let chunks = loader(500, 100).split_text(&text, "design.md");
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.content.chars().count() <= 500);
        }
    }

    #[test]
    fn heading_detection() {
        assert!(is_heading("# Title"));
        assert!(is_heading("###### Deep"));
        assert!(!is_heading("#Title"));
        assert!(!is_heading("####### too deep"));
        assert!(!is_heading("plain text"));
    }

    #[test]
    fn missing_file_is_a_load_error() {
        let loader = DocumentLoader::new("/nonexistent/never.md", 1000, 200);
        assert!(matches!(loader.load(), Err(ApiError::Load(_))));
    }

    #[test]
    fn empty_document_is_a_load_error() {
        let path = std::env::temp_dir().join(format!("lorekeeper-empty-{}.md", uuid::Uuid::new_v4()));
        std::fs::write(&path, "   \n\n  ").unwrap();
        let loader = DocumentLoader::new(&path, 1000, 200);
        let result = loader.load();
        let _ = std::fs::remove_file(&path);
        assert!(matches!(result, Err(ApiError::Load(_))));
    }
}
