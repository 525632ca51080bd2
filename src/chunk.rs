//! Structure-aware chunker (spec §4.6, C9).
//!
//! Walks a heading-delimited section tree depth-first, keeping fenced code
//! blocks and tables as atomic chunks, and packing paragraph/list runs into
//! ~512-token windows (soft cap 800) with a small sentence-boundary overlap
//! when a chunk is closed early by the next paragraph overflowing it.
//!
//! Historical defect carried forward as a normative fix (spec §9): newline
//! collapse is forbidden anywhere in this module. Only intra-line
//! whitespace may be collapsed.

use uuid::Uuid;

use crate::models::{token_estimate, Chunk, ChunkKind, Document};

const TARGET_TOKENS: i64 = 512;
const SOFT_CAP_TOKENS: i64 = 800;
const OVERLAP_FRACTION: f64 = 0.12;

/// Strips `<!-- RAG:IGNORE-START -->...<!-- RAG:IGNORE-END -->` regions
/// (spec §4.2, §4.6 step 1). Excluded regions never reach indexing,
/// enrichment, or chunking.
pub fn strip_rag_ignore(text: &str) -> String {
    const START: &str = "<!-- RAG:IGNORE-START -->";
    const END: &str = "<!-- RAG:IGNORE-END -->";
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    loop {
        match rest.find(START) {
            Some(start_idx) => {
                out.push_str(&rest[..start_idx]);
                match rest[start_idx..].find(END) {
                    Some(end_rel) => {
                        rest = &rest[start_idx + end_rel + END.len()..];
                    }
                    None => {
                        // Unterminated marker: drop everything after it.
                        rest = "";
                    }
                }
            }
            None => {
                out.push_str(rest);
                break;
            }
        }
    }
    out
}

#[derive(Debug, Clone)]
enum Block {
    Heading { level: usize, title: String },
    Code(String),
    Table(String),
    Prose(String),
}

/// Splits raw text into an ordered sequence of [`Block`]s. Blank lines
/// separate prose/list runs into paragraphs; everything else is detected
/// structurally.
fn blockify(text: &str) -> Vec<Block> {
    let lines: Vec<&str> = text.lines().collect();
    let mut blocks = Vec::new();
    let mut i = 0;
    let mut para_buf: Vec<&str> = Vec::new();

    let flush_para = |buf: &mut Vec<&str>, blocks: &mut Vec<Block>| {
        if !buf.is_empty() {
            let joined = buf.join("\n");
            if !joined.trim().is_empty() {
                blocks.push(Block::Prose(joined));
            }
            buf.clear();
        }
    };

    while i < lines.len() {
        let line = lines[i];
        let trimmed = line.trim_start();

        // Markdown ATX heading.
        if let Some(level) = atx_heading_level(trimmed) {
            flush_para(&mut para_buf, &mut blocks);
            let title = trimmed.trim_start_matches('#').trim().to_string();
            blocks.push(Block::Heading { level, title });
            i += 1;
            continue;
        }

        // Setext heading: a non-empty line followed by a line of all `=`/`-`.
        if i + 1 < lines.len() && !trimmed.is_empty() {
            let underline = lines[i + 1].trim();
            if !underline.is_empty()
                && (underline.chars().all(|c| c == '=') || underline.chars().all(|c| c == '-'))
                && underline.len() >= 3
            {
                flush_para(&mut para_buf, &mut blocks);
                let level = if underline.starts_with('=') { 1 } else { 2 };
                blocks.push(Block::Heading {
                    level,
                    title: trimmed.to_string(),
                });
                i += 2;
                continue;
            }
        }

        // All-caps heading heuristic for non-markdown text: an all-caps
        // line followed by a blank line.
        if !trimmed.is_empty()
            && trimmed.chars().any(|c| c.is_alphabetic())
            && trimmed.chars().filter(|c| c.is_alphabetic()).all(|c| c.is_uppercase())
            && trimmed.len() < 120
            && i + 1 < lines.len()
            && lines[i + 1].trim().is_empty()
        {
            flush_para(&mut para_buf, &mut blocks);
            blocks.push(Block::Heading {
                level: 2,
                title: trimmed.to_string(),
            });
            i += 1;
            continue;
        }

        // Fenced code block.
        if trimmed.starts_with("```") {
            flush_para(&mut para_buf, &mut blocks);
            let mut code_lines = vec![line];
            i += 1;
            while i < lines.len() && !lines[i].trim_start().starts_with("```") {
                code_lines.push(lines[i]);
                i += 1;
            }
            if i < lines.len() {
                code_lines.push(lines[i]); // closing fence
                i += 1;
            }
            blocks.push(Block::Code(code_lines.join("\n")));
            continue;
        }

        // Pipe-delimited table: contiguous run of lines containing '|'.
        if trimmed.contains('|') && trimmed.starts_with('|') {
            flush_para(&mut para_buf, &mut blocks);
            let mut table_lines = Vec::new();
            while i < lines.len() && lines[i].trim_start().starts_with('|') {
                table_lines.push(lines[i]);
                i += 1;
            }
            blocks.push(Block::Table(table_lines.join("\n")));
            continue;
        }

        if trimmed.is_empty() {
            flush_para(&mut para_buf, &mut blocks);
            i += 1;
            continue;
        }

        para_buf.push(line);
        i += 1;
    }
    flush_para(&mut para_buf, &mut blocks);
    blocks
}

fn atx_heading_level(trimmed: &str) -> Option<usize> {
    let hashes = trimmed.chars().take_while(|c| *c == '#').count();
    if hashes == 0 || hashes > 6 {
        return None;
    }
    let rest = &trimmed[hashes..];
    if rest.is_empty() || rest.starts_with(' ') {
        Some(hashes)
    } else {
        None
    }
}

struct Builder {
    chunks: Vec<(String, ChunkKind, Vec<String>)>,
    buf: String,
    buf_titles: Vec<String>,
}

impl Builder {
    fn new() -> Self {
        Builder {
            chunks: Vec::new(),
            buf: String::new(),
            buf_titles: Vec::new(),
        }
    }

    fn flush(&mut self) {
        if !self.buf.trim().is_empty() {
            self.chunks.push((
                std::mem::take(&mut self.buf),
                ChunkKind::Paragraph,
                self.buf_titles.clone(),
            ));
        }
        self.buf.clear();
    }

    fn push_prose(&mut self, text: &str, parent_titles: &[String]) {
        if self.buf_titles != parent_titles {
            // Section boundary: never merge prose across sections.
            self.flush();
            self.buf_titles = parent_titles.to_vec();
        }
        let candidate_len = if self.buf.is_empty() {
            token_estimate(text)
        } else {
            token_estimate(&self.buf) + token_estimate(text)
        };
        if candidate_len > SOFT_CAP_TOKENS && !self.buf.is_empty() {
            let overlap = take_overlap(&self.buf, OVERLAP_FRACTION);
            self.flush();
            self.buf_titles = parent_titles.to_vec();
            if !overlap.is_empty() {
                self.buf.push_str(&overlap);
                self.buf.push_str("\n\n");
            }
        }
        if !self.buf.is_empty() {
            self.buf.push_str("\n\n");
        }
        self.buf.push_str(text);
        if token_estimate(&self.buf) >= TARGET_TOKENS {
            self.flush();
        }
    }

    fn push_atomic(&mut self, text: String, kind: ChunkKind, parent_titles: &[String]) {
        self.flush();
        self.buf_titles = parent_titles.to_vec();
        self.chunks.push((text, kind, parent_titles.to_vec()));
    }
}

/// Takes the trailing sentences of `text` up to roughly `fraction` of its
/// length, never splitting mid-sentence (spec §4.6.5).
fn take_overlap(text: &str, fraction: f64) -> String {
    let target_len = ((text.len() as f64) * fraction).round() as usize;
    if target_len == 0 {
        return String::new();
    }
    let bytes_from_end = text.len().saturating_sub(target_len);
    // Walk forward from the approximate cut point to the next sentence
    // boundary so we never split mid-sentence.
    let tail = &text[bytes_from_end.min(text.len())..];
    let mut start = 0;
    for (idx, ch) in tail.char_indices() {
        if ch == '.' || ch == '!' || ch == '?' {
            start = idx + ch.len_utf8();
            break;
        }
    }
    tail[start..].trim_start().to_string()
}

/// Produces the ordered [`Chunk`] sequence for a [`Document`] (spec §4.6).
pub fn chunk_document(doc: &Document) -> Vec<Chunk> {
    let stripped = strip_rag_ignore(&doc.body);
    let blocks = blockify(&stripped);

    let mut heading_stack: Vec<(usize, String)> = Vec::new();
    let mut builder = Builder::new();

    for block in blocks {
        match block {
            Block::Heading { level, title } => {
                while heading_stack.last().map(|(l, _)| *l >= level).unwrap_or(false) {
                    heading_stack.pop();
                }
                heading_stack.push((level, title));
            }
            Block::Code(text) => {
                let titles = current_titles(&heading_stack);
                builder.push_atomic(text, ChunkKind::Code, &titles);
            }
            Block::Table(text) => {
                let titles = current_titles(&heading_stack);
                builder.push_atomic(text, ChunkKind::Table, &titles);
            }
            Block::Prose(text) => {
                let titles = current_titles(&heading_stack);
                builder.push_prose(&text, &titles);
            }
        }
    }
    builder.flush();

    let mut out = Vec::with_capacity(builder.chunks.len());
    for (position, (text, kind, parent_titles)) in builder.chunks.into_iter().enumerate() {
        if text.trim().is_empty() {
            continue;
        }
        out.push(Chunk {
            chunk_id: format!("{}:{}", doc.doc_id, position),
            doc_id: doc.doc_id.clone(),
            token_estimate: token_estimate(&text),
            text,
            kind,
            parent_titles,
            position: position as i64,
            topics: doc.metadata.topics.clone(),
            title: doc.title.clone(),
            quality_score: doc.scores.quality,
            signalness: doc.scores.signalness,
            created_at: doc.created_at,
            source_kind: doc.source_kind,
        });
    }
    out
}

fn current_titles(stack: &[(usize, String)]) -> Vec<String> {
    stack.iter().map(|(_, t)| t.clone()).collect()
}

/// Deterministic chunk id helper kept for callers that need a synthetic id
/// before a [`Document`] exists (e.g. re-OCR dry runs).
pub fn synthetic_chunk_id(doc_id: &str, position: i64) -> String {
    format!("{}:{}:{}", doc_id, position, Uuid::new_v4())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EnrichedMetadata, GateKind, Provenance, Scores, SourceKind};
    use chrono::Utc;

    fn doc(body: &str) -> Document {
        Document {
            doc_id: "d1".to_string(),
            source_kind: SourceKind::Markdown,
            gate_kind: GateKind("note".to_string()),
            title: "Title".to_string(),
            body: body.to_string(),
            ingested_at: Utc::now(),
            created_at: Utc::now(),
            content_hash: "hash".to_string(),
            byte_size: body.len() as i64,
            ocr_confidence: None,
            provenance: Provenance::default(),
            metadata: EnrichedMetadata::default(),
            scores: Scores::default(),
        }
    }

    #[test]
    fn strips_rag_ignore_regions() {
        let text = "keep\n<!-- RAG:IGNORE-START -->secret<!-- RAG:IGNORE-END -->\nkeep2";
        let stripped = strip_rag_ignore(text);
        assert!(!stripped.contains("secret"));
        assert!(stripped.contains("keep"));
        assert!(stripped.contains("keep2"));
    }

    #[test]
    fn no_headings_yields_empty_parent_titles() {
        let d = doc("Alpha paragraph.\n\nBeta paragraph.");
        let chunks = chunk_document(&d);
        assert!(!chunks.is_empty());
        for c in &chunks {
            assert!(c.parent_titles.is_empty());
        }
    }

    #[test]
    fn table_is_not_merged_and_keeps_parent_titles() {
        let body = "# Title\n\n## S1\nAlpha.\n\n## S2\n| a | b |\n|---|---|\n| 1 | 2 |\n";
        let d = doc(body);
        let chunks = chunk_document(&d);
        assert!(chunks.len() >= 3);
        let table = chunks.iter().find(|c| c.kind == ChunkKind::Table).unwrap();
        assert_eq!(table.parent_titles, vec!["Title".to_string(), "S2".to_string()]);
    }

    #[test]
    fn sole_table_document_is_single_chunk() {
        let d = doc("| a | b |\n|---|---|\n| 1 | 2 |\n");
        let chunks = chunk_document(&d);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].kind, ChunkKind::Table);
    }

    #[test]
    fn code_block_is_atomic_regardless_of_size() {
        let big_code = "x".repeat(3000);
        let body = format!("# T\n\n```\n{big_code}\n```\n");
        let d = doc(&body);
        let chunks = chunk_document(&d);
        let code_chunk = chunks.iter().find(|c| c.kind == ChunkKind::Code).unwrap();
        assert!(code_chunk.text.contains(&big_code));
    }

    #[test]
    fn empty_body_yields_no_chunks() {
        let d = doc("");
        assert!(chunk_document(&d).is_empty());
    }

    #[test]
    fn single_h1_with_long_body_shares_parent_titles() {
        let para = "word ".repeat(400);
        let body = format!("# Heading\n\n{para}\n\n{para}\n\n{para}");
        let d = doc(&body);
        let chunks = chunk_document(&d);
        assert!(chunks.len() >= 2);
        for c in &chunks {
            assert_eq!(c.parent_titles, vec!["Heading".to_string()]);
            assert!(c.token_estimate >= 1);
        }
    }

    #[test]
    fn newlines_are_never_collapsed_into_spaces() {
        let d = doc("line one\nline two\n\nparagraph two");
        let chunks = chunk_document(&d);
        assert!(chunks.iter().any(|c| c.text.contains('\n')));
    }
}
