//! Multi-format text extraction for binary documents (PDF, OOXML), and the
//! [`DocumentSource`] capability surface over all nine source kinds (spec
//! §4.2, C2).
//!
//! The low-level PDF/OOXML byte-stream parsers below predate the
//! `DocumentSource` trait and are kept as the binary-format backend that
//! [`OfficeSource`] and [`PdfSource`] call into.

use std::io::Read;
use std::path::Path;

use crate::models::{Provenance, SourceKind};

/// Supported MIME types for extraction (spec §1.1).
pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_PPTX: &str =
    "application/vnd.openxmlformats-officedocument.presentationml.presentation";
pub const MIME_XLSX: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

/// Maximum sheets to process in an xlsx (spec §5.2: implementation MAY limit).
const XLSX_MAX_SHEETS: usize = 100;
/// Maximum cells to process per sheet (avoids unbounded memory).
const XLSX_MAX_CELLS_PER_SHEET: usize = 100_000;
/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Extraction error (spec §5.1: no panic; return error and pipeline skips item).
#[derive(Debug)]
pub enum ExtractError {
    UnsupportedContentType(String),
    Pdf(String),
    Ooxml(String),
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractError::UnsupportedContentType(ct) => {
                write!(f, "unsupported content-type: {}", ct)
            }
            ExtractError::Pdf(e) => write!(f, "PDF extraction failed: {}", e),
            ExtractError::Ooxml(e) => write!(f, "OOXML extraction failed: {}", e),
        }
    }
}

impl std::error::Error for ExtractError {}

/// Extracts plain text from binary content. Returns UTF-8 string or error (spec §5, §6).
pub fn extract_text(bytes: &[u8], content_type: &str) -> Result<String, ExtractError> {
    match content_type {
        MIME_PDF => extract_pdf(bytes),
        MIME_DOCX => extract_docx(bytes),
        MIME_PPTX => extract_pptx(bytes),
        MIME_XLSX => extract_xlsx(bytes),
        _ => Err(ExtractError::UnsupportedContentType(
            content_type.to_string(),
        )),
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}

fn read_zip_entry_bounded(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    if out.len() as u64 >= max_bytes {
        return Err(ExtractError::Ooxml(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        )));
    }
    Ok(out)
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    let mut doc_xml = Vec::new();
    let mut found = false;
    for i in 0..archive.len() {
        let entry = archive
            .by_index(i)
            .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
        if entry.name() == "word/document.xml" {
            entry
                .take(MAX_XML_ENTRY_BYTES)
                .read_to_end(&mut doc_xml)
                .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
            if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
                return Err(ExtractError::Ooxml(
                    "word/document.xml exceeds size limit".to_string(),
                ));
            }
            found = true;
            break;
        }
    }
    if !found {
        return Err(ExtractError::Ooxml(
            "word/document.xml not found".to_string(),
        ));
    }
    extract_w_t_elements(&doc_xml)
}

fn extract_w_t_elements(xml: &[u8]) -> Result<String, ExtractError> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                let name = e.local_name();
                if name.as_ref() == b"t" {
                    if let Ok(quick_xml::events::Event::Text(te)) = reader.read_event_into(&mut buf)
                    {
                        out.push_str(te.unescape().unwrap_or_default().as_ref());
                    }
                }
            }
            Ok(quick_xml::events::Event::Empty(e)) => {
                if e.local_name().as_ref() == b"t" {
                    // empty t, nothing to add
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

fn extract_pptx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    let mut slide_names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("ppt/slides/slide") && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    slide_names.sort_by_key(|name| {
        name.trim_start_matches("ppt/slides/slide")
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    let mut out = String::new();
    for name in slide_names {
        let xml = read_zip_entry_bounded(&mut archive, &name, MAX_XML_ENTRY_BYTES)?;
        let text = extract_a_t_elements(&xml)?;
        if !out.is_empty() && !text.is_empty() {
            out.push(' ');
        }
        out.push_str(&text);
    }
    Ok(out)
}

fn extract_a_t_elements(xml: &[u8]) -> Result<String, ExtractError> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if e.local_name().as_ref() == b"t" {
                    if let Ok(quick_xml::events::Event::Text(te)) = reader.read_event_into(&mut buf)
                    {
                        out.push_str(te.unescape().unwrap_or_default().as_ref());
                    }
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

fn extract_xlsx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    let shared_strings = read_shared_strings(&mut archive)?;
    let sheet_names = list_worksheet_names(&mut archive)?;
    let mut out = String::new();
    for (idx, name) in sheet_names.into_iter().take(XLSX_MAX_SHEETS).enumerate() {
        let sheet_xml = read_zip_entry_bounded(&mut archive, &name, MAX_XML_ENTRY_BYTES)?;
        let cell_texts = extract_xlsx_sheet_cells(&sheet_xml, &shared_strings)?;
        if idx > 0 && !out.is_empty() {
            out.push(' ');
        }
        out.push_str(&cell_texts);
    }
    Ok(out)
}

fn read_shared_strings(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
) -> Result<Vec<String>, ExtractError> {
    let xml = read_zip_entry_bounded(archive, "xl/sharedStrings.xml", MAX_XML_ENTRY_BYTES)?;
    let mut strings = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut in_si = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if e.local_name().as_ref() == b"si" {
                    in_si = true;
                } else if in_si && e.local_name().as_ref() == b"t" {
                    if let Ok(quick_xml::events::Event::Text(te)) = reader.read_event_into(&mut buf)
                    {
                        strings.push(te.unescape().unwrap_or_default().into_owned());
                    }
                }
            }
            Ok(quick_xml::events::Event::End(e)) => {
                if e.local_name().as_ref() == b"si" {
                    in_si = false;
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

fn list_worksheet_names(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
) -> Result<Vec<String>, ExtractError> {
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("xl/worksheets/sheet") && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    names.sort_by_key(|name| {
        name.trim_start_matches("xl/worksheets/sheet")
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    Ok(names)
}

fn extract_xlsx_sheet_cells(xml: &[u8], shared_strings: &[String]) -> Result<String, ExtractError> {
    let mut cells: Vec<String> = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut in_v = false;
    let mut cell_is_shared_str = false;
    let mut cell_count = 0usize;
    loop {
        if cell_count >= XLSX_MAX_CELLS_PER_SHEET {
            break;
        }
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if e.local_name().as_ref() == b"c" {
                    cell_is_shared_str = e.attributes().any(|a| {
                        a.as_ref()
                            .map(|a| a.key.as_ref() == b"t" && a.value.as_ref() == b"s")
                            .unwrap_or(false)
                    });
                } else if e.local_name().as_ref() == b"v" {
                    in_v = true;
                }
            }
            Ok(quick_xml::events::Event::Text(te)) if in_v => {
                let v = te.unescape().unwrap_or_default();
                let s = v.trim();
                if !s.is_empty() && cell_is_shared_str {
                    if let Ok(i) = s.parse::<usize>() {
                        if i < shared_strings.len() {
                            cells.push(shared_strings[i].clone());
                            cell_count += 1;
                        }
                    }
                }
                in_v = false;
            }
            Ok(quick_xml::events::Event::End(e)) => {
                if e.local_name().as_ref() == b"v" {
                    in_v = false;
                } else if e.local_name().as_ref() == b"c" {
                    cell_is_shared_str = false;
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(cells.join(" "))
}

/// Sentinel markers that delimit a region excluded from all downstream
/// processing (spec §4.2).
const IGNORE_START: &str = "<!-- RAG:IGNORE-START -->";
const IGNORE_END: &str = "<!-- RAG:IGNORE-END -->";

/// Strips `<!-- RAG:IGNORE-START --> ... <!-- RAG:IGNORE-END -->` regions.
/// Unmatched/dangling markers are left in place rather than silently
/// dropping the remainder of the document.
pub fn strip_ignored_regions(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    loop {
        match rest.find(IGNORE_START) {
            Some(start) => {
                out.push_str(&rest[..start]);
                match rest[start..].find(IGNORE_END) {
                    Some(end_rel) => {
                        let end = start + end_rel + IGNORE_END.len();
                        rest = &rest[end..];
                    }
                    None => {
                        out.push_str(&rest[start..]);
                        break;
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

/// Result of [`DocumentSource::extract`]: normalized text plus provenance
/// metadata and, for OCR-derived text, a confidence score (spec §4.2).
pub struct ExtractedDocument {
    pub text: String,
    pub provenance: Provenance,
    pub ocr_confidence: Option<f64>,
}

/// Hints passed alongside raw bytes to guide `detect`/`extract` (spec
/// §4.2: "tagged by MIME/extension").
#[derive(Debug, Clone, Default)]
pub struct SourceHint<'a> {
    pub mime_type: Option<&'a str>,
    pub filename: Option<&'a str>,
}

/// `{detect, extract}` capability set (spec §4.2). One implementation per
/// coarse [`SourceKind`]; the core dispatches on the kind `detect` returns
/// rather than duck-typing on file content.
pub trait DocumentSource: Send + Sync {
    fn kind(&self) -> SourceKind;
    fn detect(&self, hint: &SourceHint) -> bool;
    fn extract(&self, bytes: &[u8], hint: &SourceHint) -> Result<ExtractedDocument, ExtractError>;
}

fn ext_of(filename: Option<&str>) -> Option<String> {
    filename
        .and_then(|f| Path::new(f).extension())
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
}

fn decode_utf8_lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

pub struct TextSource;

impl DocumentSource for TextSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Text
    }

    fn detect(&self, hint: &SourceHint) -> bool {
        hint.mime_type == Some("text/plain")
            || matches!(ext_of(hint.filename).as_deref(), Some("txt") | Some("log") | Some("csv"))
    }

    fn extract(&self, bytes: &[u8], _hint: &SourceHint) -> Result<ExtractedDocument, ExtractError> {
        Ok(ExtractedDocument {
            text: strip_ignored_regions(&decode_utf8_lossy(bytes)),
            provenance: Provenance::default(),
            ocr_confidence: None,
        })
    }
}

pub struct MarkdownSource;

impl DocumentSource for MarkdownSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Markdown
    }

    fn detect(&self, hint: &SourceHint) -> bool {
        hint.mime_type == Some("text/markdown")
            || matches!(ext_of(hint.filename).as_deref(), Some("md") | Some("markdown"))
    }

    fn extract(&self, bytes: &[u8], _hint: &SourceHint) -> Result<ExtractedDocument, ExtractError> {
        Ok(ExtractedDocument {
            text: strip_ignored_regions(&decode_utf8_lossy(bytes)),
            provenance: Provenance::default(),
            ocr_confidence: None,
        })
    }
}

pub struct PdfSource;

impl DocumentSource for PdfSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Pdf
    }

    fn detect(&self, hint: &SourceHint) -> bool {
        hint.mime_type == Some(MIME_PDF) || ext_of(hint.filename).as_deref() == Some("pdf")
    }

    fn extract(&self, bytes: &[u8], _hint: &SourceHint) -> Result<ExtractedDocument, ExtractError> {
        let text = extract_pdf(bytes)?;
        // Born-digital PDFs yield full confidence; a blank/near-blank
        // extraction signals a scanned (image-only) page that needs OCR,
        // queued by the caller via ocr_queue rather than blocked here.
        let ocr_confidence = if text.trim().len() < 20 { Some(0.0) } else { None };
        Ok(ExtractedDocument {
            text: strip_ignored_regions(&text),
            provenance: Provenance::default(),
            ocr_confidence,
        })
    }
}

pub struct OfficeSource;

impl DocumentSource for OfficeSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Office
    }

    fn detect(&self, hint: &SourceHint) -> bool {
        matches!(hint.mime_type, Some(MIME_DOCX) | Some(MIME_PPTX) | Some(MIME_XLSX))
            || matches!(ext_of(hint.filename).as_deref(), Some("docx") | Some("pptx") | Some("xlsx"))
    }

    fn extract(&self, bytes: &[u8], hint: &SourceHint) -> Result<ExtractedDocument, ExtractError> {
        let ext = ext_of(hint.filename);
        let text = match (hint.mime_type, ext.as_deref()) {
            (Some(MIME_DOCX), _) | (_, Some("docx")) => extract_docx(bytes)?,
            (Some(MIME_PPTX), _) | (_, Some("pptx")) => extract_pptx(bytes)?,
            (Some(MIME_XLSX), _) | (_, Some("xlsx")) => extract_xlsx(bytes)?,
            _ => return Err(ExtractError::UnsupportedContentType("unknown office format".to_string())),
        };
        Ok(ExtractedDocument {
            text: strip_ignored_regions(&text),
            provenance: Provenance::default(),
            ocr_confidence: None,
        })
    }
}

/// Single message or thread (spec §4.2: "preserves headers and reply
/// structure"). Expects a minimal RFC 5322-ish header block followed by a
/// blank line and the body, which is the shape produced by `.eml` exports
/// and most mailbox-to-file dumps.
pub struct EmailSource;

impl DocumentSource for EmailSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Email
    }

    fn detect(&self, hint: &SourceHint) -> bool {
        hint.mime_type == Some("message/rfc822") || ext_of(hint.filename).as_deref() == Some("eml")
    }

    fn extract(&self, bytes: &[u8], _hint: &SourceHint) -> Result<ExtractedDocument, ExtractError> {
        let raw = decode_utf8_lossy(bytes);
        let (headers, body) = match raw.split_once("\n\n") {
            Some((h, b)) => (h, b),
            None => ("", raw.as_str()),
        };
        let mut subject = None;
        let mut message_id = None;
        let mut in_reply_to = None;
        let mut references = Vec::new();
        for line in headers.lines() {
            if let Some(v) = line.strip_prefix("Subject:") {
                subject = Some(v.trim().to_string());
            } else if let Some(v) = line.strip_prefix("Message-Id:").or_else(|| line.strip_prefix("Message-ID:")) {
                message_id = Some(v.trim().to_string());
            } else if let Some(v) = line.strip_prefix("In-Reply-To:") {
                in_reply_to = Some(v.trim().to_string());
            } else if let Some(v) = line.strip_prefix("References:") {
                references = v.split_whitespace().map(str::to_string).collect();
            }
        }
        let thread_id = subject.as_deref().map(normalized_subject_hash);
        Ok(ExtractedDocument {
            text: strip_ignored_regions(body),
            provenance: Provenance {
                message_id,
                in_reply_to,
                references,
                thread_id,
                ..Default::default()
            },
            ocr_confidence: None,
        })
    }
}

/// `thread_id = MD5 of normalized subject` (spec §4.2). We use MD5 here
/// specifically because the spec pins the digest algorithm; elsewhere the
/// crate's content hashing uses SHA-256.
fn normalized_subject_hash(subject: &str) -> String {
    let mut s = subject.trim();
    loop {
        let lower = s.to_lowercase();
        if lower.starts_with("re:") {
            s = s[3..].trim_start();
        } else if lower.starts_with("fwd:") {
            s = s[4..].trim_start();
        } else {
            break;
        }
    }
    let normalized = s.to_lowercase();
    format!("{:x}", md5::compute(normalized.as_bytes()))
}

/// LLM conversation transcripts with simple `Role: text` turn detection
/// (spec §4.2).
pub struct ChatSource;

impl DocumentSource for ChatSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Chat
    }

    fn detect(&self, hint: &SourceHint) -> bool {
        ext_of(hint.filename).as_deref() == Some("chatlog")
    }

    fn extract(&self, bytes: &[u8], _hint: &SourceHint) -> Result<ExtractedDocument, ExtractError> {
        let raw = decode_utf8_lossy(bytes);
        let mut out = String::new();
        for line in raw.lines() {
            let trimmed = line.trim_start();
            if trimmed.starts_with("User:") || trimmed.starts_with("Assistant:") || trimmed.starts_with("System:") {
                out.push_str(trimmed);
                out.push('\n');
            } else if !trimmed.is_empty() {
                out.push_str(line);
                out.push('\n');
            } else {
                out.push('\n');
            }
        }
        Ok(ExtractedDocument {
            text: strip_ignored_regions(&out),
            provenance: Provenance::default(),
            ocr_confidence: None,
        })
    }
}

/// WhatsApp daily-bundle export parsing (spec §4.2): lines of the form
/// `DD/MM/YYYY, HH:MM - Sender: message`, normalized to ISO timestamps.
pub struct WhatsAppSource;

impl DocumentSource for WhatsAppSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Chat
    }

    fn detect(&self, hint: &SourceHint) -> bool {
        ext_of(hint.filename).as_deref() == Some("txt")
            && hint.filename.map(|f| f.to_lowercase().contains("whatsapp")).unwrap_or(false)
    }

    fn extract(&self, bytes: &[u8], _hint: &SourceHint) -> Result<ExtractedDocument, ExtractError> {
        let raw = decode_utf8_lossy(bytes);
        let mut out = String::new();
        for line in raw.lines() {
            match parse_whatsapp_line(line) {
                Some((ts, sender, message)) => {
                    out.push_str(&format!("[{ts}] {sender}: {message}\n"));
                }
                None => {
                    out.push_str(line);
                    out.push('\n');
                }
            }
        }
        Ok(ExtractedDocument {
            text: strip_ignored_regions(&out),
            provenance: Provenance::default(),
            ocr_confidence: None,
        })
    }
}

fn parse_whatsapp_line(line: &str) -> Option<(String, String, String)> {
    let (prefix, rest) = line.split_once(" - ")?;
    let (date_part, time_part) = prefix.split_once(", ")?;
    let mut date_fields = date_part.split('/');
    let day: u32 = date_fields.next()?.parse().ok()?;
    let month: u32 = date_fields.next()?.parse().ok()?;
    let year: i32 = date_fields.next()?.parse().ok()?;
    let year = if year < 100 { 2000 + year } else { year };
    let (sender, message) = rest.split_once(": ")?;
    Some((
        format!("{year:04}-{month:02}-{day:02}T{}", time_part.trim()),
        sender.to_string(),
        message.to_string(),
    ))
}

/// Image-derived text via OCR. `extract` does not perform OCR inline (the
/// crate has no bundled OCR engine); it hands back an empty body with
/// `ocr_confidence = 0.0` so the ingestion pipeline enqueues the document
/// in [`crate::ocr_queue`] for async processing (spec §4.2/§4.3).
pub struct ImageSource;

impl DocumentSource for ImageSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Image
    }

    fn detect(&self, hint: &SourceHint) -> bool {
        matches!(
            ext_of(hint.filename).as_deref(),
            Some("png") | Some("jpg") | Some("jpeg") | Some("tiff") | Some("webp")
        )
    }

    fn extract(&self, _bytes: &[u8], _hint: &SourceHint) -> Result<ExtractedDocument, ExtractError> {
        Ok(ExtractedDocument {
            text: String::new(),
            provenance: Provenance::default(),
            ocr_confidence: Some(0.0),
        })
    }
}

/// Default registry of [`DocumentSource`] implementations, consulted in
/// order; the first whose `detect` returns true wins.
pub fn default_sources() -> Vec<Box<dyn DocumentSource>> {
    vec![
        Box::new(EmailSource),
        Box::new(WhatsAppSource),
        Box::new(ChatSource),
        Box::new(MarkdownSource),
        Box::new(PdfSource),
        Box::new(OfficeSource),
        Box::new(ImageSource),
        Box::new(TextSource),
    ]
}

/// `detect(mime, bytes, hint) -> kind` (spec §4.2). Returns `None` when no
/// registered source claims the hint; the pipeline records `parse_failed`.
pub fn detect_source<'a>(
    sources: &'a [Box<dyn DocumentSource>],
    hint: &SourceHint,
) -> Option<&'a dyn DocumentSource> {
    sources.iter().find(|s| s.detect(hint)).map(|s| s.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_content_type_returns_error() {
        let err = extract_text(b"foo", "application/octet-stream").unwrap_err();
        assert!(matches!(err, ExtractError::UnsupportedContentType(_)));
    }

    #[test]
    fn invalid_pdf_returns_error() {
        let err = extract_text(b"not a pdf", MIME_PDF).unwrap_err();
        assert!(matches!(err, ExtractError::Pdf(_)));
    }

    #[test]
    fn invalid_zip_returns_error_for_docx() {
        let err = extract_text(b"not a zip", MIME_DOCX).unwrap_err();
        assert!(matches!(err, ExtractError::Ooxml(_)));
    }

    #[test]
    fn strip_ignored_regions_removes_marked_block() {
        let text = "keep this\n<!-- RAG:IGNORE-START -->\nsecret\n<!-- RAG:IGNORE-END -->\nand this";
        let out = strip_ignored_regions(text);
        assert!(!out.contains("secret"));
        assert!(out.contains("keep this"));
        assert!(out.contains("and this"));
    }

    #[test]
    fn email_source_extracts_thread_id_and_strips_re_prefix() {
        let raw = "Subject: Re: Budget review\nMessage-Id: <abc@x>\n\nLet's talk numbers.";
        let hint = SourceHint { mime_type: Some("message/rfc822"), filename: Some("a.eml") };
        let doc = EmailSource.extract(raw.as_bytes(), &hint).unwrap();
        assert_eq!(doc.provenance.message_id.as_deref(), Some("<abc@x>"));
        assert!(doc.provenance.thread_id.is_some());
        assert_eq!(doc.text.trim(), "Let's talk numbers.");
    }

    #[test]
    fn email_thread_id_ignores_reply_prefix_differences() {
        let a = normalized_subject_hash("Re: Budget review");
        let b = normalized_subject_hash("Fwd: Re: Budget review");
        let c = normalized_subject_hash("budget review");
        assert_eq!(a, b);
        assert_eq!(a, c);
    }

    #[test]
    fn whatsapp_source_normalizes_timestamp() {
        let raw = "12/05/2024, 14:32 - Alice: see you then";
        let hint = SourceHint { mime_type: None, filename: Some("whatsapp-chat.txt") };
        let doc = WhatsAppSource.extract(raw.as_bytes(), &hint).unwrap();
        assert!(doc.text.contains("2024-05-12T14:32"));
        assert!(doc.text.contains("Alice: see you then"));
    }

    #[test]
    fn image_source_yields_zero_confidence_pending_ocr() {
        let hint = SourceHint { mime_type: None, filename: Some("scan.png") };
        let doc = ImageSource.extract(b"\x89PNG", &hint).unwrap();
        assert_eq!(doc.ocr_confidence, Some(0.0));
        assert!(doc.text.is_empty());
    }

    #[test]
    fn detect_source_picks_email_over_text() {
        let sources = default_sources();
        let hint = SourceHint { mime_type: None, filename: Some("msg.eml") };
        let source = detect_source(&sources, &hint).unwrap();
        assert_eq!(source.kind(), SourceKind::Email);
    }
}
