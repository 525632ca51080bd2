//! Integration tests for multi-format file support (spec §8).
//!
//! Drives the compiled `ctx` binary end to end: `ctx init` to create the
//! database, `ctx ingest <path>` to walk a directory or single file, and
//! `ctx get <doc-id>` to confirm what landed. Covers PDF ingest (§8.1),
//! idempotent re-ingest by content hash (§8.2), corrupt-file handling
//! (§8.3), and Office/docx ingest (§8.5).

use std::fs;
use std::path::Path;
use std::process::Command;
use tempfile::TempDir;

fn ctx_binary() -> std::path::PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop();
    path.pop();
    path.push("ctx");
    path
}

/// Minimal valid PDF containing the text "spec test phrase" (for §8.1).
/// Builds body then xref with correct byte offsets so pdf-extract can parse it.
fn minimal_pdf_with_phrase() -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");
    let o1 = out.len();
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
    let o2 = out.len();
    out.extend_from_slice(b"2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n");
    let o3 = out.len();
    out.extend_from_slice(b"3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >> endobj\n");
    let o4 = out.len();
    out.extend_from_slice(b"4 0 obj << /Length 44 >> stream\nBT /F1 12 Tf 100 700 Td (spec test phrase) Tj ET\nendstream endobj\n");
    let o5 = out.len();
    out.extend_from_slice(
        b"5 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n",
    );
    let xref_start = out.len();
    out.extend_from_slice(b"xref\n0 6\n");
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    out.extend_from_slice(format!("{:010} 00000 n \n", o1).as_bytes());
    out.extend_from_slice(format!("{:010} 00000 n \n", o2).as_bytes());
    out.extend_from_slice(format!("{:010} 00000 n \n", o3).as_bytes());
    out.extend_from_slice(format!("{:010} 00000 n \n", o4).as_bytes());
    out.extend_from_slice(format!("{:010} 00000 n \n", o5).as_bytes());
    out.extend_from_slice(b"trailer << /Size 6 /Root 1 0 R >>\nstartxref\n");
    out.extend_from_slice(format!("{}\n", xref_start).as_bytes());
    out.extend_from_slice(b"%%EOF\n");
    out
}

/// Minimal docx (ZIP) containing word/document.xml with a <w:t> run.
fn minimal_docx_with_text(phrase: &str) -> Vec<u8> {
    use std::io::Write;
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        zip.start_file("word/document.xml", zip::write::SimpleFileOptions::default())
            .unwrap();
        let xml = format!(
            "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body><w:p><w:r><w:t>{}</w:t></w:r></w:p></w:body></w:document>",
            phrase
        );
        zip.write_all(xml.as_bytes()).unwrap();
        zip.finish().unwrap();
    }
    buf
}

fn setup_file_support_env() -> (TempDir, std::path::PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    fs::create_dir_all(root.join("config")).unwrap();
    fs::create_dir_all(root.join("data")).unwrap();
    fs::create_dir_all(root.join("files")).unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/ctx.sqlite"

[chunking]
max_tokens = 700
overlap_tokens = 80

[retrieval]
final_limit = 12

[server]
bind = "127.0.0.1:7331"
"#,
        root.display(),
    );

    fs::write(root.join("config").join("ctx.toml"), config_content).unwrap();
    (tmp, root.join("config").join("ctx.toml"))
}

fn run_ctx(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = ctx_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run ctx: {}", e));
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

/// Extracts the `doc_id=...` token from a `ctx ingest` summary line.
fn doc_id_from_ingest_stdout(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .find_map(|l| l.split_whitespace().find(|tok| tok.starts_with("doc_id=")))
        .map(|tok| tok.trim_start_matches("doc_id=").to_string())
}

// §8.1 — PDF ingest and retrieval via `ctx get`
#[test]
fn file_support_pdf_ingest_and_get() {
    let (_tmp, config_path) = setup_file_support_env();
    let files_dir = _tmp.path().join("files");
    fs::write(files_dir.join("spec.pdf"), minimal_pdf_with_phrase()).unwrap();

    let (stdout, stderr, success) = run_ctx(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);

    let (stdout, stderr, success) = run_ctx(&config_path, &["ingest", files_dir.join("spec.pdf").to_str().unwrap()]);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(
        stdout.contains("indexed"),
        "expected the pdf to be indexed, got: {}",
        stdout
    );

    let doc_id = doc_id_from_ingest_stdout(&stdout).expect("ingest output should contain doc_id");
    let (get_out, _, success) = run_ctx(&config_path, &["get", &doc_id]);
    assert!(success, "get failed");
    assert!(
        get_out.contains("spec test phrase") && get_out.contains("source_kind:   pdf"),
        "expected document body and pdf source_kind, got: {}",
        get_out
    );
}

// §8.2 — Idempotent re-ingest: same bytes twice yields a duplicate the second time.
#[test]
fn file_support_idempotent_reingest() {
    let (_tmp, config_path) = setup_file_support_env();
    let files_dir = _tmp.path().join("files");
    fs::write(files_dir.join("spec.pdf"), minimal_pdf_with_phrase()).unwrap();

    run_ctx(&config_path, &["init"]);
    let target = files_dir.join("spec.pdf");
    let (stdout1, _, success1) = run_ctx(&config_path, &["ingest", target.to_str().unwrap()]);
    let (stdout2, _, success2) = run_ctx(&config_path, &["ingest", target.to_str().unwrap()]);

    assert!(success1 && success2, "both ingests should succeed");
    assert!(stdout1.contains("indexed"), "first ingest: {}", stdout1);
    assert!(
        stdout2.contains("duplicate"),
        "second ingest of identical bytes should be flagged duplicate: {}",
        stdout2
    );
}

// §8.3 — Corrupt PDF: ingest run succeeds overall, failing file reported as extract_failed.
#[test]
fn file_support_corrupt_pdf_reported_as_failed() {
    let (_tmp, config_path) = setup_file_support_env();
    let files_dir = _tmp.path().join("files");
    fs::write(files_dir.join("bad.pdf"), b"not a valid pdf").unwrap();
    fs::write(files_dir.join("good.md"), "# Good\n\nThis is good content for testing.\n").unwrap();

    run_ctx(&config_path, &["init"]);
    let (stdout, stderr, success) = run_ctx(&config_path, &["ingest", files_dir.to_str().unwrap()]);
    assert!(success, "ingest must succeed even with one bad file: stdout={}, stderr={}", stdout, stderr);
    assert!(
        stdout.contains("kind=extract_failed"),
        "expected bad.pdf to be reported as extract_failed, got: {}",
        stdout
    );
    assert!(
        stdout.contains("1 indexed"),
        "good.md should still be indexed: {}",
        stdout
    );
}

// §8.5 — Office format (docx) ingest and retrieval.
#[test]
fn file_support_office_format_docx() {
    let (_tmp, config_path) = setup_file_support_env();
    let files_dir = _tmp.path().join("files");
    fs::write(files_dir.join("spec.docx"), minimal_docx_with_text("office test phrase")).unwrap();

    run_ctx(&config_path, &["init"]);
    let (stdout, stderr, success) =
        run_ctx(&config_path, &["ingest", files_dir.join("spec.docx").to_str().unwrap()]);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("indexed"), "{}", stdout);

    let doc_id = doc_id_from_ingest_stdout(&stdout).expect("ingest output should contain doc_id");
    let (get_out, _, success) = run_ctx(&config_path, &["get", &doc_id]);
    assert!(success);
    assert!(
        get_out.contains("office test phrase") && get_out.contains("source_kind:   office"),
        "expected document body and office source_kind, got: {}",
        get_out
    );
}

// §8.6 — Directory ingest walks every file and reports an aggregate summary.
#[test]
fn file_support_directory_ingest_summary() {
    let (_tmp, config_path) = setup_file_support_env();
    let files_dir = _tmp.path().join("files");
    fs::write(files_dir.join("a.md"), "# A\n\nFirst note with enough content to index.\n").unwrap();
    fs::write(files_dir.join("b.md"), "# B\n\nSecond note with enough content to index.\n").unwrap();
    fs::write(files_dir.join("spec.docx"), minimal_docx_with_text("office test phrase")).unwrap();

    run_ctx(&config_path, &["init"]);
    let (stdout, stderr, success) = run_ctx(&config_path, &["ingest", files_dir.to_str().unwrap()]);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(
        stdout.contains("3 files"),
        "expected the walk to cover all three files, got: {}",
        stdout
    );
}
