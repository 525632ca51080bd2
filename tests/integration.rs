use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn ctx_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("ctx");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let data_dir = root.join("data");
    fs::create_dir_all(&data_dir).unwrap();

    let files_dir = root.join("files");
    fs::create_dir_all(&files_dir).unwrap();
    fs::write(
        files_dir.join("alpha.md"),
        "# Alpha Document\n\nThis is the alpha document about Rust programming.\n\nIt contains information about cargo and crates.",
    ).unwrap();
    fs::write(
        files_dir.join("beta.md"),
        "# Beta Document\n\nThis document discusses Python and machine learning.\n\nDeep learning frameworks like PyTorch are covered.",
    ).unwrap();
    fs::write(
        files_dir.join("gamma.txt"),
        "Gamma plain text file.\n\nContains notes about deployment and infrastructure.\n\nKubernetes and Docker are mentioned here.",
    ).unwrap();

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

    let config_path = config_dir.join("ctx.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_ctx(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = ctx_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run ctx binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn doc_id_from_ingest_stdout(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .find_map(|l| l.split_whitespace().find(|tok| tok.starts_with("doc_id=")))
        .map(|tok| tok.trim_start_matches("doc_id=").to_string())
}

#[test]
fn test_init_creates_database() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_ctx(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_ctx(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_ctx(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_ingest_directory() {
    let (tmp, config_path) = setup_test_env();

    run_ctx(&config_path, &["init"]);
    let files_dir = tmp.path().join("files");
    let (stdout, stderr, success) = run_ctx(&config_path, &["ingest", files_dir.to_str().unwrap()]);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("3 indexed"), "expected all three files indexed, got: {}", stdout);
    assert!(stdout.contains("3 files"));
}

#[test]
fn test_ingest_idempotent_no_duplicates() {
    let (tmp, config_path) = setup_test_env();
    let files_dir = tmp.path().join("files");

    run_ctx(&config_path, &["init"]);
    let (stdout1, _, _) = run_ctx(&config_path, &["ingest", files_dir.to_str().unwrap()]);
    assert!(stdout1.contains("3 indexed"));

    let (stdout2, _, _) = run_ctx(&config_path, &["ingest", files_dir.to_str().unwrap()]);
    assert!(
        stdout2.contains("3 duplicate"),
        "re-ingesting identical files should report duplicates, got: {}",
        stdout2
    );
}

#[test]
fn test_ingest_single_file() {
    let (tmp, config_path) = setup_test_env();
    let files_dir = tmp.path().join("files");

    run_ctx(&config_path, &["init"]);
    let (stdout, stderr, success) =
        run_ctx(&config_path, &["ingest", files_dir.join("alpha.md").to_str().unwrap()]);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("1 indexed"));
    assert!(stdout.contains("1 files"));
}

#[test]
fn test_chat_keyword_fallback_without_embeddings_or_llm() {
    let (tmp, config_path) = setup_test_env();
    let files_dir = tmp.path().join("files");

    run_ctx(&config_path, &["init"]);
    run_ctx(&config_path, &["ingest", files_dir.to_str().unwrap()]);

    let (stdout, stderr, success) = run_ctx(&config_path, &["chat", "Rust programming cargo crates"]);
    assert!(success, "chat failed: stdout={}, stderr={}", stdout, stderr);
    assert!(
        stdout.contains("confidence:"),
        "expected a confidence summary line, got: {}",
        stdout
    );
}

#[test]
fn test_get_document() {
    let (tmp, config_path) = setup_test_env();
    let files_dir = tmp.path().join("files");

    run_ctx(&config_path, &["init"]);
    let (ingest_out, _, _) = run_ctx(&config_path, &["ingest", files_dir.join("alpha.md").to_str().unwrap()]);
    let doc_id = doc_id_from_ingest_stdout(&ingest_out).expect("ingest should print a doc_id");

    let (stdout, _, success) = run_ctx(&config_path, &["get", &doc_id]);
    assert!(success, "get should succeed");
    assert!(stdout.contains("Document"));
    assert!(stdout.contains(&doc_id));
}

#[test]
fn test_get_missing_document() {
    let (_tmp, config_path) = setup_test_env();

    run_ctx(&config_path, &["init"]);

    let (_, stderr, success) = run_ctx(&config_path, &["get", "nonexistent-id"]);
    assert!(!success, "get with missing ID should fail");
    assert!(
        stderr.contains("not found"),
        "Should report not found, got: {}",
        stderr
    );
}

#[test]
fn test_delete_document() {
    let (tmp, config_path) = setup_test_env();
    let files_dir = tmp.path().join("files");

    run_ctx(&config_path, &["init"]);
    let (ingest_out, _, _) = run_ctx(&config_path, &["ingest", files_dir.join("alpha.md").to_str().unwrap()]);
    let doc_id = doc_id_from_ingest_stdout(&ingest_out).expect("ingest should print a doc_id");

    let (stdout, _, success) = run_ctx(&config_path, &["delete", &doc_id]);
    assert!(success);
    assert!(stdout.contains(&doc_id));

    let (_, stderr, success) = run_ctx(&config_path, &["get", &doc_id]);
    assert!(!success, "deleted document should no longer be gettable");
    assert!(stderr.contains("not found"));
}

#[test]
fn test_delete_missing_document_reports_no_such() {
    let (_tmp, config_path) = setup_test_env();

    run_ctx(&config_path, &["init"]);
    let (stdout, _, success) = run_ctx(&config_path, &["delete", "nonexistent-id"]);
    assert!(success, "delete of a missing id should not error");
    assert!(stdout.contains("No such document"));
}

#[test]
fn test_sources() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_ctx(&config_path, &["sources"]);
    assert!(success);
    assert!(stdout.contains("embedding"));
    assert!(stdout.contains("rerank"));
}

#[test]
fn test_stats_on_empty_database() {
    let (_tmp, config_path) = setup_test_env();

    run_ctx(&config_path, &["init"]);
    let (stdout, stderr, success) = run_ctx(&config_path, &["stats"]);
    assert!(success, "stats failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Documents:    0"));
}

#[test]
fn test_embed_pending_errors_when_disabled() {
    let (_tmp, config_path) = setup_test_env();

    run_ctx(&config_path, &["init"]);
    let (_, stderr, success) = run_ctx(&config_path, &["embed", "pending"]);
    assert!(!success, "embed pending should fail when provider disabled");
    assert!(
        stderr.contains("disabled"),
        "Should mention disabled, got: {}",
        stderr
    );
}

#[test]
fn test_embed_rebuild_errors_when_disabled() {
    let (_tmp, config_path) = setup_test_env();

    run_ctx(&config_path, &["init"]);
    let (_, stderr, success) = run_ctx(&config_path, &["embed", "rebuild"]);
    assert!(!success, "embed rebuild should fail when provider disabled");
    assert!(
        stderr.contains("disabled"),
        "Should mention disabled, got: {}",
        stderr
    );
}

#[test]
fn test_embed_pending_dry_run_errors_when_disabled() {
    let (_tmp, config_path) = setup_test_env();

    run_ctx(&config_path, &["init"]);
    let (_, stderr, success) = run_ctx(&config_path, &["embed", "pending", "--dry-run"]);
    assert!(
        !success,
        "embed pending dry-run with disabled provider should fail"
    );
    assert!(stderr.contains("disabled"));
}

#[test]
fn test_vocab_check_unknown_kind_errors() {
    let (_tmp, config_path) = setup_test_env();

    run_ctx(&config_path, &["init"]);
    let (_, stderr, success) = run_ctx(&config_path, &["vocab", "check", "bogus", "foo/bar"]);
    assert!(!success, "unknown vocab kind should fail");
    assert!(stderr.contains("unknown vocabulary kind"));
}

#[test]
fn test_ocr_queue_list_empty() {
    let (_tmp, config_path) = setup_test_env();

    run_ctx(&config_path, &["init"]);
    let (stdout, stderr, success) = run_ctx(&config_path, &["ocr-queue", "list"]);
    assert!(success, "ocr-queue list failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("OCR queue is empty"));
}

#[test]
fn test_unknown_document_in_thread_errors() {
    let (_tmp, config_path) = setup_test_env();

    run_ctx(&config_path, &["init"]);
    let (_, stderr, success) = run_ctx(&config_path, &["thread", "nonexistent-thread"]);
    assert!(!success, "unknown thread should fail");
    assert!(stderr.contains("not found"));
}
