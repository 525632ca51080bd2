//! Database schema migrations.
//!
//! Creates all tables needed by the ingestion/retrieval pipeline
//! (documents, chunks, chunks_fts, chunk_vectors, entity_registry) and
//! ensures idempotent execution. Run via `ctx init`.
//!
//! The OCR queue is persisted to a JSON file rather than SQLite, see
//! [`crate::ocr_queue`]. The cost ledger ([`crate::llm::LlmDispatcher`])
//! is in-memory only, scoped to one process's daily budget tracking; it
//! is not persisted across restarts.

use anyhow::Result;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            doc_id TEXT PRIMARY KEY,
            source_kind TEXT NOT NULL,
            gate_kind TEXT NOT NULL,
            title TEXT NOT NULL,
            body TEXT NOT NULL,
            ingested_at INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            content_hash TEXT NOT NULL,
            byte_size INTEGER NOT NULL,
            ocr_confidence REAL,
            provenance_json TEXT NOT NULL DEFAULT '{}',
            metadata_json TEXT NOT NULL DEFAULT '{}',
            quality REAL NOT NULL DEFAULT 0,
            novelty REAL NOT NULL DEFAULT 0,
            actionability REAL NOT NULL DEFAULT 0,
            signalness REAL NOT NULL DEFAULT 0,
            do_index INTEGER NOT NULL DEFAULT 0,
            gate_reason TEXT,
            is_duplicate INTEGER NOT NULL DEFAULT 0,
            in_canonical INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            chunk_id TEXT PRIMARY KEY,
            doc_id TEXT NOT NULL,
            position INTEGER NOT NULL,
            text TEXT NOT NULL,
            token_estimate INTEGER NOT NULL,
            kind TEXT NOT NULL,
            parent_titles_json TEXT NOT NULL DEFAULT '[]',
            topics_json TEXT NOT NULL DEFAULT '[]',
            title TEXT NOT NULL,
            quality_score REAL NOT NULL DEFAULT 0,
            signalness REAL NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            source_kind TEXT NOT NULL,
            UNIQUE(doc_id, position),
            FOREIGN KEY (doc_id) REFERENCES documents(doc_id)
        )
        "#,
    )
    .execute(&pool)
    .await?;

    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='chunks_fts'",
    )
    .fetch_one(&pool)
    .await?;

    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE chunks_fts USING fts5(
                chunk_id UNINDEXED,
                doc_id UNINDEXED,
                text
            )
            "#,
        )
        .execute(&pool)
        .await?;
    }

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunk_vectors (
            chunk_id TEXT PRIMARY KEY,
            doc_id TEXT NOT NULL,
            model TEXT NOT NULL,
            dims INTEGER NOT NULL,
            embedding BLOB NOT NULL,
            FOREIGN KEY (chunk_id) REFERENCES chunks(chunk_id),
            FOREIGN KEY (doc_id) REFERENCES documents(doc_id)
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // Cross-document entity canonicalization registry (spec §9: "arena +
    // indices" instead of a cyclic entity graph). Append-only; mentions
    // hold the registry row id.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS entity_registry (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            kind TEXT NOT NULL,
            canonical_name TEXT NOT NULL,
            aliases_json TEXT NOT NULL DEFAULT '[]',
            first_seen INTEGER NOT NULL,
            UNIQUE(kind, canonical_name)
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_doc_id ON chunks(doc_id)")
        .execute(&pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_content_hash ON documents(content_hash)")
        .execute(&pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_canonical ON documents(in_canonical)")
        .execute(&pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_chunk_vectors_doc_id ON chunk_vectors(doc_id)",
    )
    .execute(&pool)
    .await?;

    pool.close().await;
    Ok(())
}
