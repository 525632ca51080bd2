//! Knowledge-note export: render documents as `<doc-id>.md` files with a
//! YAML front-matter header, and export the full index as JSON for
//! external search tooling.
//!
//! The front-matter format satisfies the "Document file format" contract
//! used by downstream static-site search (`ctx-search.js`-style consumers).

use anyhow::Result;
use serde::Serialize;
use sqlx::Row;
use std::path::Path;

use crate::config::Config;
use crate::db;

#[derive(Serialize)]
struct ExportData {
    documents: Vec<ExportDocument>,
    chunks: Vec<ExportChunk>,
}

#[derive(Serialize)]
struct ExportDocument {
    doc_id: String,
    source_kind: String,
    gate_kind: String,
    title: String,
    created_at: i64,
    signalness: f64,
    in_canonical: bool,
    body: String,
}

#[derive(Serialize)]
struct ExportChunk {
    chunk_id: String,
    doc_id: String,
    position: i64,
    text: String,
}

/// Export documents and chunks as JSON, for static-site search consumers.
///
/// If `output` is `Some`, writes to that file path. Otherwise writes to
/// stdout for piping.
pub async fn run_export(config: &Config, output: Option<&Path>) -> Result<()> {
    let pool = db::connect(config).await?;

    let doc_rows = sqlx::query(
        "SELECT doc_id, source_kind, gate_kind, title, created_at, signalness, in_canonical, body \
         FROM documents ORDER BY created_at",
    )
    .fetch_all(&pool)
    .await?;

    let chunk_rows = sqlx::query(
        "SELECT chunk_id, doc_id, position, text FROM chunks ORDER BY doc_id, position",
    )
    .fetch_all(&pool)
    .await?;

    let documents: Vec<ExportDocument> = doc_rows
        .iter()
        .map(|row| ExportDocument {
            doc_id: row.get("doc_id"),
            source_kind: row.get("source_kind"),
            gate_kind: row.get("gate_kind"),
            title: row.get("title"),
            created_at: row.get("created_at"),
            signalness: row.get("signalness"),
            in_canonical: row.get("in_canonical"),
            body: row.get("body"),
        })
        .collect();

    let chunks: Vec<ExportChunk> = chunk_rows
        .iter()
        .map(|row| ExportChunk {
            chunk_id: row.get("chunk_id"),
            doc_id: row.get("doc_id"),
            position: row.get("position"),
            text: row.get("text"),
        })
        .collect();

    let doc_count = documents.len();
    let chunk_count = chunks.len();

    let data = ExportData { documents, chunks };
    let json = serde_json::to_string_pretty(&data)?;

    match output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, &json)?;
            eprintln!(
                "Exported {} documents, {} chunks to {}",
                doc_count,
                chunk_count,
                path.display()
            );
        }
        None => {
            println!("{}", json);
        }
    }

    pool.close().await;
    Ok(())
}

/// Render a single document as a knowledge note: YAML front-matter (title,
/// source_kind, gate_kind, created_at, topics, people, signalness) followed
/// by the document body. Written to `<dir>/<doc-id>.md`.
pub async fn export_knowledge_note(config: &Config, doc_id: &str, dir: &Path) -> Result<std::path::PathBuf> {
    let pool = db::connect(config).await?;
    let row = sqlx::query(
        "SELECT doc_id, source_kind, gate_kind, title, created_at, signalness, metadata_json, body \
         FROM documents WHERE doc_id = ?",
    )
    .bind(doc_id)
    .fetch_optional(&pool)
    .await?;
    pool.close().await;

    let row = match row {
        Some(r) => r,
        None => anyhow::bail!("document not found: {doc_id}"),
    };

    let title: String = row.get("title");
    let source_kind: String = row.get("source_kind");
    let gate_kind: String = row.get("gate_kind");
    let created_at: i64 = row.get("created_at");
    let signalness: f64 = row.get("signalness");
    let metadata_json: String = row.get("metadata_json");
    let body: String = row.get("body");
    let metadata: crate::models::EnrichedMetadata =
        serde_json::from_str(&metadata_json).unwrap_or_default();

    let created_iso = chrono::DateTime::from_timestamp(created_at, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| created_at.to_string());

    let front_matter = format!(
        "---\ntitle: {title:?}\nsource_kind: {source_kind}\ngate_kind: {gate_kind}\ncreated_at: {created_iso}\nsignalness: {signalness}\ntopics: {topics:?}\npeople: {people:?}\n---\n\n",
        topics = metadata.topics,
        people = metadata.people,
    );

    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("{doc_id}.md"));
    std::fs::write(&path, format!("{front_matter}{body}\n"))?;
    Ok(path)
}
