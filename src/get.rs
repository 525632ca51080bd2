//! Document, thread, and entity-timeline retrieval (spec §6).
//!
//! Fetches a full document and its chunks from the database, groups
//! documents sharing a `Provenance.thread_id` into a thread view, and
//! walks the `entity_registry` plus matching documents to build a simple
//! timeline for a canonicalized person/place/project name. Used by both
//! the `ctx get`/`ctx thread`/`ctx timeline` CLI commands and the
//! equivalent `document`/`thread`/`entity_timeline` HTTP endpoints.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;
use crate::keyword_index::KeywordIndex;
use crate::models::{EnrichedMetadata, Provenance, Scores};
use crate::vector_index::VectorIndex;

#[derive(Debug, Clone, Serialize)]
pub struct ChunkResponse {
    pub chunk_id: String,
    pub position: i64,
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentResponse {
    pub doc_id: String,
    pub source_kind: String,
    pub gate_kind: String,
    pub title: String,
    pub body: String,
    pub ingested_at: String,
    pub created_at: String,
    pub content_hash: String,
    pub byte_size: i64,
    pub ocr_confidence: Option<f64>,
    pub provenance: Provenance,
    pub metadata: EnrichedMetadata,
    pub scores: Scores,
    pub is_duplicate: bool,
    pub in_canonical: bool,
    pub chunks: Vec<ChunkResponse>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ThreadResponse {
    pub thread_id: String,
    pub documents: Vec<DocumentResponse>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TimelineEntry {
    pub doc_id: String,
    pub title: String,
    pub created_at: String,
    pub gate_kind: String,
    pub snippet: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct EntityTimelineResponse {
    pub kind: String,
    pub canonical_name: String,
    pub first_seen: String,
    pub entries: Vec<TimelineEntry>,
}

struct DocRow {
    doc_id: String,
    source_kind: String,
    gate_kind: String,
    title: String,
    body: String,
    ingested_at: i64,
    created_at: i64,
    content_hash: String,
    byte_size: i64,
    ocr_confidence: Option<f64>,
    provenance_json: String,
    metadata_json: String,
    quality: f64,
    novelty: f64,
    actionability: f64,
    signalness: f64,
    do_index: bool,
    gate_reason: Option<String>,
    is_duplicate: bool,
    in_canonical: bool,
}

const DOC_COLUMNS: &str = "doc_id, source_kind, gate_kind, title, body, ingested_at, created_at, \
     content_hash, byte_size, ocr_confidence, provenance_json, metadata_json, quality, novelty, \
     actionability, signalness, do_index, gate_reason, is_duplicate, in_canonical";

fn row_to_doc_row(row: &sqlx::sqlite::SqliteRow) -> DocRow {
    DocRow {
        doc_id: row.get("doc_id"),
        source_kind: row.get("source_kind"),
        gate_kind: row.get("gate_kind"),
        title: row.get("title"),
        body: row.get("body"),
        ingested_at: row.get("ingested_at"),
        created_at: row.get("created_at"),
        content_hash: row.get("content_hash"),
        byte_size: row.get("byte_size"),
        ocr_confidence: row.get("ocr_confidence"),
        provenance_json: row.get("provenance_json"),
        metadata_json: row.get("metadata_json"),
        quality: row.get("quality"),
        novelty: row.get("novelty"),
        actionability: row.get("actionability"),
        signalness: row.get("signalness"),
        do_index: row.get("do_index"),
        gate_reason: row.get("gate_reason"),
        is_duplicate: row.get("is_duplicate"),
        in_canonical: row.get("in_canonical"),
    }
}

async fn load_chunks(pool: &SqlitePool, doc_id: &str) -> Result<Vec<ChunkResponse>> {
    let rows = sqlx::query("SELECT chunk_id, position, text FROM chunks WHERE doc_id = ? ORDER BY position ASC")
        .bind(doc_id)
        .fetch_all(pool)
        .await?;
    Ok(rows
        .iter()
        .map(|r| ChunkResponse {
            chunk_id: r.get("chunk_id"),
            position: r.get("position"),
            text: r.get("text"),
        })
        .collect())
}

fn into_response(row: DocRow, chunks: Vec<ChunkResponse>) -> DocumentResponse {
    let provenance: Provenance = serde_json::from_str(&row.provenance_json).unwrap_or_default();
    let metadata: EnrichedMetadata = serde_json::from_str(&row.metadata_json).unwrap_or_default();
    DocumentResponse {
        doc_id: row.doc_id,
        source_kind: row.source_kind,
        gate_kind: row.gate_kind,
        title: row.title,
        body: row.body,
        ingested_at: format_ts_iso(row.ingested_at),
        created_at: format_ts_iso(row.created_at),
        content_hash: row.content_hash,
        byte_size: row.byte_size,
        ocr_confidence: row.ocr_confidence,
        provenance,
        metadata,
        scores: Scores {
            quality: row.quality,
            novelty: row.novelty,
            actionability: row.actionability,
            signalness: row.signalness,
            do_index: row.do_index,
            gate_reason: row.gate_reason,
        },
        is_duplicate: row.is_duplicate,
        in_canonical: row.in_canonical,
        chunks,
    }
}

/// `document` operation (spec §6): fetch one document plus its chunks.
pub async fn get_document(pool: &SqlitePool, doc_id: &str) -> Result<DocumentResponse> {
    let query = format!("SELECT {DOC_COLUMNS} FROM documents WHERE doc_id = ?");
    let row = sqlx::query(&query).bind(doc_id).fetch_optional(pool).await?;
    let row = match row {
        Some(r) => r,
        None => bail!("document not found: {doc_id}"),
    };
    let doc_row = row_to_doc_row(&row);
    let chunks = load_chunks(pool, doc_id).await?;
    Ok(into_response(doc_row, chunks))
}

/// `thread` operation (spec §6): every document sharing a `thread_id`,
/// ordered oldest-first.
pub async fn get_thread(pool: &SqlitePool, thread_id: &str) -> Result<ThreadResponse> {
    let query = format!(
        "SELECT {DOC_COLUMNS} FROM documents \
         WHERE json_extract(provenance_json, '$.thread_id') = ? \
         ORDER BY created_at ASC"
    );
    let rows = sqlx::query(&query).bind(thread_id).fetch_all(pool).await?;
    if rows.is_empty() {
        bail!("thread not found: {thread_id}");
    }
    let mut documents = Vec::with_capacity(rows.len());
    for row in &rows {
        let doc_row = row_to_doc_row(row);
        let chunks = load_chunks(pool, &doc_row.doc_id).await?;
        documents.push(into_response(doc_row, chunks));
    }
    Ok(ThreadResponse {
        thread_id: thread_id.to_string(),
        documents,
    })
}

/// `entity_timeline` operation (spec §6): resolve a canonical entity from
/// `entity_registry` and list documents that mention it (by exact name or
/// alias match against `metadata_json`'s people/places/projects arrays),
/// oldest-first.
pub async fn get_entity_timeline(
    pool: &SqlitePool,
    kind: &str,
    canonical_name: &str,
) -> Result<EntityTimelineResponse> {
    let entity = sqlx::query("SELECT canonical_name, aliases_json, first_seen FROM entity_registry WHERE kind = ? AND canonical_name = ?")
        .bind(kind)
        .bind(canonical_name)
        .fetch_optional(pool)
        .await?;
    let entity = match entity {
        Some(e) => e,
        None => bail!("entity not found: {kind}/{canonical_name}"),
    };
    let resolved_name: String = entity.get("canonical_name");
    let aliases_json: String = entity.get("aliases_json");
    let first_seen: i64 = entity.get("first_seen");
    let first_seen = format_ts_iso(first_seen);
    let aliases: Vec<String> = serde_json::from_str(&aliases_json).unwrap_or_default();

    let mut names = vec![resolved_name.clone()];
    names.extend(aliases);

    let field = match kind {
        "person" => "people",
        "place" => "places",
        "project" => "projects",
        "organization" => "organizations",
        _ => "people",
    };

    let query = format!(
        "SELECT doc_id, title, created_at, gate_kind, body FROM documents \
         WHERE EXISTS (\
           SELECT 1 FROM json_each(json_extract(metadata_json, '$.{field}')) je \
           WHERE je.value IN ({placeholders})\
         ) ORDER BY created_at ASC",
        placeholders = names.iter().map(|_| "?").collect::<Vec<_>>().join(",")
    );
    let mut q = sqlx::query(&query);
    for n in &names {
        q = q.bind(n);
    }
    let rows = q.fetch_all(pool).await?;

    let entries = rows
        .iter()
        .map(|r| {
            let body: String = r.get("body");
            let snippet: String = body.chars().take(240).collect();
            TimelineEntry {
                doc_id: r.get("doc_id"),
                title: r.get("title"),
                created_at: format_ts_iso(r.get("created_at")),
                gate_kind: r.get("gate_kind"),
                snippet,
            }
        })
        .collect();

    Ok(EntityTimelineResponse {
        kind: kind.to_string(),
        canonical_name: resolved_name,
        first_seen,
        entries,
    })
}

/// `delete` operation (spec §6): cascading delete of a document, its
/// chunks, and its keyword/vector index entries. Does not remove any
/// matching entry from the OCR queue — a stale entry there is harmless,
/// `next_batch` will simply find nothing left to re-process for it.
/// Returns `false` if the document did not exist.
pub async fn delete_document(pool: &SqlitePool, doc_id: &str) -> Result<bool> {
    let exists: bool = sqlx::query_scalar("SELECT COUNT(*) > 0 FROM documents WHERE doc_id = ?")
        .bind(doc_id)
        .fetch_one(pool)
        .await?;
    if !exists {
        return Ok(false);
    }
    KeywordIndex::new(pool).delete(doc_id).await?;
    VectorIndex::new(pool).delete(doc_id).await?;
    sqlx::query("DELETE FROM chunks WHERE doc_id = ?").bind(doc_id).execute(pool).await?;
    sqlx::query("DELETE FROM documents WHERE doc_id = ?").bind(doc_id).execute(pool).await?;
    Ok(true)
}

/// CLI entry point for `ctx get <doc-id>`.
pub async fn run_get(config: &Config, doc_id: &str) -> Result<()> {
    let pool = db::connect(config).await?;
    let doc = match get_document(&pool, doc_id).await {
        Ok(d) => d,
        Err(e) => {
            pool.close().await;
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };
    pool.close().await;

    println!("--- Document ---");
    println!("doc_id:        {}", doc.doc_id);
    println!("title:         {}", doc.title);
    println!("source_kind:   {}", doc.source_kind);
    println!("gate_kind:     {}", doc.gate_kind);
    println!("created_at:    {}", doc.created_at);
    println!("ingested_at:   {}", doc.ingested_at);
    println!(
        "scores:        quality={:.3} novelty={:.3} actionability={:.3} signalness={:.3}",
        doc.scores.quality, doc.scores.novelty, doc.scores.actionability, doc.scores.signalness
    );
    println!("do_index:      {}", doc.scores.do_index);
    println!("is_duplicate:  {}", doc.is_duplicate);
    println!("in_canonical:  {}", doc.in_canonical);
    println!();

    println!("--- Body ---");
    println!("{}", doc.body);
    println!();

    println!("--- Chunks ({}) ---", doc.chunks.len());
    for chunk in &doc.chunks {
        println!("[chunk {}] {}", chunk.position, chunk.chunk_id);
        println!("{}", chunk.text);
        println!();
    }

    Ok(())
}

fn format_ts_iso(ts: i64) -> String {
    DateTime::<Utc>::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_ts_iso_renders_utc() {
        assert_eq!(format_ts_iso(0), "1970-01-01T00:00:00Z");
    }
}
