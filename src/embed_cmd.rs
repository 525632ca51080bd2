//! Embedding backfill commands: `ctx embed pending` and `ctx embed rebuild`.
//!
//! Chunks are immutable once written (a changed document gets a new
//! `doc_id`, spec §3 Lifecycle), so "pending" is simply: which chunks
//! have no row in `chunk_vectors` for the currently configured model.
//! `rebuild` drops every vector for that model and recomputes from
//! scratch — useful after switching embedding models.

use anyhow::{bail, Result};
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;
use crate::embedding;
use crate::vector_index::VectorIndex;

struct PendingChunk {
    chunk_id: String,
    doc_id: String,
    text: String,
}

async fn find_pending_chunks(pool: &SqlitePool, model: &str, limit: Option<usize>) -> Result<Vec<PendingChunk>> {
    let limit_val = limit.map(|l| l as i64).unwrap_or(-1);
    let rows = sqlx::query(
        r#"
        SELECT c.chunk_id, c.doc_id, c.text
        FROM chunks c
        LEFT JOIN chunk_vectors cv ON cv.chunk_id = c.chunk_id AND cv.model = ?
        WHERE cv.chunk_id IS NULL
        ORDER BY c.doc_id, c.position
        LIMIT ?
        "#,
    )
    .bind(model)
    .bind(limit_val)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| PendingChunk {
            chunk_id: row.get("chunk_id"),
            doc_id: row.get("doc_id"),
            text: row.get("text"),
        })
        .collect())
}

async fn embed_batch(
    config: &Config,
    pool: &SqlitePool,
    provider: &dyn embedding::EmbeddingProvider,
    model_name: &str,
    batch: &[PendingChunk],
) -> (u64, u64) {
    let texts: Vec<String> = batch.iter().map(|p| p.text.clone()).collect();
    let vector_index = VectorIndex::new(pool);

    match embedding::embed_texts(provider, &config.embedding, &texts).await {
        Ok(vectors) => {
            let mut embedded = 0u64;
            let mut failed = 0u64;
            for (item, vec) in batch.iter().zip(vectors.iter()) {
                match vector_index.add(&item.chunk_id, &item.doc_id, model_name, vec).await {
                    Ok(()) => embedded += 1,
                    Err(e) => {
                        eprintln!("Warning: failed to store embedding for {}: {}", item.chunk_id, e);
                        failed += 1;
                    }
                }
            }
            (embedded, failed)
        }
        Err(e) => {
            eprintln!("Warning: embedding batch failed: {}", e);
            (0, batch.len() as u64)
        }
    }
}

/// Find and embed chunks that have no vector yet for the configured model.
pub async fn run_embed_pending(
    config: &Config,
    limit: Option<usize>,
    batch_size_override: Option<usize>,
    dry_run: bool,
) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }

    let provider = embedding::create_provider(&config.embedding)?;
    let model_name = provider.model_name().to_string();
    let pool = db::connect(config).await?;
    let batch_size = batch_size_override.unwrap_or(config.embedding.batch_size);

    let pending = find_pending_chunks(&pool, &model_name, limit).await?;

    if dry_run {
        println!("embed pending (dry-run)");
        println!("  chunks needing embeddings: {}", pending.len());
        pool.close().await;
        return Ok(());
    }

    if pending.is_empty() {
        println!("embed pending");
        println!("  all chunks up to date");
        pool.close().await;
        return Ok(());
    }

    let total = pending.len();
    let mut embedded = 0u64;
    let mut failed = 0u64;
    for batch in pending.chunks(batch_size) {
        let (e, f) = embed_batch(config, &pool, provider.as_ref(), &model_name, batch).await;
        embedded += e;
        failed += f;
    }

    println!("embed pending");
    println!("  total pending: {}", total);
    println!("  embedded: {}", embedded);
    println!("  failed: {}", failed);

    pool.close().await;
    Ok(())
}

/// Delete every vector for the configured model and regenerate from scratch.
pub async fn run_embed_rebuild(config: &Config, batch_size_override: Option<usize>) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }

    let provider = embedding::create_provider(&config.embedding)?;
    let model_name = provider.model_name().to_string();
    let pool = db::connect(config).await?;
    let batch_size = batch_size_override.unwrap_or(config.embedding.batch_size);

    sqlx::query("DELETE FROM chunk_vectors WHERE model = ?")
        .bind(&model_name)
        .execute(&pool)
        .await?;
    println!("embed rebuild — cleared existing vectors for model {model_name}");

    let all_chunks = find_pending_chunks(&pool, &model_name, None).await?;
    if all_chunks.is_empty() {
        println!("  no chunks to embed");
        pool.close().await;
        return Ok(());
    }

    let total = all_chunks.len();
    let mut embedded = 0u64;
    let mut failed = 0u64;
    for batch in all_chunks.chunks(batch_size) {
        let (e, f) = embed_batch(config, &pool, provider.as_ref(), &model_name, batch).await;
        embedded += e;
        failed += f;
    }

    println!("embed rebuild");
    println!("  total chunks: {}", total);
    println!("  embedded: {}", embedded);
    println!("  failed: {}", failed);

    pool.close().await;
    Ok(())
}
