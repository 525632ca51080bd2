//! Database statistics and health overview.
//!
//! Provides a quick summary of what's indexed: document counts, chunk
//! counts, embedding coverage, canonical-corpus share, per-source-kind and
//! per-gate-kind breakdowns, and OCR queue depth. Used by `ctx stats` to
//! give confidence that ingestion and embedding are working as expected.

use anyhow::Result;
use sqlx::Row;

use crate::config::Config;
use crate::db;
use crate::ocr_queue::OcrQueue;

struct KindBreakdown {
    kind: String,
    doc_count: i64,
    chunk_count: i64,
    embedded_count: i64,
}

/// Corpus-wide counts backing both `ctx stats` and `GET /tools/stats`.
pub struct StatsSummary {
    pub total_docs: i64,
    pub total_chunks: i64,
    pub total_embedded: i64,
    pub total_canonical: i64,
    pub total_duplicates: i64,
    pub total_gated: i64,
}

/// Runs the aggregate COUNT queries shared by the CLI and HTTP surfaces.
pub async fn fetch_summary(pool: &sqlx::SqlitePool) -> Result<StatsSummary> {
    let total_docs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents").fetch_one(pool).await?;
    let total_chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks").fetch_one(pool).await?;
    let total_embedded: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunk_vectors").fetch_one(pool).await?;
    let total_canonical: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE in_canonical = 1")
        .fetch_one(pool)
        .await?;
    let total_duplicates: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE is_duplicate = 1")
        .fetch_one(pool)
        .await?;
    let total_gated: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE do_index = 0")
        .fetch_one(pool)
        .await?;
    Ok(StatsSummary { total_docs, total_chunks, total_embedded, total_canonical, total_duplicates, total_gated })
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    let StatsSummary { total_docs, total_chunks, total_embedded, total_canonical, total_duplicates, total_gated } =
        fetch_summary(&pool).await?;

    let db_size = std::fs::metadata(&config.db.path).map(|m| m.len()).unwrap_or(0);

    println!("Context Harness — Database Stats");
    println!("================================");
    println!();
    println!("  Database:     {}", config.db.path.display());
    println!("  Size:         {}", format_bytes(db_size));
    println!();
    println!("  Documents:    {}", total_docs);
    println!("  Chunks:       {}", total_chunks);
    println!(
        "  Embedded:     {} / {} ({}%)",
        total_embedded,
        total_chunks,
        pct(total_embedded, total_chunks)
    );
    println!(
        "  Canonical:    {} / {} ({}%)",
        total_canonical,
        total_docs,
        pct(total_canonical, total_docs)
    );
    println!("  Duplicates:   {}", total_duplicates);
    println!("  Gated out:    {}", total_gated);

    let by_source_kind = fetch_breakdown(&pool, "source_kind").await?;
    print_breakdown("By source kind", &by_source_kind);

    let by_gate_kind = fetch_breakdown(&pool, "gate_kind").await?;
    print_breakdown("By gate kind", &by_gate_kind);

    if let Ok(queue) = OcrQueue::load(&config.ocr.queue_path) {
        println!();
        println!("  OCR queue:    {} entries pending re-processing", queue.len());
    }

    println!();

    pool.close().await;
    Ok(())
}

async fn fetch_breakdown(pool: &sqlx::SqlitePool, column: &str) -> Result<Vec<KindBreakdown>> {
    let query = format!(
        "SELECT d.{column} AS kind,
                COUNT(DISTINCT d.doc_id) AS doc_count,
                COUNT(DISTINCT c.chunk_id) AS chunk_count,
                COUNT(DISTINCT cv.chunk_id) AS embedded_count
         FROM documents d
         LEFT JOIN chunks c ON c.doc_id = d.doc_id
         LEFT JOIN chunk_vectors cv ON cv.chunk_id = c.chunk_id
         GROUP BY d.{column}
         ORDER BY doc_count DESC"
    );
    let rows = sqlx::query(&query).fetch_all(pool).await?;
    Ok(rows
        .iter()
        .map(|row| KindBreakdown {
            kind: row.get("kind"),
            doc_count: row.get("doc_count"),
            chunk_count: row.get("chunk_count"),
            embedded_count: row.get("embedded_count"),
        })
        .collect())
}

fn print_breakdown(label: &str, rows: &[KindBreakdown]) {
    if rows.is_empty() {
        return;
    }
    println!();
    println!("  {}:", label);
    println!(
        "  {:<24} {:>6} {:>8} {:>10}",
        "KIND", "DOCS", "CHUNKS", "EMBEDDED"
    );
    println!("  {}", "-".repeat(52));
    for r in rows {
        println!(
            "  {:<24} {:>6} {:>8} {:>10}",
            r.kind, r.doc_count, r.chunk_count, r.embedded_count
        );
    }
}

fn pct(numerator: i64, denominator: i64) -> i64 {
    if denominator > 0 {
        (numerator * 100) / denominator
    } else {
        0
    }
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_bytes_scales_units() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
    }

    #[test]
    fn pct_handles_zero_denominator() {
        assert_eq!(pct(5, 0), 0);
        assert_eq!(pct(1, 2), 50);
    }
}
