//! BM25 sparse index over chunks, backed by SQLite FTS5 (spec §4.9, C7).
//!
//! FTS5's own `bm25()` ranking function is used directly rather than
//! reimplementing BM25 in Rust (k1~1.2, b~0.75 are FTS5's defaults), then
//! min-max normalized per query into `[0,1]` before returning to the
//! caller, same normalization contract as [`crate::vector_index`].

use anyhow::Result;
use sqlx::SqlitePool;

pub struct KeywordHit {
    pub chunk_id: String,
    pub doc_id: String,
    pub bm25_norm: f64,
}

pub struct KeywordIndex<'a> {
    pool: &'a SqlitePool,
}

impl<'a> KeywordIndex<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        KeywordIndex { pool }
    }

    pub async fn add(&self, chunk_id: &str, doc_id: &str, text: &str) -> Result<()> {
        sqlx::query("DELETE FROM chunks_fts WHERE chunk_id = ?")
            .bind(chunk_id)
            .execute(self.pool)
            .await?;
        sqlx::query("INSERT INTO chunks_fts (chunk_id, doc_id, text) VALUES (?, ?, ?)")
            .bind(chunk_id)
            .bind(doc_id)
            .bind(text)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete(&self, doc_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM chunks_fts WHERE doc_id = ?")
            .bind(doc_id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    /// `query` (spec §4.9): returns `top_k` matches with `bm25_score`
    /// min-max normalized per query into `[0,1]`. FTS5's `bm25()` returns
    /// *lower-is-better* scores, so the sign is flipped before
    /// normalizing.
    pub async fn query(&self, terms: &str, top_k: usize, canonical_only: bool) -> Result<Vec<KeywordHit>> {
        if terms.trim().is_empty() {
            return Ok(Vec::new());
        }
        let sanitized = sanitize_fts_query(terms);
        let rows: Vec<(String, String, f64)> = if canonical_only {
            sqlx::query_as(
                "SELECT f.chunk_id, f.doc_id, bm25(chunks_fts) as score FROM chunks_fts f
                 JOIN documents d ON d.doc_id = f.doc_id
                 WHERE chunks_fts MATCH ? AND d.in_canonical = 1
                 ORDER BY score LIMIT ?",
            )
            .bind(&sanitized)
            .bind(top_k as i64)
            .fetch_all(self.pool)
            .await?
        } else {
            sqlx::query_as(
                "SELECT chunk_id, doc_id, bm25(chunks_fts) as score FROM chunks_fts
                 WHERE chunks_fts MATCH ? ORDER BY score LIMIT ?",
            )
            .bind(&sanitized)
            .bind(top_k as i64)
            .fetch_all(self.pool)
            .await?
        };

        if rows.is_empty() {
            return Ok(Vec::new());
        }

        // bm25() is negative, more negative = better; flip sign so
        // "higher is better" before min-max normalizing.
        let flipped: Vec<f64> = rows.iter().map(|(_, _, s)| -s).collect();
        let min = flipped.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = flipped.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let range = (max - min).max(1e-9);

        Ok(rows
            .into_iter()
            .zip(flipped)
            .map(|((chunk_id, doc_id, _), flipped_score)| KeywordHit {
                chunk_id,
                doc_id,
                bm25_norm: ((flipped_score - min) / range).clamp(0.0, 1.0),
            })
            .collect())
    }
}

/// FTS5 MATCH syntax treats `"`, `(`, `)`, `*`, `^`, `:`, `-` specially;
/// strip them so free-text queries never produce a syntax error.
fn sanitize_fts_query(raw: &str) -> String {
    raw.split_whitespace()
        .map(|tok| {
            tok.chars()
                .filter(|c| c.is_alphanumeric() || *c == '_')
                .collect::<String>()
        })
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{t}\""))
        .collect::<Vec<_>>()
        .join(" OR ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_special_characters() {
        let out = sanitize_fts_query("proxmox installation \"quote\" (parens)");
        assert!(!out.contains('"') || out.matches('"').count() % 2 == 0);
        assert!(out.contains("proxmox"));
        assert!(out.contains("installation"));
    }

    #[test]
    fn sanitize_empty_query_yields_empty_string() {
        assert_eq!(sanitize_fts_query(""), "");
    }
}
