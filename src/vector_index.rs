//! Dense nearest-neighbor store over chunks (spec §4.8, C6).
//!
//! Vectors are stored as little-endian f32 BLOBs in `chunk_vectors`
//! (reusing [`crate::embedding::vec_to_blob`]/`blob_to_vec`) and scored by
//! brute-force cosine similarity, adequate at the single-process corpus
//! sizes this service targets (spec §4.10 budgets retrieval for up to 10^5
//! chunks). `query` always returns scores normalized into `[0,1]`: the
//! historical defect of surfacing unclipped cosine similarity is the
//! normative fix called out in spec §9.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};

pub struct VectorHit {
    pub chunk_id: String,
    pub doc_id: String,
    pub similarity: f32,
}

pub struct VectorIndex<'a> {
    pool: &'a SqlitePool,
}

impl<'a> VectorIndex<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        VectorIndex { pool }
    }

    pub async fn add(&self, chunk_id: &str, doc_id: &str, model: &str, embedding: &[f32]) -> Result<()> {
        let blob = vec_to_blob(embedding);
        sqlx::query(
            "INSERT INTO chunk_vectors (chunk_id, doc_id, model, dims, embedding) VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(chunk_id) DO UPDATE SET model=excluded.model, dims=excluded.dims, embedding=excluded.embedding",
        )
        .bind(chunk_id)
        .bind(doc_id)
        .bind(model)
        .bind(embedding.len() as i64)
        .bind(blob)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Removes all vectors belonging to `doc_id` (spec §4.8 `delete`).
    pub async fn delete(&self, doc_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM chunk_vectors WHERE doc_id = ?")
            .bind(doc_id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    /// `query` (spec §4.8): returns the `top_k` nearest chunks with
    /// similarity clipped into `[0,1]`. `canonical_only` restricts the
    /// candidate set to documents currently routed into CANONICAL.
    pub async fn query(&self, embedding: &[f32], top_k: usize, canonical_only: bool) -> Result<Vec<VectorHit>> {
        let rows: Vec<(String, String, Vec<u8>)> = if canonical_only {
            sqlx::query_as(
                "SELECT cv.chunk_id, cv.doc_id, cv.embedding FROM chunk_vectors cv
                 JOIN documents d ON d.doc_id = cv.doc_id WHERE d.in_canonical = 1",
            )
            .fetch_all(self.pool)
            .await?
        } else {
            sqlx::query_as("SELECT chunk_id, doc_id, embedding FROM chunk_vectors")
                .fetch_all(self.pool)
                .await?
        };

        let mut scored: Vec<VectorHit> = rows
            .into_iter()
            .map(|(chunk_id, doc_id, blob)| {
                let vec = blob_to_vec(&blob);
                let raw = cosine_similarity(embedding, &vec);
                VectorHit {
                    chunk_id,
                    doc_id,
                    similarity: clip_similarity(raw),
                }
            })
            .collect();

        scored.sort_by(|a, b| b.similarity.partial_cmp(&a.similarity).unwrap());
        scored.truncate(top_k);
        Ok(scored)
    }
}

/// Min-max into `[0,1]`: cosine similarity is naturally in `[-1,1]`, so a
/// simple affine remap covers the "normalized into [0,1]" requirement;
/// any value that still exceeds 1 after the remap (shouldn't happen, but
/// the spec treats this as a documented historical defect) is clamped.
fn clip_similarity(raw: f32) -> f32 {
    (((raw + 1.0) / 2.0).clamp(0.0, 1.0)).min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clip_similarity_stays_in_unit_range() {
        assert!((clip_similarity(1.0) - 1.0).abs() < 1e-6);
        assert!((clip_similarity(-1.0) - 0.0).abs() < 1e-6);
        assert!((clip_similarity(0.0) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn clip_similarity_clamps_out_of_range_input() {
        assert!(clip_similarity(5.0) <= 1.0);
        assert!(clip_similarity(-5.0) >= 0.0);
    }
}
