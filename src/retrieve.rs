//! Hybrid BM25+dense retrieval with MMR diversification (spec §4.10, C13).

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::collections::{HashMap, HashSet};

use crate::embedding::{blob_to_vec, cosine_similarity};
use crate::keyword_index::KeywordIndex;
use crate::models::CorpusView;
use crate::vector_index::VectorIndex;

const CANDIDATE_POOL: usize = 50;
const DEFAULT_TOP_K: usize = 20;
const MMR_LAMBDA: f64 = 0.7;
const BM25_WEIGHT: f64 = 0.3;
const DENSE_WEIGHT: f64 = 0.7;

#[derive(Debug, Clone, Default)]
pub struct MetadataFilter {
    pub topics: Vec<String>,
    pub source_kinds: Vec<String>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    pub chunk_id: String,
    pub doc_id: String,
    pub title: String,
    pub text: String,
    pub fused_score: f64,
    pub bm25_norm: f64,
    pub dense_norm: f64,
    pub quality_score: f64,
    pub topics: Vec<String>,
    pub source_kind: String,
    pub created_at: DateTime<Utc>,
}

pub struct Retriever<'a> {
    pool: &'a SqlitePool,
}

impl<'a> Retriever<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Retriever { pool }
    }

    /// `search` (spec §4.10): BM25 + dense fusion, metadata filter, MMR.
    /// `view` selects which corpus to query (Canonical by default).
    pub async fn search(
        &self,
        query_terms: &str,
        query_embedding: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
        view: CorpusView,
    ) -> Result<Vec<RetrievedChunk>> {
        let canonical_only = view == CorpusView::Canonical;
        let kw = KeywordIndex::new(self.pool);
        let vec_idx = VectorIndex::new(self.pool);

        let (kw_hits, vec_hits) = tokio::join!(
            kw.query(query_terms, CANDIDATE_POOL, canonical_only),
            vec_idx.query(query_embedding, CANDIDATE_POOL, canonical_only),
        );
        let kw_hits = kw_hits?;
        let vec_hits = vec_hits?;

        let mut bm25_by_chunk: HashMap<String, f64> = HashMap::new();
        for h in &kw_hits {
            bm25_by_chunk.insert(h.chunk_id.clone(), h.bm25_norm);
        }
        let mut dense_by_chunk: HashMap<String, f64> = HashMap::new();
        for h in &vec_hits {
            dense_by_chunk.insert(h.chunk_id.clone(), h.similarity as f64);
        }

        let mut candidate_ids: Vec<String> = bm25_by_chunk.keys().cloned().collect();
        for id in dense_by_chunk.keys() {
            if !bm25_by_chunk.contains_key(id) {
                candidate_ids.push(id.clone());
            }
        }
        if candidate_ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = self.fetch_chunk_rows(&candidate_ids).await?;

        let mut fused: Vec<RetrievedChunk> = Vec::new();
        for row in rows {
            if let Some(f) = filter {
                if !passes_filter(&row, f) {
                    continue;
                }
            }
            let bm25_norm = *bm25_by_chunk.get(&row.chunk_id).unwrap_or(&0.0);
            let dense_norm = *dense_by_chunk.get(&row.chunk_id).unwrap_or(&0.0);
            let fused_score = BM25_WEIGHT * bm25_norm + DENSE_WEIGHT * dense_norm;
            fused.push(RetrievedChunk {
                fused_score,
                bm25_norm,
                dense_norm,
                ..row
            });
        }
        fused.sort_by(|a, b| b.fused_score.partial_cmp(&a.fused_score).unwrap());

        let embeddings = self.fetch_embeddings(&fused.iter().map(|c| c.chunk_id.clone()).collect::<Vec<_>>()).await?;
        let selected = mmr_select(&fused, &embeddings, top_k.min(DEFAULT_TOP_K.max(top_k)), MMR_LAMBDA);
        Ok(selected)
    }

    async fn fetch_chunk_rows(&self, ids: &[String]) -> Result<Vec<RetrievedChunk>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let query = format!(
            "SELECT c.chunk_id, c.doc_id, c.title, c.text, c.quality_score, c.topics_json,
                    c.source_kind, c.created_at
             FROM chunks c WHERE c.chunk_id IN ({placeholders})"
        );
        let mut q = sqlx::query_as::<_, (String, String, String, String, f64, String, String, i64)>(&query);
        for id in ids {
            q = q.bind(id);
        }
        let rows = q.fetch_all(self.pool).await?;
        Ok(rows
            .into_iter()
            .map(|(chunk_id, doc_id, title, text, quality_score, topics_json, source_kind, created_at)| {
                RetrievedChunk {
                    chunk_id,
                    doc_id,
                    title,
                    text,
                    fused_score: 0.0,
                    bm25_norm: 0.0,
                    dense_norm: 0.0,
                    quality_score,
                    topics: serde_json::from_str(&topics_json).unwrap_or_default(),
                    source_kind,
                    created_at: DateTime::from_timestamp(created_at, 0).unwrap_or_else(Utc::now),
                }
            })
            .collect())
    }

    async fn fetch_embeddings(&self, ids: &[String]) -> Result<HashMap<String, Vec<f32>>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let query = format!("SELECT chunk_id, embedding FROM chunk_vectors WHERE chunk_id IN ({placeholders})");
        let mut q = sqlx::query_as::<_, (String, Vec<u8>)>(&query);
        for id in ids {
            q = q.bind(id);
        }
        let rows = q.fetch_all(self.pool).await?;
        Ok(rows.into_iter().map(|(id, blob)| (id, blob_to_vec(&blob))).collect())
    }
}

fn passes_filter(chunk: &RetrievedChunk, filter: &MetadataFilter) -> bool {
    if !filter.topics.is_empty() && !filter.topics.iter().any(|t| chunk.topics.contains(t)) {
        return false;
    }
    if !filter.source_kinds.is_empty() && !filter.source_kinds.contains(&chunk.source_kind) {
        return false;
    }
    if let Some(after) = filter.created_after {
        if chunk.created_at < after {
            return false;
        }
    }
    if let Some(before) = filter.created_before {
        if chunk.created_at > before {
            return false;
        }
    }
    true
}

/// Greedy MMR selection (spec §4.10 step 4): repeatedly picks the
/// candidate maximizing `lambda*fused - (1-lambda)*max_sim_to_selected`.
fn mmr_select(
    candidates: &[RetrievedChunk],
    embeddings: &HashMap<String, Vec<f32>>,
    top_k: usize,
    lambda: f64,
) -> Vec<RetrievedChunk> {
    if candidates.is_empty() {
        return Vec::new();
    }
    let mut remaining: Vec<usize> = (0..candidates.len()).collect();
    let mut selected_idx: Vec<usize> = Vec::new();
    let mut selected_ids: HashSet<usize> = HashSet::new();

    while !remaining.is_empty() && selected_idx.len() < top_k {
        let mut best_idx = None;
        let mut best_score = f64::NEG_INFINITY;
        for &i in &remaining {
            let fused = candidates[i].fused_score;
            let max_sim = selected_idx
                .iter()
                .map(|&j| {
                    let (a, b) = (
                        embeddings.get(&candidates[i].chunk_id),
                        embeddings.get(&candidates[j].chunk_id),
                    );
                    match (a, b) {
                        (Some(a), Some(b)) => cosine_similarity(a, b) as f64,
                        _ => 0.0,
                    }
                })
                .fold(0.0_f64, f64::max);
            let mmr_score = lambda * fused - (1.0 - lambda) * max_sim;
            if mmr_score > best_score {
                best_score = mmr_score;
                best_idx = Some(i);
            }
        }
        if let Some(i) = best_idx {
            selected_idx.push(i);
            selected_ids.insert(i);
            remaining.retain(|&r| r != i);
        } else {
            break;
        }
    }

    selected_idx.into_iter().map(|i| candidates[i].clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: &str, fused: f64) -> RetrievedChunk {
        RetrievedChunk {
            chunk_id: id.to_string(),
            doc_id: format!("doc-{id}"),
            title: "T".to_string(),
            text: "text".to_string(),
            fused_score: fused,
            bm25_norm: 0.0,
            dense_norm: 0.0,
            quality_score: 0.8,
            topics: vec![],
            source_kind: "text".to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn mmr_on_single_candidate_does_not_error() {
        let candidates = vec![chunk("a", 0.9)];
        let out = mmr_select(&candidates, &HashMap::new(), 20, 0.7);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn mmr_prefers_highest_fused_first() {
        let candidates = vec![chunk("a", 0.5), chunk("b", 0.9), chunk("c", 0.3)];
        let out = mmr_select(&candidates, &HashMap::new(), 20, 0.7);
        assert_eq!(out[0].chunk_id, "b");
    }

    #[test]
    fn mmr_respects_top_k() {
        let candidates: Vec<RetrievedChunk> = (0..10).map(|i| chunk(&i.to_string(), i as f64 / 10.0)).collect();
        let out = mmr_select(&candidates, &HashMap::new(), 3, 0.7);
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn filter_rejects_mismatched_topic() {
        let mut c = chunk("a", 0.5);
        c.topics = vec!["technology/ai".to_string()];
        let filter = MetadataFilter {
            topics: vec!["technology/infra".to_string()],
            ..Default::default()
        };
        assert!(!passes_filter(&c, &filter));
    }

    #[test]
    fn filter_accepts_matching_topic() {
        let mut c = chunk("a", 0.5);
        c.topics = vec!["technology/ai".to_string()];
        let filter = MetadataFilter {
            topics: vec!["technology/ai".to_string()],
            ..Default::default()
        };
        assert!(passes_filter(&c, &filter));
    }
}
