//! Cross-encoder reranking with LRU+TTL cache and optional two-stage
//! filtering (spec §4.11, C14).
//!
//! The actual cross-encoder inference is a swappable [`CrossEncoder`]
//! trait so tests and CPU-only deployments can run a cheap lexical-overlap
//! scorer while production wires a real model. Model loading is lazy and
//! the cache directory the production scorer reads from must be a
//! persistent volume (spec §9 normative fix (d)).

use md5;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::retrieve::RetrievedChunk;

const CACHE_CAPACITY: usize = 1000;
const CACHE_TTL: Duration = Duration::from_secs(600);

#[derive(Debug, Clone)]
pub struct RerankedChunk {
    pub chunk: RetrievedChunk,
    pub rerank_score: f64,
    pub fused_score: f64,
}

/// Abstracts the actual cross-encoder model (spec §9: "runtime plugin
/// surface -> capability interface").
pub trait CrossEncoder: Send + Sync {
    fn score(&self, query: &str, candidate: &str) -> f64;
    fn name(&self) -> &str;
}

/// Lexical-overlap fallback scorer: fraction of query content words present
/// in the candidate, used when no real cross-encoder model is configured.
/// Deterministic and network-free, making it suitable as both a test double
/// and a zero-dependency default.
pub struct LexicalOverlapScorer;

impl CrossEncoder for LexicalOverlapScorer {
    fn score(&self, query: &str, candidate: &str) -> f64 {
        let q_tokens: Vec<String> = query
            .to_lowercase()
            .split_whitespace()
            .map(|s| s.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if q_tokens.is_empty() {
            return 0.0;
        }
        let cand_lower = candidate.to_lowercase();
        let hits = q_tokens.iter().filter(|t| cand_lower.contains(t.as_str())).count();
        hits as f64 / q_tokens.len() as f64
    }

    fn name(&self) -> &str {
        "lexical-overlap-v1"
    }
}

struct CacheEntry {
    value: Vec<RerankedChunk>,
    inserted_at: Instant,
}

pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

pub struct Reranker {
    precise: Box<dyn CrossEncoder>,
    fast: Option<Box<dyn CrossEncoder>>,
    cache: Mutex<HashMap<String, CacheEntry>>,
    order: Mutex<Vec<String>>,
    hits: Mutex<u64>,
    misses: Mutex<u64>,
    evictions: Mutex<u64>,
}

impl Reranker {
    pub fn new(precise: Box<dyn CrossEncoder>) -> Self {
        Reranker {
            precise,
            fast: None,
            cache: Mutex::new(HashMap::new()),
            order: Mutex::new(Vec::new()),
            hits: Mutex::new(0),
            misses: Mutex::new(0),
            evictions: Mutex::new(0),
        }
    }

    pub fn with_fast_model(mut self, fast: Box<dyn CrossEncoder>) -> Self {
        self.fast = Some(fast);
        self
    }

    fn cache_key(query: &str, candidates: &[RetrievedChunk], top_k: usize, multistage: bool) -> String {
        let concatenated: String = candidates.iter().map(|c| c.chunk_id.as_str()).collect::<Vec<_>>().join(",");
        let digest = md5::compute(format!("{query}|{concatenated}|{top_k}|{multistage}"));
        format!("{digest:x}")
    }

    fn cache_get(&self, key: &str) -> Option<Vec<RerankedChunk>> {
        let mut cache = self.cache.lock().expect("cache lock poisoned");
        if let Some(entry) = cache.get(key) {
            if entry.inserted_at.elapsed() < CACHE_TTL {
                *self.hits.lock().unwrap() += 1;
                return Some(entry.value.clone());
            } else {
                cache.remove(key);
                *self.evictions.lock().unwrap() += 1;
            }
        }
        *self.misses.lock().unwrap() += 1;
        None
    }

    fn cache_put(&self, key: String, value: Vec<RerankedChunk>) {
        let mut cache = self.cache.lock().expect("cache lock poisoned");
        let mut order = self.order.lock().expect("order lock poisoned");
        if cache.len() >= CACHE_CAPACITY && !cache.contains_key(&key) {
            if let Some(oldest) = order.first().cloned() {
                cache.remove(&oldest);
                order.remove(0);
                *self.evictions.lock().unwrap() += 1;
            }
        }
        cache.insert(key.clone(), CacheEntry { value, inserted_at: Instant::now() });
        order.push(key);
    }

    pub fn cache_stats(&self) -> CacheStats {
        CacheStats {
            hits: *self.hits.lock().unwrap(),
            misses: *self.misses.lock().unwrap(),
            evictions: *self.evictions.lock().unwrap(),
        }
    }

    /// `rerank` (spec §4.11): single-stage precise rescoring with an
    /// optional cache.
    pub fn rerank(&self, query: &str, candidates: Vec<RetrievedChunk>, top_k: usize, use_cache: bool) -> Vec<RerankedChunk> {
        let key = Self::cache_key(query, &candidates, top_k, false);
        if use_cache {
            if let Some(hit) = self.cache_get(&key) {
                return hit;
            }
        }
        let mut scored: Vec<RerankedChunk> = candidates
            .into_iter()
            .map(|c| {
                let score = self.precise.score(query, &c.text);
                RerankedChunk { fused_score: c.fused_score, chunk: c, rerank_score: score }
            })
            .collect();
        scored.sort_by(|a, b| b.rerank_score.partial_cmp(&a.rerank_score).unwrap());
        scored.truncate(top_k);
        if use_cache {
            self.cache_put(key, scored.clone());
        }
        scored
    }

    /// `rerank_multistage` (spec §4.11): fast model narrows to
    /// `stage1_k`, precise model reranks to `stage2_k`. Degrades to
    /// single-stage precise reranking when there are fewer than
    /// `stage1_k` candidates.
    pub fn rerank_multistage(
        &self,
        query: &str,
        candidates: Vec<RetrievedChunk>,
        stage1_k: usize,
        stage2_k: usize,
        use_cache: bool,
    ) -> Vec<RerankedChunk> {
        if candidates.len() < stage1_k || self.fast.is_none() {
            return self.rerank(query, candidates, stage2_k, use_cache);
        }
        let key = Self::cache_key(query, &candidates, stage2_k, true);
        if use_cache {
            if let Some(hit) = self.cache_get(&key) {
                return hit;
            }
        }
        let fast = self.fast.as_ref().unwrap();
        let mut stage1: Vec<(RetrievedChunk, f64)> = candidates
            .into_iter()
            .map(|c| {
                let score = fast.score(query, &c.text);
                (c, score)
            })
            .collect();
        stage1.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap());
        stage1.truncate(stage1_k);
        let narrowed: Vec<RetrievedChunk> = stage1.into_iter().map(|(c, _)| c).collect();

        let mut scored: Vec<RerankedChunk> = narrowed
            .into_iter()
            .map(|c| {
                let score = self.precise.score(query, &c.text);
                RerankedChunk { fused_score: c.fused_score, chunk: c, rerank_score: score }
            })
            .collect();
        scored.sort_by(|a, b| b.rerank_score.partial_cmp(&a.rerank_score).unwrap());
        scored.truncate(stage2_k);
        if use_cache {
            self.cache_put(key, scored.clone());
        }
        scored
    }

    /// `rerank_batch` (spec §4.11): validates aligned lengths and
    /// processes each query cache-aware.
    pub fn rerank_batch(
        &self,
        queries: &[String],
        results_lists: Vec<Vec<RetrievedChunk>>,
        top_k: usize,
    ) -> anyhow::Result<Vec<Vec<RerankedChunk>>> {
        if queries.len() != results_lists.len() {
            anyhow::bail!(
                "rerank_batch: queries ({}) and results_lists ({}) length mismatch",
                queries.len(),
                results_lists.len()
            );
        }
        Ok(queries
            .iter()
            .zip(results_lists)
            .map(|(q, candidates)| self.rerank(q, candidates, top_k, true))
            .collect())
    }
}

/// Stable hash used by some callers to key external reranker-model caches
/// on disk (kept separate from the in-memory MD5 cache key above).
pub fn model_cache_key(model_name: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(model_name.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn chunk(id: &str, text: &str) -> RetrievedChunk {
        RetrievedChunk {
            chunk_id: id.to_string(),
            doc_id: format!("doc-{id}"),
            title: "T".to_string(),
            text: text.to_string(),
            fused_score: 0.5,
            bm25_norm: 0.0,
            dense_norm: 0.0,
            quality_score: 0.8,
            topics: vec![],
            source_kind: "text".to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn rerank_orders_by_lexical_overlap() {
        let rr = Reranker::new(Box::new(LexicalOverlapScorer));
        let candidates = vec![
            chunk("a", "completely unrelated text about gardening"),
            chunk("b", "proxmox installation guide step by step"),
        ];
        let out = rr.rerank("proxmox installation", candidates, 10, false);
        assert_eq!(out[0].chunk.chunk_id, "b");
        assert!(out[0].rerank_score > out[1].rerank_score);
    }

    #[test]
    fn identical_cached_calls_are_byte_identical_and_record_hit() {
        let rr = Reranker::new(Box::new(LexicalOverlapScorer));
        let candidates = vec![chunk("a", "proxmox installation guide")];
        let first = rr.rerank("proxmox installation", candidates.clone(), 10, true);
        let second = rr.rerank("proxmox installation", candidates, 10, true);
        assert_eq!(first.len(), second.len());
        assert_eq!(first[0].rerank_score, second[0].rerank_score);
        assert_eq!(first[0].chunk.chunk_id, second[0].chunk.chunk_id);
        assert!(rr.cache_stats().hits >= 1);
    }

    #[test]
    fn multistage_degrades_to_single_stage_when_below_threshold() {
        let rr = Reranker::new(Box::new(LexicalOverlapScorer)).with_fast_model(Box::new(LexicalOverlapScorer));
        let candidates = vec![chunk("a", "proxmox install"), chunk("b", "unrelated")];
        let out = rr.rerank_multistage("proxmox", candidates, 50, 10, false);
        assert_eq!(out[0].chunk.chunk_id, "a");
    }

    #[test]
    fn rerank_batch_rejects_mismatched_lengths() {
        let rr = Reranker::new(Box::new(LexicalOverlapScorer));
        let queries = vec!["a".to_string(), "b".to_string()];
        let results = vec![vec![chunk("x", "x")]];
        assert!(rr.rerank_batch(&queries, results, 10).is_err());
    }
}
