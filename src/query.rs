//! End-to-end query orchestration: HyDE expansion, hybrid retrieval,
//! reranking, confidence gating, and synthesis (spec §4.20, C20).

use sqlx::SqlitePool;
use std::time::Duration;
use tokio::time::Instant;

use crate::confidence::{self, ConfidenceAssessment};
use crate::config::EmbeddingConfig;
use crate::embedding::{self, EmbeddingProvider};
use crate::hyde;
use crate::llm::LlmDispatcher;
use crate::models::CorpusView;
use crate::monitor::Monitoring;
use crate::rerank::{RerankedChunk, Reranker};
use crate::retrieve::{MetadataFilter, RetrievedChunk, Retriever};
use crate::synthesize::{self, SynthesisResult};

#[derive(Debug, Clone)]
pub struct QueryOptions {
    pub top_k: usize,
    pub use_hyde: bool,
    pub hyde_variants: usize,
    pub use_rerank: bool,
    pub filter: Option<MetadataFilter>,
    pub view: CorpusView,
    pub timeout: Duration,
}

impl Default for QueryOptions {
    fn default() -> Self {
        QueryOptions {
            top_k: 8,
            use_hyde: true,
            hyde_variants: 3,
            use_rerank: true,
            filter: None,
            view: CorpusView::Canonical,
            timeout: Duration::from_secs(30),
        }
    }
}

pub struct QueryResult {
    pub synthesis: SynthesisResult,
    pub assessment: ConfidenceAssessment,
    pub reranked: Vec<RerankedChunk>,
}

/// Runs the full query pipeline: `expand -> retrieve -> rerank -> assess ->
/// synthesize`, emitting monitoring counters/histograms at each step (spec
/// §4.20's data-flow diagram).
pub async fn run(
    pool: &SqlitePool,
    dispatcher: &LlmDispatcher,
    embedder: &dyn EmbeddingProvider,
    embedding_config: &EmbeddingConfig,
    reranker: &Reranker,
    monitoring: &Monitoring,
    query: &str,
    options: &QueryOptions,
) -> anyhow::Result<QueryResult> {
    let start = Instant::now();
    let deadline = start + options.timeout;

    let queries = if options.use_hyde {
        hyde::expand(dispatcher, query, options.hyde_variants, deadline).await
    } else {
        vec![query.to_string()]
    };
    monitoring.counter("query_variants_total", &[], queries.len() as i64);

    let candidate_pool = options.top_k.max(20);

    let merged: Vec<RetrievedChunk> = hyde::multi_query_search(
        queries,
        |q, k| async move {
            let retriever = Retriever::new(pool);
            let query_embedding = embedding::embed_query(embedder, embedding_config, &q)
                .await
                .unwrap_or_default();
            let hits = retriever
                .search(&q, &query_embedding, k, options.filter.as_ref(), options.view)
                .await?;
            Ok(hits
                .into_iter()
                .map(|h| (h.chunk_id.clone(), h.fused_score, h))
                .collect())
        },
        candidate_pool,
    )
    .await?;

    monitoring.counter("retrieval_candidates_total", &[], merged.len() as i64);

    let assessment_input: Vec<RerankedChunk> = if options.use_rerank && !merged.is_empty() {
        reranker.rerank(query, merged, options.top_k, true)
    } else {
        merged
            .into_iter()
            .take(options.top_k)
            .map(|c| RerankedChunk { fused_score: c.fused_score, rerank_score: c.fused_score, chunk: c })
            .collect()
    };

    let assessment = confidence::assess(query, &assessment_input);
    monitoring.gauge("confidence_overall", assessment.overall, &[]);

    let synthesis = synthesize::synthesize(dispatcher, query, &assessment_input, &assessment, deadline).await?;

    let latency_ms = Instant::now().duration_since(start).as_millis() as f64;
    monitoring.histogram("query_latency_ms", latency_ms, &[]);
    monitoring.log_event(
        "info",
        "query_completed",
        serde_json::json!({
            "query": query,
            "recommendation": format!("{:?}", assessment.recommendation),
            "latency_ms": latency_ms,
            "candidates": assessment_input.len(),
        }),
    );

    Ok(QueryResult {
        synthesis,
        assessment,
        reranked: assessment_input,
    })
}
