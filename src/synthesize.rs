//! Answer composition with citations (spec §4.14, C17).

use tokio::time::Instant;

use crate::confidence::{response_for_low_confidence, ConfidenceAssessment, Recommendation};
use crate::llm::LlmDispatcher;
use crate::rerank::RerankedChunk;

#[derive(Debug, Clone)]
pub struct SynthesisResult {
    pub answer_text: String,
    pub citations: Vec<String>,
    pub model_used: String,
    pub usd: f64,
    pub latency_ms: u64,
}

/// Builds the numbered-context prompt and calls the dispatcher. When the
/// confidence gate's recommendation is a refusal, the canned refusal is
/// returned and the dispatcher is never called (spec §4.13/§4.14: "the
/// Synthesizer MUST use this rather than fabricate an answer").
pub async fn synthesize(
    dispatcher: &LlmDispatcher,
    query: &str,
    reranked: &[RerankedChunk],
    assessment: &ConfidenceAssessment,
    deadline: Instant,
) -> anyhow::Result<SynthesisResult> {
    if assessment.recommendation == Recommendation::RefuseNoResults
        || assessment.recommendation == Recommendation::RefuseIrrelevant
    {
        return Ok(SynthesisResult {
            answer_text: response_for_low_confidence(assessment, query),
            citations: Vec::new(),
            model_used: String::new(),
            usd: 0.0,
            latency_ms: 0,
        });
    }

    let mut context_blocks = String::new();
    for (i, r) in reranked.iter().enumerate() {
        context_blocks.push_str(&format!(
            "[{}] source: {}, chunk_position {}\n{}\n\n",
            i + 1,
            r.chunk.title,
            r.chunk.chunk_id,
            r.chunk.text
        ));
    }

    let prompt = format!(
        "Answer the question using ONLY the numbered context blocks below. \
         Cite sources by their bracketed number inline, e.g. [1]. \
         If the context does not contain the answer, say so plainly.\n\n\
         Question: {query}\n\nContext:\n{context_blocks}"
    );

    let start = Instant::now();
    let completion = dispatcher.complete(&prompt, 600, 0.2, deadline).await?;
    let latency_ms = (Instant::now().duration_since(start)).as_millis() as u64;

    let citations = extract_citations(&completion.text, reranked);

    Ok(SynthesisResult {
        answer_text: completion.text,
        citations,
        model_used: completion.used_model,
        usd: completion.usd,
        latency_ms,
    })
}

/// Pulls `[N]` references out of the answer text and maps them back to
/// `chunk_id`s (spec §4.14: "Citations are chunk_ids the model referenced
/// by number").
fn extract_citations(answer: &str, reranked: &[RerankedChunk]) -> Vec<String> {
    let mut out = Vec::new();
    let bytes = answer.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'[' {
            let mut j = i + 1;
            while j < bytes.len() && bytes[j].is_ascii_digit() {
                j += 1;
            }
            if j > i + 1 && j < bytes.len() && bytes[j] == b']' {
                if let Ok(n) = answer[i + 1..j].parse::<usize>() {
                    if n >= 1 && n <= reranked.len() {
                        let chunk_id = reranked[n - 1].chunk.chunk_id.clone();
                        if !out.contains(&chunk_id) {
                            out.push(chunk_id);
                        }
                    }
                }
                i = j + 1;
                continue;
            }
        }
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieve::RetrievedChunk;
    use chrono::Utc;

    fn reranked_chunk(id: &str) -> RerankedChunk {
        RerankedChunk {
            chunk: RetrievedChunk {
                chunk_id: id.to_string(),
                doc_id: "d1".to_string(),
                title: "T".to_string(),
                text: "text".to_string(),
                fused_score: 0.5,
                bm25_norm: 0.0,
                dense_norm: 0.0,
                quality_score: 0.8,
                topics: vec![],
                source_kind: "text".to_string(),
                created_at: Utc::now(),
            },
            rerank_score: 0.9,
            fused_score: 0.5,
        }
    }

    #[test]
    fn extract_citations_maps_bracket_numbers_to_chunk_ids() {
        let reranked = vec![reranked_chunk("c1"), reranked_chunk("c2")];
        let answer = "The answer is in [1] and also confirmed by [2].";
        let citations = extract_citations(answer, &reranked);
        assert_eq!(citations, vec!["c1".to_string(), "c2".to_string()]);
    }

    #[test]
    fn extract_citations_ignores_out_of_range_numbers() {
        let answer = "See [1] and [99].";
        let citations = extract_citations(answer, &[]);
        assert!(citations.is_empty());
    }
}
