//! Multi-dimensional retrieval-quality assessment (spec §4.13, C16).

use std::collections::HashSet;

use crate::rerank::RerankedChunk;

const THETA_OVERALL: f64 = 0.6;
const THETA_RELEVANCE: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recommendation {
    Answer,
    PartialAnswer,
    ClarifyQuestion,
    RefuseNoResults,
    RefuseIrrelevant,
}

#[derive(Debug, Clone)]
pub struct ConfidenceAssessment {
    pub relevance: f64,
    pub coverage: f64,
    pub quality: f64,
    pub overall: f64,
    pub is_sufficient: bool,
    pub recommendation: Recommendation,
}

const STOPWORDS: &[&str] = &[
    "the", "a", "an", "is", "are", "was", "were", "of", "to", "in", "on", "for", "and", "or",
    "what", "how", "why", "do", "does", "did", "i", "you", "it", "this", "that",
];

fn content_words(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
        .filter(|w| !w.is_empty() && !STOPWORDS.contains(&w.as_str()))
        .collect()
}

/// Assesses whether reranked context supports a grounded answer
/// (spec §4.13).
pub fn assess(query: &str, top_k: &[RerankedChunk]) -> ConfidenceAssessment {
    if top_k.is_empty() {
        return ConfidenceAssessment {
            relevance: 0.0,
            coverage: 0.0,
            quality: 0.0,
            overall: 0.0,
            is_sufficient: false,
            recommendation: Recommendation::RefuseNoResults,
        };
    }

    let scores: Vec<f64> = top_k.iter().map(|c| c.rerank_score).collect();
    let min = scores.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = scores.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let range = (max - min).max(1e-9);
    let normalized: Vec<f64> = if (max - min).abs() < 1e-9 {
        scores.iter().map(|_| 1.0).collect()
    } else {
        scores.iter().map(|s| (s - min) / range).collect()
    };
    let relevance = normalized.iter().sum::<f64>() / normalized.len() as f64;

    let query_words = content_words(query);
    let combined_text: String = top_k.iter().map(|c| c.chunk.text.as_str()).collect::<Vec<_>>().join(" ");
    let combined_words = content_words(&combined_text);
    let coverage = if query_words.is_empty() {
        1.0
    } else {
        query_words.intersection(&combined_words).count() as f64 / query_words.len() as f64
    };

    let quality = top_k.iter().map(|c| c.chunk.quality_score).sum::<f64>() / top_k.len() as f64;

    let overall = 0.5 * relevance + 0.3 * coverage + 0.2 * quality;
    let is_sufficient = overall >= THETA_OVERALL && relevance >= THETA_RELEVANCE;

    let recommendation = if relevance < THETA_RELEVANCE {
        Recommendation::RefuseIrrelevant
    } else if coverage < 0.5 {
        Recommendation::PartialAnswer
    } else {
        Recommendation::Answer
    };

    ConfidenceAssessment {
        relevance,
        coverage,
        quality,
        overall,
        is_sufficient,
        recommendation,
    }
}

/// Canned refusal text, tailored to the recommendation. The Synthesizer
/// MUST use this rather than fabricate an answer (spec §4.13).
pub fn response_for_low_confidence(assessment: &ConfidenceAssessment, query: &str) -> String {
    match assessment.recommendation {
        Recommendation::RefuseNoResults => {
            format!("I couldn't find anything in the corpus related to: \"{query}\".")
        }
        Recommendation::RefuseIrrelevant => format!(
            "I found some documents, but none of them appear relevant enough to answer: \"{query}\"."
        ),
        Recommendation::ClarifyQuestion => format!(
            "I'm not confident I have enough grounded context to answer \"{query}\" precisely. Could you clarify or narrow the question?"
        ),
        Recommendation::PartialAnswer => format!(
            "I found partial context for \"{query}\", but coverage is incomplete; treat the following as a partial answer."
        ),
        Recommendation::Answer => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieve::RetrievedChunk;
    use chrono::Utc;

    fn reranked(text: &str, score: f64, quality: f64) -> RerankedChunk {
        RerankedChunk {
            chunk: RetrievedChunk {
                chunk_id: "c1".to_string(),
                doc_id: "d1".to_string(),
                title: "T".to_string(),
                text: text.to_string(),
                fused_score: 0.5,
                bm25_norm: 0.0,
                dense_norm: 0.0,
                quality_score: quality,
                topics: vec![],
                source_kind: "text".to_string(),
                created_at: Utc::now(),
            },
            rerank_score: score,
            fused_score: 0.5,
        }
    }

    #[test]
    fn zero_candidates_refuses_no_results() {
        let a = assess("what is X?", &[]);
        assert_eq!(a.recommendation, Recommendation::RefuseNoResults);
        assert!(!a.is_sufficient);
    }

    #[test]
    fn high_relevance_and_coverage_recommends_answer() {
        let chunks = vec![
            reranked("proxmox installation guide with full steps", 0.9, 0.9),
            reranked("proxmox installation tips and tricks", 0.85, 0.85),
        ];
        let a = assess("proxmox installation", &chunks);
        assert_eq!(a.recommendation, Recommendation::Answer);
        assert!(a.is_sufficient);
    }

    #[test]
    fn low_relevance_refuses_irrelevant() {
        let chunks = vec![reranked("gardening tips", 0.1, 0.9)];
        let a = assess("proxmox installation", &chunks);
        assert_eq!(a.recommendation, Recommendation::RefuseIrrelevant);
    }

    #[test]
    fn canned_refusal_is_used_for_no_results() {
        let a = assess("what is X?", &[]);
        let text = response_for_low_confidence(&a, "what is X?");
        assert!(text.contains("what is X?"));
    }
}
