//! Hypothetical Document Embeddings query expansion (spec §4.12, C15).

use std::collections::HashMap;
use std::future::Future;
use tokio::time::Instant;

use crate::llm::LlmDispatcher;

/// `expand` (spec §4.12): asks the dispatcher for `num_variants`
/// hypothetical answers; on any failure the original query is returned
/// alone rather than propagating the error (query expansion is a
/// best-effort enhancement, never a hard dependency).
pub async fn expand(
    dispatcher: &LlmDispatcher,
    query: &str,
    num_variants: usize,
    deadline: Instant,
) -> Vec<String> {
    let prompt = format!(
        "Write {num_variants} short hypothetical answers (2-3 sentences each) to this question, \
         as if they were passages from a document that answers it. Question: {query}\n\
         Return them separated by a line containing only '---'."
    );
    match dispatcher.complete(&prompt, 400, 0.7, deadline).await {
        Ok(completion) => {
            let mut variants: Vec<String> = completion
                .text
                .split("---")
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            variants.truncate(num_variants);
            let mut out = vec![query.to_string()];
            out.extend(variants);
            out
        }
        Err(_) => vec![query.to_string()],
    }
}

/// `multi_query_search` (spec §4.12): runs `search_fn` for each query
/// variant in parallel, dedupes by chunk id, and keeps each candidate's
/// max score across variants.
pub async fn multi_query_search<F, Fut, T>(
    queries: Vec<String>,
    search_fn: F,
    top_k_per_query: usize,
) -> anyhow::Result<Vec<T>>
where
    F: Fn(String, usize) -> Fut,
    Fut: Future<Output = anyhow::Result<Vec<(String, f64, T)>>>,
    T: Clone,
{
    let mut futures = Vec::new();
    for q in queries {
        futures.push(search_fn(q, top_k_per_query));
    }
    let results = futures::future::join_all(futures).await;

    let mut best: HashMap<String, (f64, T)> = HashMap::new();
    for r in results {
        let hits = r?;
        for (chunk_id, score, item) in hits {
            best.entry(chunk_id)
                .and_modify(|(s, it)| {
                    if score > *s {
                        *s = score;
                        *it = item.clone();
                    }
                })
                .or_insert((score, item));
        }
    }
    let mut merged: Vec<(f64, T)> = best.into_values().collect();
    merged.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap());
    Ok(merged.into_iter().map(|(_, item)| item).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn multi_query_search_merges_by_max_score() {
        let queries = vec!["q1".to_string(), "q2".to_string()];
        let result = multi_query_search(
            queries,
            |q, _k| async move {
                if q == "q1" {
                    Ok(vec![("c1".to_string(), 0.5, "c1-text".to_string())])
                } else {
                    Ok(vec![("c1".to_string(), 0.9, "c1-text".to_string())])
                }
            },
            10,
        )
        .await
        .unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0], "c1-text");
    }

    #[tokio::test]
    async fn multi_query_search_keeps_distinct_chunks() {
        let queries = vec!["q1".to_string()];
        let result = multi_query_search(
            queries,
            |_q, _k| async move {
                Ok(vec![
                    ("c1".to_string(), 0.5, "a".to_string()),
                    ("c2".to_string(), 0.9, "b".to_string()),
                ])
            },
            10,
        )
        .await
        .unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(result[0], "b");
    }
}
