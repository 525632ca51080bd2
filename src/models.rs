//! Core data models shared across every component.
//!
//! These types are the nouns the rest of the crate operates on: [`Document`]
//! and its owned [`EnrichedMetadata`]/[`Scores`], the retrieval unit
//! [`Chunk`], the dual-corpus [`CorpusView`], and the bookkeeping types used
//! by the LLM dispatcher ([`ProviderSpec`], [`CostLedgerEntry`]) and the eval
//! harness ([`GoldQuery`]).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse document classification, used for per-kind quality/gating
/// thresholds (spec §4.7) and for DocumentSource dispatch (spec §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Text,
    Markdown,
    Pdf,
    Office,
    Email,
    Chat,
    Image,
    Html,
    Code,
    Other,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SourceKind::Text => "text",
            SourceKind::Markdown => "markdown",
            SourceKind::Pdf => "pdf",
            SourceKind::Office => "office",
            SourceKind::Email => "email",
            SourceKind::Chat => "chat",
            SourceKind::Image => "image",
            SourceKind::Html => "html",
            SourceKind::Code => "code",
            SourceKind::Other => "other",
        };
        f.write_str(s)
    }
}

/// Per-type gate key used against the table in spec §4.7. Distinct from
/// [`SourceKind`] because the gate is keyed on a finer-grained label
/// (`email.thread`, `pdf.report`, ...) than the coarse MIME-ish kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GateKind(pub String);

impl GateKind {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Original-file / thread provenance attached to a [`Document`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Provenance {
    pub original_filename: Option<String>,
    pub message_id: Option<String>,
    pub in_reply_to: Option<String>,
    pub references: Vec<String>,
    pub thread_id: Option<String>,
    pub byte_range: Option<(usize, usize)>,
}

/// A logical unit created from a single source. Immutable once indexed;
/// re-ingest of changed content creates a new `doc_id` (spec §3 Lifecycle).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub doc_id: String,
    pub source_kind: SourceKind,
    pub gate_kind: GateKind,
    pub title: String,
    pub body: String,
    pub ingested_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub content_hash: String,
    pub byte_size: i64,
    pub ocr_confidence: Option<f64>,
    pub provenance: Provenance,
    pub metadata: EnrichedMetadata,
    pub scores: Scores,
}

/// Structured metadata produced by the EnrichmentService (C8), owned by
/// [`Document`]. `topics` are controlled-vocabulary paths; `organizations`
/// and `technologies` are free-text but canonicalized.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnrichedMetadata {
    pub topics: Vec<String>,
    pub projects: Vec<String>,
    pub places: Vec<String>,
    pub people: Vec<String>,
    pub organizations: Vec<String>,
    pub technologies: Vec<String>,
    pub entities: Entities,
    pub summary: String,
    pub suggested_tags: Vec<String>,
    pub enrichment_version: String,
    pub enrichment_cost_usd: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Entities {
    pub dates: Vec<String>,
    pub numbers: Vec<String>,
}

/// Quality/novelty/actionability scoring, owned by [`Document`] (spec §3).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Scores {
    pub quality: f64,
    pub novelty: f64,
    pub actionability: f64,
    pub signalness: f64,
    pub do_index: bool,
    pub gate_reason: Option<String>,
}

impl Scores {
    /// `signalness = 0.4*quality + 0.3*novelty + 0.3*actionability`, rounded
    /// to 4 decimal places per the invariant in spec §8.
    pub fn compute_signalness(quality: f64, novelty: f64, actionability: f64) -> f64 {
        let raw = 0.4 * quality + 0.3 * novelty + 0.3 * actionability;
        (raw * 10_000.0).round() / 10_000.0
    }
}

/// Kind of retrieval unit a [`Chunk`] represents (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    Paragraph,
    Heading,
    List,
    Table,
    Code,
    Other,
}

/// A retrieval unit belonging to exactly one [`Document`] (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub doc_id: String,
    pub text: String,
    pub token_estimate: i64,
    pub kind: ChunkKind,
    pub parent_titles: Vec<String>,
    pub position: i64,
    /// Denormalized copy of document metadata kept on the chunk for
    /// filterable retrieval (spec §3).
    pub topics: Vec<String>,
    pub title: String,
    pub quality_score: f64,
    pub signalness: f64,
    pub created_at: DateTime<Utc>,
    pub source_kind: SourceKind,
}

/// Token estimate heuristic shared by the chunker and tests:
/// `max(1, ceil(len/4))`, except an empty string yields `0` (spec §4.6.7).
pub fn token_estimate(text: &str) -> i64 {
    if text.is_empty() {
        0
    } else {
        std::cmp::max(1, (text.len() as f64 / 4.0).ceil() as i64)
    }
}

/// Which corpus collection a chunk belongs to (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CorpusView {
    Canonical,
    Full,
}

impl CorpusView {
    pub fn collection_name(self) -> &'static str {
        match self {
            CorpusView::Canonical => "documents_canonical",
            CorpusView::Full => "documents_full",
        }
    }
}

/// Describes one configured LLM provider/model combination (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSpec {
    pub provider: String,
    pub model_id: String,
    pub usd_per_1k_prompt: f64,
    pub usd_per_1k_completion: f64,
    pub context_window: i64,
    pub structured_output: bool,
    pub vision: bool,
    pub api_key_env: String,
    pub base_url: Option<String>,
}

/// One append-only cost ledger record (spec §6 persisted-state layout).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostLedgerEntry {
    pub ts: DateTime<Utc>,
    pub provider: String,
    pub model: String,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub usd: f64,
    pub op: String,
    pub doc_id: Option<String>,
}

/// A labeled query/expected-docs pair used by the eval harness (spec §3, §8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoldQuery {
    pub query_text: String,
    pub expected_doc_ids: Vec<String>,
    pub notes: Option<String>,
}

/// Tagged outcome of an ingestion attempt (spec §9: "exception-for-control
/// -> explicit result types").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IngestOutcome {
    Indexed {
        doc_id: String,
        chunks: usize,
        cost_usd: f64,
    },
    Duplicate {
        doc_id: String,
    },
    Gated {
        doc_id: String,
        reason: String,
    },
    Failed {
        kind: String,
        detail: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signalness_matches_weighted_formula() {
        let s = Scores::compute_signalness(0.8, 0.5, 0.2);
        assert!((s - 0.53).abs() < 1e-9);
    }

    #[test]
    fn token_estimate_empty_is_zero() {
        assert_eq!(token_estimate(""), 0);
    }

    #[test]
    fn token_estimate_rounds_up() {
        assert_eq!(token_estimate("abcde"), 2); // ceil(5/4) = 2
        assert_eq!(token_estimate("a"), 1); // max(1, ceil(1/4)) = 1
    }

    #[test]
    fn collection_names_are_deterministic() {
        assert_eq!(CorpusView::Canonical.collection_name(), "documents_canonical");
        assert_eq!(CorpusView::Full.collection_name(), "documents_full");
    }
}
