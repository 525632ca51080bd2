//! End-to-end ingestion orchestration: extract -> dedup -> enrich -> score
//! -> chunk -> embed -> index -> OCR-queue -> metrics (spec §4.16, C19).
//!
//! Idempotent by `content_hash`: re-ingesting bytes that normalize to a
//! hash already present in `documents` is a no-op that returns the
//! existing `doc_id` rather than creating a second row.

use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tokio::time::Instant;
use uuid::Uuid;

use crate::config::Config;
use crate::config::EmbeddingConfig;
use crate::config::OcrConfig;
use crate::dedup::{self, Deduper};
use crate::embedding::{self, EmbeddingProvider};
use crate::enrich;
use crate::extract::{default_sources, detect_source, DocumentSource, SourceHint};
use crate::keyword_index::KeywordIndex;
use crate::llm::LlmDispatcher;
use crate::models::{CorpusView, Document, GateKind, IngestOutcome, Provenance, SourceKind};
use crate::monitor::Monitoring;
use crate::ocr_queue::{should_reocr, OcrQueue, OcrQueueEntry, OcrState};
use crate::quality::{self, ScoringInput};
use crate::vector_index::VectorIndex;
use crate::vocabulary::Vocabulary;
use crate::{chunk, corpus};

/// Maps the coarse [`SourceKind`] to the finer-grained gate key the quality
/// thresholds table is keyed on (spec §4.7). Anything not named here falls
/// through to `gate_threshold`'s own `generic` default.
fn infer_gate_kind(source_kind: SourceKind, _provenance: &Provenance) -> GateKind {
    let key = match source_kind {
        SourceKind::Email => "email.thread",
        SourceKind::Chat => "chat.daily",
        SourceKind::Pdf => "pdf.report",
        SourceKind::Html => "web.article",
        SourceKind::Markdown | SourceKind::Text => "note",
        _ => "generic",
    };
    GateKind(key.to_string())
}

/// Picks the closest entity date to `now` out of the enrichment's raw date
/// strings, tolerating both RFC3339 and bare `YYYY-MM-DD` forms.
fn nearest_entity_date(dates: &[String], now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    dates
        .iter()
        .filter_map(|s| {
            DateTime::parse_from_rfc3339(s)
                .map(|d| d.with_timezone(&Utc))
                .ok()
                .or_else(|| {
                    chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
                        .ok()
                        .map(|d| d.and_hms_opt(0, 0, 0).unwrap().and_utc())
                })
        })
        .min_by_key(|d| (*d - now).num_seconds().abs())
}

/// A rough structural signal for the quality scorer: markdown/office
/// documents and anything with more than one paragraph are "structured";
/// a single unbroken blob of text is not (spec §4.7 `has_structure`).
fn has_structure(source_kind: SourceKind, text: &str) -> bool {
    matches!(source_kind, SourceKind::Markdown | SourceKind::Office) || text.contains("\n\n")
}

pub struct IngestionPipeline<'a> {
    pool: &'a SqlitePool,
    dispatcher: &'a LlmDispatcher,
    vocabulary: &'a Vocabulary,
    embedder: &'a dyn EmbeddingProvider,
    embedding_config: &'a EmbeddingConfig,
    ocr_config: &'a OcrConfig,
    ocr_queue: &'a OcrQueue,
    deduper: &'a Deduper,
    monitoring: &'a Monitoring,
}

impl<'a> IngestionPipeline<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: &'a SqlitePool,
        dispatcher: &'a LlmDispatcher,
        vocabulary: &'a Vocabulary,
        embedder: &'a dyn EmbeddingProvider,
        embedding_config: &'a EmbeddingConfig,
        ocr_config: &'a OcrConfig,
        ocr_queue: &'a OcrQueue,
        deduper: &'a Deduper,
        monitoring: &'a Monitoring,
    ) -> Self {
        IngestionPipeline {
            pool,
            dispatcher,
            vocabulary,
            embedder,
            embedding_config,
            ocr_config,
            ocr_queue,
            deduper,
            monitoring,
        }
    }

    /// Runs the full ingestion sequence on one document's raw bytes (spec
    /// §4.16). `source_path` is only used for OCR-queue bookkeeping; pass
    /// the original filename or a synthetic identifier for in-memory
    /// sources.
    pub async fn ingest(
        &self,
        bytes: &[u8],
        filename: Option<&str>,
        mime_type: Option<&str>,
        source_path: &str,
        timeout: Duration,
    ) -> anyhow::Result<IngestOutcome> {
        let start = Instant::now();
        let deadline = start + timeout;
        let hint = SourceHint { mime_type, filename };
        let sources = default_sources();

        let source = match detect_source(&sources, &hint) {
            Some(s) => s,
            None => {
                self.monitoring.counter("ingest_parse_failed_total", &[], 1);
                return Ok(IngestOutcome::Failed {
                    kind: "unrecognized_source".to_string(),
                    detail: format!(
                        "no DocumentSource claimed filename={filename:?} mime={mime_type:?}"
                    ),
                });
            }
        };
        let source_kind = source.kind();

        let extracted = match source.extract(bytes, &hint) {
            Ok(e) => e,
            Err(e) => {
                self.monitoring.counter(
                    "ingest_parse_failed_total",
                    &[("source_kind", &source_kind.to_string())],
                    1,
                );
                return Ok(IngestOutcome::Failed {
                    kind: "extract_failed".to_string(),
                    detail: e.to_string(),
                });
            }
        };

        let content_hash = dedup::content_hash(&extracted.text);
        if let Some(existing) = self.existing_doc_id(&content_hash).await? {
            self.monitoring.counter("ingest_duplicate_total", &[], 1);
            return Ok(IngestOutcome::Duplicate { doc_id: existing });
        }

        let doc_id = Uuid::new_v4().to_string();
        let dedup_decision = self.deduper.check_and_record(&doc_id, &extracted.text);

        let gate_kind = infer_gate_kind(source_kind, &extracted.provenance);
        let now = Utc::now();
        let title = enrich::extract_title(&extracted.text, filename, None);

        let mut metadata = enrich::enrich(
            self.dispatcher,
            self.vocabulary,
            &extracted.text,
            filename,
            None,
            deadline,
        )
        .await;
        metadata.people = enrich::canonicalize_people(self.pool, &metadata.people).await?;

        let watchlist_hit = !self.vocabulary.match_projects(&extracted.text, now).is_empty();
        let similar_topic_docs_90d = self.count_recent_same_gate(&gate_kind, now).await?;

        let scores = quality::score(&ScoringInput {
            text: &extracted.text,
            ocr_confidence: extracted.ocr_confidence,
            parse_success: true,
            has_structure: has_structure(source_kind, &extracted.text),
            gate_kind: &gate_kind,
            similar_topic_docs_90d,
            watchlist_hit,
            nearest_entity_date: nearest_entity_date(&metadata.entities.dates, now),
            is_exact_duplicate: dedup_decision.is_duplicate,
            now,
        });

        let cost_usd = metadata.enrichment_cost_usd;
        let document = Document {
            doc_id: doc_id.clone(),
            source_kind,
            gate_kind: gate_kind.clone(),
            title,
            body: extracted.text.clone(),
            ingested_at: now,
            created_at: now,
            content_hash: content_hash.clone(),
            byte_size: bytes.len() as i64,
            ocr_confidence: extracted.ocr_confidence,
            provenance: extracted.provenance.clone(),
            metadata,
            scores: scores.clone(),
        };

        let views = corpus::route(&scores, dedup_decision.is_duplicate, &gate_kind);
        let in_canonical = views.contains(&CorpusView::Canonical);

        self.persist_document(&document, dedup_decision.is_duplicate, in_canonical).await?;

        let chunks = chunk::chunk_document(&document);
        self.persist_chunks(&chunks).await?;

        let keyword_index = KeywordIndex::new(self.pool);
        for c in &chunks {
            keyword_index.add(&c.chunk_id, &c.doc_id, &c.text).await?;
        }

        if self.embedding_config.is_enabled() && !chunks.is_empty() {
            let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
            match embedding::embed_texts(self.embedder, self.embedding_config, &texts).await {
                Ok(vectors) => {
                    let vector_index = VectorIndex::new(self.pool);
                    for (c, v) in chunks.iter().zip(vectors.iter()) {
                        vector_index
                            .add(&c.chunk_id, &c.doc_id, self.embedder.model_name(), v)
                            .await?;
                    }
                }
                Err(e) => {
                    self.monitoring.log_event(
                        "warn",
                        "embedding_failed",
                        serde_json::json!({"doc_id": doc_id, "error": e.to_string()}),
                    );
                }
            }
        }

        if let Some(conf) = extracted.ocr_confidence {
            if should_reocr(conf, &source_kind.to_string()) {
                self.ocr_queue.enqueue(OcrQueueEntry {
                    doc_id: doc_id.clone(),
                    source_path: source_path.to_string(),
                    original_confidence: conf,
                    attempts: 0,
                    state: OcrState::Pending,
                    last_error: None,
                })?;
                self.monitoring.counter(
                    "ocr_queue_enqueued_total",
                    &[("source_kind", &source_kind.to_string())],
                    1,
                );
            }
        }

        let latency_ms = Instant::now().duration_since(start).as_millis() as f64;
        self.monitoring.histogram("ingest_latency_ms", latency_ms, &[]);
        self.monitoring.counter(
            "ingest_documents_total",
            &[
                ("source_kind", &source_kind.to_string()),
                ("do_index", &scores.do_index.to_string()),
            ],
            1,
        );
        self.monitoring.log_event(
            "info",
            "ingest_completed",
            serde_json::json!({
                "doc_id": doc_id,
                "source_kind": source_kind.to_string(),
                "do_index": scores.do_index,
                "in_canonical": in_canonical,
                "chunks": chunks.len(),
                "latency_ms": latency_ms,
            }),
        );

        if !scores.do_index {
            return Ok(IngestOutcome::Gated {
                doc_id,
                reason: scores.gate_reason.clone().unwrap_or_else(|| "gated".to_string()),
            });
        }

        Ok(IngestOutcome::Indexed {
            doc_id,
            chunks: chunks.len(),
            cost_usd,
        })
    }

    async fn existing_doc_id(&self, content_hash: &str) -> anyhow::Result<Option<String>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT doc_id FROM documents WHERE content_hash = ? LIMIT 1")
                .bind(content_hash)
                .fetch_optional(self.pool)
                .await?;
        Ok(row.map(|(id,)| id))
    }

    /// Approximates "documents on a similar topic ingested in the last 90
    /// days" (spec §4.7 `similar_topic_docs_90d`) by counting same-gate-kind
    /// documents in that window; a full topic-overlap query would need
    /// `json_each` over `metadata_json`, which this crate does not rely on
    /// elsewhere (see DESIGN.md).
    async fn count_recent_same_gate(
        &self,
        gate_kind: &GateKind,
        now: DateTime<Utc>,
    ) -> anyhow::Result<usize> {
        let cutoff = (now - chrono::Duration::days(90)).timestamp();
        let count: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM documents WHERE gate_kind = ? AND created_at >= ?",
        )
        .bind(gate_kind.as_str())
        .bind(cutoff)
        .fetch_one(self.pool)
        .await?;
        Ok(count.0.max(0) as usize)
    }

    async fn persist_document(&self, doc: &Document, is_duplicate: bool, in_canonical: bool) -> anyhow::Result<()> {
        let provenance_json = serde_json::to_string(&doc.provenance)?;
        let metadata_json = serde_json::to_string(&doc.metadata)?;
        sqlx::query(
            r#"
            INSERT INTO documents (
                doc_id, source_kind, gate_kind, title, body, ingested_at, created_at,
                content_hash, byte_size, ocr_confidence, provenance_json, metadata_json,
                quality, novelty, actionability, signalness, do_index, gate_reason,
                is_duplicate, in_canonical
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&doc.doc_id)
        .bind(doc.source_kind.to_string())
        .bind(doc.gate_kind.as_str())
        .bind(&doc.title)
        .bind(&doc.body)
        .bind(doc.ingested_at.timestamp())
        .bind(doc.created_at.timestamp())
        .bind(&doc.content_hash)
        .bind(doc.byte_size)
        .bind(doc.ocr_confidence)
        .bind(provenance_json)
        .bind(metadata_json)
        .bind(doc.scores.quality)
        .bind(doc.scores.novelty)
        .bind(doc.scores.actionability)
        .bind(doc.scores.signalness)
        .bind(doc.scores.do_index as i64)
        .bind(&doc.scores.gate_reason)
        .bind(is_duplicate as i64)
        .bind(in_canonical as i64)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    async fn persist_chunks(&self, chunks: &[crate::models::Chunk]) -> anyhow::Result<()> {
        for c in chunks {
            let parent_titles_json = serde_json::to_string(&c.parent_titles)?;
            let topics_json = serde_json::to_string(&c.topics)?;
            sqlx::query(
                r#"
                INSERT INTO chunks (
                    chunk_id, doc_id, position, text, token_estimate, kind,
                    parent_titles_json, topics_json, title, quality_score, signalness,
                    created_at, source_kind
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(doc_id, position) DO NOTHING
                "#,
            )
            .bind(&c.chunk_id)
            .bind(&c.doc_id)
            .bind(c.position)
            .bind(&c.text)
            .bind(c.token_estimate)
            .bind(format!("{:?}", c.kind).to_lowercase())
            .bind(parent_titles_json)
            .bind(topics_json)
            .bind(&c.title)
            .bind(c.quality_score)
            .bind(c.signalness)
            .bind(c.created_at.timestamp())
            .bind(c.source_kind.to_string())
            .execute(self.pool)
            .await?;
        }
        Ok(())
    }
}

/// Walks `path` (a single file or a directory) and ingests every regular
/// file found under it, printing one outcome line per file. CLI entry
/// point for `ctx ingest <path>`.
pub async fn run_ingest(config: &Config, path: &std::path::Path, timeout_secs: u64) -> anyhow::Result<()> {
    let pool = crate::db::connect(config).await?;
    let dispatcher = LlmDispatcher::new(config.llm.providers.clone(), config.llm.daily_budget_usd);
    let vocabulary = Vocabulary::load(&config.vocabulary.dir)?;
    let embedder = embedding::create_provider(&config.embedding)?;
    let ocr_queue = OcrQueue::load(&config.ocr.queue_path)?;
    let deduper = Deduper::new();
    let monitoring = Monitoring::new("context-harness", Box::new(std::io::stderr()));
    let timeout = Duration::from_secs(timeout_secs);

    let pipeline = IngestionPipeline::new(
        &pool,
        &dispatcher,
        &vocabulary,
        embedder.as_ref(),
        &config.embedding,
        &config.ocr,
        &ocr_queue,
        &deduper,
        &monitoring,
    );

    let files: Vec<std::path::PathBuf> = if path.is_dir() {
        walkdir::WalkDir::new(path)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .collect()
    } else {
        vec![path.to_path_buf()]
    };

    let mut indexed = 0u64;
    let mut duplicate = 0u64;
    let mut gated = 0u64;
    let mut failed = 0u64;

    for file in &files {
        let bytes = match std::fs::read(file) {
            Ok(b) => b,
            Err(e) => {
                eprintln!("Warning: could not read {}: {}", file.display(), e);
                failed += 1;
                continue;
            }
        };
        let filename = file.file_name().and_then(|n| n.to_str());
        let source_path = file.to_string_lossy().to_string();

        match pipeline.ingest(&bytes, filename, None, &source_path, timeout).await {
            Ok(IngestOutcome::Indexed { doc_id, chunks, cost_usd }) => {
                indexed += 1;
                println!("indexed   {source_path}  doc_id={doc_id} chunks={chunks} cost_usd={cost_usd:.4}");
            }
            Ok(IngestOutcome::Duplicate { doc_id }) => {
                duplicate += 1;
                println!("duplicate {source_path}  doc_id={doc_id}");
            }
            Ok(IngestOutcome::Gated { doc_id, reason }) => {
                gated += 1;
                println!("gated     {source_path}  doc_id={doc_id} reason={reason}");
            }
            Ok(IngestOutcome::Failed { kind, detail }) => {
                failed += 1;
                println!("failed    {source_path}  kind={kind} detail={detail}");
            }
            Err(e) => {
                failed += 1;
                eprintln!("Error ingesting {source_path}: {e}");
            }
        }
    }

    println!();
    println!(
        "ingest summary: {} indexed, {} duplicate, {} gated, {} failed ({} files)",
        indexed,
        duplicate,
        gated,
        failed,
        files.len()
    );

    pool.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_kind_inference_covers_known_kinds() {
        let prov = Provenance::default();
        assert_eq!(infer_gate_kind(SourceKind::Email, &prov).as_str(), "email.thread");
        assert_eq!(infer_gate_kind(SourceKind::Chat, &prov).as_str(), "chat.daily");
        assert_eq!(infer_gate_kind(SourceKind::Pdf, &prov).as_str(), "pdf.report");
        assert_eq!(infer_gate_kind(SourceKind::Html, &prov).as_str(), "web.article");
        assert_eq!(infer_gate_kind(SourceKind::Markdown, &prov).as_str(), "note");
        assert_eq!(infer_gate_kind(SourceKind::Code, &prov).as_str(), "generic");
    }

    #[test]
    fn nearest_entity_date_picks_closest_to_now() {
        let now: DateTime<Utc> = "2024-06-15T00:00:00Z".parse().unwrap();
        let dates = vec![
            "2024-01-01".to_string(),
            "2024-06-10".to_string(),
            "2025-01-01".to_string(),
        ];
        let nearest = nearest_entity_date(&dates, now).unwrap();
        assert_eq!(nearest.format("%Y-%m-%d").to_string(), "2024-06-10");
    }

    #[test]
    fn nearest_entity_date_empty_yields_none() {
        let now = Utc::now();
        assert!(nearest_entity_date(&[], now).is_none());
    }

    #[test]
    fn has_structure_detects_blank_line_paragraphs() {
        assert!(has_structure(SourceKind::Text, "para one\n\npara two"));
        assert!(!has_structure(SourceKind::Text, "one unbroken line of text"));
        assert!(has_structure(SourceKind::Markdown, "one unbroken line of text"));
    }
}
