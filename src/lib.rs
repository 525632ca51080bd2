//! # Context Harness
//!
//! **A local-first personal retrieval-augmented-generation service.**
//!
//! Context Harness ingests heterogeneous personal documents (notes, email,
//! chat exports, PDFs, office files), extracts and enriches them, scores
//! their quality/novelty/actionability, chunks and indexes them for hybrid
//! keyword + vector retrieval, and answers questions over the corpus with
//! HyDE expansion, cross-encoder reranking, and confidence-gated synthesis.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌────────────────────┐   ┌───────────┐
//! │ DocumentSource│──▶│  IngestionPipeline │──▶│  SQLite    │
//! │ text/pdf/email│   │ dedup/enrich/score │   │ FTS5+Vec   │
//! │ office/chat    │   │ chunk/embed/index  │   │ + queues   │
//! └──────────────┘   └────────────────────┘   └────┬──────┘
//!                                                   │
//!                       ┌───────────────────────────┤
//!                       ▼                           ▼
//!                  ┌──────────┐               ┌───────────┐
//!                  │   CLI    │               │   HTTP    │
//!                  │  (ctx)   │               │   (MCP)   │
//!                  └──────────┘               └───────────┘
//! ```
//!
//! ## Data Flow
//!
//! 1. **[`extract`]** turns raw bytes into an [`models::Document`] via a
//!    priority-ordered list of [`extract::DocumentSource`] implementations.
//! 2. **[`ingest`]** (the ingestion pipeline) dedupes by content hash,
//!    enriches with entities/topics via [`enrich`], scores the document with
//!    [`quality`], routes it into one or both [`models::CorpusView`]s via
//!    [`corpus`], chunks it with [`chunk`], embeds it via [`embedding`], and
//!    indexes it in both [`keyword_index`] (FTS5/BM25) and [`vector_index`].
//! 3. **[`query`]** (the query pipeline) expands a question with
//!    [`hyde`], retrieves candidates via [`retrieve`], reranks them with
//!    [`rerank`], checks [`confidence`], and synthesizes an answer with
//!    [`synthesize`].
//! 4. Results are exposed via the **CLI** (`ctx`) and the **MCP HTTP server**
//!    ([`server`]).
//!
//! ## Quick Start
//!
//! ```bash
//! ctx init                      # create database
//! ctx ingest ./notes            # ingest local files
//! ctx embed pending             # generate embeddings for queued chunks
//! ctx chat "what did we decide about the migration?"
//! ctx serve mcp                 # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing, env overrides, validation |
//! | [`models`] | Core data types: `Document`, `Chunk`, `Scores`, `CorpusView` |
//! | [`vocabulary`] | Controlled vocabulary + watchlist matching |
//! | [`extract`] | `DocumentSource` trait + per-kind extractors |
//! | [`ocr_queue`] | Re-OCR queue for low-confidence scans |
//! | [`llm`] | Multi-provider LLM dispatcher with budget tracking |
//! | [`embedding`] | Embedding provider trait, OpenAI + local implementations |
//! | [`vector_index`] | SQLite-backed vector similarity search |
//! | [`keyword_index`] | FTS5-backed BM25 keyword search |
//! | [`enrich`] | LLM-driven metadata enrichment and entity canonicalization |
//! | [`chunk`] | Structure-aware chunker |
//! | [`quality`] | Quality/novelty/actionability/signalness scoring |
//! | [`dedup`] | Exact and near-duplicate detection |
//! | [`corpus`] | Canonical/full corpus routing |
//! | [`retrieve`] | Hybrid keyword + vector retrieval |
//! | [`rerank`] | Cross-encoder reranking with cache |
//! | [`hyde`] | Hypothetical-document-embedding query expansion |
//! | [`confidence`] | Confidence gating before synthesis |
//! | [`synthesize`] | Grounded answer synthesis |
//! | [`monitor`] | Structured JSONL event logging, metrics, health checks |
//! | [`ingest`] | The full ingestion pipeline orchestrator |
//! | [`query`] | The full query pipeline orchestrator |
//! | [`export`] | Knowledge-note markdown export |
//! | [`get`] | Document/thread/entity-timeline retrieval |
//! | [`sources`] | Provider/embedding/reranker health status |
//! | [`stats`] | Corpus-wide counts and breakdowns for `ctx stats` |
//! | [`server`] | MCP-compatible HTTP server (Axum) with CORS |
//! | [`db`] | SQLite connection pool with WAL mode |
//! | [`migrate`] | Database schema migrations (idempotent) |
//!
//! ## Configuration
//!
//! Context Harness is configured via a TOML file (default: `config/ctx.toml`),
//! overridable by a small set of environment variables. See [`config`] for all
//! available options and [`config::load_config`] for validation rules.

pub mod chunk;
pub mod confidence;
pub mod config;
pub mod corpus;
pub mod db;
pub mod dedup;
pub mod embed_cmd;
pub mod embedding;
pub mod enrich;
pub mod export;
pub mod extract;
pub mod get;
pub mod hyde;
pub mod ingest;
pub mod keyword_index;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod monitor;
pub mod ocr_queue;
pub mod query;
pub mod quality;
pub mod rerank;
pub mod retrieve;
pub mod server;
pub mod sources;
pub mod stats;
pub mod synthesize;
pub mod vector_index;
pub mod vocabulary;
