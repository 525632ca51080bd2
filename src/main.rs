//! `ctx` — command-line entry point for the context harness service.
//!
//! Thin dispatch layer: parses arguments with `clap` and hands off to the
//! library crate's modules, each of which owns its own `run_*`/CLI-facing
//! function. See [`context_harness`] for the architecture overview.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use context_harness::config;
use context_harness::embed_cmd;
use context_harness::export;
use context_harness::get;
use context_harness::ingest;
use context_harness::migrate;
use context_harness::models::CorpusView;
use context_harness::query;
use context_harness::rerank::{LexicalOverlapScorer, Reranker};
use context_harness::server;
use context_harness::sources;
use context_harness::stats;
use context_harness::vocabulary::{VocabKind, Vocabulary};

#[derive(Parser)]
#[command(
    name = "ctx",
    about = "Context Harness — a local-first personal retrieval-augmented-generation service",
    version
)]
struct Cli {
    /// Path to configuration file
    #[arg(long, global = true, default_value = "./config/ctx.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema
    Init,

    /// Ingest a file or a directory of files
    Ingest {
        /// Path to a file or directory
        path: PathBuf,

        /// Per-document ingestion timeout, in seconds
        #[arg(long, default_value_t = 60)]
        timeout_secs: u64,
    },

    /// Manage embeddings
    Embed {
        #[command(subcommand)]
        action: EmbedAction,
    },

    /// Ask a question against the indexed corpus (HyDE -> retrieve -> rerank
    /// -> confidence-gate -> synthesize)
    Chat {
        /// The question to ask
        query: String,

        /// Number of chunks to pass to synthesis
        #[arg(long, default_value_t = 8)]
        top_k: usize,

        /// Search the full corpus instead of just the canonical view
        #[arg(long)]
        full_corpus: bool,

        /// Disable HyDE query expansion
        #[arg(long)]
        no_hyde: bool,

        /// Disable reranking
        #[arg(long)]
        no_rerank: bool,

        /// Query timeout, in seconds
        #[arg(long, default_value_t = 30)]
        timeout_secs: u64,
    },

    /// Retrieve a document by ID
    Get {
        /// Document ID (UUID)
        id: String,
    },

    /// Retrieve every document sharing a thread ID
    Thread {
        /// Thread ID
        id: String,
    },

    /// Retrieve the timeline of documents mentioning an entity
    Timeline {
        /// Entity kind: person, place, project, or organization
        kind: String,

        /// Canonical entity name
        name: String,
    },

    /// Delete a document and its chunks/index entries
    Delete {
        /// Document ID (UUID)
        id: String,
    },

    /// Show database and index statistics
    Stats,

    /// List configured LLM/embedding/rerank providers and their health
    Sources,

    /// Export the index as JSON, or a single document as a knowledge note
    Export {
        /// Write JSON export to this path instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,

        /// Export a single document as a knowledge note instead
        #[arg(long)]
        knowledge_note: Option<String>,

        /// Directory to write the knowledge note into
        #[arg(long, default_value = "knowledge_notes")]
        notes_dir: PathBuf,
    },

    /// Inspect the controlled vocabulary
    Vocab {
        #[command(subcommand)]
        action: VocabAction,
    },

    /// Inspect and retry the OCR re-processing queue
    OcrQueue {
        #[command(subcommand)]
        action: OcrQueueAction,
    },

    /// Start the MCP-compatible HTTP server
    Serve {
        #[command(subcommand)]
        service: ServeService,
    },
}

#[derive(Subcommand)]
enum EmbedAction {
    /// Embed chunks that have no vector yet for the configured model
    Pending {
        /// Maximum number of chunks to embed
        #[arg(long)]
        limit: Option<usize>,

        /// Override batch size from config
        #[arg(long)]
        batch_size: Option<usize>,

        /// Show counts without writing
        #[arg(long)]
        dry_run: bool,
    },

    /// Delete and regenerate all embeddings for the configured model
    Rebuild {
        /// Override batch size from config
        #[arg(long)]
        batch_size: Option<usize>,
    },
}

#[derive(Subcommand)]
enum VocabAction {
    /// Check whether a path is valid (or prefix-valid) in a vocabulary tree
    Check {
        /// Vocabulary kind: topics, projects, places, or people
        kind: String,
        /// Slash-separated path to check
        path: String,
    },
    /// List controlled-vocabulary suggestions awaiting promotion
    List,
}

#[derive(Subcommand)]
enum OcrQueueAction {
    /// List entries currently pending re-processing
    List,
    /// Print the next batch of entries due for retry
    Retry {
        /// Maximum number of entries to show
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

#[derive(Subcommand)]
enum ServeService {
    /// Start the MCP tool server
    Mcp,
}

fn parse_vocab_kind(kind: &str) -> anyhow::Result<VocabKind> {
    match kind {
        "topics" => Ok(VocabKind::Topics),
        "projects" => Ok(VocabKind::Projects),
        "places" => Ok(VocabKind::Places),
        "people" => Ok(VocabKind::People),
        other => anyhow::bail!("unknown vocabulary kind: {other} (expected topics, projects, places, or people)"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest { path, timeout_secs } => {
            ingest::run_ingest(&cfg, &path, timeout_secs).await?;
        }
        Commands::Embed { action } => match action {
            EmbedAction::Pending { limit, batch_size, dry_run } => {
                embed_cmd::run_embed_pending(&cfg, limit, batch_size, dry_run).await?;
            }
            EmbedAction::Rebuild { batch_size } => {
                embed_cmd::run_embed_rebuild(&cfg, batch_size).await?;
            }
        },
        Commands::Chat { query: q, top_k, full_corpus, no_hyde, no_rerank, timeout_secs } => {
            run_chat(&cfg, &q, top_k, full_corpus, no_hyde, no_rerank, timeout_secs).await?;
        }
        Commands::Get { id } => {
            get::run_get(&cfg, &id).await?;
        }
        Commands::Thread { id } => {
            run_thread(&cfg, &id).await?;
        }
        Commands::Timeline { kind, name } => {
            run_timeline(&cfg, &kind, &name).await?;
        }
        Commands::Delete { id } => {
            run_delete(&cfg, &id).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Sources => {
            sources::list_sources(&cfg)?;
        }
        Commands::Export { output, knowledge_note, notes_dir } => match knowledge_note {
            Some(doc_id) => {
                let path = export::export_knowledge_note(&cfg, &doc_id, &notes_dir).await?;
                println!("Wrote knowledge note to {}", path.display());
            }
            None => {
                export::run_export(&cfg, output.as_deref()).await?;
            }
        },
        Commands::Vocab { action } => match action {
            VocabAction::Check { kind, path } => {
                let vocab_kind = parse_vocab_kind(&kind)?;
                let vocabulary = Vocabulary::load(&cfg.vocabulary.dir)?;
                let valid = vocabulary.is_valid(vocab_kind, &path);
                println!("{path}: {}", if valid { "valid" } else { "not valid" });
            }
            VocabAction::List => {
                let vocabulary = Vocabulary::load(&cfg.vocabulary.dir)?;
                let mut counters = vocabulary.suggestion_counters();
                counters.sort_by(|a, b| b.1.cmp(&a.1));
                if counters.is_empty() {
                    println!("no pending vocabulary suggestions");
                }
                for (tag, occurrences, last_seen) in counters {
                    let seen = last_seen.map(|t| t.to_rfc3339()).unwrap_or_else(|| "never".to_string());
                    println!("{tag:<32} occurrences={occurrences:<6} last_seen={seen}");
                }
            }
        },
        Commands::OcrQueue { action } => match action {
            OcrQueueAction::List => {
                let queue = context_harness::ocr_queue::OcrQueue::load(&cfg.ocr.queue_path)?;
                let entries = queue.all();
                if entries.is_empty() {
                    println!("OCR queue is empty");
                }
                for e in &entries {
                    println!(
                        "{:<38} state={:?} confidence={:.2} attempts={} path={}",
                        e.doc_id, e.state, e.original_confidence, e.attempts, e.source_path
                    );
                }
            }
            OcrQueueAction::Retry { limit } => {
                let queue = context_harness::ocr_queue::OcrQueue::load(&cfg.ocr.queue_path)?;
                let batch = queue.next_batch(limit);
                if batch.is_empty() {
                    println!("no entries due for retry");
                }
                for e in &batch {
                    println!("due for retry: {} (confidence={:.2})", e.doc_id, e.original_confidence);
                    queue.mark_processing(&e.doc_id)?;
                }
            }
        },
        Commands::Serve { service } => match service {
            ServeService::Mcp => {
                server::run_server(&cfg).await?;
            }
        },
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn run_chat(
    cfg: &config::Config,
    q: &str,
    top_k: usize,
    full_corpus: bool,
    no_hyde: bool,
    no_rerank: bool,
    timeout_secs: u64,
) -> anyhow::Result<()> {
    use context_harness::db;
    use context_harness::embedding;
    use context_harness::llm::LlmDispatcher;
    use context_harness::monitor::Monitoring;

    let pool = db::connect(cfg).await?;
    let dispatcher = LlmDispatcher::new(cfg.llm.providers.clone(), cfg.llm.daily_budget_usd);
    let embedder = embedding::create_provider(&cfg.embedding)?;
    let reranker = Reranker::new(Box::new(LexicalOverlapScorer));
    let monitoring = Monitoring::new("context-harness", Box::new(std::io::stderr()));

    let options = query::QueryOptions {
        top_k,
        use_hyde: !no_hyde && cfg.query.enable_hyde,
        hyde_variants: cfg.query.hyde_variants,
        use_rerank: !no_rerank && cfg.rerank.enable_rerank,
        filter: None,
        view: if full_corpus { CorpusView::Full } else { CorpusView::Canonical },
        timeout: std::time::Duration::from_secs(timeout_secs),
    };

    let result = query::run(
        &pool,
        &dispatcher,
        embedder.as_ref(),
        &cfg.embedding,
        &reranker,
        &monitoring,
        q,
        &options,
    )
    .await?;

    pool.close().await;

    println!("{}", result.synthesis.answer_text);
    if !result.synthesis.citations.is_empty() {
        println!();
        println!("Citations: {}", result.synthesis.citations.join(", "));
    }
    println!();
    println!(
        "confidence: overall={:.2} relevance={:.2} coverage={:.2} quality={:.2} ({:?})",
        result.assessment.overall,
        result.assessment.relevance,
        result.assessment.coverage,
        result.assessment.quality,
        result.assessment.recommendation
    );
    println!(
        "model={} cost_usd={:.4} latency_ms={}",
        result.synthesis.model_used, result.synthesis.usd, result.synthesis.latency_ms
    );

    Ok(())
}

async fn run_thread(cfg: &config::Config, thread_id: &str) -> anyhow::Result<()> {
    use context_harness::db;

    let pool = db::connect(cfg).await?;
    let thread = get::get_thread(&pool, thread_id).await;
    pool.close().await;
    let thread = thread?;

    println!("--- Thread {} ({} documents) ---", thread.thread_id, thread.documents.len());
    for doc in &thread.documents {
        println!("{}  {}  {}  {}", doc.created_at, doc.doc_id, doc.gate_kind, doc.title);
    }
    Ok(())
}

async fn run_timeline(cfg: &config::Config, kind: &str, name: &str) -> anyhow::Result<()> {
    use context_harness::db;

    let pool = db::connect(cfg).await?;
    let timeline = get::get_entity_timeline(&pool, kind, name).await;
    pool.close().await;
    let timeline = timeline?;

    println!(
        "--- Timeline: {} ({}), first seen {} ---",
        timeline.canonical_name, timeline.kind, timeline.first_seen
    );
    for entry in &timeline.entries {
        println!("{}  {}  {}", entry.created_at, entry.doc_id, entry.title);
        println!("  {}", entry.snippet);
    }
    Ok(())
}

async fn run_delete(cfg: &config::Config, doc_id: &str) -> anyhow::Result<()> {
    use context_harness::db;

    let pool = db::connect(cfg).await?;
    let deleted = get::delete_document(&pool, doc_id).await;
    pool.close().await;
    if deleted? {
        println!("Deleted {doc_id}");
    } else {
        println!("No such document: {doc_id}");
    }
    Ok(())
}
