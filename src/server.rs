//! MCP-compatible HTTP server.
//!
//! Exposes the query and document-management surface over JSON HTTP, for
//! integration with Cursor, Claude, and other MCP-compatible AI tools.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/tools/ingest` | Ingest raw bytes (base64) as a document |
//! | `POST` | `/tools/chat` | HyDE -> retrieve -> rerank -> confidence-gate -> synthesize |
//! | `POST` | `/tools/document` | Retrieve a document by ID |
//! | `POST` | `/tools/thread` | Retrieve every document in a thread |
//! | `POST` | `/tools/entity_timeline` | Retrieve the timeline for an entity |
//! | `POST` | `/tools/delete` | Delete a document |
//! | `GET`  | `/tools/stats` | Database and index statistics |
//! | `GET`  | `/tools/sources` | Provider configuration and health |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! All error responses follow the schema:
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `internal` (500).
//!
//! # CORS
//!
//! Origins are restricted to `[server].allowed_origins`; `["*"]` (the
//! default) permits any origin.
//!
//! # Cursor Integration
//!
//! Add the following to your Cursor MCP configuration:
//!
//! ```json
//! {
//!   "mcpServers": {
//!     "context-harness": {
//!       "command": "ctx",
//!       "args": ["--config", "/path/to/ctx.toml", "serve", "mcp"]
//!     }
//!   }
//! }
//! ```

use axum::{
    extract::State,
    http::{HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;

use crate::config::Config;
use crate::db;
use crate::embedding::{self, EmbeddingProvider};
use crate::get::{self, DocumentResponse, EntityTimelineResponse, ThreadResponse};
use crate::ingest::IngestionPipeline;
use crate::llm::LlmDispatcher;
use crate::models::{CorpusView, IngestOutcome};
use crate::monitor::Monitoring;
use crate::ocr_queue::OcrQueue;
use crate::query::{self, QueryOptions};
use crate::rerank::{LexicalOverlapScorer, Reranker};
use crate::sources::{get_sources, SourceStatus};
use crate::vocabulary::Vocabulary;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
struct AppState {
    config: Config,
    pool: SqlitePool,
    dispatcher: LlmDispatcher,
    embedder: Box<dyn EmbeddingProvider>,
    vocabulary: Vocabulary,
    ocr_queue: OcrQueue,
    monitoring: Monitoring,
}

/// Starts the MCP-compatible HTTP server.
///
/// Binds to the address configured in `[server].bind` and registers all
/// route handlers. The server runs indefinitely until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();

    let pool = db::connect(config).await?;
    let dispatcher = LlmDispatcher::new(config.llm.providers.clone(), config.llm.daily_budget_usd);
    let embedder = embedding::create_provider(&config.embedding)?;
    let vocabulary = Vocabulary::load(&config.vocabulary.dir)?;
    let ocr_queue = OcrQueue::load(&config.ocr.queue_path)?;
    let monitoring = Monitoring::new("context-harness", Box::new(std::io::stderr()));

    let state = Arc::new(AppState {
        config: config.clone(),
        pool,
        dispatcher,
        embedder,
        vocabulary,
        ocr_queue,
        monitoring,
    });

    let mut cors = CorsLayer::new().allow_methods([Method::GET, Method::POST]);
    cors = if config.server.allowed_origins.iter().any(|o| o == "*") {
        cors.allow_origin(tower_http::cors::Any)
    } else {
        let origins: Vec<HeaderValue> = config
            .server
            .allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        cors.allow_origin(origins)
    };

    let app = Router::new()
        .route("/tools/ingest", post(handle_ingest))
        .route("/tools/chat", post(handle_chat))
        .route("/tools/document", post(handle_document))
        .route("/tools/thread", post(handle_thread))
        .route("/tools/entity_timeline", post(handle_entity_timeline))
        .route("/tools/delete", post(handle_delete))
        .route("/tools/stats", get(handle_stats))
        .route("/tools/sources", get(handle_sources))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state);

    println!("MCP server listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail { code: self.code, message: self.message },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError { status: StatusCode::BAD_REQUEST, code: "bad_request".to_string(), message: message.into() }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError { status: StatusCode::NOT_FOUND, code: "not_found".to_string(), message: message.into() }
}

fn internal_error(message: impl Into<String>) -> AppError {
    AppError { status: StatusCode::INTERNAL_SERVER_ERROR, code: "internal".to_string(), message: message.into() }
}

fn not_found_or_internal(e: anyhow::Error) -> AppError {
    let msg = e.to_string();
    if msg.contains("not found") {
        not_found(msg)
    } else {
        internal_error(msg)
    }
}

// ============ POST /tools/ingest ============

#[derive(Deserialize)]
struct IngestRequest {
    /// Base64-encoded document bytes.
    content_base64: String,
    filename: Option<String>,
    mime_type: Option<String>,
    #[serde(default = "default_source_path")]
    source_path: String,
}

fn default_source_path() -> String {
    "http-ingest".to_string()
}

async fn handle_ingest(
    State(state): State<Arc<AppState>>,
    Json(req): Json<IngestRequest>,
) -> Result<Json<IngestOutcome>, AppError> {
    use base64::Engine;

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(&req.content_base64)
        .map_err(|e| bad_request(format!("invalid base64: {e}")))?;

    let pipeline = IngestionPipeline::new(
        &state.pool,
        &state.dispatcher,
        &state.vocabulary,
        state.embedder.as_ref(),
        &state.config.embedding,
        &state.config.ocr,
        &state.ocr_queue,
        &crate::dedup::Deduper::new(),
        &state.monitoring,
    );

    let outcome = pipeline
        .ingest(&bytes, req.filename.as_deref(), req.mime_type.as_deref(), &req.source_path, Duration::from_secs(60))
        .await
        .map_err(|e| internal_error(e.to_string()))?;

    Ok(Json(outcome))
}

// ============ POST /tools/chat ============

#[derive(Deserialize)]
struct ChatRequest {
    query: String,
    #[serde(default = "default_top_k")]
    top_k: usize,
    #[serde(default)]
    full_corpus: bool,
    #[serde(default)]
    disable_hyde: bool,
    #[serde(default)]
    disable_rerank: bool,
}

fn default_top_k() -> usize {
    8
}

#[derive(Serialize)]
struct ChatResponse {
    answer: String,
    citations: Vec<String>,
    model_used: String,
    cost_usd: f64,
    confidence: f64,
    recommendation: String,
}

async fn handle_chat(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, AppError> {
    if req.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }

    let reranker = Reranker::new(Box::new(LexicalOverlapScorer));
    let options = QueryOptions {
        top_k: req.top_k,
        use_hyde: !req.disable_hyde && state.config.query.enable_hyde,
        hyde_variants: state.config.query.hyde_variants,
        use_rerank: !req.disable_rerank && state.config.rerank.enable_rerank,
        filter: None,
        view: if req.full_corpus { CorpusView::Full } else { CorpusView::Canonical },
        timeout: Duration::from_secs(30),
    };

    let result = query::run(
        &state.pool,
        &state.dispatcher,
        state.embedder.as_ref(),
        &state.config.embedding,
        &reranker,
        &state.monitoring,
        &req.query,
        &options,
    )
    .await
    .map_err(|e| internal_error(e.to_string()))?;

    Ok(Json(ChatResponse {
        answer: result.synthesis.answer_text,
        citations: result.synthesis.citations,
        model_used: result.synthesis.model_used,
        cost_usd: result.synthesis.usd,
        confidence: result.assessment.overall,
        recommendation: format!("{:?}", result.assessment.recommendation),
    }))
}

// ============ POST /tools/document ============

#[derive(Deserialize)]
struct DocumentRequest {
    doc_id: String,
}

async fn handle_document(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DocumentRequest>,
) -> Result<Json<DocumentResponse>, AppError> {
    if req.doc_id.trim().is_empty() {
        return Err(bad_request("doc_id must not be empty"));
    }
    let doc = get::get_document(&state.pool, &req.doc_id).await.map_err(not_found_or_internal)?;
    Ok(Json(doc))
}

// ============ POST /tools/thread ============

#[derive(Deserialize)]
struct ThreadRequest {
    thread_id: String,
}

async fn handle_thread(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ThreadRequest>,
) -> Result<Json<ThreadResponse>, AppError> {
    if req.thread_id.trim().is_empty() {
        return Err(bad_request("thread_id must not be empty"));
    }
    let thread = get::get_thread(&state.pool, &req.thread_id).await.map_err(not_found_or_internal)?;
    Ok(Json(thread))
}

// ============ POST /tools/entity_timeline ============

#[derive(Deserialize)]
struct EntityTimelineRequest {
    kind: String,
    canonical_name: String,
}

async fn handle_entity_timeline(
    State(state): State<Arc<AppState>>,
    Json(req): Json<EntityTimelineRequest>,
) -> Result<Json<EntityTimelineResponse>, AppError> {
    if req.canonical_name.trim().is_empty() {
        return Err(bad_request("canonical_name must not be empty"));
    }
    let timeline = get::get_entity_timeline(&state.pool, &req.kind, &req.canonical_name)
        .await
        .map_err(not_found_or_internal)?;
    Ok(Json(timeline))
}

// ============ POST /tools/delete ============

#[derive(Deserialize)]
struct DeleteRequest {
    doc_id: String,
}

#[derive(Serialize)]
struct DeleteResponse {
    deleted: bool,
}

async fn handle_delete(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DeleteRequest>,
) -> Result<Json<DeleteResponse>, AppError> {
    let deleted = get::delete_document(&state.pool, &req.doc_id)
        .await
        .map_err(|e| internal_error(e.to_string()))?;
    Ok(Json(DeleteResponse { deleted }))
}

// ============ GET /tools/stats ============

#[derive(Serialize)]
struct StatsResponse {
    total_docs: i64,
    total_chunks: i64,
    total_embedded: i64,
    total_canonical: i64,
    total_duplicates: i64,
    total_gated: i64,
}

async fn handle_stats(State(state): State<Arc<AppState>>) -> Result<Json<StatsResponse>, AppError> {
    let summary = crate::stats::fetch_summary(&state.pool).await.map_err(|e| internal_error(e.to_string()))?;
    Ok(Json(StatsResponse {
        total_docs: summary.total_docs,
        total_chunks: summary.total_chunks,
        total_embedded: summary.total_embedded,
        total_canonical: summary.total_canonical,
        total_duplicates: summary.total_duplicates,
        total_gated: summary.total_gated,
    }))
}

// ============ GET /tools/sources ============

#[derive(Serialize)]
struct SourcesResponse {
    sources: Vec<SourceStatus>,
}

async fn handle_sources(State(state): State<Arc<AppState>>) -> Result<Json<SourcesResponse>, AppError> {
    let sources = get_sources(&state.config);
    Ok(Json(SourcesResponse { sources }))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok".to_string(), version: env!("CARGO_PKG_VERSION").to_string() })
}
