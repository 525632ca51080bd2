//! Configuration parsing and validation.
//!
//! The crate is configured via a TOML file (default: `config/ctx.toml`),
//! with a finite set of environment variables overriding individual
//! fields at process startup (spec §4.18/"Environment configuration"):
//! `APP_HOST`, `APP_PORT`, `vector_store_path`, provider API keys (per
//! provider, read directly by `LLMDispatcher`/`embedding` from each
//! `ProviderSpec.api_key_env`), `default_embedding_model`,
//! `default_reranker_model`, `model_cache_dir`, `enable_rerank`,
//! `enable_hyde`, `ingest_concurrency`, `daily_budget_usd`,
//! `require_auth`, `allowed_origins`. All have defaults; an absent
//! provider key disables that provider in `LLMDispatcher` rather than
//! failing startup.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::models::ProviderSpec;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[allow(dead_code)]
    pub server: ServerConfig,
    #[serde(default)]
    pub vocabulary: VocabularyConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub rerank: RerankConfig,
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub ocr: OcrConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    pub max_tokens: usize,
    #[serde(default = "default_overlap")]
    #[allow(dead_code)]
    pub overlap_tokens: usize,
}

fn default_overlap() -> usize {
    0
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_hybrid_alpha")]
    pub hybrid_alpha: f64,
    #[serde(default = "default_candidate_k")]
    pub candidate_k_keyword: i64,
    #[serde(default = "default_candidate_k")]
    pub candidate_k_vector: i64,
    #[serde(default = "default_final_limit")]
    pub final_limit: i64,
    #[serde(default = "default_group_by")]
    #[allow(dead_code)]
    pub group_by: String,
    #[serde(default = "default_doc_agg")]
    #[allow(dead_code)]
    pub doc_agg: String,
    #[serde(default = "default_max_chunks_per_doc")]
    #[allow(dead_code)]
    pub max_chunks_per_doc: usize,
}

fn default_hybrid_alpha() -> f64 {
    0.7
}
fn default_candidate_k() -> i64 {
    80
}
fn default_final_limit() -> i64 {
    12
}
fn default_group_by() -> String {
    "document".to_string()
}
fn default_doc_agg() -> String {
    "max".to_string()
}
fn default_max_chunks_per_doc() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            batch_size: 64,
            max_retries: 5,
            timeout_secs: 30,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
    #[serde(default)]
    pub require_auth: bool,
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
}

fn default_allowed_origins() -> Vec<String> {
    vec!["*".to_string()]
}

/// Controlled-vocabulary directory (spec §4.1).
#[derive(Debug, Deserialize, Clone)]
pub struct VocabularyConfig {
    #[serde(default = "default_vocabulary_dir")]
    pub dir: PathBuf,
}

impl Default for VocabularyConfig {
    fn default() -> Self {
        VocabularyConfig { dir: default_vocabulary_dir() }
    }
}

fn default_vocabulary_dir() -> PathBuf {
    PathBuf::from("config/vocabulary")
}

/// LLM provider preference list and budget guard (spec §4.5).
#[derive(Debug, Deserialize, Clone, Default)]
pub struct LlmConfig {
    #[serde(default)]
    pub providers: Vec<ProviderSpec>,
    #[serde(default = "default_daily_budget_usd")]
    pub daily_budget_usd: f64,
}

fn default_daily_budget_usd() -> f64 {
    5.0
}

/// Reranker model cache location and enable flag (spec §4.11).
#[derive(Debug, Deserialize, Clone)]
pub struct RerankConfig {
    #[serde(default = "default_true")]
    pub enable_rerank: bool,
    #[serde(default = "default_model_cache_dir")]
    pub model_cache_dir: PathBuf,
    #[serde(default)]
    pub default_reranker_model: Option<String>,
}

impl Default for RerankConfig {
    fn default() -> Self {
        RerankConfig {
            enable_rerank: true,
            model_cache_dir: default_model_cache_dir(),
            default_reranker_model: None,
        }
    }
}

fn default_model_cache_dir() -> PathBuf {
    PathBuf::from(".cache/models")
}

/// Query-time feature flags (spec §4.12/§6).
#[derive(Debug, Deserialize, Clone)]
pub struct QueryConfig {
    #[serde(default = "default_true")]
    pub enable_hyde: bool,
    #[serde(default = "default_hyde_variants")]
    pub hyde_variants: usize,
    #[serde(default)]
    pub default_embedding_model: Option<String>,
}

impl Default for QueryConfig {
    fn default() -> Self {
        QueryConfig {
            enable_hyde: true,
            hyde_variants: default_hyde_variants(),
            default_embedding_model: None,
        }
    }
}

fn default_hyde_variants() -> usize {
    3
}

/// Per-kind OCR re-processing thresholds (spec §4.3/§4.17).
#[derive(Debug, Deserialize, Clone)]
pub struct OcrConfig {
    #[serde(default = "default_ocr_threshold_pdf")]
    pub threshold_pdf: f64,
    #[serde(default = "default_ocr_threshold_email")]
    pub threshold_email: f64,
    #[serde(default = "default_ocr_threshold_default")]
    pub threshold_default: f64,
    #[serde(default = "default_ocr_queue_path")]
    pub queue_path: PathBuf,
}

impl Default for OcrConfig {
    fn default() -> Self {
        OcrConfig {
            threshold_pdf: default_ocr_threshold_pdf(),
            threshold_email: default_ocr_threshold_email(),
            threshold_default: default_ocr_threshold_default(),
            queue_path: default_ocr_queue_path(),
        }
    }
}

fn default_ocr_threshold_pdf() -> f64 {
    0.7
}
fn default_ocr_threshold_email() -> f64 {
    0.5
}
fn default_ocr_threshold_default() -> f64 {
    0.6
}
fn default_ocr_queue_path() -> PathBuf {
    PathBuf::from("state/ocr_queue.json")
}

/// Bounded ingestion worker pool (spec §5 "Scheduling model").
#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_ingest_concurrency")]
    pub ingest_concurrency: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        IngestConfig { ingest_concurrency: default_ingest_concurrency() }
    }
}

fn default_ingest_concurrency() -> usize {
    5
}

fn default_true() -> bool {
    true
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

/// Applies the finite set of environment-variable overrides documented in
/// spec §4.18/"Environment configuration" on top of a parsed TOML config.
fn apply_env_overrides(mut config: Config) -> Config {
    if let Ok(v) = std::env::var("enable_rerank") {
        config.rerank.enable_rerank = v == "1" || v.eq_ignore_ascii_case("true");
    }
    if let Ok(v) = std::env::var("enable_hyde") {
        config.query.enable_hyde = v == "1" || v.eq_ignore_ascii_case("true");
    }
    if let Ok(v) = std::env::var("daily_budget_usd") {
        if let Ok(parsed) = v.parse() {
            config.llm.daily_budget_usd = parsed;
        }
    }
    if let Ok(v) = std::env::var("ingest_concurrency") {
        if let Ok(parsed) = v.parse() {
            config.ingest.ingest_concurrency = parsed;
        }
    }
    if let Ok(v) = std::env::var("require_auth") {
        config.server.require_auth = v == "1" || v.eq_ignore_ascii_case("true");
    }
    if let Ok(v) = std::env::var("allowed_origins") {
        config.server.allowed_origins = v.split(',').map(|s| s.trim().to_string()).collect();
    }
    if let Ok(v) = std::env::var("model_cache_dir") {
        config.rerank.model_cache_dir = PathBuf::from(v);
    }
    if let Ok(v) = std::env::var("default_reranker_model") {
        config.rerank.default_reranker_model = Some(v);
    }
    if let Ok(v) = std::env::var("default_embedding_model") {
        config.query.default_embedding_model = Some(v);
    }
    config
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    let config = apply_env_overrides(config);

    // Validate chunking
    if config.chunking.max_tokens == 0 {
        anyhow::bail!("chunking.max_tokens must be > 0");
    }

    // Validate retrieval
    if config.retrieval.final_limit < 1 {
        anyhow::bail!("retrieval.final_limit must be >= 1");
    }

    if !(0.0..=1.0).contains(&config.retrieval.hybrid_alpha) {
        anyhow::bail!("retrieval.hybrid_alpha must be in [0.0, 1.0]");
    }

    // Validate embedding
    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "local" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or local.",
            other
        ),
    }

    if config.ingest.ingest_concurrency == 0 {
        anyhow::bail!("ingest.ingest_concurrency must be >= 1");
    }

    if config.llm.daily_budget_usd < 0.0 {
        anyhow::bail!("llm.daily_budget_usd must be >= 0");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_override_toggles_enable_hyde() {
        std::env::set_var("enable_hyde", "false");
        let config = Config {
            db: DbConfig { path: PathBuf::from("x.db") },
            chunking: ChunkingConfig { max_tokens: 512, overlap_tokens: 0 },
            retrieval: RetrievalConfig {
                hybrid_alpha: 0.7,
                candidate_k_keyword: 80,
                candidate_k_vector: 80,
                final_limit: 12,
                group_by: "document".to_string(),
                doc_agg: "max".to_string(),
                max_chunks_per_doc: 3,
            },
            embedding: EmbeddingConfig::default(),
            server: ServerConfig { bind: "127.0.0.1:8080".to_string(), require_auth: false, allowed_origins: vec![] },
            vocabulary: VocabularyConfig::default(),
            llm: LlmConfig::default(),
            rerank: RerankConfig::default(),
            query: QueryConfig::default(),
            ocr: OcrConfig::default(),
            ingest: IngestConfig::default(),
        };
        let out = apply_env_overrides(config);
        assert!(!out.query.enable_hyde);
        std::env::remove_var("enable_hyde");
    }
}
