//! Provider health and status listing.
//!
//! Reports which LLM providers, the embedding provider, and the reranker
//! are configured and reachable. Used by both the `ctx sources` CLI
//! command and the `GET /tools/sources` HTTP endpoint.
//!
//! # Health Checks
//!
//! | Provider | Healthy When |
//! |----------|---------------|
//! | each `llm.providers[]` entry | its `api_key_env` variable is set |
//! | `embedding` | `provider != "disabled"` and, for `openai`, its API key is set |
//! | `rerank` | `enable_rerank` is true |

use anyhow::Result;
use serde::Serialize;

use crate::config::Config;

/// Health and configuration status of a single provider.
///
/// This struct matches the `sources` response shape used by both the CLI
/// and the HTTP server — serialized as JSON by the server.
#[derive(Debug, Clone, Serialize)]
pub struct SourceStatus {
    /// The provider name (e.g. `"openai"`, `"embedding"`, `"rerank"`).
    pub name: String,
    /// Whether the provider has a non-empty configuration.
    pub configured: bool,
    /// Whether the provider passes its health check.
    pub healthy: bool,
    /// Optional diagnostic notes (e.g. `"api key env OPENAI_API_KEY unset"`).
    pub notes: Option<String>,
}

/// Returns the configuration and health status of every configured LLM
/// provider plus the embedding and reranker providers.
///
/// This is the core function used by both the CLI (`ctx sources`) and the
/// HTTP server (`GET /tools/sources`).
pub fn get_sources(config: &Config) -> Vec<SourceStatus> {
    let mut sources = Vec::new();

    if config.llm.providers.is_empty() {
        sources.push(SourceStatus {
            name: "llm".to_string(),
            configured: false,
            healthy: false,
            notes: Some("no providers configured in llm.providers".to_string()),
        });
    }
    for spec in &config.llm.providers {
        let key_present = std::env::var(&spec.api_key_env).is_ok();
        sources.push(SourceStatus {
            name: format!("llm:{}/{}", spec.provider, spec.model_id),
            configured: true,
            healthy: key_present,
            notes: if key_present {
                None
            } else {
                Some(format!("api key env {} unset", spec.api_key_env))
            },
        });
    }

    let embedding_configured = config.embedding.is_enabled();
    let embedding_healthy = match config.embedding.provider.as_str() {
        "disabled" => false,
        "openai" => std::env::var("OPENAI_API_KEY").is_ok(),
        _ => embedding_configured,
    };
    sources.push(SourceStatus {
        name: "embedding".to_string(),
        configured: embedding_configured,
        healthy: embedding_healthy,
        notes: Some(format!(
            "provider={} model={}",
            config.embedding.provider,
            config.embedding.model.as_deref().unwrap_or("(none)")
        )),
    });

    sources.push(SourceStatus {
        name: "rerank".to_string(),
        configured: config.rerank.default_reranker_model.is_some(),
        healthy: config.rerank.enable_rerank,
        notes: Some(format!(
            "enable_rerank={} cache_dir={}",
            config.rerank.enable_rerank,
            config.rerank.model_cache_dir.display()
        )),
    });

    sources
}

/// CLI entry point for `ctx sources`.
///
/// Calls [`get_sources`] and prints a formatted table of provider statuses
/// to stdout.
pub fn list_sources(config: &Config) -> Result<()> {
    let sources = get_sources(config);

    println!("{:<28} {:<14} HEALTHY", "PROVIDER", "STATUS");
    for s in &sources {
        let status_str = if s.configured { "OK" } else { "NOT CONFIGURED" };
        println!("{:<28} {:<14} {}", s.name, status_str, s.healthy);
        if let Some(notes) = &s.notes {
            println!("  {}", notes);
        }
    }

    Ok(())
}
