//! Multi-provider LLM dispatcher with ordered fallback, structured-output
//! validation, and cost accounting (spec §4.5, C4).
//!
//! Retry/backoff shape is the same one the embedding providers use
//! (`embedding/mod.rs`): exponential backoff on 429/5xx/network errors,
//! immediate failure on other 4xx. This module generalizes it across an
//! ordered list of [`ProviderSpec`]s instead of a single provider.

use anyhow::{bail, Result};
use serde_json::Value;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

use crate::models::{CostLedgerEntry, ProviderSpec};

const INITIAL_BACKOFF_SECS: u64 = 15;
const MAX_BACKOFF_SECS: u64 = 180;
const MAX_ATTEMPTS_PER_PROVIDER: u32 = 5;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("budget exceeded")]
    BudgetExceeded,
    #[error("all providers failed: {0}")]
    AllProvidersFailed(String),
    #[error("deadline exceeded")]
    DeadlineExceeded,
    #[error("schema validation failed after repair attempt: {0}")]
    SchemaInvalid(String),
}

#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub used_model: String,
    pub usd: f64,
}

#[derive(Debug, Clone)]
pub struct StructuredCompletion {
    pub value: Value,
    pub used_model: String,
    pub usd: f64,
}

/// HTTP transport seam so tests can inject a fake provider without a
/// network call. Production code goes through [`ReqwestTransport`].
#[async_trait::async_trait]
pub trait ProviderTransport: Send + Sync {
    async fn complete(
        &self,
        spec: &ProviderSpec,
        prompt: &str,
        max_tokens: usize,
        temperature: f32,
    ) -> Result<RawResponse>;
}

pub struct RawResponse {
    pub text: String,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub retryable_error: Option<String>,
    pub fatal_error: Option<String>,
}

pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Self {
        ReqwestTransport {
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .expect("reqwest client build"),
        }
    }
}

#[async_trait::async_trait]
impl ProviderTransport for ReqwestTransport {
    async fn complete(
        &self,
        spec: &ProviderSpec,
        prompt: &str,
        max_tokens: usize,
        temperature: f32,
    ) -> Result<RawResponse> {
        let api_key = std::env::var(&spec.api_key_env).unwrap_or_default();
        if api_key.is_empty() {
            return Ok(RawResponse {
                text: String::new(),
                prompt_tokens: 0,
                completion_tokens: 0,
                retryable_error: None,
                fatal_error: Some(format!("missing API key env {}", spec.api_key_env)),
            });
        }
        let url = spec
            .base_url
            .clone()
            .unwrap_or_else(|| format!("https://api.{}.com/v1/chat/completions", spec.provider));
        let body = serde_json::json!({
            "model": spec.model_id,
            "max_tokens": max_tokens,
            "temperature": temperature,
            "messages": [{"role": "user", "content": prompt}],
        });
        let resp = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await;
        match resp {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    let json: Value = response.json().await?;
                    let text = json
                        .get("choices")
                        .and_then(|c| c.get(0))
                        .and_then(|c| c.get("message"))
                        .and_then(|m| m.get("content"))
                        .and_then(|t| t.as_str())
                        .unwrap_or_default()
                        .to_string();
                    let prompt_tokens = json
                        .get("usage")
                        .and_then(|u| u.get("prompt_tokens"))
                        .and_then(|v| v.as_i64())
                        .unwrap_or_else(|| estimate_tokens(prompt));
                    let completion_tokens = json
                        .get("usage")
                        .and_then(|u| u.get("completion_tokens"))
                        .and_then(|v| v.as_i64())
                        .unwrap_or_else(|| estimate_tokens(&text));
                    Ok(RawResponse {
                        text,
                        prompt_tokens,
                        completion_tokens,
                        retryable_error: None,
                        fatal_error: None,
                    })
                } else if status.as_u16() == 429 || status.is_server_error() {
                    Ok(RawResponse {
                        text: String::new(),
                        prompt_tokens: 0,
                        completion_tokens: 0,
                        retryable_error: Some(format!("HTTP {status}")),
                        fatal_error: None,
                    })
                } else {
                    let body_text = response.text().await.unwrap_or_default();
                    Ok(RawResponse {
                        text: String::new(),
                        prompt_tokens: 0,
                        completion_tokens: 0,
                        retryable_error: None,
                        fatal_error: Some(format!("HTTP {status}: {body_text}")),
                    })
                }
            }
            Err(e) => Ok(RawResponse {
                text: String::new(),
                prompt_tokens: 0,
                completion_tokens: 0,
                retryable_error: Some(e.to_string()),
                fatal_error: None,
            }),
        }
    }
}

/// `ceil(chars/4)` token estimate used when a provider omits usage counts
/// (spec §4.5).
fn estimate_tokens(text: &str) -> i64 {
    std::cmp::max(1, (text.len() as f64 / 4.0).ceil() as i64)
}

struct BudgetState {
    daily_budget_usd: f64,
    spent_today_usd: f64,
}

pub struct LlmDispatcher {
    providers: Vec<ProviderSpec>,
    transport: Box<dyn ProviderTransport>,
    budget: Mutex<BudgetState>,
    ledger: Mutex<Vec<CostLedgerEntry>>,
}

impl LlmDispatcher {
    pub fn new(providers: Vec<ProviderSpec>, daily_budget_usd: f64) -> Self {
        LlmDispatcher {
            providers,
            transport: Box::new(ReqwestTransport::new(Duration::from_secs(60))),
            budget: Mutex::new(BudgetState {
                daily_budget_usd,
                spent_today_usd: 0.0,
            }),
            ledger: Mutex::new(Vec::new()),
        }
    }

    pub fn with_transport(mut self, transport: Box<dyn ProviderTransport>) -> Self {
        self.transport = transport;
        self
    }

    fn configured_providers(&self) -> Vec<&ProviderSpec> {
        self.providers
            .iter()
            .filter(|p| !std::env::var(&p.api_key_env).unwrap_or_default().is_empty())
            .collect()
    }

    fn check_budget(&self) -> Result<(), LlmError> {
        let guard = self.budget.lock().expect("budget lock poisoned");
        if guard.spent_today_usd >= guard.daily_budget_usd {
            return Err(LlmError::BudgetExceeded);
        }
        Ok(())
    }

    fn record_cost(&self, provider: &str, model: &str, prompt_tokens: i64, completion_tokens: i64, usd: f64, op: &str, doc_id: Option<String>) {
        {
            let mut guard = self.budget.lock().expect("budget lock poisoned");
            guard.spent_today_usd += usd;
        }
        let mut ledger = self.ledger.lock().expect("ledger lock poisoned");
        ledger.push(CostLedgerEntry {
            ts: chrono::Utc::now(),
            provider: provider.to_string(),
            model: model.to_string(),
            prompt_tokens,
            completion_tokens,
            usd,
            op: op.to_string(),
            doc_id,
        });
    }

    pub fn ledger_snapshot(&self) -> Vec<CostLedgerEntry> {
        self.ledger.lock().expect("ledger lock poisoned").clone()
    }

    /// `complete` (spec §4.5): advances through providers in preference
    /// order, retrying within a provider with exponential backoff, and
    /// short-circuits on first success.
    pub async fn complete(
        &self,
        prompt: &str,
        max_tokens: usize,
        temperature: f32,
        deadline: Instant,
    ) -> Result<Completion, LlmError> {
        self.check_budget()?;
        let providers = self.configured_providers();
        if providers.is_empty() {
            return Err(LlmError::AllProvidersFailed("no providers configured".to_string()));
        }

        let mut failures = Vec::new();
        for spec in providers {
            if Instant::now() >= deadline {
                return Err(LlmError::DeadlineExceeded);
            }
            match self.try_provider(spec, prompt, max_tokens, temperature, deadline).await {
                Ok(resp) => {
                    let usd = (resp.prompt_tokens as f64 / 1000.0) * spec.usd_per_1k_prompt
                        + (resp.completion_tokens as f64 / 1000.0) * spec.usd_per_1k_completion;
                    self.record_cost(&spec.provider, &spec.model_id, resp.prompt_tokens, resp.completion_tokens, usd, "complete", None);
                    return Ok(Completion {
                        text: resp.text,
                        used_model: spec.model_id.clone(),
                        usd,
                    });
                }
                Err(e) => failures.push(format!("{}: {e}", spec.provider)),
            }
        }
        Err(LlmError::AllProvidersFailed(failures.join("; ")))
    }

    async fn try_provider(
        &self,
        spec: &ProviderSpec,
        prompt: &str,
        max_tokens: usize,
        temperature: f32,
        deadline: Instant,
    ) -> Result<RawResponse, String> {
        let mut attempt = 0u32;
        loop {
            if Instant::now() >= deadline {
                return Err("deadline exceeded".to_string());
            }
            if attempt > 0 {
                let backoff = (INITIAL_BACKOFF_SECS * 2u64.pow(attempt - 1)).min(MAX_BACKOFF_SECS);
                tokio::time::sleep(Duration::from_secs(backoff)).await;
            }
            let resp = self
                .transport
                .complete(spec, prompt, max_tokens, temperature)
                .await
                .map_err(|e| e.to_string())?;
            if let Some(fatal) = resp.fatal_error {
                return Err(fatal);
            }
            if let Some(retryable) = resp.retryable_error {
                attempt += 1;
                if attempt >= MAX_ATTEMPTS_PER_PROVIDER {
                    return Err(retryable);
                }
                continue;
            }
            return Ok(resp);
        }
    }

    /// `complete_structured` (spec §4.5): validates the response against a
    /// schema; on parse/validation failure, one repair re-prompt is
    /// attempted before escalating to the next provider.
    pub async fn complete_structured(
        &self,
        prompt: &str,
        schema_hint: &str,
        max_tokens: usize,
        deadline: Instant,
    ) -> Result<StructuredCompletion, LlmError> {
        self.check_budget()?;
        let providers = self.configured_providers();
        if providers.is_empty() {
            return Err(LlmError::AllProvidersFailed("no providers configured".to_string()));
        }

        let mut failures = Vec::new();
        for spec in providers {
            if Instant::now() >= deadline {
                return Err(LlmError::DeadlineExceeded);
            }
            let full_prompt = format!("{prompt}\n\nRespond with JSON matching this schema:\n{schema_hint}");
            let first = self.try_provider(spec, &full_prompt, max_tokens, 0.0, deadline).await;
            let raw_text = match first {
                Ok(resp) => resp.text,
                Err(e) => {
                    failures.push(format!("{}: {e}", spec.provider));
                    continue;
                }
            };
            match extract_json(&raw_text) {
                Ok(value) => {
                    let usd = estimate_tokens(&full_prompt) as f64 / 1000.0 * spec.usd_per_1k_prompt
                        + estimate_tokens(&raw_text) as f64 / 1000.0 * spec.usd_per_1k_completion;
                    self.record_cost(&spec.provider, &spec.model_id, estimate_tokens(&full_prompt), estimate_tokens(&raw_text), usd, "complete_structured", None);
                    return Ok(StructuredCompletion {
                        value,
                        used_model: spec.model_id.clone(),
                        usd,
                    });
                }
                Err(parse_err) => {
                    let repair_prompt = format!(
                        "{full_prompt}\n\nYour previous response failed to parse: {parse_err}. Return only valid JSON."
                    );
                    match self.try_provider(spec, &repair_prompt, max_tokens, 0.0, deadline).await {
                        Ok(resp) => match extract_json(&resp.text) {
                            Ok(value) => {
                                let usd = estimate_tokens(&repair_prompt) as f64 / 1000.0 * spec.usd_per_1k_prompt
                                    + estimate_tokens(&resp.text) as f64 / 1000.0 * spec.usd_per_1k_completion;
                                self.record_cost(&spec.provider, &spec.model_id, estimate_tokens(&repair_prompt), estimate_tokens(&resp.text), usd, "complete_structured_repair", None);
                                return Ok(StructuredCompletion {
                                    value,
                                    used_model: spec.model_id.clone(),
                                    usd,
                                });
                            }
                            Err(e2) => failures.push(format!("{}: repair failed: {e2}", spec.provider)),
                        },
                        Err(e) => failures.push(format!("{}: {e}", spec.provider)),
                    }
                }
            }
        }
        Err(LlmError::AllProvidersFailed(failures.join("; ")))
    }
}

/// Balanced-brace scan JSON extraction, used when a provider doesn't
/// support native JSON mode (spec §4.5).
fn extract_json(text: &str) -> Result<Value, String> {
    if let Ok(v) = serde_json::from_str::<Value>(text.trim()) {
        return Ok(v);
    }
    let bytes = text.as_bytes();
    let mut depth = 0i32;
    let mut start = None;
    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    if let Some(s) = start {
                        let candidate = &text[s..=i];
                        if let Ok(v) = serde_json::from_str::<Value>(candidate) {
                            return Ok(v);
                        }
                    }
                }
            }
            _ => {}
        }
    }
    Err(format!("no valid JSON object found in response: {text:?}"))
}

pub fn validate_non_empty(providers: &[ProviderSpec]) -> Result<()> {
    if providers.is_empty() {
        bail!("at least one LLM provider must be configured");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FakeTransport {
        responses: Mutex<Vec<RawResponse>>,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl ProviderTransport for FakeTransport {
        async fn complete(&self, _spec: &ProviderSpec, _p: &str, _m: usize, _t: f32) -> Result<RawResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut guard = self.responses.lock().unwrap();
            if guard.is_empty() {
                bail!("no more fake responses");
            }
            Ok(guard.remove(0))
        }
    }

    fn spec(provider: &str, env: &str) -> ProviderSpec {
        ProviderSpec {
            provider: provider.to_string(),
            model_id: format!("{provider}-model"),
            usd_per_1k_prompt: 0.001,
            usd_per_1k_completion: 0.002,
            context_window: 8000,
            structured_output: true,
            vision: false,
            api_key_env: env.to_string(),
            base_url: None,
        }
    }

    fn ok_response(text: &str) -> RawResponse {
        RawResponse {
            text: text.to_string(),
            prompt_tokens: 10,
            completion_tokens: 10,
            retryable_error: None,
            fatal_error: None,
        }
    }

    #[tokio::test]
    async fn falls_back_to_second_provider_on_fatal_error() {
        std::env::set_var("TEST_LLM_KEY_1", "k1");
        std::env::set_var("TEST_LLM_KEY_2", "k2");
        let calls = Arc::new(AtomicUsize::new(0));
        let transport = FakeTransport {
            responses: Mutex::new(vec![
                RawResponse {
                    text: String::new(),
                    prompt_tokens: 0,
                    completion_tokens: 0,
                    retryable_error: None,
                    fatal_error: Some("HTTP 400".to_string()),
                },
                ok_response("hello from p2"),
            ]),
            calls: calls.clone(),
        };
        let dispatcher = LlmDispatcher::new(
            vec![spec("p1", "TEST_LLM_KEY_1"), spec("p2", "TEST_LLM_KEY_2")],
            100.0,
        )
        .with_transport(Box::new(transport));

        let deadline = Instant::now() + Duration::from_secs(5);
        let result = dispatcher.complete("hi", 100, 0.0, deadline).await.unwrap();
        assert_eq!(result.used_model, "p2-model");
        assert_eq!(result.text, "hello from p2");
    }

    #[tokio::test]
    async fn budget_exceeded_refuses_without_calling_provider() {
        std::env::set_var("TEST_LLM_KEY_3", "k3");
        let dispatcher = LlmDispatcher::new(vec![spec("p1", "TEST_LLM_KEY_3")], 0.0);
        let deadline = Instant::now() + Duration::from_secs(5);
        let err = dispatcher.complete("hi", 100, 0.0, deadline).await.unwrap_err();
        assert!(matches!(err, LlmError::BudgetExceeded));
    }

    #[test]
    fn extract_json_handles_surrounding_prose() {
        let text = "Sure, here you go: {\"topics\": [\"a\"]} thanks!";
        let v = extract_json(text).unwrap();
        assert_eq!(v["topics"][0], "a");
    }

    #[test]
    fn extract_json_fails_on_no_json() {
        assert!(extract_json("no json here").is_err());
    }
}
