//! LLM provider pool and model-based routing.
//!
//! A [`ServicePool`] holds an ordered list of [`LlmService`]s, each an
//! OpenAI-compatible HTTP endpoint advertising completion models and one
//! embedding model. Every embedding/completion call is routed to a concrete
//! provider either by model name ([`ServicePool::resolve`]) or by the
//! pool-wide strategy ([`RoutingStrategy`]).
//!
//! # Routing Strategies
//!
//! | Strategy | Behavior |
//! |----------|----------|
//! | `primary-only` | Always the first provider |
//! | `failover` | Primary; on transient failure, secondaries in order |
//! | `round-robin` | Atomic monotonic counter modulo pool size |
//! | `model-based` | Requires a model name; equivalent to `resolve` |
//!
//! # Error Classes
//!
//! - HTTP 429 and 5xx, timeouts, and transport errors are transient.
//! - Authentication and other 4xx errors are terminal.
//! - An unclaimed model name fails fast with `MODEL_NOT_REGISTERED`.
//!
//! The pool is immutable after construction; selection is lock-free except
//! for the round-robin counter and the per-provider online flag.

use std::future::Future;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::{LlmConfig, ProviderConfig};
use crate::error::{Error, Result};

/// Embedding operation hint, forwarded to providers that distinguish
/// query-side from document-side encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedOp {
    Query,
    Document,
}

impl EmbedOp {
    fn as_str(&self) -> &'static str {
        match self {
            EmbedOp::Query => "query",
            EmbedOp::Document => "passage",
        }
    }
}

/// Pool-wide selection strategy for model-agnostic calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingStrategy {
    PrimaryOnly,
    Failover,
    RoundRobin,
    ModelBased,
}

impl FromStr for RoutingStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "primary-only" => Ok(RoutingStrategy::PrimaryOnly),
            "failover" => Ok(RoutingStrategy::Failover),
            "round-robin" => Ok(RoutingStrategy::RoundRobin),
            "model-based" => Ok(RoutingStrategy::ModelBased),
            other => Err(format!("unknown routing strategy: {}", other)),
        }
    }
}

// ============ Provider service ============

/// One ready OpenAI-compatible provider endpoint.
#[derive(Debug)]
pub struct LlmService {
    name: String,
    api_url: String,
    api_key: Option<String>,
    completion_models: Vec<String>,
    embedding_model: Option<String>,
    embedding_dimension: Option<usize>,
    online: AtomicBool,
    client: reqwest::Client,
    embedding_timeout: Duration,
    completion_timeout: Duration,
}

impl LlmService {
    fn from_config(cfg: &ProviderConfig, llm: &LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Internal(format!("http client: {}", e)))?;

        Ok(Self {
            name: cfg.name.clone(),
            api_url: cfg.api_url.trim_end_matches('/').to_string(),
            api_key: cfg.api_key.clone(),
            completion_models: cfg.models.clone(),
            embedding_model: cfg.embedding_model.clone(),
            embedding_dimension: cfg.embedding_dimension,
            online: AtomicBool::new(true),
            client,
            embedding_timeout: Duration::from_secs(llm.embedding_timeout_secs),
            completion_timeout: Duration::from_secs(llm.completion_timeout_secs),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn embedding_model(&self) -> Option<&str> {
        self.embedding_model.as_deref()
    }

    pub fn embedding_dimension(&self) -> Option<usize> {
        self.embedding_dimension
    }

    pub fn completion_models(&self) -> &[String] {
        &self.completion_models
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Relaxed)
    }

    /// All model names this provider advertises, completion and embedding.
    pub fn advertised_models(&self) -> Vec<String> {
        let mut models = self.completion_models.clone();
        if let Some(em) = &self.embedding_model {
            models.push(em.clone());
        }
        models
    }

    /// Whether this provider claims `model`: exact match first, then
    /// case-insensitive prefix/substring ("gpt-4" matches "gpt-4-turbo").
    pub fn owns_model(&self, model: &str) -> bool {
        let advertised = self.advertised_models();
        if advertised.iter().any(|m| m == model) {
            return true;
        }
        let wanted = model.to_lowercase();
        advertised
            .iter()
            .any(|m| m.to_lowercase().contains(&wanted))
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => req.header("Authorization", format!("Bearer {}", key)),
            None => req,
        }
    }

    /// Single-attempt embedding call against `POST {base}/embeddings`.
    pub async fn embed(
        &self,
        model: &str,
        op: EmbedOp,
        texts: &[String],
    ) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": model,
            "input": texts,
            "input_type": op.as_str(),
        });

        let resp = self
            .authorize(self.client.post(format!("{}/embeddings", self.api_url)))
            .timeout(self.embedding_timeout)
            .json(&body)
            .send()
            .await;

        let json = self.triage(resp, "embeddings").await?;
        parse_embedding_response(&json)
    }

    /// Single-attempt chat completion against `POST {base}/chat/completions`.
    pub async fn complete(&self, model: &str, system: &str, user: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
        });

        let resp = self
            .authorize(
                self.client
                    .post(format!("{}/chat/completions", self.api_url)),
            )
            .timeout(self.completion_timeout)
            .json(&body)
            .send()
            .await;

        let json = self.triage(resp, "chat/completions").await?;
        parse_completion_response(&json)
    }

    /// Shared status triage: success → JSON body, 429/5xx → transient,
    /// other 4xx → terminal. Updates the online flag as a side effect.
    async fn triage(
        &self,
        resp: std::result::Result<reqwest::Response, reqwest::Error>,
        endpoint: &str,
    ) -> Result<serde_json::Value> {
        match resp {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    self.online.store(true, Ordering::Relaxed);
                    let json: serde_json::Value = response.json().await?;
                    return Ok(json);
                }

                let body_text = response.text().await.unwrap_or_default();

                if status.as_u16() == 429 || status.is_server_error() {
                    self.online.store(false, Ordering::Relaxed);
                    return Err(Error::Transient(format!(
                        "{} {} from {}: {}",
                        endpoint, status, self.name, body_text
                    )));
                }

                Err(Error::Internal(format!(
                    "{} {} from {}: {}",
                    endpoint, status, self.name, body_text
                )))
            }
            Err(e) => {
                self.online.store(false, Ordering::Relaxed);
                Err(Error::from(e))
            }
        }
    }
}

fn parse_embedding_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| Error::Internal("invalid embedding response: missing data".into()))?;

    let mut embeddings = Vec::with_capacity(data.len());
    for item in data {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| {
                Error::Internal("invalid embedding response: missing embedding".into())
            })?;
        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        embeddings.push(vec);
    }

    Ok(embeddings)
}

fn parse_completion_response(json: &serde_json::Value) -> Result<String> {
    json.get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| Error::Internal("invalid completion response: missing content".into()))
}

// ============ Service pool ============

/// Model catalog for `list_models`: flat and grouped by provider.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ModelCatalog {
    pub all: Vec<String>,
    pub by_provider: Vec<ProviderModels>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ProviderModels {
    pub provider: String,
    pub online: bool,
    pub completion_models: Vec<String>,
    pub embedding_model: Option<String>,
}

/// Ordered, immutable collection of provider services.
pub struct ServicePool {
    services: Vec<Arc<LlmService>>,
    strategy: RoutingStrategy,
    rr_counter: AtomicUsize,
}

impl ServicePool {
    pub fn from_config(llm: &LlmConfig) -> Result<Self> {
        let strategy = RoutingStrategy::from_str(&llm.strategy)
            .map_err(Error::Validation)?;

        let services = llm
            .providers
            .iter()
            .filter(|p| p.enabled)
            .map(|p| LlmService::from_config(p, llm).map(Arc::new))
            .collect::<Result<Vec<_>>>()?;

        if services.is_empty() {
            return Err(Error::Validation(
                "llm pool requires at least one enabled provider".into(),
            ));
        }

        Ok(Self {
            services,
            strategy,
            rr_counter: AtomicUsize::new(0),
        })
    }

    pub fn strategy(&self) -> RoutingStrategy {
        self.strategy
    }

    pub fn services(&self) -> &[Arc<LlmService>] {
        &self.services
    }

    /// Return the first provider that owns `model`. Exact matches win over
    /// prefix/substring matches across the whole pool.
    pub fn resolve(&self, model: &str) -> Result<Arc<LlmService>> {
        if let Some(svc) = self
            .services
            .iter()
            .find(|s| s.advertised_models().iter().any(|m| m == model))
        {
            return Ok(svc.clone());
        }

        if let Some(svc) = self.services.iter().find(|s| s.owns_model(model)) {
            return Ok(svc.clone());
        }

        Err(Error::ModelNotRegistered(format!(
            "no provider advertises model '{}'",
            model
        )))
    }

    /// Ordered candidate services for one logical call, per the strategy.
    /// With an explicit model, routing is always model-based.
    fn candidates(&self, model: Option<&str>) -> Result<Vec<Arc<LlmService>>> {
        if let Some(m) = model {
            return Ok(vec![self.resolve(m)?]);
        }

        match self.strategy {
            RoutingStrategy::ModelBased => Err(Error::Validation(
                "model-based routing requires a model name".into(),
            )),
            RoutingStrategy::PrimaryOnly => Ok(vec![self.services[0].clone()]),
            RoutingStrategy::Failover => Ok(self.services.clone()),
            RoutingStrategy::RoundRobin => {
                let idx = self.rr_counter.fetch_add(1, Ordering::Relaxed) % self.services.len();
                Ok(vec![self.services[idx].clone()])
            }
        }
    }

    /// All registered model names, flat and grouped by provider.
    pub fn list_models(&self) -> ModelCatalog {
        let mut all = Vec::new();
        let mut by_provider = Vec::new();

        for svc in &self.services {
            for m in svc.advertised_models() {
                if !all.contains(&m) {
                    all.push(m);
                }
            }
            by_provider.push(ProviderModels {
                provider: svc.name().to_string(),
                online: svc.is_online(),
                completion_models: svc.completion_models().to_vec(),
                embedding_model: svc.embedding_model().map(|s| s.to_string()),
            });
        }

        ModelCatalog { all, by_provider }
    }

    /// Embed `texts`, routing by `model` when given, otherwise by strategy
    /// using each candidate's own embedding model. Attempts candidates in
    /// order, advancing only past transient failures.
    pub async fn embedding(
        &self,
        model: Option<&str>,
        op: EmbedOp,
        texts: &[String],
    ) -> Result<Vec<Vec<f32>>> {
        let candidates = self.candidates(model)?;
        let mut last_err = None;

        for (attempt, svc) in candidates.iter().enumerate() {
            let resolved_model = match model {
                Some(m) => m.to_string(),
                None => svc
                    .embedding_model()
                    .ok_or_else(|| {
                        Error::Validation(format!(
                            "provider '{}' advertises no embedding model",
                            svc.name()
                        ))
                    })?
                    .to_string(),
            };

            debug!(provider = svc.name(), model = %resolved_model, attempt, "embedding call");

            match svc.embed(&resolved_model, op, texts).await {
                Ok(vectors) => return Ok(vectors),
                Err(e) if e.is_transient() => {
                    warn!(provider = svc.name(), error = %e, "embedding attempt failed, trying next candidate");
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err.unwrap_or_else(|| Error::Internal("no embedding candidates".into())))
    }

    /// Chat completion with the same candidate semantics as [`Self::embedding`].
    /// Without a model, each candidate serves with its first advertised
    /// completion model.
    pub async fn completion(
        &self,
        model: Option<&str>,
        system: &str,
        user: &str,
    ) -> Result<String> {
        let candidates = self.candidates(model)?;
        let mut last_err = None;

        for (attempt, svc) in candidates.iter().enumerate() {
            let resolved_model = match model {
                Some(m) => m.to_string(),
                None => svc
                    .completion_models()
                    .first()
                    .ok_or_else(|| {
                        Error::Validation(format!(
                            "provider '{}' advertises no completion models",
                            svc.name()
                        ))
                    })?
                    .clone(),
            };

            debug!(provider = svc.name(), model = %resolved_model, attempt, "completion call");

            match svc.complete(&resolved_model, system, user).await {
                Ok(text) => return Ok(text),
                Err(e) if e.is_transient() => {
                    warn!(provider = svc.name(), error = %e, "completion attempt failed, trying next candidate");
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err.unwrap_or_else(|| Error::Internal("no completion candidates".into())))
    }
}

// ============ Router capability ============

/// The capability set strategies and the search engine depend on:
/// route-and-embed, route-and-complete. [`ServicePool`] is the production
/// implementation; tests substitute mocks.
#[async_trait::async_trait]
pub trait LlmRouter: Send + Sync {
    async fn embed(
        &self,
        model: Option<&str>,
        op: EmbedOp,
        texts: &[String],
    ) -> Result<Vec<Vec<f32>>>;

    async fn complete(&self, model: Option<&str>, system: &str, user: &str) -> Result<String>;
}

#[async_trait::async_trait]
impl LlmRouter for ServicePool {
    async fn embed(
        &self,
        model: Option<&str>,
        op: EmbedOp,
        texts: &[String],
    ) -> Result<Vec<Vec<f32>>> {
        self.embedding(model, op, texts).await
    }

    async fn complete(&self, model: Option<&str>, system: &str, user: &str) -> Result<String> {
        self.completion(model, system, user).await
    }
}

// ============ Retry ============

/// Run `f` up to `max_attempts` times total with a fixed inter-attempt
/// delay, retrying only transient failures. Terminal errors propagate
/// immediately. Each attempt gets a fresh deadline from the underlying call.
pub async fn retry_call<T, F, Fut>(
    max_attempts: u32,
    delay: Duration,
    op_name: &str,
    mut f: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_err = None;

    for attempt in 1..=max_attempts.max(1) {
        if attempt > 1 {
            tokio::time::sleep(delay).await;
        }

        match f().await {
            Ok(value) => {
                if attempt > 1 {
                    info!(op = op_name, attempt, "succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if e.is_transient() => {
                warn!(op = op_name, attempt, error = %e, "transient failure");
                last_err = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_err.unwrap_or_else(|| Error::Internal(format!("{}: retries exhausted", op_name))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LlmConfig;

    fn provider(name: &str, models: &[&str], embedding: Option<&str>) -> ProviderConfig {
        ProviderConfig {
            name: name.to_string(),
            api_url: format!("http://{}.invalid/v1", name),
            api_key: None,
            models: models.iter().map(|s| s.to_string()).collect(),
            embedding_model: embedding.map(|s| s.to_string()),
            embedding_dimension: embedding.map(|_| 768),
            embedding_context_length: 8192,
            enabled: true,
        }
    }

    fn pool_config(strategy: &str, providers: Vec<ProviderConfig>) -> LlmConfig {
        LlmConfig {
            strategy: strategy.to_string(),
            max_retries: 3,
            retry_delay_secs: 120,
            embedding_timeout_secs: 60,
            completion_timeout_secs: 120,
            providers,
        }
    }

    fn two_provider_pool(strategy: &str) -> ServicePool {
        let cfg = pool_config(
            strategy,
            vec![
                provider("p1", &["qwen3-1.7b"], Some("nomic-embed-text")),
                provider("p2", &["gpt-4", "gpt-4-turbo"], None),
            ],
        );
        ServicePool::from_config(&cfg).unwrap()
    }

    #[test]
    fn test_resolve_exact_match() {
        let pool = two_provider_pool("failover");
        assert_eq!(pool.resolve("qwen3-1.7b").unwrap().name(), "p1");
        assert_eq!(pool.resolve("gpt-4").unwrap().name(), "p2");
    }

    #[test]
    fn test_resolve_prefix_match() {
        let pool = two_provider_pool("failover");
        // "gpt-4" is exact on p2; a prefix of an advertised name also routes there
        assert_eq!(pool.resolve("GPT-4-TURBO").unwrap().name(), "p2");
        assert_eq!(pool.resolve("nomic").unwrap().name(), "p1");
    }

    #[test]
    fn test_resolve_unregistered_model() {
        let pool = two_provider_pool("failover");
        let err = pool.resolve("mistral-7b").unwrap_err();
        assert!(matches!(err, Error::ModelNotRegistered(_)));
        assert_eq!(err.code(), "MODEL_NOT_REGISTERED");
    }

    #[test]
    fn test_exact_match_beats_substring_across_pool() {
        let cfg = pool_config(
            "failover",
            vec![
                provider("fuzzy", &["gpt-4-turbo"], None),
                provider("exact", &["gpt-4"], None),
            ],
        );
        let pool = ServicePool::from_config(&cfg).unwrap();
        assert_eq!(pool.resolve("gpt-4").unwrap().name(), "exact");
    }

    #[test]
    fn test_primary_only_candidates() {
        let pool = two_provider_pool("primary-only");
        let c = pool.candidates(None).unwrap();
        assert_eq!(c.len(), 1);
        assert_eq!(c[0].name(), "p1");
    }

    #[test]
    fn test_failover_candidates_in_order() {
        let pool = two_provider_pool("failover");
        let c = pool.candidates(None).unwrap();
        assert_eq!(
            c.iter().map(|s| s.name().to_string()).collect::<Vec<_>>(),
            vec!["p1", "p2"]
        );
    }

    #[test]
    fn test_round_robin_rotates() {
        let pool = two_provider_pool("round-robin");
        let picks: Vec<String> = (0..4)
            .map(|_| pool.candidates(None).unwrap()[0].name().to_string())
            .collect();
        assert_eq!(picks, vec!["p1", "p2", "p1", "p2"]);
    }

    #[test]
    fn test_model_based_requires_model() {
        let pool = two_provider_pool("model-based");
        assert!(matches!(
            pool.candidates(None).unwrap_err(),
            Error::Validation(_)
        ));
        assert_eq!(pool.candidates(Some("gpt-4")).unwrap()[0].name(), "p2");
    }

    #[test]
    fn test_list_models_flat_and_grouped() {
        let pool = two_provider_pool("failover");
        let catalog = pool.list_models();
        assert!(catalog.all.contains(&"qwen3-1.7b".to_string()));
        assert!(catalog.all.contains(&"nomic-embed-text".to_string()));
        assert!(catalog.all.contains(&"gpt-4".to_string()));
        assert_eq!(catalog.by_provider.len(), 2);
        assert_eq!(catalog.by_provider[0].provider, "p1");
        assert_eq!(
            catalog.by_provider[0].embedding_model.as_deref(),
            Some("nomic-embed-text")
        );
    }

    #[test]
    fn test_parse_embedding_response() {
        let json = serde_json::json!({
            "data": [
                {"embedding": [0.1, 0.2], "index": 0},
                {"embedding": [0.3, 0.4], "index": 1},
            ]
        });
        let vectors = parse_embedding_response(&json).unwrap();
        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[0], vec![0.1f32, 0.2f32]);
    }

    #[test]
    fn test_parse_completion_response() {
        let json = serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "hello"}}]
        });
        assert_eq!(parse_completion_response(&json).unwrap(), "hello");
        assert!(parse_completion_response(&serde_json::json!({})).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_recovers_after_transient_failures() {
        let calls = std::sync::Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let result = retry_call(3, Duration::from_secs(120), "embed", move || {
            let calls = calls_clone.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(Error::Transient("503".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_does_not_touch_terminal_errors() {
        let calls = std::sync::Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let result: Result<i32> = retry_call(3, Duration::from_secs(120), "embed", move || {
            let calls = calls_clone.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::Validation("bad input".into()))
            }
        })
        .await;

        assert!(matches!(result.unwrap_err(), Error::Validation(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhausts_transient() {
        let result: Result<i32> = retry_call(3, Duration::from_secs(120), "embed", || async {
            Err(Error::Transient("503".into()))
        })
        .await;
        assert!(matches!(result.unwrap_err(), Error::Transient(_)));
    }
}
