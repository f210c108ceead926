//! Configuration parsing and validation.
//!
//! corpusd is configured via a TOML file (default: `config/corpusd.toml`).
//! The config defines the database URL, the LLM provider pool and routing
//! strategy, chunking token budgets, ingestion worker count, server bind
//! address, and the optional external converter service.
//!
//! # Providers
//!
//! Each `[[llm.providers]]` entry describes one OpenAI-compatible endpoint:
//! the completion models it advertises, its embedding model and dimension,
//! and whether it is enabled. Pool order is declaration order; the first
//! enabled provider is the primary.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub rag: RagConfig,
    pub llm: LlmConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub ingestion: IngestionConfig,
    #[serde(default)]
    pub converter: ConverterConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

/// Global model defaults, overridable per library and per request.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct RagConfig {
    #[serde(default)]
    pub embedding_default_model: Option<String>,
    #[serde(default)]
    pub completion_default_model: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    /// Pool-wide routing strategy: primary-only, failover, round-robin,
    /// or model-based.
    #[serde(default = "default_strategy")]
    pub strategy: String,
    /// Total attempts per call site (first try included).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Fixed delay between attempts, in seconds.
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
    #[serde(default = "default_embedding_timeout_secs")]
    pub embedding_timeout_secs: u64,
    #[serde(default = "default_completion_timeout_secs")]
    pub completion_timeout_secs: u64,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

fn default_strategy() -> String {
    "failover".to_string()
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_delay_secs() -> u64 {
    120
}
fn default_embedding_timeout_secs() -> u64 {
    60
}
fn default_completion_timeout_secs() -> u64 {
    120
}

/// One OpenAI-compatible provider endpoint.
#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    /// Provider tag (e.g. "ollama-local", "openai").
    pub name: String,
    /// Base URL up to but excluding the endpoint path
    /// (e.g. `http://localhost:11434/v1`).
    pub api_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Completion model names this provider advertises.
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default)]
    pub embedding_model: Option<String>,
    #[serde(default)]
    pub embedding_dimension: Option<usize>,
    #[serde(default = "default_context_length")]
    pub embedding_context_length: usize,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_context_length() -> usize {
    8192
}
fn default_true() -> bool {
    true
}

/// Token budgets for the hierarchical splitter and the strategy thresholds.
#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_ideal")]
    pub chunk_ideal_tokens: usize,
    #[serde(default = "default_chunk_min")]
    pub chunk_min_tokens: usize,
    #[serde(default = "default_chunk_max")]
    pub chunk_max_tokens: usize,
    #[serde(default = "default_chapter_ideal")]
    pub chapter_ideal_tokens: usize,
    #[serde(default = "default_chapter_min")]
    pub chapter_min_tokens: usize,
    #[serde(default = "default_chapter_max")]
    pub chapter_max_tokens: usize,
    /// Chapters at or below this token count become a single chapter-kind
    /// record; larger chapters are subdivided into chunk-kind records.
    #[serde(default = "default_split_threshold")]
    pub chapter_split_threshold_tokens: usize,
    /// Chapters at or above this token count are eligible for a summary.
    #[serde(default = "default_summary_threshold")]
    pub summary_threshold_tokens: usize,
    /// Chapters at or above this token count are eligible for Q&A pairs.
    #[serde(default = "default_qa_threshold")]
    pub qa_threshold_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_ideal_tokens: default_chunk_ideal(),
            chunk_min_tokens: default_chunk_min(),
            chunk_max_tokens: default_chunk_max(),
            chapter_ideal_tokens: default_chapter_ideal(),
            chapter_min_tokens: default_chapter_min(),
            chapter_max_tokens: default_chapter_max(),
            chapter_split_threshold_tokens: default_split_threshold(),
            summary_threshold_tokens: default_summary_threshold(),
            qa_threshold_tokens: default_qa_threshold(),
        }
    }
}

fn default_chunk_ideal() -> usize {
    512
}
fn default_chunk_min() -> usize {
    300
}
fn default_chunk_max() -> usize {
    2048
}
fn default_chapter_ideal() -> usize {
    8192
}
fn default_chapter_min() -> usize {
    4096
}
fn default_chapter_max() -> usize {
    16384
}
fn default_split_threshold() -> usize {
    2000
}
fn default_summary_threshold() -> usize {
    2500
}
fn default_qa_threshold() -> usize {
    500
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestionConfig {
    /// Bounded worker pool size for document processing.
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
        }
    }
}

fn default_workers() -> usize {
    4
}

/// External document-to-Markdown converter service.
#[derive(Debug, Deserialize, Clone)]
pub struct ConverterConfig {
    /// Base URL of the converter service. When unset, only Markdown and
    /// plain-text uploads are accepted.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_converter_timeout")]
    pub timeout_secs: u64,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_secs: default_converter_timeout(),
        }
    }
}

fn default_converter_timeout() -> u64 {
    120
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    match config.llm.strategy.as_str() {
        "primary-only" | "failover" | "round-robin" | "model-based" => {}
        other => anyhow::bail!(
            "Unknown llm.strategy: '{}'. Must be primary-only, failover, round-robin, or model-based.",
            other
        ),
    }

    if config.llm.max_retries == 0 {
        anyhow::bail!("llm.max_retries must be >= 1");
    }

    if !config.llm.providers.iter().any(|p| p.enabled) {
        anyhow::bail!("At least one enabled [[llm.providers]] entry is required");
    }

    for provider in &config.llm.providers {
        if provider.api_url.is_empty() {
            anyhow::bail!("llm.providers.{}: api_url must not be empty", provider.name);
        }
        if let Some(0) = provider.embedding_dimension {
            anyhow::bail!(
                "llm.providers.{}: embedding_dimension must be > 0",
                provider.name
            );
        }
    }

    let c = &config.chunking;
    if c.chunk_min_tokens == 0 || c.chunk_min_tokens > c.chunk_ideal_tokens {
        anyhow::bail!("chunking: require 0 < chunk_min_tokens <= chunk_ideal_tokens");
    }
    if c.chunk_ideal_tokens > c.chunk_max_tokens {
        anyhow::bail!("chunking: require chunk_ideal_tokens <= chunk_max_tokens");
    }
    if c.chapter_min_tokens > c.chapter_ideal_tokens
        || c.chapter_ideal_tokens > c.chapter_max_tokens
    {
        anyhow::bail!(
            "chunking: require chapter_min_tokens <= chapter_ideal_tokens <= chapter_max_tokens"
        );
    }

    if config.ingestion.workers == 0 {
        anyhow::bail!("ingestion.workers must be >= 1");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(body: &str) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("corpusd.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(body.as_bytes()).unwrap();
        (dir, path)
    }

    const MINIMAL: &str = r#"
[server]
bind = "127.0.0.1:8080"

[database]
url = "postgres://localhost/corpusd"

[llm]

[[llm.providers]]
name = "local"
api_url = "http://localhost:11434/v1"
models = ["qwen3-1.7b"]
embedding_model = "nomic-embed-text"
embedding_dimension = 768
"#;

    #[test]
    fn test_minimal_config_defaults() {
        let (_dir, path) = write_config(MINIMAL);
        let config = load_config(&path).unwrap();
        assert_eq!(config.llm.strategy, "failover");
        assert_eq!(config.llm.max_retries, 3);
        assert_eq!(config.llm.retry_delay_secs, 120);
        assert_eq!(config.chunking.chunk_ideal_tokens, 512);
        assert_eq!(config.chunking.chapter_split_threshold_tokens, 2000);
        assert_eq!(config.chunking.summary_threshold_tokens, 2500);
        assert_eq!(config.ingestion.workers, 4);
    }

    #[test]
    fn test_unknown_strategy_rejected() {
        let body = MINIMAL.replace("[llm]", "[llm]\nstrategy = \"random\"");
        let (_dir, path) = write_config(&body);
        let err = load_config(&path).unwrap_err().to_string();
        assert!(err.contains("Unknown llm.strategy"), "{}", err);
    }

    #[test]
    fn test_requires_enabled_provider() {
        let body = MINIMAL.replace(
            "embedding_dimension = 768",
            "embedding_dimension = 768\nenabled = false",
        );
        let (_dir, path) = write_config(&body);
        let err = load_config(&path).unwrap_err().to_string();
        assert!(err.contains("enabled"), "{}", err);
    }

    #[test]
    fn test_bad_chunk_budgets_rejected() {
        let body = format!("{}\n[chunking]\nchunk_min_tokens = 900\n", MINIMAL);
        let (_dir, path) = write_config(&body);
        let err = load_config(&path).unwrap_err().to_string();
        assert!(err.contains("chunk_min_tokens"), "{}", err);
    }
}
