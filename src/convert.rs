//! Document-to-Markdown conversion.
//!
//! Binary formats (PDF, DOCX, HTML) are converted by an external service;
//! Markdown and plain text pass through unchanged. The pipeline only ever
//! sees Markdown plus an optional extracted title.

use async_trait::async_trait;
use std::time::Duration;

use crate::config::ConverterConfig;
use crate::error::{Error, Result};

/// Conversion output: Markdown body plus the title the converter extracted,
/// when the upload did not carry one.
#[derive(Debug, Clone)]
pub struct Converted {
    pub markdown: String,
    pub title: Option<String>,
}

/// Conversion port. The production implementation calls the configured
/// external converter service; Markdown and plain text short-circuit.
#[async_trait]
pub trait Converter: Send + Sync {
    async fn convert(&self, bytes: &[u8], content_type_hint: &str) -> Result<Converted>;
}

/// Passthrough for `text/markdown` and `text/plain`, HTTP conversion for
/// everything else.
pub struct HttpConverter {
    url: Option<String>,
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpConverter {
    pub fn new(cfg: &ConverterConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Internal(format!("http client: {}", e)))?;
        Ok(Self {
            url: cfg.url.clone(),
            client,
            timeout: Duration::from_secs(cfg.timeout_secs),
        })
    }
}

#[async_trait]
impl Converter for HttpConverter {
    async fn convert(&self, bytes: &[u8], content_type_hint: &str) -> Result<Converted> {
        if is_passthrough(content_type_hint) {
            let markdown = String::from_utf8(bytes.to_vec())
                .map_err(|_| Error::Validation("upload is not valid UTF-8".into()))?;
            let title = first_heading(&markdown);
            return Ok(Converted { markdown, title });
        }

        let url = self.url.as_ref().ok_or_else(|| {
            Error::Validation(format!(
                "no converter service configured; cannot accept content type '{}'",
                content_type_hint
            ))
        })?;

        let resp = self
            .client
            .post(format!("{}/convert", url.trim_end_matches('/')))
            .timeout(self.timeout)
            .header("Content-Type", content_type_hint)
            .body(bytes.to_vec())
            .send()
            .await?;

        let status = resp.status();
        if status.as_u16() == 429 || status.is_server_error() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Transient(format!("converter {}: {}", status, body)));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Validation(format!("converter {}: {}", status, body)));
        }

        let json: serde_json::Value = resp.json().await?;
        let markdown = json
            .get("markdown")
            .and_then(|m| m.as_str())
            .ok_or_else(|| Error::Internal("converter response missing markdown".into()))?
            .to_string();
        let title = json
            .get("title")
            .and_then(|t| t.as_str())
            .map(|t| t.to_string())
            .or_else(|| first_heading(&markdown));

        Ok(Converted { markdown, title })
    }
}

fn is_passthrough(content_type: &str) -> bool {
    let base = content_type
        .split(';')
        .next()
        .unwrap_or(content_type)
        .trim();
    matches!(base, "text/markdown" | "text/plain" | "")
}

fn first_heading(markdown: &str) -> Option<String> {
    markdown.lines().find_map(|line| {
        line.trim_start()
            .strip_prefix("# ")
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
    })
}

/// Fetch raw bytes and a content-type from a URL, for URL uploads.
pub async fn fetch_url(url: &str, timeout: Duration) -> Result<(Vec<u8>, String)> {
    let client = reqwest::Client::builder()
        .build()
        .map_err(|e| Error::Internal(format!("http client: {}", e)))?;

    let resp = client.get(url).timeout(timeout).send().await?;
    let status = resp.status();
    if !status.is_success() {
        return Err(Error::Validation(format!(
            "fetching '{}' returned {}",
            url, status
        )));
    }

    let content_type = resp
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("text/plain")
        .to_string();
    let bytes = resp.bytes().await?.to_vec();

    Ok((bytes, content_type))
}
