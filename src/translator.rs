use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::TranslatorConfig;

#[async_trait]
pub trait TranslationClient: Send + Sync {
    /// Translate `text` into the configured target language, detecting the
    /// source language.
    async fn translate(&self, text: &str) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct TranslateRequest<'a> {
    q: &'a str,
    source: &'a str,
    target: &'a str,
    format: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    api_key: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct TranslateResponse {
    #[serde(rename = "translatedText")]
    translated_text: String,
}

/// Client for LibreTranslate-compatible endpoints.
pub struct LibreTranslateClient {
    client: reqwest::Client,
    config: TranslatorConfig,
}

impl LibreTranslateClient {
    pub fn new(config: TranslatorConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("Failed to build translation HTTP client")?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl TranslationClient for LibreTranslateClient {
    async fn translate(&self, text: &str) -> Result<String> {
        let url = format!("{}/translate", self.config.base_url.trim_end_matches('/'));
        let request = TranslateRequest {
            q: text,
            source: "auto",
            target: &self.config.target_language,
            format: "text",
            api_key: self.config.api_key.as_deref().filter(|k| !k.is_empty()),
        };

        debug!("Sending translation request to {}", url);

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .context("Failed to send translation request")?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            anyhow::bail!("Translation API error ({}): {}", status, error_body);
        }

        let parsed: TranslateResponse = response
            .json()
            .await
            .context("Failed to parse translation response")?;

        Ok(parsed.translated_text)
    }
}
