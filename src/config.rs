use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::bot::PollSettings;

/// Telegram caps the long-poll timeout of getUpdates at 50 seconds.
const MAX_POLL_TIMEOUT_SECS: u64 = 50;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub completion: CompletionConfig,
    #[serde(default)]
    pub translator: TranslatorConfig,
    #[serde(default)]
    pub shortener: ShortenerConfig,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    /// Bots to create at startup if they are not stored yet
    #[serde(default)]
    pub bots: Vec<BotSeed>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelegramConfig {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
    /// Pause between receive cycles
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub database_path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CompletionConfig {
    #[serde(default = "default_completion_base_url")]
    pub base_url: String,
    #[serde(default = "default_completion_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Upper bound for one completion request, including the response body
    #[serde(default = "default_completion_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TranslatorConfig {
    #[serde(default = "default_translator_base_url")]
    pub base_url: String,
    #[serde(default = "default_target_language")]
    pub target_language: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_translator_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ShortenerConfig {
    /// Prepended to generated ids, e.g. `https://t.me/` + `abc123`
    #[serde(default = "default_link_prefix")]
    pub link_prefix: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HeartbeatConfig {
    /// Six-field cron expression (seconds first)
    #[serde(default = "default_heartbeat_cron")]
    pub cron: String,
}

/// A bot declared in the config file.
#[derive(Debug, Deserialize, Clone)]
pub struct BotSeed {
    pub token: String,
    #[serde(default)]
    pub name: Option<String>,
    pub templates: Vec<String>,
    #[serde(default)]
    pub credentials: HashMap<String, String>,
}

fn default_api_base_url() -> String {
    "https://api.telegram.org".to_string()
}

fn default_poll_timeout_secs() -> u64 {
    30
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_db_path() -> PathBuf {
    PathBuf::from("botsmith.db")
}

fn default_completion_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_completion_model() -> String {
    "gpt-3.5-turbo".to_string()
}

fn default_max_tokens() -> u32 {
    500
}

fn default_completion_timeout_secs() -> u64 {
    60
}

fn default_translator_timeout_secs() -> u64 {
    15
}

fn default_translator_base_url() -> String {
    "https://libretranslate.de".to_string()
}

fn default_target_language() -> String {
    "en".to_string()
}

fn default_link_prefix() -> String {
    "https://t.me/".to_string()
}

fn default_heartbeat_cron() -> String {
    "0 0 * * * *".to_string()
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            poll_timeout_secs: default_poll_timeout_secs(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_db_path(),
        }
    }
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            base_url: default_completion_base_url(),
            model: default_completion_model(),
            max_tokens: default_max_tokens(),
            system_prompt: None,
            request_timeout_secs: default_completion_timeout_secs(),
        }
    }
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            base_url: default_translator_base_url(),
            target_language: default_target_language(),
            api_key: None,
            request_timeout_secs: default_translator_timeout_secs(),
        }
    }
}

impl Default for ShortenerConfig {
    fn default() -> Self {
        Self {
            link_prefix: default_link_prefix(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            cron: default_heartbeat_cron(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("Failed to parse config")?;

        if config.telegram.poll_timeout_secs > MAX_POLL_TIMEOUT_SECS {
            anyhow::bail!(
                "telegram.poll_timeout_secs must be at most {} (got {})",
                MAX_POLL_TIMEOUT_SECS,
                config.telegram.poll_timeout_secs
            );
        }

        Ok(config)
    }

    /// Receive-cycle timing for every polling loop.
    pub fn poll_settings(&self) -> PollSettings {
        PollSettings {
            timeout_secs: self.telegram.poll_timeout_secs,
            cycle_delay: Duration::from_millis(self.telegram.retry_delay_ms),
        }
    }
}
