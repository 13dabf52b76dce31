pub mod telegram;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Bot token. Authenticates against the Bot API and keys the registry.
///
/// `Display` masks the secret part so identities can be logged.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BotIdentity(String);

impl BotIdentity {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `123456:ABC...xyz` becomes `123456:…xyz` (last four characters kept).
    pub fn masked(&self) -> String {
        let tail: String = {
            let chars: Vec<char> = self.0.chars().collect();
            let start = chars.len().saturating_sub(4);
            chars[start..].iter().collect()
        };
        match self.0.split_once(':') {
            Some((bot_id, _)) => format!("{}:…{}", bot_id, tail),
            None => format!("…{}", tail),
        }
    }
}

impl fmt::Display for BotIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.masked())
    }
}

impl fmt::Debug for BotIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BotIdentity({})", self.masked())
    }
}

/// Profile returned when the Bot API accepts an identity.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct BotProfile {
    pub id: i64,
    pub first_name: String,
    #[serde(default)]
    pub username: Option<String>,
}

impl BotProfile {
    /// `@username` when set, otherwise the first name.
    pub fn handle(&self) -> String {
        match &self.username {
            Some(username) => format!("@{}", username),
            None => self.first_name.clone(),
        }
    }
}

/// A normalized inbound update.
///
/// Updates that carry no text keep an empty `text` so that the cursor still
/// moves past them.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    /// Telegram `update_id`, monotonically increasing per bot
    pub sequence: i64,
    pub sender_id: i64,
    pub chat_id: i64,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub label: String,
    pub callback_id: String,
}

/// Inline keyboard: rows of buttons.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Keyboard {
    pub rows: Vec<Vec<Button>>,
}

impl Keyboard {
    pub fn is_empty(&self) -> bool {
        self.rows.iter().all(|row| row.is_empty())
    }

    pub fn labels(&self) -> Vec<&str> {
        self.rows
            .iter()
            .flatten()
            .map(|button| button.label.as_str())
            .collect()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("api error: {0}")]
    Api(String),

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// Outbound and inbound operations against a bot messaging API, bound to one
/// identity. Every call is a single request; callers decide about retries.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn validate_identity(&self) -> Result<BotProfile, TransportError>;

    /// Long-poll for updates with `sequence >= offset`. Returns an empty vec
    /// when `timeout_secs` elapses without new updates.
    async fn fetch_updates(
        &self,
        offset: i64,
        timeout_secs: u64,
    ) -> Result<Vec<InboundMessage>, TransportError>;

    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<(), TransportError>;

    /// Anonymous poll. Fails with `InvalidRequest` for fewer than two options.
    async fn send_poll(
        &self,
        chat_id: i64,
        question: &str,
        options: &[String],
    ) -> Result<(), TransportError>;

    /// An empty `url` removes the webhook.
    async fn set_webhook(&self, url: &str) -> Result<(), TransportError>;
}
