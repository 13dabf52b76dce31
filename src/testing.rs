//! Test doubles shared by the unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Notify;

use crate::llm::CompletionClient;
use crate::memory::MemoryStore;
use crate::platform::{BotProfile, InboundMessage, Keyboard, Transport, TransportError};
use crate::templates::Services;
use crate::translator::TranslationClient;

/// Text message from sender 100 in chat 1.
pub fn message(sequence: i64, text: &str) -> InboundMessage {
    InboundMessage {
        sequence,
        sender_id: 100,
        chat_id: 1,
        text: text.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Sent {
    Message {
        chat_id: i64,
        text: String,
        keyboard: Option<Keyboard>,
    },
    Poll {
        chat_id: i64,
        question: String,
        options: Vec<String>,
    },
}

impl Sent {
    pub fn text(&self) -> &str {
        match self {
            Sent::Message { text, .. } => text,
            Sent::Poll { question, .. } => question,
        }
    }

    pub fn keyboard(&self) -> Option<&Keyboard> {
        match self {
            Sent::Message { keyboard, .. } => keyboard.as_ref(),
            Sent::Poll { .. } => None,
        }
    }
}

type Batch = Result<Vec<InboundMessage>, TransportError>;

/// Records outbound calls and serves scripted update batches. Once the script
/// is exhausted, fetches behave like an empty long-poll timeout.
#[derive(Default)]
pub struct MockTransport {
    sent: Mutex<Vec<Sent>>,
    offsets: Mutex<Vec<i64>>,
    webhooks: Mutex<Vec<String>>,
    batches: Mutex<VecDeque<Batch>>,
    fail_polls: AtomicBool,
    hold_fetches: AtomicBool,
    fetch_started: Notify,
    release: Notify,
    profile: Mutex<Option<BotProfile>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_batch(&self, messages: Vec<InboundMessage>) {
        self.batches.lock().unwrap().push_back(Ok(messages));
    }

    pub fn push_error(&self, error: TransportError) {
        self.batches.lock().unwrap().push_back(Err(error));
    }

    pub fn fail_polls(&self) {
        self.fail_polls.store(true, Ordering::SeqCst);
    }

    /// Make fetches block until `release_fetch` is called.
    pub fn hold_fetches(&self) {
        self.hold_fetches.store(true, Ordering::SeqCst);
    }

    pub fn release_fetch(&self) {
        self.hold_fetches.store(false, Ordering::SeqCst);
        self.release.notify_waiters();
    }

    pub async fn wait_for_fetch(&self) {
        self.fetch_started.notified().await;
    }

    pub fn set_profile(&self, profile: BotProfile) {
        *self.profile.lock().unwrap() = Some(profile);
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn offsets(&self) -> Vec<i64> {
        self.offsets.lock().unwrap().clone()
    }

    pub fn webhooks(&self) -> Vec<String> {
        self.webhooks.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn validate_identity(&self) -> Result<BotProfile, TransportError> {
        self.profile
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| TransportError::Api("Unauthorized".to_string()))
    }

    async fn fetch_updates(
        &self,
        offset: i64,
        _timeout_secs: u64,
    ) -> Result<Vec<InboundMessage>, TransportError> {
        self.offsets.lock().unwrap().push(offset);
        self.fetch_started.notify_one();

        if self.hold_fetches.load(Ordering::SeqCst) {
            let released = self.release.notified();
            if self.hold_fetches.load(Ordering::SeqCst) {
                released.await;
            }
        }

        let next = self.batches.lock().unwrap().pop_front();
        match next {
            Some(batch) => batch,
            None => {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Ok(Vec::new())
            }
        }
    }

    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<(), TransportError> {
        self.sent.lock().unwrap().push(Sent::Message {
            chat_id,
            text: text.to_string(),
            keyboard: keyboard.cloned(),
        });
        Ok(())
    }

    async fn send_poll(
        &self,
        chat_id: i64,
        question: &str,
        options: &[String],
    ) -> Result<(), TransportError> {
        if options.len() < 2 {
            return Err(TransportError::InvalidRequest("too few options".to_string()));
        }
        if self.fail_polls.load(Ordering::SeqCst) {
            return Err(TransportError::Api("Bad Request".to_string()));
        }
        self.sent.lock().unwrap().push(Sent::Poll {
            chat_id,
            question: question.to_string(),
            options: options.to_vec(),
        });
        Ok(())
    }

    async fn set_webhook(&self, url: &str) -> Result<(), TransportError> {
        self.webhooks.lock().unwrap().push(url.to_string());
        Ok(())
    }
}

/// Scripted reply source for the completion and translation clients.
#[derive(Default)]
pub struct Scripted {
    answer: Mutex<Option<Result<String, String>>>,
    requests: Mutex<Vec<(String, String)>>,
    hang: AtomicBool,
}

impl Scripted {
    pub fn answer(&self, text: &str) {
        *self.answer.lock().unwrap() = Some(Ok(text.to_string()));
    }

    pub fn fail(&self, error: &str) {
        *self.answer.lock().unwrap() = Some(Err(error.to_string()));
    }

    /// Record requests but never answer them.
    pub fn hang(&self) {
        self.hang.store(true, Ordering::SeqCst);
    }

    /// `(api_key, prompt)` pairs seen by the completion client.
    pub fn prompts(&self) -> Vec<(String, String)> {
        self.requests.lock().unwrap().clone()
    }

    /// Texts seen by the translation client.
    pub fn requests(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|(_, text)| text.clone())
            .collect()
    }

    async fn respond(&self, key: &str, text: &str) -> Result<String> {
        self.requests
            .lock()
            .unwrap()
            .push((key.to_string(), text.to_string()));
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let answer = self.answer.lock().unwrap().clone();
        match answer {
            Some(Ok(answer)) => Ok(answer),
            Some(Err(error)) => Err(anyhow::anyhow!(error)),
            None => Ok(format!("echo: {}", text)),
        }
    }
}

#[async_trait]
impl CompletionClient for Scripted {
    async fn complete(&self, api_key: &str, prompt: &str) -> Result<String> {
        self.respond(api_key, prompt).await
    }
}

#[async_trait]
impl TranslationClient for Scripted {
    async fn translate(&self, text: &str) -> Result<String> {
        self.respond("", text).await
    }
}

pub struct TestServices {
    pub completion: Arc<Scripted>,
    pub translator: Arc<Scripted>,
    pub store: MemoryStore,
}

impl TestServices {
    pub fn new() -> Self {
        Self::with_store(MemoryStore::open_in_memory().unwrap())
    }

    pub fn with_store(store: MemoryStore) -> Self {
        Self {
            completion: Arc::new(Scripted::default()),
            translator: Arc::new(Scripted::default()),
            store,
        }
    }

    pub fn build(&self) -> Services {
        Services {
            completion: self.completion.clone(),
            translator: self.translator.clone(),
            reminders: Arc::new(self.store.clone()),
            links: Arc::new(self.store.clone()),
            link_prefix: "https://t.me/".to_string(),
        }
    }
}

/// Poll `condition` until it holds or a second passes.
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
