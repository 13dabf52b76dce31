use std::time::Duration;

use async_trait::async_trait;
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::{Deserialize, Serialize};
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup, ParseMode};
use tracing::debug;

use super::{BotIdentity, BotProfile, InboundMessage, Keyboard, Transport, TransportError};

/// Telegram rejects messages longer than 4096 characters.
const MAX_MESSAGE_LEN: usize = 4000;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Split long messages for Telegram's 4096 char limit
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut start = 0;

    while start < text.len() {
        let mut end = (start + max_len).min(text.len());
        // Walk back to a valid UTF-8 char boundary so slicing doesn't panic
        while end > start && !text.is_char_boundary(end) {
            end -= 1;
        }
        let actual_end = if end < text.len() {
            let split = text[start..end]
                .rfind('\n')
                .or_else(|| text[start..end].rfind(' '))
                .map(|pos| start + pos + 1)
                .unwrap_or(end);
            start + html_safe_len(&text[start..split])
        } else {
            end
        };

        chunks.push(text[start..actual_end].to_string());
        start = actual_end;
    }

    chunks
}

/// Length of `chunk` after backing off from a trailing unclosed `<tag` or
/// `&entity`, which Telegram refuses to parse. A chunk that starts with one
/// is left whole.
fn html_safe_len(chunk: &str) -> usize {
    let mut len = chunk.len();
    if let Some(open) = chunk.rfind('<') {
        if open > 0 && !chunk[open..].contains('>') {
            len = open;
        }
    }
    if let Some(amp) = chunk[..len].rfind('&') {
        if amp > 0 && !chunk[amp..len].contains(';') {
            len = amp;
        }
    }
    len
}

fn to_markup(keyboard: &Keyboard) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(keyboard.rows.iter().map(|row| {
        row.iter()
            .map(|button| {
                InlineKeyboardButton::callback(button.label.clone(), button.callback_id.clone())
            })
            .collect::<Vec<_>>()
    }))
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawUpdate {
    update_id: i64,
    #[serde(default)]
    message: Option<RawMessage>,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    chat: RawChat,
    #[serde(default)]
    from: Option<RawUser>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawChat {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct RawUser {
    id: i64,
}

impl From<RawUpdate> for InboundMessage {
    fn from(update: RawUpdate) -> Self {
        match update.message {
            Some(message) => InboundMessage {
                sequence: update.update_id,
                sender_id: message.from.map(|user| user.id).unwrap_or_default(),
                chat_id: message.chat.id,
                text: message.text.unwrap_or_default(),
            },
            None => InboundMessage {
                sequence: update.update_id,
                sender_id: 0,
                chat_id: 0,
                text: String::new(),
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct GetUpdatesRequest {
    offset: i64,
    timeout: u64,
    allowed_updates: [&'static str; 1],
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: i64,
    text: &'a str,
    parse_mode: ParseMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_markup: Option<InlineKeyboardMarkup>,
}

#[derive(Debug, Serialize)]
struct SendPollRequest<'a> {
    chat_id: i64,
    question: &'a str,
    options: &'a [String],
    is_anonymous: bool,
}

#[derive(Debug, Serialize)]
struct SetWebhookRequest<'a> {
    url: &'a str,
}

/// Bot API client bound to one identity.
pub struct TelegramClient {
    http: reqwest::Client,
    base_url: String,
}

impl TelegramClient {
    /// `api_base_url` is the API root without the `/bot<token>` suffix.
    pub fn new(identity: &BotIdentity, api_base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: format!(
                "{}/bot{}",
                api_base_url.trim_end_matches('/'),
                identity.as_str()
            ),
        }
    }

    async fn call<B, T>(&self, method: &str, body: &B, timeout: Duration) -> Result<T, TransportError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = format!("{}/{}", self.base_url, method);
        debug!("Calling Bot API method {}", method);

        let response = self
            .http
            .post(&url)
            .timeout(timeout)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        // The Bot API answers errors with a JSON envelope too, so prefer its
        // description over the bare status.
        let parsed: ApiResponse<T> = match serde_json::from_str(&body) {
            Ok(parsed) => parsed,
            Err(e) if status.is_success() => return Err(TransportError::Decode(e.to_string())),
            Err(_) => {
                return Err(TransportError::Status {
                    status: status.as_u16(),
                    body,
                })
            }
        };

        if !parsed.ok {
            return Err(TransportError::Api(
                parsed
                    .description
                    .unwrap_or_else(|| format!("{} returned ok=false", method)),
            ));
        }

        parsed
            .result
            .ok_or_else(|| TransportError::Decode(format!("{} returned no result", method)))
    }
}

#[async_trait]
impl Transport for TelegramClient {
    async fn validate_identity(&self) -> Result<BotProfile, TransportError> {
        self.call("getMe", &serde_json::json!({}), REQUEST_TIMEOUT)
            .await
    }

    async fn fetch_updates(
        &self,
        offset: i64,
        timeout_secs: u64,
    ) -> Result<Vec<InboundMessage>, TransportError> {
        let request = GetUpdatesRequest {
            offset,
            timeout: timeout_secs,
            allowed_updates: ["message"],
        };
        // Leave headroom over the server-side long-poll timeout.
        let timeout = Duration::from_secs(timeout_secs) + REQUEST_TIMEOUT;
        let updates: Vec<RawUpdate> = self.call("getUpdates", &request, timeout).await?;

        let mut messages: Vec<InboundMessage> = updates.into_iter().map(Into::into).collect();
        messages.sort_by_key(|message| message.sequence);
        Ok(messages)
    }

    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<(), TransportError> {
        let chunks = split_message(text, MAX_MESSAGE_LEN);
        let last = chunks.len().saturating_sub(1);

        for (index, chunk) in chunks.iter().enumerate() {
            // The keyboard goes with the final chunk only
            let reply_markup = if index == last {
                keyboard.filter(|k| !k.is_empty()).map(to_markup)
            } else {
                None
            };
            let request = SendMessageRequest {
                chat_id,
                text: chunk,
                parse_mode: ParseMode::Html,
                reply_markup,
            };
            let _: IgnoredAny = self.call("sendMessage", &request, REQUEST_TIMEOUT).await?;
        }

        Ok(())
    }

    async fn send_poll(
        &self,
        chat_id: i64,
        question: &str,
        options: &[String],
    ) -> Result<(), TransportError> {
        if options.len() < 2 {
            return Err(TransportError::InvalidRequest(format!(
                "a poll needs at least 2 options, got {}",
                options.len()
            )));
        }

        let request = SendPollRequest {
            chat_id,
            question,
            options,
            is_anonymous: true,
        };
        let _: IgnoredAny = self.call("sendPoll", &request, REQUEST_TIMEOUT).await?;
        Ok(())
    }

    async fn set_webhook(&self, url: &str) -> Result<(), TransportError> {
        let _: IgnoredAny = self
            .call("setWebhook", &SetWebhookRequest { url }, REQUEST_TIMEOUT)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::Button;
    use serde_json::{json, Value};
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn mock_api(method_name: &str, response: ResponseTemplate) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("/bot1:abc/{}", method_name)))
            .respond_with(response)
            .mount(&server)
            .await;
        server
    }

    fn client_for(server: &MockServer) -> TelegramClient {
        TelegramClient::new(&BotIdentity::new("1:abc"), &server.uri())
    }

    fn client() -> TelegramClient {
        TelegramClient::new(&BotIdentity::new("1:abc"), "http://127.0.0.1:9/")
    }

    #[test]
    fn test_base_url_includes_token() {
        assert_eq!(client().base_url, "http://127.0.0.1:9/bot1:abc");
    }

    #[test]
    fn test_split_message_short_text_unchanged() {
        assert_eq!(split_message("hello", 10), vec!["hello".to_string()]);
    }

    #[test]
    fn test_split_message_prefers_newlines() {
        let chunks = split_message("aaaa\nbbbb\ncccc", 10);
        assert_eq!(chunks, vec!["aaaa\nbbbb\n", "cccc"]);
        assert_eq!(chunks.concat(), "aaaa\nbbbb\ncccc");
    }

    #[test]
    fn test_split_message_respects_char_boundaries() {
        let text = "привет".repeat(10);
        let chunks = split_message(&text, 7);
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn test_split_message_does_not_cut_entities() {
        let text = format!("{}&amp;tail", "x".repeat(8));
        let chunks = split_message(&text, 10);
        assert_eq!(chunks, vec!["xxxxxxxx", "&amp;tail"]);
    }

    #[test]
    fn test_split_message_does_not_cut_tags() {
        let text = format!("{}<b>yy</b>", "x".repeat(7));
        let chunks = split_message(&text, 9);
        assert_eq!(chunks, vec!["xxxxxxx", "<b>yy</b>"]);
    }

    #[test]
    fn test_split_message_long_escaped_run() {
        let text = "&lt;".repeat(1500);
        let chunks = split_message(&text, MAX_MESSAGE_LEN);
        assert_eq!(chunks.concat(), text);
        for chunk in &chunks {
            assert!(chunk.starts_with("&lt;") && chunk.ends_with(';'), "{}", chunk.len());
        }
    }

    #[test]
    fn test_update_without_message_normalizes_to_empty_text() {
        let update: RawUpdate = serde_json::from_str(r#"{"update_id": 42}"#).unwrap();
        let message = InboundMessage::from(update);
        assert_eq!(message.sequence, 42);
        assert!(message.text.is_empty());
    }

    #[test]
    fn test_update_with_text_message() {
        let update: RawUpdate = serde_json::from_str(
            r#"{"update_id": 7, "message": {"message_id": 1, "date": 0,
                "from": {"id": 55, "is_bot": false, "first_name": "A"},
                "chat": {"id": -100, "type": "group"}, "text": "/start"}}"#,
        )
        .unwrap();
        let message = InboundMessage::from(update);
        assert_eq!(
            message,
            InboundMessage {
                sequence: 7,
                sender_id: 55,
                chat_id: -100,
                text: "/start".to_string(),
            }
        );
    }

    #[test]
    fn test_api_error_envelope() {
        let parsed: ApiResponse<IgnoredAny> =
            serde_json::from_str(r#"{"ok": false, "error_code": 401, "description": "Unauthorized"}"#)
                .unwrap();
        assert!(!parsed.ok);
        assert_eq!(parsed.description.as_deref(), Some("Unauthorized"));
    }

    #[test]
    fn test_send_message_request_serializes_keyboard() {
        let keyboard = Keyboard {
            rows: vec![vec![Button {
                label: "🌐 Translator".to_string(),
                callback_id: "template:translator".to_string(),
            }]],
        };
        let request = SendMessageRequest {
            chat_id: 5,
            text: "hi",
            parse_mode: ParseMode::Html,
            reply_markup: Some(to_markup(&keyboard)),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["parse_mode"], "HTML");
        assert_eq!(
            json["reply_markup"]["inline_keyboard"][0][0]["callback_data"],
            "template:translator"
        );
    }

    #[tokio::test]
    async fn test_send_poll_rejects_single_option_without_request() {
        let result = client()
            .send_poll(1, "Lunch?", &["Pizza".to_string()])
            .await;
        assert!(matches!(result, Err(TransportError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_get_me_returns_profile() {
        let server = mock_api(
            "getMe",
            ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "result": {"id": 7, "is_bot": true, "first_name": "Greeter", "username": "greeter_bot"}
            })),
        )
        .await;

        let profile = client_for(&server).validate_identity().await.unwrap();
        assert_eq!(profile.id, 7);
        assert_eq!(profile.handle(), "@greeter_bot");
    }

    #[tokio::test]
    async fn test_ok_false_maps_to_api_error() {
        let server = mock_api(
            "getMe",
            ResponseTemplate::new(401).set_body_json(json!({
                "ok": false, "error_code": 401, "description": "Unauthorized"
            })),
        )
        .await;

        let err = client_for(&server).validate_identity().await.unwrap_err();
        assert!(matches!(err, TransportError::Api(ref d) if d == "Unauthorized"), "{:?}", err);
    }

    #[tokio::test]
    async fn test_non_json_error_maps_to_status() {
        let server = mock_api(
            "getMe",
            ResponseTemplate::new(502).set_body_string("<html>Bad Gateway</html>"),
        )
        .await;

        let err = client_for(&server).validate_identity().await.unwrap_err();
        match err {
            TransportError::Status { status, body } => {
                assert_eq!(status, 502);
                assert!(body.contains("Bad Gateway"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_malformed_success_maps_to_decode() {
        let server = mock_api("getMe", ResponseTemplate::new(200).set_body_string("not json")).await;
        let err = client_for(&server).validate_identity().await.unwrap_err();
        assert!(matches!(err, TransportError::Decode(_)), "{:?}", err);
    }

    #[tokio::test]
    async fn test_missing_result_maps_to_decode() {
        let server = mock_api(
            "getMe",
            ResponseTemplate::new(200).set_body_json(json!({"ok": true})),
        )
        .await;
        let err = client_for(&server).validate_identity().await.unwrap_err();
        assert!(
            matches!(err, TransportError::Decode(ref m) if m.contains("no result")),
            "{:?}",
            err
        );
    }

    #[tokio::test]
    async fn test_get_updates_sends_offset_and_sorts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bot1:abc/getUpdates"))
            .and(body_partial_json(json!({
                "offset": 10, "timeout": 0, "allowed_updates": ["message"]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "result": [
                    {"update_id": 12, "message": {"chat": {"id": 1}, "from": {"id": 5}, "text": "b"}},
                    {"update_id": 11, "edited_message": {}},
                    {"update_id": 10, "message": {"chat": {"id": 1}, "text": "a"}}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let updates = client_for(&server).fetch_updates(10, 0).await.unwrap();
        let sequences: Vec<i64> = updates.iter().map(|u| u.sequence).collect();
        assert_eq!(sequences, vec![10, 11, 12]);
        assert_eq!(updates[0].text, "a");
        assert!(updates[1].text.is_empty());
        assert_eq!(updates[2].sender_id, 5);
    }

    #[tokio::test]
    async fn test_long_message_puts_keyboard_on_last_chunk() {
        let server = mock_api(
            "sendMessage",
            ResponseTemplate::new(200).set_body_json(json!({"ok": true, "result": {"message_id": 1}})),
        )
        .await;
        let keyboard = Keyboard {
            rows: vec![vec![Button {
                label: "📊 Polls".to_string(),
                callback_id: "template:polls-voting".to_string(),
            }]],
        };
        let text = "word ".repeat(1000);

        client_for(&server)
            .send_message(3, &text, Some(&keyboard))
            .await
            .unwrap();

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 2);
        let bodies: Vec<Value> = requests
            .iter()
            .map(|r| serde_json::from_slice(&r.body).unwrap())
            .collect();
        assert!(bodies[0].get("reply_markup").is_none());
        assert_eq!(
            bodies[1]["reply_markup"]["inline_keyboard"][0][0]["callback_data"],
            "template:polls-voting"
        );
        assert_eq!(bodies[0]["parse_mode"], "HTML");
        assert_eq!(bodies[0]["chat_id"], 3);
    }

    #[tokio::test]
    async fn test_send_poll_is_anonymous() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bot1:abc/sendPoll"))
            .and(body_partial_json(json!({
                "chat_id": 4, "question": "Lunch?", "options": ["Pizza", "Sushi"], "is_anonymous": true
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true, "result": {}})))
            .expect(1)
            .mount(&server)
            .await;

        client_for(&server)
            .send_poll(4, "Lunch?", &["Pizza".to_string(), "Sushi".to_string()])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_set_webhook_clears_with_empty_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bot1:abc/setWebhook"))
            .and(body_partial_json(json!({"url": ""})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true, "result": true})))
            .expect(1)
            .mount(&server)
            .await;

        client_for(&server).set_webhook("").await.unwrap();
    }
}
