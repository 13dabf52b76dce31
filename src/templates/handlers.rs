//! Per-template predicates and actions.
//!
//! Commands and trigger words are matched case-insensitively on the trimmed
//! text; payloads keep the sender's casing. Every action ends in a reply (or a
//! poll) to the originating chat, so the only error a handler returns is a
//! failure to deliver that reply.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use html_escape::encode_text;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{credential, TemplateKind};
use crate::llm::CompletionClient;
use crate::memory::{LinkStore, Reminder, ReminderStore};
use crate::platform::{InboundMessage, Transport, TransportError};
use crate::translator::TranslationClient;

const TRANSLATE_COMMAND: &str = "/translate ";
const REMIND_COMMAND: &str = "/remind ";
const SHORT_COMMAND: &str = "/short ";
const POLL_COMMAND: &str = "/poll ";

/// Lowercase stems; the rest of the word they start is stripped with them.
const TRANSLATE_TRIGGERS: &[&str] = &["перевед", "translate"];
const REMIND_TRIGGERS: &[&str] = &["напомни", "remind me"];
const CONVERT_TRIGGERS: &[&str] = &["конверт", "преобразов", "convert"];

const SHORT_ID_LEN: usize = 6;
const SHORT_ID_ATTEMPTS: usize = 8;

const FILE_CONVERTER_HELP: &str = "📄 <b>File converter</b>\n\n\
Send a file with a caption:\n\
• \"to pdf\" - convert to PDF\n\
• \"to jpg\" - convert to JPG\n\
• \"to png\" - convert to PNG\n\
• \"to doc\" - convert to DOC\n\n\
Supported formats: PDF, DOC, JPG, PNG, GIF";

/// Collaborators shared by every handler of a process.
pub struct Services {
    pub completion: Arc<dyn CompletionClient>,
    pub translator: Arc<dyn TranslationClient>,
    pub reminders: Arc<dyn ReminderStore>,
    pub links: Arc<dyn LinkStore>,
    pub link_prefix: String,
}

/// Everything a handler may touch while processing one message.
pub struct HandlerContext<'a> {
    pub transport: &'a dyn Transport,
    pub credentials: &'a HashMap<String, String>,
    pub services: &'a Services,
}

impl HandlerContext<'_> {
    async fn reply(&self, message: &InboundMessage, text: &str) -> Result<(), TransportError> {
        self.transport.send_message(message.chat_id, text, None).await
    }
}

impl TemplateKind {
    /// Whether this template claims the message. Credentials are not
    /// consulted here: a template missing its credential still claims the
    /// message and answers that it is not configured.
    pub fn can_handle(&self, message: &InboundMessage) -> bool {
        let text = message.text.trim();
        if text.is_empty() {
            return false;
        }

        // Trigger words only apply to free text, never to other commands.
        let free_text = !text.starts_with('/');

        match self {
            Self::Chatgpt => free_text,
            Self::Translator => {
                starts_with_ci(text, TRANSLATE_COMMAND)
                    || (free_text && contains_trigger(text, TRANSLATE_TRIGGERS))
            }
            Self::Reminder => {
                starts_with_ci(text, REMIND_COMMAND)
                    || (free_text && contains_trigger(text, REMIND_TRIGGERS))
            }
            Self::UrlShortener => starts_with_ci(text, SHORT_COMMAND) || starts_with_ci(text, "http"),
            Self::PollsVoting => starts_with_ci(text, POLL_COMMAND),
            Self::FileConverter => free_text && contains_trigger(text, CONVERT_TRIGGERS),
        }
    }

    pub async fn handle(
        &self,
        ctx: &HandlerContext<'_>,
        message: &InboundMessage,
    ) -> Result<(), TransportError> {
        let text = message.text.trim();
        match self {
            Self::Chatgpt => handle_chatgpt(ctx, message, text).await,
            Self::Translator => handle_translator(ctx, message, text).await,
            Self::Reminder => handle_reminder(ctx, message, text).await,
            Self::UrlShortener => handle_url_shortener(ctx, message, text).await,
            Self::PollsVoting => handle_poll(ctx, message, text).await,
            Self::FileConverter => ctx.reply(message, FILE_CONVERTER_HELP).await,
        }
    }
}

async fn handle_chatgpt(
    ctx: &HandlerContext<'_>,
    message: &InboundMessage,
    text: &str,
) -> Result<(), TransportError> {
    let Some(api_key) = credential(ctx.credentials, TemplateKind::Chatgpt.id()) else {
        debug!("chatgpt credential missing for chat {}", message.chat_id);
        return ctx
            .reply(message, "❌ The OpenAI API key is not configured for this bot.")
            .await;
    };

    ctx.reply(message, "🤖 Working on your request...").await?;

    match ctx.services.completion.complete(api_key, text).await {
        Ok(answer) => {
            ctx.reply(message, &format!("🤖 {}", encode_text(&answer)))
                .await
        }
        Err(e) => {
            warn!("Completion failed for chat {}: {:#}", message.chat_id, e);
            ctx.reply(
                message,
                "❌ The assistant is unavailable right now. Try again later.",
            )
            .await
        }
    }
}

async fn handle_translator(
    ctx: &HandlerContext<'_>,
    message: &InboundMessage,
    text: &str,
) -> Result<(), TransportError> {
    let payload = strip_command(text, TRANSLATE_COMMAND).unwrap_or(text);
    let payload = strip_triggers(payload, TRANSLATE_TRIGGERS);
    if payload.is_empty() {
        return ctx
            .reply(message, "❌ Format: /translate text to translate")
            .await;
    }

    match ctx.services.translator.translate(&payload).await {
        Ok(translated) => {
            ctx.reply(
                message,
                &format!("🌐 <b>Translation:</b>\n{}", encode_text(&translated)),
            )
            .await
        }
        Err(e) => {
            warn!("Translation failed for chat {}: {:#}", message.chat_id, e);
            ctx.reply(message, "❌ Translation failed. Try again later.")
                .await
        }
    }
}

async fn handle_reminder(
    ctx: &HandlerContext<'_>,
    message: &InboundMessage,
    text: &str,
) -> Result<(), TransportError> {
    let payload = strip_command(text, REMIND_COMMAND).unwrap_or(text);
    let payload = strip_triggers(payload, REMIND_TRIGGERS);
    if payload.is_empty() {
        return ctx
            .reply(message, "❌ Format: /remind what to remind you about")
            .await;
    }

    let reminder = Reminder {
        id: Uuid::new_v4().to_string(),
        user_id: message.sender_id,
        chat_id: message.chat_id,
        text: payload,
        created_at: Utc::now(),
    };

    match ctx.services.reminders.save_reminder(&reminder).await {
        Ok(()) => {
            ctx.reply(
                message,
                &format!(
                    "⏰ <b>Reminder created:</b>\n\"{}\"\n\n💡 ID: {}",
                    encode_text(&reminder.text),
                    reminder.id
                ),
            )
            .await
        }
        Err(e) => {
            warn!("Failed to save reminder for chat {}: {:#}", message.chat_id, e);
            ctx.reply(message, "❌ Could not save the reminder. Try again later.")
                .await
        }
    }
}

async fn handle_url_shortener(
    ctx: &HandlerContext<'_>,
    message: &InboundMessage,
    text: &str,
) -> Result<(), TransportError> {
    let url = strip_command(text, SHORT_COMMAND).unwrap_or(text);
    if url.is_empty() {
        return ctx.reply(message, "❌ Format: /short https://example.com").await;
    }

    let mut stored = None;
    for _ in 0..SHORT_ID_ATTEMPTS {
        let id = short_id();
        match ctx.services.links.insert_link(&id, url).await {
            Ok(true) => {
                stored = Some(id);
                break;
            }
            Ok(false) => debug!("Short id {} already taken, retrying", id),
            Err(e) => {
                warn!("Failed to store short link: {:#}", e);
                break;
            }
        }
    }

    match stored {
        Some(id) => {
            ctx.reply(
                message,
                &format!(
                    "🔗 <b>Short link created:</b>\n{}{}\n\n📊 Original: {}",
                    ctx.services.link_prefix,
                    id,
                    encode_text(url)
                ),
            )
            .await
        }
        None => {
            ctx.reply(message, "❌ Could not create a short link. Try again later.")
                .await
        }
    }
}

async fn handle_poll(
    ctx: &HandlerContext<'_>,
    message: &InboundMessage,
    text: &str,
) -> Result<(), TransportError> {
    let payload = strip_command(text, POLL_COMMAND).unwrap_or_default();
    let Some((question, options)) = parse_poll(payload) else {
        debug!("Rejected malformed poll in chat {}", message.chat_id);
        return ctx
            .reply(message, "❌ Format: /poll Question|Option 1|Option 2|...")
            .await;
    };

    if let Err(e) = ctx
        .transport
        .send_poll(message.chat_id, &question, &options)
        .await
    {
        warn!("Failed to create poll in chat {}: {}", message.chat_id, e);
        return ctx
            .reply(message, "❌ Could not create the poll. Try again later.")
            .await;
    }

    Ok(())
}

/// `question|opt1|opt2...` with at least two non-empty options.
fn parse_poll(payload: &str) -> Option<(String, Vec<String>)> {
    let mut parts = payload.split('|').map(str::trim);
    let question = parts.next().filter(|q| !q.is_empty())?;
    let options: Vec<String> = parts
        .filter(|option| !option.is_empty())
        .map(str::to_string)
        .collect();
    if options.len() < 2 {
        return None;
    }
    Some((question.to_string(), options))
}

fn short_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(SHORT_ID_LEN);
    id
}

fn lower(c: char) -> char {
    c.to_lowercase().next().unwrap_or(c)
}

/// End offset of `needle` (lowercase) matched case-insensitively at `start`.
fn match_at(haystack: &str, start: usize, needle: &str) -> Option<usize> {
    let mut end = start;
    let mut rest = haystack[start..].chars();
    for expected in needle.chars() {
        let c = rest.next()?;
        if lower(c) != expected {
            return None;
        }
        end += c.len_utf8();
    }
    Some(end)
}

/// First case-insensitive occurrence of `stem`. A stem made of several
/// words must end at a word boundary, so "remind me" does not match inside
/// "remind meeting".
fn find_trigger(haystack: &str, stem: &str) -> Option<(usize, usize)> {
    let phrase = stem.contains(' ');
    haystack.char_indices().find_map(|(start, _)| {
        let end = match_at(haystack, start, stem)?;
        let cut_word = haystack[end..].chars().next().is_some_and(char::is_alphabetic);
        (!phrase || !cut_word).then_some((start, end))
    })
}

fn starts_with_ci(text: &str, prefix: &str) -> bool {
    match_at(text, 0, prefix).is_some()
}

fn contains_trigger(text: &str, stems: &[&str]) -> bool {
    stems.iter().any(|stem| find_trigger(text, stem).is_some())
}

/// Text after a leading command, trimmed.
fn strip_command<'a>(text: &'a str, command: &str) -> Option<&'a str> {
    match_at(text, 0, command).map(|end| text[end..].trim())
}

/// Removes every trigger (a single-word stem takes the rest of its word with
/// it) and the whitespace after it.
fn strip_triggers(text: &str, stems: &[&str]) -> String {
    let mut out = text.to_string();
    for stem in stems {
        let phrase = stem.contains(' ');
        while let Some((start, end)) = find_trigger(&out, stem) {
            let word_end = if phrase {
                end
            } else {
                end + out[end..]
                    .chars()
                    .take_while(|c| c.is_alphabetic())
                    .map(char::len_utf8)
                    .sum::<usize>()
            };
            let gap_end = word_end
                + out[word_end..]
                    .chars()
                    .take_while(|c| c.is_whitespace())
                    .map(char::len_utf8)
                    .sum::<usize>();
            out.replace_range(start..gap_end, "");
        }
    }
    out.trim().to_string()
}
