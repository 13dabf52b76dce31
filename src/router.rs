use tracing::{debug, info, warn};

use crate::platform::{Button, InboundMessage, Keyboard, Transport};
use crate::templates::{HandlerContext, Services, TemplateKind, TemplateSelection};

const START_COMMAND: &str = "/start";
const HELP_COMMAND: &str = "/help";
const MENU_COLUMNS: usize = 2;

/// What the router did with one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// No text to route
    Ignored,
    Welcome,
    Help,
    /// Consumed by a template, whether or not its reply went through
    Handled(TemplateKind),
    /// Nothing claimed the message; the default reply was sent
    Fallback,
}

/// `/start` and `/start@my_bot` both count.
fn is_command(text: &str, command: &str) -> bool {
    let name = text.split('@').next().unwrap_or(text);
    name.eq_ignore_ascii_case(command) && !text.contains(char::is_whitespace)
}

/// One button per enabled template, `MENU_COLUMNS` per row.
pub fn build_menu(selection: &TemplateSelection) -> Keyboard {
    let buttons: Vec<Button> = selection
        .templates()
        .iter()
        .map(|template| Button {
            label: template.label(),
            callback_id: format!("template:{}", template.id),
        })
        .collect();

    Keyboard {
        rows: buttons
            .chunks(MENU_COLUMNS)
            .map(|row| row.to_vec())
            .collect(),
    }
}

pub fn welcome_text(selection: &TemplateSelection) -> String {
    let names: Vec<String> = selection
        .templates()
        .iter()
        .map(|template| format!("• {}", template.name))
        .collect();

    format!(
        "🤖 <b>Welcome!</b>\n\n\
         This bot is built from the following templates:\n{}\n\n\
         Send /help to see the available commands.",
        names.join("\n")
    )
}

pub fn help_text(selection: &TemplateSelection) -> String {
    let mut commands = vec![
        format!("• {} - Welcome", START_COMMAND),
        format!("• {} - Help", HELP_COMMAND),
    ];
    commands.extend(
        selection
            .templates()
            .iter()
            .filter_map(|template| template.kind())
            .filter_map(|kind| kind.command())
            .map(|(command, description)| format!("• {} - {}", command, description)),
    );

    format!(
        "📚 <b>Available commands:</b>\n\n{}\n\n\
         💡 Just send messages - the bot processes them with its active templates.",
        commands.join("\n")
    )
}

const FALLBACK_TEXT: &str =
    "🤔 Sorry, I did not understand that. Send /help to see what I can do.";

/// Route one message: start and help commands first, then the template
/// chain in selection order (first match wins), then the fallback reply.
pub async fn route(
    transport: &dyn Transport,
    services: &Services,
    selection: &TemplateSelection,
    message: &InboundMessage,
) -> Outcome {
    let text = message.text.trim();
    if text.is_empty() {
        debug!("Update {} has no text, ignoring", message.sequence);
        return Outcome::Ignored;
    }

    if is_command(text, START_COMMAND) {
        send(transport, message, &welcome_text(selection), selection).await;
        return Outcome::Welcome;
    }

    if is_command(text, HELP_COMMAND) {
        send(transport, message, &help_text(selection), selection).await;
        return Outcome::Help;
    }

    let ctx = HandlerContext {
        transport,
        credentials: selection.credentials(),
        services,
    };

    for template in selection.templates() {
        let Some(kind) = template.kind() else {
            continue;
        };
        if !kind.can_handle(message) {
            continue;
        }

        info!(
            "Update {} in chat {} handled by template '{}'",
            message.sequence, message.chat_id, template.id
        );
        if let Err(e) = kind.handle(&ctx, message).await {
            warn!(
                "Template '{}' failed to reply in chat {}: {}",
                template.id, message.chat_id, e
            );
        }
        return Outcome::Handled(kind);
    }

    debug!("No template claimed update {}", message.sequence);
    send(transport, message, FALLBACK_TEXT, selection).await;
    Outcome::Fallback
}

async fn send(
    transport: &dyn Transport,
    message: &InboundMessage,
    text: &str,
    selection: &TemplateSelection,
) {
    let menu = build_menu(selection);
    let keyboard = (!menu.is_empty()).then_some(&menu);
    if let Err(e) = transport.send_message(message.chat_id, text, keyboard).await {
        warn!("Failed to reply in chat {}: {}", message.chat_id, e);
    }
}
