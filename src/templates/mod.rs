pub mod handlers;

use std::collections::HashMap;

use anyhow::Result;
use serde::{Deserialize, Serialize};

pub use handlers::{HandlerContext, Services};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Ai,
    Utility,
    Social,
    Business,
    Automation,
}

/// A catalog entry. The catalog is static data; bots pick an ordered subset.
#[derive(Debug, PartialEq, Eq)]
pub struct Template {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub icon: &'static str,
    pub category: Category,
    pub features: &'static [&'static str],
    /// Label of the external credential the template needs, if any
    pub credential_label: Option<&'static str>,
}

impl Template {
    pub fn requires_credential(&self) -> bool {
        self.credential_label.is_some()
    }

    /// The behavior behind this template. Catalog-only entries have none
    /// and never claim a message.
    pub fn kind(&self) -> Option<TemplateKind> {
        TemplateKind::from_id(self.id)
    }

    /// Menu label: icon followed by the display name.
    pub fn label(&self) -> String {
        format!("{} {}", self.icon, self.name)
    }
}

pub static CATALOG: &[Template] = &[
    Template {
        id: "chatgpt",
        name: "ChatGPT Bot",
        description: "OpenAI integration for smart answers",
        icon: "🤖",
        category: Category::Ai,
        features: &[
            "Answers to any question",
            "Contextual dialogs",
            "Text generation",
            "Configurable bot personality",
        ],
        credential_label: Some("OpenAI API Key"),
    },
    Template {
        id: "translator",
        name: "Translator",
        description: "Automatic text translation between languages",
        icon: "🌐",
        category: Category::Ai,
        features: &[
            "100+ languages",
            "Language detection",
            "Fast translation",
            "History",
        ],
        credential_label: None,
    },
    Template {
        id: "reminder",
        name: "Reminders",
        description: "One-off reminders and recurring tasks",
        icon: "⏰",
        category: Category::Utility,
        features: &[
            "One-off reminders",
            "Recurring tasks",
            "Flexible timing",
            "Telegram notifications",
        ],
        credential_label: None,
    },
    Template {
        id: "url-shortener",
        name: "Link Shortener",
        description: "Short links with click tracking",
        icon: "🔗",
        category: Category::Utility,
        features: &[
            "Short pretty links",
            "Click statistics",
            "Custom domains",
            "QR codes for links",
        ],
        credential_label: None,
    },
    Template {
        id: "file-converter",
        name: "File Converter",
        description: "File conversion: PDF↔DOC, JPG↔PNG and more",
        icon: "📄",
        category: Category::Utility,
        features: &[
            "PDF to DOC and back",
            "Image conversion",
            "File compression",
            "Batch processing",
        ],
        credential_label: None,
    },
    Template {
        id: "anonymous-chat",
        name: "Anonymous Chat",
        description: "Anonymous conversations between users through the bot",
        icon: "💬",
        category: Category::Social,
        features: &[
            "Full anonymity",
            "Random partners",
            "Interest filters",
            "Content moderation",
        ],
        credential_label: None,
    },
    Template {
        id: "polls-voting",
        name: "Polls & Voting",
        description: "Interactive polls and votes",
        icon: "📊",
        category: Category::Social,
        features: &[
            "Multi-option polls",
            "Anonymous voting",
            "Live results",
            "Result export",
        ],
        credential_label: None,
    },
    Template {
        id: "channel-stats",
        name: "Channel Stats",
        description: "Analytics for Telegram channels and groups",
        icon: "📈",
        category: Category::Social,
        features: &[
            "Activity analysis",
            "Member statistics",
            "Content reports",
            "Data export",
        ],
        credential_label: None,
    },
    Template {
        id: "payment-bot",
        name: "Payment Bot",
        description: "Accept payments through Stripe/YooKassa",
        icon: "💳",
        category: Category::Business,
        features: &[
            "Card payments",
            "Subscriptions and recurring billing",
            "Receipts and notifications",
            "Sales analytics",
        ],
        credential_label: Some("Stripe/YooKassa API"),
    },
    Template {
        id: "rss-feed",
        name: "RSS Feed",
        description: "Automatic news publishing from RSS",
        icon: "📰",
        category: Category::Automation,
        features: &[
            "RSS feed monitoring",
            "Automatic news posting",
            "Keyword filters",
            "Schedule settings",
        ],
        credential_label: None,
    },
];

/// Look up a catalog entry by id.
pub fn find(id: &str) -> Option<&'static Template> {
    CATALOG.iter().find(|template| template.id == id)
}

/// Template behaviors that have a message handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemplateKind {
    Chatgpt,
    Translator,
    Reminder,
    UrlShortener,
    PollsVoting,
    FileConverter,
}

impl TemplateKind {
    pub fn from_id(id: &str) -> Option<Self> {
        match id {
            "chatgpt" => Some(Self::Chatgpt),
            "translator" => Some(Self::Translator),
            "reminder" => Some(Self::Reminder),
            "url-shortener" => Some(Self::UrlShortener),
            "polls-voting" => Some(Self::PollsVoting),
            "file-converter" => Some(Self::FileConverter),
            _ => None,
        }
    }

    pub fn id(&self) -> &'static str {
        match self {
            Self::Chatgpt => "chatgpt",
            Self::Translator => "translator",
            Self::Reminder => "reminder",
            Self::UrlShortener => "url-shortener",
            Self::PollsVoting => "polls-voting",
            Self::FileConverter => "file-converter",
        }
    }

    /// Slash command and its help line, for templates that have one.
    pub fn command(&self) -> Option<(&'static str, &'static str)> {
        match self {
            Self::Reminder => Some(("/remind", "Create a reminder")),
            Self::Translator => Some(("/translate", "Translate text")),
            Self::UrlShortener => Some(("/short", "Shorten a link")),
            Self::PollsVoting => Some(("/poll", "Create a poll")),
            Self::Chatgpt | Self::FileConverter => None,
        }
    }
}

/// Ordered templates enabled for one bot, plus the credentials supplied for
/// them. Order is handler-chain precedence.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateSelection {
    templates: Vec<&'static Template>,
    credentials: HashMap<String, String>,
}

impl TemplateSelection {
    /// Fails on ids that are not in the catalog. Repeated ids keep their
    /// first position.
    pub fn new<S: AsRef<str>>(ids: &[S], credentials: HashMap<String, String>) -> Result<Self> {
        let mut templates: Vec<&'static Template> = Vec::with_capacity(ids.len());
        for id in ids {
            let id = id.as_ref();
            let template =
                find(id).ok_or_else(|| anyhow::anyhow!("Unknown template id: {}", id))?;
            if !templates.contains(&template) {
                templates.push(template);
            }
        }

        Ok(Self {
            templates,
            credentials,
        })
    }

    pub fn templates(&self) -> &[&'static Template] {
        &self.templates
    }

    pub fn ids(&self) -> Vec<&'static str> {
        self.templates.iter().map(|template| template.id).collect()
    }

    pub fn credentials(&self) -> &HashMap<String, String> {
        &self.credentials
    }

    /// Enabled templates whose required credential is missing or blank.
    pub fn missing_credentials(&self) -> Vec<&'static str> {
        self.templates
            .iter()
            .filter(|template| template.requires_credential())
            .filter(|template| credential(&self.credentials, template.id).is_none())
            .map(|template| template.id)
            .collect()
    }
}

/// A supplied credential, ignoring blank values.
pub fn credential<'a>(credentials: &'a HashMap<String, String>, id: &str) -> Option<&'a str> {
    credentials
        .get(id)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_ids_are_unique() {
        let mut ids: Vec<&str> = CATALOG.iter().map(|t| t.id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), CATALOG.len());
    }

    #[test]
    fn test_every_kind_has_a_catalog_entry() {
        for template in CATALOG {
            if let Some(kind) = template.kind() {
                assert_eq!(kind.id(), template.id);
            }
        }
        assert_eq!(CATALOG.iter().filter(|t| t.kind().is_some()).count(), 6);
        assert!(find("rss-feed").unwrap().kind().is_none());
    }

    #[test]
    fn test_selection_preserves_order() {
        let selection = TemplateSelection::new(
            &["polls-voting", "chatgpt", "translator"],
            HashMap::new(),
        )
        .unwrap();
        assert_eq!(selection.ids(), vec!["polls-voting", "chatgpt", "translator"]);
    }

    #[test]
    fn test_selection_rejects_unknown_id() {
        let err = TemplateSelection::new(&["translator", "weather"], HashMap::new()).unwrap_err();
        assert!(err.to_string().contains("weather"));
    }

    #[test]
    fn test_selection_drops_repeated_ids() {
        let selection =
            TemplateSelection::new(&["reminder", "translator", "reminder"], HashMap::new())
                .unwrap();
        assert_eq!(selection.ids(), vec!["reminder", "translator"]);
    }

    #[test]
    fn test_missing_credentials_ignores_blank_values() {
        let credentials = HashMap::from([("chatgpt".to_string(), "   ".to_string())]);
        let selection =
            TemplateSelection::new(&["chatgpt", "payment-bot", "translator"], credentials)
                .unwrap();
        assert_eq!(selection.missing_credentials(), vec!["chatgpt", "payment-bot"]);
    }
}
