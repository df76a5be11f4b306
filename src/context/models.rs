//! Data models for context management

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Author of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    #[default]
    #[serde(other)]
    Unknown,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single chat message. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Override the timestamp (replays, rehydration, tests)
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Role-labelled line, e.g. `user: hello`
    pub fn render(&self) -> String {
        format!("{}: {}", self.role, self.content)
    }
}

/// Compressed representative of one closed batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub batch_id: u64,
    pub content: String,
    pub count: usize,
}

/// What an item of a rendered context window stands for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextItemKind {
    /// A raw message kept verbatim
    Message,
    /// A summary of a batch or hierarchy tier
    Summary,
    /// A summary standing for a topic cluster
    Topic,
    /// A message recalled from long-term memory
    Recalled,
    /// Text cut down to fit a token budget
    Truncated,
}

/// One entry of the context handed to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextItem {
    pub kind: ContextItemKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ContextItem {
    pub fn message(message: &Message) -> Self {
        Self {
            kind: ContextItemKind::Message,
            role: Some(message.role),
            content: message.content.clone(),
            timestamp: Some(message.timestamp),
        }
    }

    pub fn recalled(message: &Message) -> Self {
        Self {
            kind: ContextItemKind::Recalled,
            ..Self::message(message)
        }
    }

    pub fn summary(content: impl Into<String>) -> Self {
        Self {
            kind: ContextItemKind::Summary,
            role: None,
            content: content.into(),
            timestamp: None,
        }
    }

    pub fn topic(content: impl Into<String>) -> Self {
        Self {
            kind: ContextItemKind::Topic,
            ..Self::summary(content)
        }
    }

    pub fn truncated(content: impl Into<String>) -> Self {
        Self {
            kind: ContextItemKind::Truncated,
            ..Self::summary(content)
        }
    }

    /// Role-labelled line. Summaries are labelled `summary`, topics `topic`.
    pub fn render(&self) -> String {
        match (self.kind, self.role) {
            (ContextItemKind::Truncated, _) => self.content.clone(),
            (ContextItemKind::Summary, _) => format!("summary: {}", self.content),
            (ContextItemKind::Topic, _) => format!("topic: {}", self.content),
            (_, Some(role)) => format!("{}: {}", role, self.content),
            (_, None) => format!("{}: {}", Role::Unknown, self.content),
        }
    }
}

/// Context window produced by a strategy, oldest/most-compressed first
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Context {
    pub items: Vec<ContextItem>,
}

impl Context {
    pub fn new(items: Vec<ContextItem>) -> Self {
        Self { items }
    }

    pub fn from_messages<'a>(messages: impl IntoIterator<Item = &'a Message>) -> Self {
        Self {
            items: messages.into_iter().map(ContextItem::message).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Contents in order, without labels
    pub fn contents(&self) -> Vec<&str> {
        self.items.iter().map(|i| i.content.as_str()).collect()
    }

    /// Newline-joined role-labelled lines; empty string for an empty context
    pub fn render(&self) -> String {
        self.items
            .iter()
            .map(ContextItem::render)
            .collect::<Vec<_>>()
            .join("\n")
    }
}
