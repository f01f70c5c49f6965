//! Conversation and message models mirrored from Intercom.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::mirror::core::errors::{MirrorError, MirrorResult};

/// Base of the Intercom inbox links.
const INBOX_BASE_URL: &str = "https://app.intercom.com/a/inbox";

/// Who wrote a message.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorType {
    /// End customer (Intercom `user`/`lead`).
    Customer,
    /// Support side (Intercom `admin`/`bot`/`team`).
    Agent,
}

impl AuthorType {
    /// Stable string form for storage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Customer => "customer",
            Self::Agent => "agent",
        }
    }
}

impl fmt::Display for AuthorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AuthorType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "customer" | "user" | "lead" | "contact" => Ok(Self::Customer),
            "agent" | "admin" | "bot" | "team" => Ok(Self::Agent),
            _ => Err(value.to_string()),
        }
    }
}

/// Kind of conversation part a message came from.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartKind {
    /// Public reply.
    Comment,
    /// Internal note.
    Note,
    /// Opening message.
    Message,
}

impl PartKind {
    /// Stable string form for storage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Comment => "comment",
            Self::Note => "note",
            Self::Message => "message",
        }
    }
}

impl fmt::Display for PartKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PartKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "comment" => Ok(Self::Comment),
            "note" => Ok(Self::Note),
            "message" => Ok(Self::Message),
            _ => Err(value.to_string()),
        }
    }
}

/// A single message inside a conversation.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Intercom part id, unique within the conversation.
    pub id: String,
    /// Author side.
    pub author_type: AuthorType,
    /// Message body.
    pub body: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Part kind, when Intercom reports one.
    pub part_kind: Option<PartKind>,
}

impl Message {
    /// Build a message without a part kind.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        author_type: AuthorType,
        body: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            author_type,
            body: body.into(),
            created_at,
            part_kind: None,
        }
    }

    /// Attach a part kind.
    #[must_use]
    pub const fn with_part_kind(mut self, kind: PartKind) -> Self {
        self.part_kind = Some(kind);
        self
    }
}

/// A conversation with its ordered messages.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    /// Intercom conversation id.
    pub id: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
    /// Customer email, if known.
    pub customer_email: Option<String>,
    /// Tags; order is not significant.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Messages in insertion order.
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl Conversation {
    /// Build an empty conversation.
    #[must_use]
    pub fn new(id: impl Into<String>, created_at: DateTime<Utc>, updated_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            created_at,
            updated_at,
            customer_email: None,
            tags: Vec::new(),
            messages: Vec::new(),
        }
    }

    /// Set the customer email.
    #[must_use]
    pub fn with_customer_email(mut self, email: impl Into<String>) -> Self {
        self.customer_email = Some(email.into());
        self
    }

    /// Set the tags.
    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Append a message.
    #[must_use]
    pub fn with_message(mut self, message: Message) -> Self {
        self.messages.push(message);
        self
    }

    /// Check that the conversation can be stored.
    ///
    /// # Errors
    /// Returns an error for an empty id or repeated message ids.
    pub fn validate(&self) -> MirrorResult<()> {
        if self.id.trim().is_empty() {
            return Err(MirrorError::InvalidRecord(
                "conversation id must not be empty".to_string(),
            ));
        }

        let mut seen = HashSet::with_capacity(self.messages.len());
        for message in &self.messages {
            if !seen.insert(message.id.as_str()) {
                return Err(MirrorError::InvalidRecord(format!(
                    "conversation {} repeats message id {}",
                    self.id, message.id
                )));
            }
        }

        Ok(())
    }

    /// Messages written by the customer.
    pub fn customer_messages(&self) -> impl Iterator<Item = &Message> {
        self.messages
            .iter()
            .filter(|msg| msg.author_type == AuthorType::Customer)
    }

    /// Messages written by the support side.
    pub fn agent_messages(&self) -> impl Iterator<Item = &Message> {
        self.messages
            .iter()
            .filter(|msg| msg.author_type == AuthorType::Agent)
    }

    /// Inbox link for this conversation, searching by customer email when known.
    ///
    /// # Errors
    /// Returns an error if the resulting URL does not parse.
    pub fn inbox_url(&self, app_id: &str) -> Result<Url, url::ParseError> {
        let mut url = Url::parse(&format!(
            "{INBOX_BASE_URL}/{app_id}/inbox/search/conversation/{}",
            self.id
        ))?;
        if let Some(email) = &self.customer_email {
            url.query_pairs_mut().append_pair("query", email);
        }
        Ok(url)
    }
}
