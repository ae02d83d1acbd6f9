//! Conversation entry and prompt sequence domain types.
//!
//! These are the value objects that flow through one generation request:
//! the history store yields entries, the window builder turns them into a
//! [`PromptSequence`], and the completion backend renders that sequence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions (persona, rules)
    System,
    /// A chat participant
    User,
    /// The assistant itself
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(Self::System),
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            other => Err(format!("unknown role '{other}'")),
        }
    }
}

/// How history is grouped into units when fitting the context window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowUnit {
    /// Every entry is its own unit.
    #[default]
    Entry,
    /// A user turn and the assistant reply right after it form one unit.
    Exchange,
}

/// A single turn in a group conversation.
///
/// Entries that have not been persisted yet carry `id == 0`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationEntry {
    /// Store-assigned identifier (0 until saved)
    pub id: i64,

    /// Who produced this turn
    pub role: Role,

    /// The text content
    pub content: String,

    /// When the turn was sent
    pub timestamp: DateTime<Utc>,

    /// Platform id of the speaker (the bot's own id for assistant turns)
    pub speaker_id: i64,
}

impl ConversationEntry {
    pub fn new(
        id: i64,
        role: Role,
        content: impl Into<String>,
        timestamp: DateTime<Utc>,
        speaker_id: i64,
    ) -> Self {
        Self {
            id,
            role,
            content: content.into(),
            timestamp,
            speaker_id,
        }
    }

    /// System instructions stamped with the given time.
    pub fn system(content: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self::new(0, Role::System, content, timestamp, 0)
    }

    /// An unsaved user turn sent now.
    pub fn user(speaker_id: i64, content: impl Into<String>) -> Self {
        Self::new(0, Role::User, content, Utc::now(), speaker_id)
    }

    /// An unsaved assistant turn sent now.
    pub fn assistant(speaker_id: i64, content: impl Into<String>) -> Self {
        Self::new(0, Role::Assistant, content, Utc::now(), speaker_id)
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.id = id;
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Persisted, attributed, timestamped, and carrying non-blank text.
    pub fn is_well_formed(&self) -> bool {
        self.id > 0
            && self.speaker_id > 0
            && self.timestamp != DateTime::<Utc>::UNIX_EPOCH
            && !self.content.trim().is_empty()
    }

    /// Speaker label used when framing the turn for the model, e.g. `user:42`.
    pub fn speaker_tag(&self) -> String {
        format!("{}:{}", self.role, self.speaker_id)
    }
}

/// The ordered, budget-checked turns sent to the completion backend.
///
/// Layout: the system entry first, accepted history oldest to newest, the
/// current message last.
#[derive(Debug, Clone, Serialize)]
pub struct PromptSequence {
    entries: Vec<ConversationEntry>,
    estimated_tokens: usize,
    budget: usize,
    history_units: usize,
    dropped_units: usize,
}

impl PromptSequence {
    /// Assemble a sequence from already-ordered entries and the accounting
    /// the builder computed for them.
    pub fn from_parts(
        entries: Vec<ConversationEntry>,
        estimated_tokens: usize,
        budget: usize,
        history_units: usize,
        dropped_units: usize,
    ) -> Self {
        Self {
            entries,
            estimated_tokens,
            budget,
            history_units,
            dropped_units,
        }
    }

    pub fn entries(&self) -> &[ConversationEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<ConversationEntry> {
        self.entries
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ConversationEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The leading system entry, if any.
    pub fn system(&self) -> Option<&ConversationEntry> {
        self.entries.first().filter(|e| e.role == Role::System)
    }

    /// The message being answered.
    pub fn current(&self) -> Option<&ConversationEntry> {
        self.entries.last()
    }

    /// Accepted history between the system entry and the current message.
    pub fn history(&self) -> &[ConversationEntry] {
        let start = usize::from(self.system().is_some());
        let end = self.entries.len().saturating_sub(1).max(start);
        &self.entries[start..end]
    }

    /// Estimated cost of the whole sequence in token-equivalents.
    pub fn estimated_tokens(&self) -> usize {
        self.estimated_tokens
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    /// True when the system prompt and current message alone exceed the budget.
    pub fn is_over_budget(&self) -> bool {
        self.estimated_tokens > self.budget
    }

    /// Number of history units (entries or exchanges) included.
    pub fn history_units(&self) -> usize {
        self.history_units
    }

    /// Number of well-formed history units left out for lack of budget.
    pub fn dropped_units(&self) -> usize {
        self.dropped_units
    }
}

impl<'a> IntoIterator for &'a PromptSequence {
    type Item = &'a ConversationEntry;
    type IntoIter = std::slice::Iter<'a, ConversationEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
