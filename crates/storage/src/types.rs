use super::ids::{ConversationId, MessageId};

pub const DEFAULT_CONVERSATION_TITLE: &str = "New Conversation";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationRecord {
    pub id: ConversationId,
    pub title: String,
    pub created_at_unix_ms: u64,
    pub updated_at_unix_ms: u64,
    pub deleted_at_unix_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewConversation {
    pub title: String,
}

impl Default for NewConversation {
    fn default() -> Self {
        Self {
            title: DEFAULT_CONVERSATION_TITLE.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub author: String,
    pub content: String,
    /// JSON array of attachments; the storage layer never looks inside.
    pub attachments_json: String,
    pub created_at_unix_ms: u64,
    pub edited_at_unix_ms: Option<u64>,
    pub deleted_at_unix_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub author: String,
    pub content: String,
    pub attachments_json: Option<String>,
}

impl NewMessage {
    pub fn text(author: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            author: author.into(),
            content: content.into(),
            attachments_json: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MessagePatch {
    pub content: Option<String>,
    pub attachments_json: Option<String>,
}

/// Page selector for [`crate::SqliteStorage::fetch_page`].
///
/// `Before` / `After` are exclusive of the cursor. `Nearby` returns up to
/// `ceil(limit / 2)` messages at or before the anchor and `floor(limit / 2)` after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryQuery {
    Latest { limit: usize },
    Before { id: MessageId, limit: usize },
    After { id: MessageId, limit: usize },
    Nearby { id: MessageId, limit: usize },
}

impl HistoryQuery {
    pub fn limit(&self) -> usize {
        match self {
            Self::Latest { limit }
            | Self::Before { limit, .. }
            | Self::After { limit, .. }
            | Self::Nearby { limit, .. } => *limit,
        }
    }
}
