use serde_json::Value;

use crate::ids::{ConversationId, MessageId};

/// One chat message as delivered by the transport.
///
/// The timeline only relies on `id` (ordering and identity) and `conversation_id`;
/// everything else is carried through for the view layer.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub author: String,
    pub content: String,
    pub edited_at_unix_ms: Option<u64>,
    /// Attachments and embeds, opaque to the timeline.
    pub attachments: Vec<Value>,
}

impl Message {
    pub fn new(
        id: impl Into<MessageId>,
        conversation_id: impl Into<ConversationId>,
        author: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            conversation_id: conversation_id.into(),
            author: author.into(),
            content: content.into(),
            edited_at_unix_ms: None,
            attachments: Vec::new(),
        }
    }

    pub fn with_attachments(mut self, attachments: Vec<Value>) -> Self {
        self.attachments = attachments;
        self
    }
}

/// Partial update pushed by `message-updated` events.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MessagePatch {
    pub content: Option<String>,
    pub edited_at_unix_ms: Option<u64>,
    pub attachments: Option<Vec<Value>>,
}

impl MessagePatch {
    pub fn content(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }

    pub fn with_edited_at(mut self, edited_at_unix_ms: u64) -> Self {
        self.edited_at_unix_ms = Some(edited_at_unix_ms);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_none() && self.edited_at_unix_ms.is_none() && self.attachments.is_none()
    }

    /// Overwrites the fields present in the patch; identity fields are never touched.
    pub fn apply(&self, message: &mut Message) {
        if let Some(content) = &self.content {
            message.content.clone_from(content);
        }
        if let Some(edited_at) = self.edited_at_unix_ms {
            message.edited_at_unix_ms = Some(edited_at);
        }
        if let Some(attachments) = &self.attachments {
            message.attachments.clone_from(attachments);
        }
    }
}
