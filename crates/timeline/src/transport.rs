use futures::future::BoxFuture;
use tokio::sync::mpsc;

use crate::error::TransportResult;
use crate::ids::{ConversationId, MessageId};
use crate::message::{Message, MessagePatch};

/// Client connection state as reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Connectivity {
    Online,
    Offline,
    Connecting,
}

impl Connectivity {
    pub fn can_fetch(self) -> bool {
        matches!(self, Self::Online)
    }
}

/// Page selector for `fetch_messages`. At most one of the anchors is expected to be set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchQuery {
    pub before: Option<MessageId>,
    pub after: Option<MessageId>,
    pub nearby: Option<MessageId>,
    pub limit: usize,
}

impl FetchQuery {
    /// Newest `limit` messages of the conversation.
    pub fn latest(limit: usize) -> Self {
        Self {
            before: None,
            after: None,
            nearby: None,
            limit,
        }
    }

    pub fn before(id: MessageId, limit: usize) -> Self {
        Self {
            before: Some(id),
            ..Self::latest(limit)
        }
    }

    pub fn after(id: MessageId, limit: usize) -> Self {
        Self {
            after: Some(id),
            ..Self::latest(limit)
        }
    }

    pub fn nearby(id: MessageId, limit: usize) -> Self {
        Self {
            nearby: Some(id),
            ..Self::latest(limit)
        }
    }
}

/// Read path of the remote API client.
///
/// Pages may come back in any order; the timeline sorts and de-duplicates them.
pub trait MessageTransport: Send + Sync {
    fn connectivity(&self) -> Connectivity;

    fn fetch_messages(
        &self,
        conversation: ConversationId,
        query: FetchQuery,
    ) -> BoxFuture<'_, TransportResult<Vec<Message>>>;
}

/// Conversation-scoped push event from the realtime connection.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveEvent {
    MessageCreated(Message),
    MessageUpdated {
        conversation_id: ConversationId,
        id: MessageId,
        patch: MessagePatch,
    },
    MessageDeleted {
        conversation_id: ConversationId,
        id: MessageId,
    },
}

impl LiveEvent {
    pub fn conversation_id(&self) -> &ConversationId {
        match self {
            Self::MessageCreated(message) => &message.conversation_id,
            Self::MessageUpdated {
                conversation_id, ..
            }
            | Self::MessageDeleted {
                conversation_id, ..
            } => conversation_id,
        }
    }
}

/// Receiving half of one live-event subscription. Dropping it unsubscribes.
pub struct LiveSubscription {
    conversation: ConversationId,
    events: mpsc::UnboundedReceiver<LiveEvent>,
}

impl LiveSubscription {
    pub fn new(conversation: ConversationId, events: mpsc::UnboundedReceiver<LiveEvent>) -> Self {
        Self {
            conversation,
            events,
        }
    }

    /// Creates a subscription together with the sender a source keeps for it.
    pub fn channel(conversation: ConversationId) -> (mpsc::UnboundedSender<LiveEvent>, Self) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        (event_tx, Self::new(conversation, event_rx))
    }

    pub fn conversation(&self) -> &ConversationId {
        &self.conversation
    }

    pub async fn recv(&mut self) -> Option<LiveEvent> {
        self.events.recv().await
    }

    pub fn try_recv(&mut self) -> Option<LiveEvent> {
        self.events.try_recv().ok()
    }
}

pub trait LiveEventSource: Send + Sync {
    fn subscribe(&self, conversation: &ConversationId) -> LiveSubscription;
}
