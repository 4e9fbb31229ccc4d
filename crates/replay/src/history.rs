use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::Value;
use snafu::{ResultExt, Snafu};
use tokio::sync::mpsc;
use zova_storage::{
    ConversationId as StoredConversationId, HistoryQuery, MessageId as StoredMessageId,
    MessagePatch as StoredMessagePatch, MessageRecord, NewConversation, NewMessage, SqliteStorage,
    StorageError,
};
use zova_timeline::error::{OfflineSnafu, RequestSnafu};
use zova_timeline::{
    Connectivity, ConversationId, FetchQuery, LiveEvent, LiveEventSource, LiveSubscription,
    Message, MessageId, MessagePatch, MessageTransport, TransportResult,
};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum HistoryError {
    #[snafu(display("local history failed on `{stage}`: {source}"))]
    Storage {
        stage: &'static str,
        source: StorageError,
    },
    #[snafu(display("attachments of message '{message_id}' are not a JSON array: {source}"))]
    Attachments {
        stage: &'static str,
        message_id: String,
        source: serde_json::Error,
    },
}

pub type HistoryResult<T> = Result<T, HistoryError>;

/// SQLite message history exposed as a timeline transport and live-event source.
///
/// Writes made through [`LocalHistory::post`], [`LocalHistory::edit`] and
/// [`LocalHistory::delete`] are fanned out to every open subscription of the
/// conversation they touch.
pub struct LocalHistory {
    storage: SqliteStorage,
    connectivity: Mutex<Connectivity>,
    subscribers: Mutex<Vec<(ConversationId, mpsc::UnboundedSender<LiveEvent>)>>,
}

impl LocalHistory {
    pub fn new(storage: SqliteStorage) -> Self {
        Self {
            storage,
            connectivity: Mutex::new(Connectivity::Online),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn storage(&self) -> &SqliteStorage {
        &self.storage
    }

    pub fn set_connectivity(&self, connectivity: Connectivity) {
        *self.connectivity.lock() = connectivity;
    }

    pub async fn create_conversation(&self, title: &str) -> HistoryResult<ConversationId> {
        let record = self
            .storage
            .create_conversation(NewConversation {
                title: title.to_string(),
            })
            .await
            .context(StorageSnafu {
                stage: "history-create-conversation",
            })?;
        Ok(ConversationId::from(record.id.to_string()))
    }

    pub async fn post(
        &self,
        conversation: &ConversationId,
        author: &str,
        content: &str,
    ) -> HistoryResult<Message> {
        let stored_conversation = stored_conversation_id(conversation)?;
        let record = self
            .storage
            .append_message(stored_conversation, NewMessage::text(author, content))
            .await
            .context(StorageSnafu {
                stage: "history-post-append",
            })?;
        let message = message_from_record(record)?;

        self.publish(LiveEvent::MessageCreated(message.clone()));
        Ok(message)
    }

    pub async fn edit(
        &self,
        conversation: &ConversationId,
        id: &MessageId,
        content: &str,
    ) -> HistoryResult<Message> {
        let stored_conversation = stored_conversation_id(conversation)?;
        let record = self
            .storage
            .update_message(
                stored_conversation,
                stored_message_id(id)?,
                StoredMessagePatch {
                    content: Some(content.to_string()),
                    attachments_json: None,
                },
            )
            .await
            .context(StorageSnafu {
                stage: "history-edit-update",
            })?;
        let message = message_from_record(record)?;

        self.publish(LiveEvent::MessageUpdated {
            conversation_id: conversation.clone(),
            id: id.clone(),
            patch: MessagePatch {
                content: Some(message.content.clone()),
                edited_at_unix_ms: message.edited_at_unix_ms,
                attachments: None,
            },
        });
        Ok(message)
    }

    pub async fn delete(&self, conversation: &ConversationId, id: &MessageId) -> HistoryResult<()> {
        self.storage
            .delete_message(stored_conversation_id(conversation)?, stored_message_id(id)?)
            .await
            .context(StorageSnafu {
                stage: "history-delete",
            })?;

        self.publish(LiveEvent::MessageDeleted {
            conversation_id: conversation.clone(),
            id: id.clone(),
        });
        Ok(())
    }

    /// Number of subscriptions still open, across all conversations.
    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|(_, events)| !events.is_closed());
        subscribers.len()
    }

    async fn load_page(
        &self,
        conversation: &ConversationId,
        query: &FetchQuery,
    ) -> HistoryResult<Vec<Message>> {
        let records = self
            .storage
            .fetch_page(stored_conversation_id(conversation)?, history_query(query)?)
            .await
            .context(StorageSnafu {
                stage: "history-fetch-page",
            })?;
        records.into_iter().map(message_from_record).collect()
    }

    fn publish(&self, event: LiveEvent) -> usize {
        let mut delivered = 0;
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|(conversation, events)| {
            if conversation != event.conversation_id() {
                return !events.is_closed();
            }
            let sent = events.send(event.clone()).is_ok();
            delivered += usize::from(sent);
            sent
        });
        tracing::debug!(
            conversation = %event.conversation_id(),
            delivered,
            "published live event"
        );
        delivered
    }
}

impl MessageTransport for LocalHistory {
    fn connectivity(&self) -> Connectivity {
        *self.connectivity.lock()
    }

    fn fetch_messages(
        &self,
        conversation: ConversationId,
        query: FetchQuery,
    ) -> BoxFuture<'_, TransportResult<Vec<Message>>> {
        async move {
            if !self.connectivity().can_fetch() {
                return OfflineSnafu {
                    stage: "local-history-fetch",
                }
                .fail();
            }

            self.load_page(&conversation, &query).await.map_err(|error| {
                RequestSnafu {
                    stage: "local-history-fetch",
                    conversation: conversation.clone(),
                    details: error.to_string(),
                }
                .build()
            })
        }
        .boxed()
    }
}

impl LiveEventSource for LocalHistory {
    fn subscribe(&self, conversation: &ConversationId) -> LiveSubscription {
        let (events, subscription) = LiveSubscription::channel(conversation.clone());
        self.subscribers.lock().push((conversation.clone(), events));
        subscription
    }
}

fn stored_conversation_id(id: &ConversationId) -> HistoryResult<StoredConversationId> {
    StoredConversationId::parse(id.as_str()).context(StorageSnafu {
        stage: "history-parse-conversation-id",
    })
}

fn stored_message_id(id: &MessageId) -> HistoryResult<StoredMessageId> {
    StoredMessageId::parse(id.as_str()).context(StorageSnafu {
        stage: "history-parse-message-id",
    })
}

fn history_query(query: &FetchQuery) -> HistoryResult<HistoryQuery> {
    let limit = query.limit;
    let history_query = if let Some(id) = &query.nearby {
        HistoryQuery::Nearby {
            id: stored_message_id(id)?,
            limit,
        }
    } else if let Some(id) = &query.before {
        HistoryQuery::Before {
            id: stored_message_id(id)?,
            limit,
        }
    } else if let Some(id) = &query.after {
        HistoryQuery::After {
            id: stored_message_id(id)?,
            limit,
        }
    } else {
        HistoryQuery::Latest { limit }
    };
    Ok(history_query)
}

fn message_from_record(record: MessageRecord) -> HistoryResult<Message> {
    let attachments = serde_json::from_str::<Vec<Value>>(&record.attachments_json).context(
        AttachmentsSnafu {
            stage: "history-decode-attachments",
            message_id: record.id.to_string(),
        },
    )?;

    let mut message = Message::new(
        record.id.to_string(),
        record.conversation_id.to_string(),
        record.author,
        record.content,
    )
    .with_attachments(attachments);
    message.edited_at_unix_ms = record.edited_at_unix_ms;
    Ok(message)
}
