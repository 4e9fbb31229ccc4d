use tempfile::TempDir;
use zova_storage::{
    ConversationId, HistoryQuery, MessageId, MessagePatch, MessageRecord, NewConversation,
    NewMessage, SqliteStorage, StorageError,
};

async fn open_temp() -> (TempDir, SqliteStorage) {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("nested").join("history.sqlite3");
    let storage = SqliteStorage::open(path.to_str().expect("utf-8 path"))
        .await
        .expect("open storage");
    (dir, storage)
}

async fn seed(storage: &SqliteStorage, count: usize) -> (ConversationId, Vec<MessageId>) {
    let conversation = storage
        .create_conversation(NewConversation::default())
        .await
        .expect("create conversation");
    let mut ids = Vec::with_capacity(count);
    for index in 0..count {
        let record = storage
            .append_message(
                conversation.id,
                NewMessage::text("seed", format!("message {index}")),
            )
            .await
            .expect("append");
        ids.push(record.id);
    }
    (conversation.id, ids)
}

fn page_ids(page: &[MessageRecord]) -> Vec<MessageId> {
    page.iter().map(|record| record.id).collect()
}

#[tokio::test]
async fn open_creates_parent_directories_and_runs_migrations() {
    let (dir, storage) = open_temp().await;

    assert!(dir.path().join("nested").join("history.sqlite3").exists());
    assert!(storage.list_conversations().await.expect("list").is_empty());
}

#[tokio::test]
async fn pages_come_back_ascending_around_their_cursor() {
    let (_dir, storage) = open_temp().await;
    let (conversation, ids) = seed(&storage, 10).await;

    let latest = storage
        .fetch_page(conversation, HistoryQuery::Latest { limit: 4 })
        .await
        .expect("latest");
    assert_eq!(page_ids(&latest), ids[6..].to_vec());

    let before = storage
        .fetch_page(
            conversation,
            HistoryQuery::Before {
                id: ids[6],
                limit: 4,
            },
        )
        .await
        .expect("before");
    assert_eq!(page_ids(&before), ids[2..6].to_vec());

    let after = storage
        .fetch_page(
            conversation,
            HistoryQuery::After {
                id: ids[1],
                limit: 3,
            },
        )
        .await
        .expect("after");
    assert_eq!(page_ids(&after), ids[2..5].to_vec());
}

#[tokio::test]
async fn nearby_splits_the_limit_around_the_anchor() {
    let (_dir, storage) = open_temp().await;
    let (conversation, ids) = seed(&storage, 10).await;

    let nearby = storage
        .fetch_page(
            conversation,
            HistoryQuery::Nearby {
                id: ids[5],
                limit: 5,
            },
        )
        .await
        .expect("nearby");

    // ceil(5 / 2) at or before the anchor, floor(5 / 2) after it.
    assert_eq!(page_ids(&nearby), ids[3..8].to_vec());
}

#[tokio::test]
async fn soft_deleted_messages_leave_every_page() {
    let (_dir, storage) = open_temp().await;
    let (conversation, ids) = seed(&storage, 3).await;

    storage
        .delete_message(conversation, ids[1])
        .await
        .expect("delete");

    let latest = storage
        .fetch_page(conversation, HistoryQuery::Latest { limit: 10 })
        .await
        .expect("latest");
    assert_eq!(page_ids(&latest), vec![ids[0], ids[2]]);
    assert_eq!(storage.count_messages(conversation).await.expect("count"), 2);
    assert!(
        storage
            .get_message(conversation, ids[1])
            .await
            .expect("get")
            .is_none()
    );

    let again = storage.delete_message(conversation, ids[1]).await;
    assert!(matches!(again, Err(StorageError::NotFound { .. })));
}

#[tokio::test]
async fn update_patches_content_and_stamps_the_edit() {
    let (_dir, storage) = open_temp().await;
    let (conversation, ids) = seed(&storage, 1).await;

    let updated = storage
        .update_message(
            conversation,
            ids[0],
            MessagePatch {
                content: Some("edited".to_string()),
                attachments_json: None,
            },
        )
        .await
        .expect("update");

    assert_eq!(updated.content, "edited");
    assert_eq!(updated.attachments_json, "[]");
    assert!(updated.edited_at_unix_ms.is_some());
}

#[tokio::test]
async fn messages_are_scoped_to_their_conversation() {
    let (_dir, storage) = open_temp().await;
    let (first, first_ids) = seed(&storage, 2).await;
    let (second, _) = seed(&storage, 2).await;

    let foreign = storage
        .update_message(second, first_ids[0], MessagePatch::default())
        .await;
    assert!(matches!(
        foreign,
        Err(StorageError::NotFound {
            entity: "message",
            ..
        })
    ));

    let missing = storage
        .append_message(ConversationId::new_v7(), NewMessage::text("ghost", "boo"))
        .await;
    assert!(matches!(
        missing,
        Err(StorageError::NotFound {
            entity: "conversation",
            ..
        })
    ));

    let page = storage
        .fetch_page(first, HistoryQuery::Latest { limit: 10 })
        .await
        .expect("latest");
    assert!(page.iter().all(|record| record.conversation_id == first));
}

#[tokio::test]
async fn conversations_are_looked_up_by_id() {
    let (_dir, storage) = open_temp().await;
    let created = storage
        .create_conversation(NewConversation {
            title: "release notes".to_owned(),
        })
        .await
        .expect("create conversation");

    let found = storage
        .get_conversation(created.id)
        .await
        .expect("get conversation")
        .expect("conversation exists");
    assert_eq!(found.id, created.id);
    assert_eq!(found.title, "release notes");
    assert!(found.deleted_at_unix_ms.is_none());

    let missing = storage
        .get_conversation(ConversationId::new_v7())
        .await
        .expect("get missing conversation");
    assert!(missing.is_none());
}
