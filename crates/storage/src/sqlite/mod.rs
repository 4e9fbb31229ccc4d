use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use std::time::{SystemTime, UNIX_EPOCH};

use snafu::{OptionExt, ResultExt};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{FromRow, SqliteConnection, SqlitePool};

use super::error::{
    CreateSqliteDirectorySnafu, SqliteConnectOptionsSnafu, SqliteConnectSnafu, SqliteMigrateSnafu,
    SqlitePragmaSnafu, StorageResult,
};
use super::error::{InvariantViolationSnafu, NotFoundSnafu, SqliteQuerySnafu, StorageError};
use super::ids::{ConversationId, MessageId};
use super::types::{
    ConversationRecord, HistoryQuery, MessagePatch, MessageRecord, NewConversation, NewMessage,
};

const MESSAGE_COLUMNS: &str =
    "id, conversation_id, author, content, attachments_json, created_at, edited_at, deleted_at";
const EMPTY_ATTACHMENTS_JSON: &str = "[]";

#[derive(Debug, Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
    database_url: String,
}

impl SqliteStorage {
    pub async fn open(database_location: &str) -> StorageResult<Self> {
        ensure_database_directory(database_location)?;

        let database_url = normalize_database_url(database_location);
        let connect_options = SqliteConnectOptions::from_str(&database_url)
            .context(SqliteConnectOptionsSnafu {
                stage: "sqlite-open-parse-url",
                database_url: database_url.clone(),
            })?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_millis(5_000));

        // A single connection keeps in-memory databases alive and writes serialized.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(connect_options)
            .await
            .context(SqliteConnectSnafu {
                stage: "sqlite-open-connect",
                database_url: database_url.clone(),
            })?;

        sqlx::query("PRAGMA foreign_keys = ON;")
            .execute(&pool)
            .await
            .context(SqlitePragmaSnafu {
                stage: "sqlite-open-pragma-foreign-keys",
                pragma: "foreign_keys",
            })?;
        sqlx::query("PRAGMA busy_timeout = 5000;")
            .execute(&pool)
            .await
            .context(SqlitePragmaSnafu {
                stage: "sqlite-open-pragma-busy-timeout",
                pragma: "busy_timeout",
            })?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context(SqliteMigrateSnafu {
                stage: "sqlite-open-migrate",
            })?;

        tracing::debug!(database_url = %database_url, "sqlite history opened");
        Ok(Self { pool, database_url })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    pub async fn create_conversation(
        &self,
        input: NewConversation,
    ) -> StorageResult<ConversationRecord> {
        let conversation_id = ConversationId::new_v7();
        let now = unix_timestamp_millis();

        sqlx::query(
            "INSERT INTO conversations (id, title, created_at, updated_at, deleted_at) VALUES (?, ?, ?, ?, NULL)",
        )
        .bind(conversation_id.to_string())
        .bind(input.title.clone())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .context(SqliteQuerySnafu {
            stage: "conversation-create-insert",
        })?;

        let now = i64_to_u64(now, "conversation-create-now")?;
        Ok(ConversationRecord {
            id: conversation_id,
            title: input.title,
            created_at_unix_ms: now,
            updated_at_unix_ms: now,
            deleted_at_unix_ms: None,
        })
    }

    pub async fn get_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> StorageResult<Option<ConversationRecord>> {
        let row = sqlx::query_as::<_, ConversationRow>(
            "SELECT id, title, created_at, updated_at, deleted_at FROM conversations WHERE id = ?",
        )
        .bind(conversation_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context(SqliteQuerySnafu {
            stage: "conversation-get-query",
        })?;

        row.map(conversation_row_to_record).transpose()
    }

    /// Live conversations, most recently active first.
    pub async fn list_conversations(&self) -> StorageResult<Vec<ConversationRecord>> {
        let rows = sqlx::query_as::<_, ConversationRow>(
            "SELECT id, title, created_at, updated_at, deleted_at FROM conversations WHERE deleted_at IS NULL ORDER BY updated_at DESC, id DESC",
        )
        .fetch_all(&self.pool)
        .await
        .context(SqliteQuerySnafu {
            stage: "conversation-list-query",
        })?;

        rows.into_iter().map(conversation_row_to_record).collect()
    }

    pub async fn append_message(
        &self,
        conversation_id: ConversationId,
        input: NewMessage,
    ) -> StorageResult<MessageRecord> {
        let mut tx = self.pool.begin().await.context(SqliteQuerySnafu {
            stage: "message-append-begin",
        })?;
        ensure_conversation_live(&mut *tx, conversation_id, "message-append-conversation").await?;

        let message_id = MessageId::new_v7();
        let now = unix_timestamp_millis();
        let attachments_json = input
            .attachments_json
            .unwrap_or_else(|| EMPTY_ATTACHMENTS_JSON.to_string());

        sqlx::query(
            "INSERT INTO messages (id, conversation_id, author, content, attachments_json, created_at, edited_at, deleted_at) VALUES (?, ?, ?, ?, ?, ?, NULL, NULL)",
        )
        .bind(message_id.to_string())
        .bind(conversation_id.to_string())
        .bind(input.author.clone())
        .bind(input.content.clone())
        .bind(attachments_json.clone())
        .bind(now)
        .execute(&mut *tx)
        .await
        .context(SqliteQuerySnafu {
            stage: "message-append-insert",
        })?;

        sqlx::query("UPDATE conversations SET updated_at = ? WHERE id = ?")
            .bind(now)
            .bind(conversation_id.to_string())
            .execute(&mut *tx)
            .await
            .context(SqliteQuerySnafu {
                stage: "message-append-touch-conversation",
            })?;

        tx.commit().await.context(SqliteQuerySnafu {
            stage: "message-append-commit",
        })?;

        Ok(MessageRecord {
            id: message_id,
            conversation_id,
            author: input.author,
            content: input.content,
            attachments_json,
            created_at_unix_ms: i64_to_u64(now, "message-append-created-at")?,
            edited_at_unix_ms: None,
            deleted_at_unix_ms: None,
        })
    }

    pub async fn get_message(
        &self,
        conversation_id: ConversationId,
        message_id: MessageId,
    ) -> StorageResult<Option<MessageRecord>> {
        let row = sqlx::query_as::<_, MessageRow>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE conversation_id = ? AND id = ? AND deleted_at IS NULL"
        ))
        .bind(conversation_id.to_string())
        .bind(message_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context(SqliteQuerySnafu {
            stage: "message-get-query",
        })?;

        row.map(message_row_to_record).transpose()
    }

    pub async fn update_message(
        &self,
        conversation_id: ConversationId,
        message_id: MessageId,
        patch: MessagePatch,
    ) -> StorageResult<MessageRecord> {
        let now = unix_timestamp_millis();
        let update_result = sqlx::query(
            "UPDATE messages SET content = COALESCE(?, content), attachments_json = COALESCE(?, attachments_json), edited_at = ? WHERE conversation_id = ? AND id = ? AND deleted_at IS NULL",
        )
        .bind(patch.content)
        .bind(patch.attachments_json)
        .bind(now)
        .bind(conversation_id.to_string())
        .bind(message_id.to_string())
        .execute(&self.pool)
        .await
        .context(SqliteQuerySnafu {
            stage: "message-update-apply",
        })?;

        if update_result.rows_affected() == 0 {
            return NotFoundSnafu {
                stage: "message-update-missing",
                entity: "message",
                id: message_id.to_string(),
            }
            .fail();
        }

        self.get_message(conversation_id, message_id)
            .await?
            .context(NotFoundSnafu {
                stage: "message-update-load-missing",
                entity: "message",
                id: message_id.to_string(),
            })
    }

    /// Soft-deletes a message; it disappears from every page query.
    pub async fn delete_message(
        &self,
        conversation_id: ConversationId,
        message_id: MessageId,
    ) -> StorageResult<()> {
        let delete_result = sqlx::query(
            "UPDATE messages SET deleted_at = ? WHERE conversation_id = ? AND id = ? AND deleted_at IS NULL",
        )
        .bind(unix_timestamp_millis())
        .bind(conversation_id.to_string())
        .bind(message_id.to_string())
        .execute(&self.pool)
        .await
        .context(SqliteQuerySnafu {
            stage: "message-delete-apply",
        })?;

        if delete_result.rows_affected() == 0 {
            return NotFoundSnafu {
                stage: "message-delete-missing",
                entity: "message",
                id: message_id.to_string(),
            }
            .fail();
        }

        Ok(())
    }

    pub async fn count_messages(&self, conversation_id: ConversationId) -> StorageResult<u64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM messages WHERE conversation_id = ? AND deleted_at IS NULL",
        )
        .bind(conversation_id.to_string())
        .fetch_one(&self.pool)
        .await
        .context(SqliteQuerySnafu {
            stage: "message-count-query",
        })?;

        i64_to_u64(count, "message-count-value")
    }

    /// Loads one page of live messages, always ascending by id.
    pub async fn fetch_page(
        &self,
        conversation_id: ConversationId,
        query: HistoryQuery,
    ) -> StorageResult<Vec<MessageRecord>> {
        let mut connection = self.pool.acquire().await.context(SqliteQuerySnafu {
            stage: "history-page-acquire",
        })?;
        let conversation = conversation_id.to_string();

        let rows = match query {
            HistoryQuery::Latest { limit } => {
                let mut rows =
                    select_page(&mut connection, &conversation, None, PageOrder::Descending, limit)
                        .await?;
                rows.reverse();
                rows
            }
            HistoryQuery::Before { id, limit } => {
                let cursor = Cursor::Below(id.to_string());
                let mut rows = select_page(
                    &mut connection,
                    &conversation,
                    Some(cursor),
                    PageOrder::Descending,
                    limit,
                )
                .await?;
                rows.reverse();
                rows
            }
            HistoryQuery::After { id, limit } => {
                let cursor = Cursor::Above(id.to_string());
                select_page(
                    &mut connection,
                    &conversation,
                    Some(cursor),
                    PageOrder::Ascending,
                    limit,
                )
                .await?
            }
            HistoryQuery::Nearby { id, limit } => {
                let mut rows = select_page(
                    &mut connection,
                    &conversation,
                    Some(Cursor::AtOrBelow(id.to_string())),
                    PageOrder::Descending,
                    limit.div_ceil(2),
                )
                .await?;
                rows.reverse();
                let newer = select_page(
                    &mut connection,
                    &conversation,
                    Some(Cursor::Above(id.to_string())),
                    PageOrder::Ascending,
                    limit / 2,
                )
                .await?;
                rows.extend(newer);
                rows
            }
        };

        rows.into_iter().map(message_row_to_record).collect()
    }
}

#[derive(Debug, Clone, Copy)]
enum PageOrder {
    Ascending,
    Descending,
}

#[derive(Debug, Clone)]
enum Cursor {
    Below(String),
    AtOrBelow(String),
    Above(String),
}

async fn select_page(
    connection: &mut SqliteConnection,
    conversation: &str,
    cursor: Option<Cursor>,
    order: PageOrder,
    limit: usize,
) -> StorageResult<Vec<MessageRow>> {
    if limit == 0 {
        return Ok(Vec::new());
    }

    let (cursor_clause, cursor_value) = match cursor {
        None => ("", None),
        Some(Cursor::Below(id)) => (" AND id < ?", Some(id)),
        Some(Cursor::AtOrBelow(id)) => (" AND id <= ?", Some(id)),
        Some(Cursor::Above(id)) => (" AND id > ?", Some(id)),
    };
    let direction = match order {
        PageOrder::Ascending => "ASC",
        PageOrder::Descending => "DESC",
    };
    let sql = format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages WHERE conversation_id = ? AND deleted_at IS NULL{cursor_clause} ORDER BY id {direction} LIMIT ?"
    );

    let mut statement = sqlx::query_as::<_, MessageRow>(&sql).bind(conversation.to_string());
    if let Some(cursor_value) = cursor_value {
        statement = statement.bind(cursor_value);
    }

    statement
        .bind(usize_to_i64(limit, "history-page-limit")?)
        .fetch_all(&mut *connection)
        .await
        .context(SqliteQuerySnafu {
            stage: "history-page-query",
        })
}

#[derive(Debug, FromRow)]
struct ConversationRow {
    id: String,
    title: String,
    created_at: i64,
    updated_at: i64,
    deleted_at: Option<i64>,
}

#[derive(Debug, FromRow)]
struct MessageRow {
    id: String,
    conversation_id: String,
    author: String,
    content: String,
    attachments_json: String,
    created_at: i64,
    edited_at: Option<i64>,
    deleted_at: Option<i64>,
}

fn conversation_row_to_record(row: ConversationRow) -> StorageResult<ConversationRecord> {
    Ok(ConversationRecord {
        id: ConversationId::parse(&row.id)?,
        title: row.title,
        created_at_unix_ms: i64_to_u64(row.created_at, "conversation-row-created-at")?,
        updated_at_unix_ms: i64_to_u64(row.updated_at, "conversation-row-updated-at")?,
        deleted_at_unix_ms: row
            .deleted_at
            .map(|value| i64_to_u64(value, "conversation-row-deleted-at"))
            .transpose()?,
    })
}

fn message_row_to_record(row: MessageRow) -> StorageResult<MessageRecord> {
    Ok(MessageRecord {
        id: MessageId::parse(&row.id)?,
        conversation_id: ConversationId::parse(&row.conversation_id)?,
        author: row.author,
        content: row.content,
        attachments_json: row.attachments_json,
        created_at_unix_ms: i64_to_u64(row.created_at, "message-row-created-at")?,
        edited_at_unix_ms: row
            .edited_at
            .map(|value| i64_to_u64(value, "message-row-edited-at"))
            .transpose()?,
        deleted_at_unix_ms: row
            .deleted_at
            .map(|value| i64_to_u64(value, "message-row-deleted-at"))
            .transpose()?,
    })
}

async fn ensure_conversation_live(
    connection: &mut SqliteConnection,
    conversation_id: ConversationId,
    stage: &'static str,
) -> StorageResult<()> {
    let existing = sqlx::query_scalar::<_, i64>(
        "SELECT 1 FROM conversations WHERE id = ? AND deleted_at IS NULL LIMIT 1",
    )
    .bind(conversation_id.to_string())
    .fetch_optional(&mut *connection)
    .await
    .context(SqliteQuerySnafu {
        stage: "conversation-exists-query",
    })?;

    if existing.is_none() {
        return NotFoundSnafu {
            stage,
            entity: "conversation",
            id: conversation_id.to_string(),
        }
        .fail();
    }

    Ok(())
}

fn unix_timestamp_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0_i64, |duration| {
            i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
        })
}

fn i64_to_u64(value: i64, stage: &'static str) -> StorageResult<u64> {
    value.try_into().map_err(|_| StorageError::InvariantViolation {
        stage,
        details: format!("negative sqlite integer '{value}' cannot map to u64"),
    })
}

fn usize_to_i64(value: usize, stage: &'static str) -> StorageResult<i64> {
    i64::try_from(value).ok().context(InvariantViolationSnafu {
        stage,
        details: format!("page limit '{value}' cannot map to sqlite i64"),
    })
}

fn ensure_database_directory(database_location: &str) -> StorageResult<()> {
    if database_location.starts_with("sqlite:") || database_location == ":memory:" {
        return Ok(());
    }

    let path = Path::new(database_location);
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).context(CreateSqliteDirectorySnafu {
            stage: "sqlite-open-create-directory",
            path: parent.display().to_string(),
        })?;
    }

    Ok(())
}

fn normalize_database_url(database_location: &str) -> String {
    if database_location.starts_with("sqlite:") {
        return database_location.to_string();
    }

    if database_location == ":memory:" {
        return "sqlite::memory:".to_string();
    }

    format!("sqlite://{database_location}")
}
