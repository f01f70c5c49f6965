//! Conversation store: idempotent upserts and point lookups.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use rusqlite::{OptionalExtension, TransactionBehavior};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::mirror::core::conversation::{AuthorType, Conversation, Message, PartKind};
use crate::mirror::core::errors::{MirrorError, MirrorResult};
use crate::mirror::storage::pool::SqlitePool;
use crate::mirror::storage::schema::millis_to_datetime;

/// Boxed future type for store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Outcome of storing one batch.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct StoreReport {
    /// Conversations committed.
    pub stored: usize,
    /// Committed conversations that did not exist before.
    pub new: usize,
    /// Committed conversations that replaced an existing row.
    pub updated: usize,
    /// Conversations rejected or rolled back.
    pub failed: usize,
    /// Messages written by committed conversations.
    pub messages: usize,
}

/// Conversation persistence.
pub trait ConversationStore: Send + Sync {
    /// Upsert a batch; each conversation commits or rolls back on its own.
    ///
    /// # Errors
    /// Returns an error only if no connection can be obtained; per-conversation
    /// failures are counted in the report.
    fn store_conversations(
        &self,
        batch: Vec<Conversation>,
    ) -> StoreFuture<'_, MirrorResult<StoreReport>>;
    /// Load one conversation with its ordered messages.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn get_conversation(&self, id: &str) -> StoreFuture<'_, MirrorResult<Option<Conversation>>>;
}

/// `SQLite` implementation of the conversation store.
pub struct SqliteConversationStore {
    pool: Arc<SqlitePool>,
}

impl SqliteConversationStore {
    /// Create a store over a shared pool.
    #[must_use]
    pub const fn new(pool: Arc<SqlitePool>) -> Self {
        Self { pool }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Upsert {
    Inserted,
    Replaced,
}

impl ConversationStore for SqliteConversationStore {
    fn store_conversations(
        &self,
        batch: Vec<Conversation>,
    ) -> StoreFuture<'_, MirrorResult<StoreReport>> {
        Box::pin(async move {
            let mut report = StoreReport::default();
            let mut valid = Vec::with_capacity(batch.len());
            for conversation in last_wins(batch) {
                match conversation.validate() {
                    Ok(()) => valid.push(conversation),
                    Err(err) => {
                        warn!(conversation_id = %conversation.id, %err, "Rejected conversation");
                        report.failed += 1;
                    }
                }
            }

            if valid.is_empty() {
                return Ok(report);
            }

            let stored_at = Utc::now().timestamp_millis();
            let conn = self.pool.acquire().await?;
            let outcomes = conn
                .call(move |conn| {
                    let outcomes = valid
                        .iter()
                        .map(|conversation| {
                            let outcome = upsert_conversation(conn, conversation, stored_at)
                                .map_err(|err| err.to_string());
                            (conversation.id.clone(), conversation.messages.len(), outcome)
                        })
                        .collect::<Vec<_>>();
                    Ok(outcomes)
                })
                .await?;

            for (id, message_count, outcome) in outcomes {
                match outcome {
                    Ok(kind) => {
                        report.stored += 1;
                        report.messages += message_count;
                        match kind {
                            Upsert::Inserted => report.new += 1,
                            Upsert::Replaced => report.updated += 1,
                        }
                    }
                    Err(reason) => {
                        warn!(conversation_id = %id, %reason, "Failed to store conversation");
                        report.failed += 1;
                    }
                }
            }

            debug!(
                stored = report.stored,
                new = report.new,
                updated = report.updated,
                failed = report.failed,
                "Stored conversation batch"
            );
            Ok(report)
        })
    }

    fn get_conversation(&self, id: &str) -> StoreFuture<'_, MirrorResult<Option<Conversation>>> {
        let id = id.to_string();
        Box::pin(async move {
            let conn = self.pool.acquire().await?;
            let raw = conn
                .call(move |conn| {
                    let raw = conn
                        .query_row(
                            &format!("{SELECT_CONVERSATION} WHERE c.id = ?1"),
                            rusqlite::params![id],
                            read_header,
                        )
                        .optional()?;
                    match raw {
                        Some(mut raw) => {
                            load_details(conn, &mut raw)?;
                            Ok(Some(raw))
                        }
                        None => Ok(None),
                    }
                })
                .await?;

            raw.map(RawConversation::into_conversation).transpose()
        })
    }
}

/// Keep the last occurrence of every id, in order of those last occurrences.
fn last_wins(batch: Vec<Conversation>) -> Vec<Conversation> {
    let mut last_index: HashMap<String, usize> = HashMap::with_capacity(batch.len());
    for (index, conversation) in batch.iter().enumerate() {
        last_index.insert(conversation.id.clone(), index);
    }
    batch
        .into_iter()
        .enumerate()
        .filter(|(index, conversation)| last_index.get(&conversation.id) == Some(index))
        .map(|(_, conversation)| conversation)
        .collect()
}

fn upsert_conversation(
    conn: &mut rusqlite::Connection,
    conversation: &Conversation,
    stored_at: i64,
) -> rusqlite::Result<Upsert> {
    let message_count = to_sql_int(conversation.messages.len())?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let existed: bool = tx.query_row(
        "SELECT EXISTS (SELECT 1 FROM conversations WHERE id = ?1)",
        rusqlite::params![conversation.id],
        |row| row.get(0),
    )?;

    tx.execute(
        "INSERT INTO conversations
            (id, created_at, updated_at, customer_email, message_count, stored_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT (id) DO UPDATE SET
            created_at = excluded.created_at,
            updated_at = excluded.updated_at,
            customer_email = excluded.customer_email,
            message_count = excluded.message_count,
            stored_at = excluded.stored_at",
        rusqlite::params![
            conversation.id,
            conversation.created_at.timestamp_millis(),
            conversation.updated_at.timestamp_millis(),
            conversation.customer_email,
            message_count,
            stored_at
        ],
    )?;
    tx.execute(
        "DELETE FROM messages WHERE conversation_id = ?1",
        rusqlite::params![conversation.id],
    )?;
    tx.execute(
        "DELETE FROM conversation_tags WHERE conversation_id = ?1",
        rusqlite::params![conversation.id],
    )?;

    {
        let mut tag_stmt = tx.prepare(
            "INSERT OR IGNORE INTO conversation_tags (conversation_id, tag) VALUES (?1, ?2)",
        )?;
        for tag in &conversation.tags {
            tag_stmt.execute(rusqlite::params![conversation.id, tag])?;
        }

        let mut message_stmt = tx.prepare(
            "INSERT INTO messages
                (conversation_id, id, position, author_type, body, created_at, part_type)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )?;
        for (position, message) in conversation.messages.iter().enumerate() {
            message_stmt.execute(rusqlite::params![
                conversation.id,
                message.id,
                to_sql_int(position)?,
                message.author_type.as_str(),
                message.body,
                message.created_at.timestamp_millis(),
                message.part_kind.map(PartKind::as_str)
            ])?;
        }
    }

    tx.commit()?;
    Ok(if existed {
        Upsert::Replaced
    } else {
        Upsert::Inserted
    })
}

fn to_sql_int(value: usize) -> rusqlite::Result<i64> {
    i64::try_from(value).map_err(|err| rusqlite::Error::ToSqlConversionFailure(Box::new(err)))
}

/// Column list shared by lookups and searches; the table alias is `c`.
pub(crate) const SELECT_CONVERSATION: &str =
    "SELECT c.id, c.created_at, c.updated_at, c.customer_email FROM conversations c";

/// Conversation as read from `SQLite`, before value conversion.
pub(crate) struct RawConversation {
    id: String,
    created_at: i64,
    updated_at: i64,
    customer_email: Option<String>,
    tags: Vec<String>,
    messages: Vec<RawMessage>,
}

struct RawMessage {
    id: String,
    author_type: String,
    body: String,
    created_at: i64,
    part_type: Option<String>,
}

/// Map a [`SELECT_CONVERSATION`] row.
pub(crate) fn read_header(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawConversation> {
    Ok(RawConversation {
        id: row.get(0)?,
        created_at: row.get(1)?,
        updated_at: row.get(2)?,
        customer_email: row.get(3)?,
        tags: Vec::new(),
        messages: Vec::new(),
    })
}

/// Load tags and ordered messages for a conversation header.
pub(crate) fn load_details(
    conn: &rusqlite::Connection,
    raw: &mut RawConversation,
) -> rusqlite::Result<()> {
    let mut tag_stmt = conn.prepare_cached(
        "SELECT tag FROM conversation_tags WHERE conversation_id = ?1 ORDER BY tag",
    )?;
    raw.tags = tag_stmt
        .query_map(rusqlite::params![raw.id], |row| row.get(0))?
        .collect::<Result<Vec<String>, rusqlite::Error>>()?;

    let mut message_stmt = conn.prepare_cached(
        "SELECT id, author_type, body, created_at, part_type
         FROM messages
         WHERE conversation_id = ?1
         ORDER BY position",
    )?;
    raw.messages = message_stmt
        .query_map(rusqlite::params![raw.id], |row| {
            Ok(RawMessage {
                id: row.get(0)?,
                author_type: row.get(1)?,
                body: row.get(2)?,
                created_at: row.get(3)?,
                part_type: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, rusqlite::Error>>()?;
    Ok(())
}

impl RawConversation {
    /// Convert stored values into a [`Conversation`].
    pub(crate) fn into_conversation(self) -> MirrorResult<Conversation> {
        let mut messages = Vec::with_capacity(self.messages.len());
        for raw in self.messages {
            let author_type = AuthorType::from_str(&raw.author_type).map_err(|err| {
                MirrorError::InvalidRecord(format!("invalid author type: {err}"))
            })?;
            let part_kind = raw
                .part_type
                .as_deref()
                .map(PartKind::from_str)
                .transpose()
                .map_err(|err| MirrorError::InvalidRecord(format!("invalid part type: {err}")))?;
            messages.push(Message {
                id: raw.id,
                author_type,
                body: raw.body,
                created_at: millis_to_datetime(raw.created_at)?,
                part_kind,
            });
        }

        Ok(Conversation {
            id: self.id,
            created_at: millis_to_datetime(self.created_at)?,
            updated_at: millis_to_datetime(self.updated_at)?,
            customer_email: self.customer_email,
            tags: self.tags,
            messages,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::{DateTime, TimeZone};

    use super::*;

    fn ts(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, hour, 0, 0).unwrap()
    }

    async fn store() -> (tempfile::TempDir, SqliteConversationStore) {
        let dir = tempfile::tempdir().unwrap();
        let pool = SqlitePool::open(dir.path().join("data.db"), 2, Duration::from_secs(5))
            .await
            .unwrap();
        (dir, SqliteConversationStore::new(Arc::new(pool)))
    }

    fn sample(id: &str, bodies: &[&str]) -> Conversation {
        let mut conv = Conversation::new(id, ts(1, 8), ts(1, 9))
            .with_customer_email("jane@example.com")
            .with_tags(["billing", "vip"]);
        for (index, body) in bodies.iter().enumerate() {
            let author = if index % 2 == 0 {
                AuthorType::Customer
            } else {
                AuthorType::Agent
            };
            let hour = u32::try_from(index).unwrap() + 8;
            conv = conv.with_message(Message::new(format!("{id}-m{index}"), author, *body, ts(1, hour)));
        }
        conv
    }

    #[tokio::test]
    async fn test_round_trip_preserves_order_and_fields() {
        let (_dir, store) = store().await;
        let mut conv = sample("conv1", &["first", "second", "third"]);
        conv.messages[1] = conv.messages[1].clone().with_part_kind(PartKind::Note);

        let report = store.store_conversations(vec![conv.clone()]).await.unwrap();
        assert_eq!(report.stored, 1);
        assert_eq!(report.new, 1);
        assert_eq!(report.messages, 3);

        let loaded = store.get_conversation("conv1").await.unwrap().unwrap();
        let mut expected = conv;
        expected.tags.sort();
        assert_eq!(loaded, expected);
    }

    #[tokio::test]
    async fn test_upsert_replaces_message_set() {
        let (_dir, store) = store().await;
        store
            .store_conversations(vec![sample("conv1", &["a", "b", "c"])])
            .await
            .unwrap();
        let mut second = sample("conv1", &["only"]);
        second.updated_at = ts(2, 0);
        second.tags = vec!["urgent".to_string()];

        let report = store.store_conversations(vec![second]).await.unwrap();
        assert_eq!(report.updated, 1);
        assert_eq!(report.new, 0);

        let loaded = store.get_conversation("conv1").await.unwrap().unwrap();
        assert_eq!(loaded.messages.len(), 1);
        assert_eq!(loaded.messages[0].body, "only");
        assert_eq!(loaded.tags, vec!["urgent".to_string()]);
        assert_eq!(loaded.updated_at, ts(2, 0));
    }

    #[tokio::test]
    async fn test_duplicate_ids_in_batch_last_wins() {
        let (_dir, store) = store().await;
        let report = store
            .store_conversations(vec![
                sample("conv1", &["old"]),
                sample("conv2", &["other"]),
                sample("conv1", &["new", "newer"]),
            ])
            .await
            .unwrap();
        assert_eq!(report.stored, 2);

        let loaded = store.get_conversation("conv1").await.unwrap().unwrap();
        let bodies: Vec<_> = loaded.messages.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, vec!["new", "newer"]);
    }

    #[tokio::test]
    async fn test_invalid_conversation_counted_not_stored() {
        let (_dir, store) = store().await;
        let mut broken = sample("conv1", &["a", "b"]);
        broken.messages[1].id = broken.messages[0].id.clone();

        let report = store
            .store_conversations(vec![broken, sample("conv2", &["fine"])])
            .await
            .unwrap();
        assert_eq!(report.stored, 1);
        assert_eq!(report.failed, 1);
        assert!(store.get_conversation("conv1").await.unwrap().is_none());
        assert!(store.get_conversation("conv2").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_missing_conversation_is_none() {
        let (_dir, store) = store().await;
        assert!(store.get_conversation("nope").await.unwrap().is_none());
        let report = store.store_conversations(Vec::new()).await.unwrap();
        assert_eq!(report, StoreReport::default());
    }
}
