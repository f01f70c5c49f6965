//! Status aggregator: counts, database size and recent sync activity.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::mirror::core::errors::MirrorResult;
use crate::mirror::core::sync::SyncPeriod;
use crate::mirror::storage::pool::SqlitePool;
use crate::mirror::storage::schema::{count_from_sql, count_to_sql, millis_to_datetime};
use crate::mirror::storage::sync_tracker::{RECENT_PERIODS, RawPeriod, read_period};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Snapshot of the mirror.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MirrorStatus {
    /// Stored conversations.
    pub total_conversations: u64,
    /// Stored messages across all conversations.
    pub total_messages: u64,
    /// Merged sync periods.
    pub total_sync_periods: u64,
    /// Database size in bytes (`page_count * page_size`).
    pub database_size_bytes: u64,
    /// Database size in megabytes, two decimals.
    pub database_size_mb: f64,
    /// Database file location.
    pub database_path: PathBuf,
    /// Most recent completed sync.
    pub last_sync: Option<DateTime<Utc>>,
    /// Most recently synced periods, newest first.
    pub recent_syncs: Vec<SyncPeriod>,
}

/// Builds [`MirrorStatus`] snapshots.
pub struct StatusReporter {
    pool: Arc<SqlitePool>,
}

/// Raw values read in one transaction on one connection.
#[derive(Debug)]
struct Snapshot {
    conversations: i64,
    messages: i64,
    periods: i64,
    page_count: i64,
    page_size: i64,
    last_sync: Option<i64>,
    recent: Vec<RawPeriod>,
}

fn read_snapshot(conn: &mut rusqlite::Connection, recent: i64) -> rusqlite::Result<Snapshot> {
    let tx = conn.transaction()?;
    let snapshot = {
        let count = |sql: &str| tx.query_row(sql, [], |row| row.get::<_, i64>(0));
        let mut stmt = tx.prepare_cached(RECENT_PERIODS)?;
        let recent = stmt
            .query_map(rusqlite::params![recent], read_period)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Snapshot {
            conversations: count("SELECT COUNT(*) FROM conversations")?,
            messages: count("SELECT COUNT(*) FROM messages")?,
            periods: count("SELECT COUNT(*) FROM sync_periods")?,
            page_count: count("PRAGMA page_count")?,
            page_size: count("PRAGMA page_size")?,
            last_sync: tx.query_row("SELECT MAX(last_synced) FROM sync_periods", [], |row| row.get(0))?,
            recent,
        }
    };
    tx.finish()?;
    Ok(snapshot)
}

impl StatusReporter {
    /// Create a reporter over the shared pool.
    #[must_use]
    pub const fn new(pool: Arc<SqlitePool>) -> Self {
        Self { pool }
    }

    /// Aggregate the current status with the `recent` newest periods.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    pub async fn status(&self, recent: usize) -> MirrorResult<MirrorStatus> {
        let recent = count_to_sql(u64::try_from(recent).unwrap_or(u64::MAX))?;
        let snapshot = {
            let conn = self.pool.acquire().await?;
            conn.call(move |conn| Ok(read_snapshot(conn, recent)?)).await?
        };

        let database_size_bytes =
            count_from_sql(snapshot.page_count.saturating_mul(snapshot.page_size))?;
        let recent_syncs = snapshot
            .recent
            .into_iter()
            .map(RawPeriod::into_period)
            .collect::<MirrorResult<Vec<_>>>()?;

        Ok(MirrorStatus {
            total_conversations: count_from_sql(snapshot.conversations)?,
            total_messages: count_from_sql(snapshot.messages)?,
            total_sync_periods: count_from_sql(snapshot.periods)?,
            database_size_bytes,
            database_size_mb: size_in_mb(database_size_bytes),
            database_path: self.pool.path().to_path_buf(),
            last_sync: snapshot.last_sync.map(millis_to_datetime).transpose()?,
            recent_syncs,
        })
    }
}

#[allow(clippy::cast_precision_loss)]
fn size_in_mb(bytes: u64) -> f64 {
    (bytes as f64 / BYTES_PER_MB * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::TimeZone;

    use super::*;
    use crate::mirror::core::config::SyncConfig;
    use crate::mirror::core::conversation::{AuthorType, Conversation, Message};
    use crate::mirror::core::sync::SyncStats;
    use crate::mirror::storage::conversation_store::{ConversationStore, SqliteConversationStore};
    use crate::mirror::storage::schema::{apply_schema, prepare_connection};
    use crate::mirror::storage::sync_tracker::{SqliteSyncTracker, SyncTracker};

    async fn setup() -> (tempfile::TempDir, Arc<SqlitePool>, Arc<SqliteSyncTracker>) {
        let dir = tempfile::tempdir().unwrap();
        let pool = Arc::new(
            SqlitePool::open(dir.path().join("data.db"), 2, Duration::from_secs(5))
                .await
                .unwrap(),
        );
        let tracker = Arc::new(SqliteSyncTracker::new(Arc::clone(&pool), &SyncConfig::default()));
        (dir, pool, tracker)
    }

    #[test]
    fn test_size_rounds_to_two_decimals() {
        assert!((size_in_mb(0) - 0.0).abs() < f64::EPSILON);
        assert!((size_in_mb(1024 * 1024) - 1.0).abs() < f64::EPSILON);
        assert!((size_in_mb(1_500_000) - 1.43).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_empty_store_reports_zeros() {
        let (_dir, pool, _tracker) = setup().await;
        let reporter = StatusReporter::new(Arc::clone(&pool));
        let status = reporter.status(10).await.unwrap();

        assert_eq!(status.total_conversations, 0);
        assert_eq!(status.total_messages, 0);
        assert_eq!(status.total_sync_periods, 0);
        assert!(status.last_sync.is_none());
        assert!(status.recent_syncs.is_empty());
        assert!(status.database_size_bytes > 0);
        assert_eq!(status.database_path, pool.path());
    }

    #[tokio::test]
    async fn test_counts_after_activity() {
        let (_dir, pool, tracker) = setup().await;
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let store = SqliteConversationStore::new(Arc::clone(&pool));
        let conversation = Conversation::new("c1", at, at)
            .with_message(Message::new("m1", AuthorType::Customer, "hi", at))
            .with_message(Message::new("m2", AuthorType::Agent, "hello", at));
        store.store_conversations(vec![conversation]).await.unwrap();
        tracker
            .record_sync(at, at + chrono::Duration::days(1), SyncStats::default())
            .await
            .unwrap();
        tracker
            .record_sync(
                at + chrono::Duration::days(5),
                at + chrono::Duration::days(6),
                SyncStats::default(),
            )
            .await
            .unwrap();

        let reporter = StatusReporter::new(pool);
        let status = reporter.status(1).await.unwrap();
        assert_eq!(status.total_conversations, 1);
        assert_eq!(status.total_messages, 2);
        assert_eq!(status.total_sync_periods, 2);
        assert_eq!(status.recent_syncs.len(), 1);
        assert_eq!(status.recent_syncs[0].start, at + chrono::Duration::days(5));
        assert!(status.last_sync.is_some());
    }

    #[tokio::test]
    async fn test_last_sync_matches_newest_recent_period() {
        let (_dir, pool, tracker) = setup().await;
        let at = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        for offset in [0, 3, 6] {
            tracker
                .record_sync(
                    at + chrono::Duration::days(offset),
                    at + chrono::Duration::days(offset + 1),
                    SyncStats::default(),
                )
                .await
                .unwrap();
        }

        let status = StatusReporter::new(Arc::clone(&pool)).status(2).await.unwrap();
        assert_eq!(status.recent_syncs.len(), 2);
        assert_eq!(status.last_sync, Some(status.recent_syncs[0].last_synced));
        assert_eq!(pool.available(), pool.size());
    }

    #[test]
    fn test_snapshot_reads_from_one_connection() {
        let mut conn = rusqlite::Connection::open_in_memory().unwrap();
        prepare_connection(&conn).unwrap();
        apply_schema(&conn).unwrap();
        conn.execute(
            "INSERT INTO sync_periods
                (start_ts, end_ts, last_synced, conversation_count, new_conversations, updated_conversations)
             VALUES (0, 1000, 5000, 4, 3, 1)",
            [],
        )
        .unwrap();

        let snapshot = read_snapshot(&mut conn, 10).unwrap();
        assert_eq!(snapshot.periods, 1);
        assert_eq!(snapshot.last_sync, Some(5000));
        assert_eq!(snapshot.recent.len(), 1);
        assert_eq!(snapshot.recent[0].into_period().unwrap().conversation_count, 4);
        assert!(snapshot.page_size > 0);
    }
}
