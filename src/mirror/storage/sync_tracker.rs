//! Sync interval tracker.
//!
//! Every completed fetch is recorded as a closed `[start, end]` range. On
//! write, the new range absorbs every stored period it overlaps or touches,
//! so the stored set stays sorted, pairwise disjoint and non-adjacent. Reads
//! answer how much of a window is covered and how recently it was synced.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use rusqlite::TransactionBehavior;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::mirror::core::config::SyncConfig;
use crate::mirror::core::errors::{MirrorError, MirrorResult};
use crate::mirror::core::sync::{Coverage, SyncPeriod, SyncStats};
use crate::mirror::storage::conversation_store::StoreFuture;
use crate::mirror::storage::pool::SqlitePool;
use crate::mirror::storage::schema::{count_from_sql, count_to_sql, millis_to_datetime};

/// Sync period persistence and coverage queries.
pub trait SyncTracker: Send + Sync {
    /// Record a completed fetch of `[start, end]` and merge it into the stored set.
    ///
    /// # Errors
    /// Returns `InvalidFilter` for `start > end` and `StorageUnavailable` once
    /// merge retries are exhausted.
    fn record_sync(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        stats: SyncStats,
    ) -> StoreFuture<'_, MirrorResult<SyncPeriod>>;
    /// Covered fraction of `[start, end]` and the newest sync touching it.
    ///
    /// # Errors
    /// Returns `InvalidFilter` for `start > end` or a storage error.
    fn coverage(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreFuture<'_, MirrorResult<Coverage>>;
    /// All periods ordered by start.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn periods(&self) -> StoreFuture<'_, MirrorResult<Vec<SyncPeriod>>>;
    /// The `limit` most recently synced periods, newest first.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn recent_periods(&self, limit: usize) -> StoreFuture<'_, MirrorResult<Vec<SyncPeriod>>>;
    /// Time of the most recent completed sync.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn last_sync(&self) -> StoreFuture<'_, MirrorResult<Option<DateTime<Utc>>>>;
}

/// `SQLite` implementation of the sync tracker.
///
/// Merges are serialized through one in-process writer lock; readers only
/// need a pooled connection.
pub struct SqliteSyncTracker {
    pool: Arc<SqlitePool>,
    writer: Mutex<()>,
    retry_attempts: u32,
    retry_backoff: Duration,
}

impl SqliteSyncTracker {
    /// Create a tracker over a shared pool.
    #[must_use]
    pub fn new(pool: Arc<SqlitePool>, config: &SyncConfig) -> Self {
        Self {
            pool,
            writer: Mutex::new(()),
            retry_attempts: config.merge_retry_attempts.max(1),
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }

    async fn try_merge(&self, range: (i64, i64), fetched: Counts, now: i64) -> MirrorResult<RawPeriod> {
        let conn = self.pool.acquire().await?;
        let merged = conn
            .call(move |conn| Ok(merge_period(conn, range, fetched, now)?))
            .await?;
        Ok(merged)
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let base = self.retry_backoff.saturating_mul(attempt);
        let spread = u64::try_from(base.as_millis() / 2).unwrap_or(u64::MAX);
        let jitter = rand::thread_rng().gen_range(0..=spread);
        base + Duration::from_millis(jitter)
    }

    async fn query_periods(&self, sql: &'static str, limit: Option<i64>) -> MirrorResult<Vec<SyncPeriod>> {
        let conn = self.pool.acquire().await?;
        let rows = conn
            .call(move |conn| {
                let mut stmt = conn.prepare(sql)?;
                let rows = match limit {
                    Some(limit) => stmt
                        .query_map(rusqlite::params![limit], read_period)?
                        .collect::<Result<Vec<_>, rusqlite::Error>>()?,
                    None => stmt
                        .query_map([], read_period)?
                        .collect::<Result<Vec<_>, rusqlite::Error>>()?,
                };
                Ok(rows)
            })
            .await?;
        rows.into_iter().map(RawPeriod::into_period).collect()
    }
}

impl SyncTracker for SqliteSyncTracker {
    fn record_sync(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        stats: SyncStats,
    ) -> StoreFuture<'_, MirrorResult<SyncPeriod>> {
        Box::pin(async move {
            if start > end {
                return Err(MirrorError::InvalidFilter(format!(
                    "sync range start {} is after end {}",
                    start.to_rfc3339(),
                    end.to_rfc3339()
                )));
            }
            let fetched = Counts {
                conversations: count_to_sql(stats.total_conversations)?,
                new: count_to_sql(stats.new_conversations)?,
                updated: count_to_sql(stats.updated_conversations)?,
            };
            let range = (start.timestamp_millis(), end.timestamp_millis());

            let _writer = self.writer.lock().await;
            let mut attempt = 0;
            loop {
                attempt += 1;
                let now = Utc::now().timestamp_millis();
                match self.try_merge(range, fetched, now).await {
                    Ok(raw) => {
                        let period = raw.into_period()?;
                        info!(
                            start = %period.start,
                            end = %period.end,
                            conversations = period.conversation_count,
                            "Recorded sync period"
                        );
                        return Ok(period);
                    }
                    Err(err) if err.is_retryable() && attempt < self.retry_attempts => {
                        let delay = self.backoff(attempt);
                        warn!(attempt, ?delay, %err, "Sync period merge conflicted, retrying");
                        tokio::time::sleep(delay).await;
                    }
                    Err(err) if err.is_storage_failure() => {
                        return Err(MirrorError::StorageUnavailable(format!(
                            "sync period merge failed after {attempt} attempt(s): {err}"
                        )));
                    }
                    Err(err) => return Err(err),
                }
            }
        })
    }

    fn coverage(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreFuture<'_, MirrorResult<Coverage>> {
        Box::pin(async move {
            if start > end {
                return Err(MirrorError::InvalidFilter(format!(
                    "window start {} is after end {}",
                    start.to_rfc3339(),
                    end.to_rfc3339()
                )));
            }
            let (window_start, window_end) = (start.timestamp_millis(), end.timestamp_millis());

            let conn = self.pool.acquire().await?;
            let rows = conn
                .call(move |conn| Ok(select_touching(conn, window_start, window_end)?))
                .await?;

            let intervals: Vec<(i64, i64)> = rows.iter().map(|row| (row.start, row.end)).collect();
            let most_recent_sync = rows
                .iter()
                .map(|row| row.last_synced)
                .max()
                .map(millis_to_datetime)
                .transpose()?;
            let fraction = covered_fraction(&intervals, window_start, window_end);
            debug!(fraction, periods = rows.len(), "Computed window coverage");

            Ok(Coverage {
                fraction,
                most_recent_sync,
            })
        })
    }

    fn periods(&self) -> StoreFuture<'_, MirrorResult<Vec<SyncPeriod>>> {
        Box::pin(async move {
            self.query_periods(
                "SELECT id, start_ts, end_ts, last_synced, conversation_count,
                        new_conversations, updated_conversations
                 FROM sync_periods
                 ORDER BY start_ts",
                None,
            )
            .await
        })
    }

    fn recent_periods(&self, limit: usize) -> StoreFuture<'_, MirrorResult<Vec<SyncPeriod>>> {
        Box::pin(async move {
            let limit = count_to_sql(u64::try_from(limit).unwrap_or(u64::MAX))?;
            self.query_periods(RECENT_PERIODS, Some(limit))
            .await
        })
    }

    fn last_sync(&self) -> StoreFuture<'_, MirrorResult<Option<DateTime<Utc>>>> {
        Box::pin(async move {
            let conn = self.pool.acquire().await?;
            let last = conn
                .call(|conn| {
                    Ok(conn.query_row("SELECT MAX(last_synced) FROM sync_periods", [], |row| {
                        row.get::<_, Option<i64>>(0)
                    })?)
                })
                .await?;
            last.map(millis_to_datetime).transpose()
        })
    }
}

/// Newest periods first; `?1` is the row limit.
pub(crate) const RECENT_PERIODS: &str = "SELECT id, start_ts, end_ts, last_synced, conversation_count,
        new_conversations, updated_conversations
 FROM sync_periods
 ORDER BY last_synced DESC, id DESC
 LIMIT ?1";

#[derive(Clone, Copy, Debug, Default)]
struct Counts {
    conversations: i64,
    new: i64,
    updated: i64,
}

impl Counts {
    const fn add(self, other: Self) -> Self {
        Self {
            conversations: self.conversations.saturating_add(other.conversations),
            new: self.new.saturating_add(other.new),
            updated: self.updated.saturating_add(other.updated),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct RawPeriod {
    id: i64,
    start: i64,
    end: i64,
    last_synced: i64,
    counts: Counts,
}

impl RawPeriod {
    pub(crate) fn into_period(self) -> MirrorResult<SyncPeriod> {
        Ok(SyncPeriod {
            start: millis_to_datetime(self.start)?,
            end: millis_to_datetime(self.end)?,
            last_synced: millis_to_datetime(self.last_synced)?,
            conversation_count: count_from_sql(self.counts.conversations)?,
            new_conversations: count_from_sql(self.counts.new)?,
            updated_conversations: count_from_sql(self.counts.updated)?,
        })
    }
}

pub(crate) fn read_period(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawPeriod> {
    Ok(RawPeriod {
        id: row.get(0)?,
        start: row.get(1)?,
        end: row.get(2)?,
        last_synced: row.get(3)?,
        counts: Counts {
            conversations: row.get(4)?,
            new: row.get(5)?,
            updated: row.get(6)?,
        },
    })
}

/// Periods whose closed range overlaps or touches `[start, end]`.
fn select_touching(
    conn: &rusqlite::Connection,
    start: i64,
    end: i64,
) -> rusqlite::Result<Vec<RawPeriod>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, start_ts, end_ts, last_synced, conversation_count,
                new_conversations, updated_conversations
         FROM sync_periods
         WHERE start_ts <= ?2 AND end_ts >= ?1
         ORDER BY start_ts",
    )?;
    let rows = stmt
        .query_map(rusqlite::params![start, end], read_period)?
        .collect::<Result<Vec<_>, rusqlite::Error>>()?;
    Ok(rows)
}

/// Replace every period touching `range` with their union, in one transaction.
fn merge_period(
    conn: &mut rusqlite::Connection,
    range: (i64, i64),
    fetched: Counts,
    now: i64,
) -> rusqlite::Result<RawPeriod> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let (mut start, mut end) = range;
    let mut matched: Vec<RawPeriod> = Vec::new();
    loop {
        let found = select_touching(&tx, start, end)?;
        let settled = found.len() == matched.len();
        for period in &found {
            start = start.min(period.start);
            end = end.max(period.end);
        }
        matched = found;
        if settled {
            break;
        }
    }

    let previous_sync: Option<i64> =
        tx.query_row("SELECT MAX(last_synced) FROM sync_periods", [], |row| row.get(0))?;
    let last_synced = previous_sync.map_or(now, |previous| previous.max(now));
    let counts = matched
        .iter()
        .fold(fetched, |total, period| total.add(period.counts));

    {
        let mut delete = tx.prepare("DELETE FROM sync_periods WHERE id = ?1")?;
        for period in &matched {
            delete.execute(rusqlite::params![period.id])?;
        }
    }
    tx.execute(
        "INSERT INTO sync_periods
            (start_ts, end_ts, last_synced, conversation_count, new_conversations, updated_conversations)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![
            start,
            end,
            last_synced,
            counts.conversations,
            counts.new,
            counts.updated
        ],
    )?;
    let id = tx.last_insert_rowid();
    tx.commit()?;

    Ok(RawPeriod {
        id,
        start,
        end,
        last_synced,
        counts,
    })
}

/// Share of `[start, end]` covered by the union of `intervals`.
///
/// A zero-length window counts as covered when any interval contains it.
#[allow(clippy::cast_precision_loss)]
fn covered_fraction(intervals: &[(i64, i64)], start: i64, end: i64) -> f64 {
    if start >= end {
        let hit = intervals.iter().any(|&(s, e)| s <= start && start <= e);
        return if hit { 1.0 } else { 0.0 };
    }

    let mut clipped: Vec<(i64, i64)> = intervals
        .iter()
        .map(|&(s, e)| (s.max(start), e.min(end)))
        .filter(|(s, e)| s < e)
        .collect();
    clipped.sort_unstable();

    let mut covered: i64 = 0;
    let mut cursor = start;
    for (s, e) in clipped {
        let s = s.max(cursor);
        if e > s {
            covered += e - s;
            cursor = e;
        }
    }

    (covered as f64 / (end - start) as f64).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use chrono::{Duration as ChronoDuration, TimeZone};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, d, 0, 0, 0).unwrap()
    }

    fn stats(total: u64, new: u64, updated: u64) -> SyncStats {
        SyncStats {
            total_conversations: total,
            new_conversations: new,
            updated_conversations: updated,
            ..SyncStats::default()
        }
    }

    async fn tracker() -> (tempfile::TempDir, SqliteSyncTracker) {
        let dir = tempfile::tempdir().unwrap();
        let pool = SqlitePool::open(dir.path().join("data.db"), 4, std::time::Duration::from_secs(5))
            .await
            .unwrap();
        let tracker = SqliteSyncTracker::new(Arc::new(pool), &SyncConfig::default());
        (dir, tracker)
    }

    #[test]
    fn test_covered_fraction_edges() {
        assert!((covered_fraction(&[], 0, 10) - 0.0).abs() < f64::EPSILON);
        assert!((covered_fraction(&[(0, 10)], 0, 10) - 1.0).abs() < f64::EPSILON);
        assert!((covered_fraction(&[(0, 2), (2, 5)], 0, 10) - 0.5).abs() < f64::EPSILON);
        assert!((covered_fraction(&[(-5, 3), (8, 20)], 0, 10) - 0.5).abs() < f64::EPSILON);
        assert!((covered_fraction(&[(0, 6), (4, 8)], 0, 10) - 0.8).abs() < f64::EPSILON);
        assert!((covered_fraction(&[(3, 7)], 5, 5) - 1.0).abs() < f64::EPSILON);
        assert!((covered_fraction(&[(3, 4)], 5, 5) - 0.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_empty_tracker() {
        let (_dir, tracker) = tracker().await;
        let coverage = tracker.coverage(day(1), day(2)).await.unwrap();
        assert_eq!(coverage, Coverage::none());
        assert!(tracker.last_sync().await.unwrap().is_none());
        assert!(tracker.periods().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_overlapping_syncs_merge_with_summed_counts() {
        let (_dir, tracker) = tracker().await;
        tracker.record_sync(day(1), day(3), stats(5, 5, 0)).await.unwrap();
        let merged = tracker.record_sync(day(2), day(4), stats(3, 1, 2)).await.unwrap();

        assert_eq!(merged.start, day(1));
        assert_eq!(merged.end, day(4));
        assert_eq!(merged.conversation_count, 8);
        assert_eq!(merged.new_conversations, 6);
        assert_eq!(merged.updated_conversations, 2);
        assert_eq!(tracker.periods().await.unwrap(), vec![merged]);
    }

    #[tokio::test]
    async fn test_adjacent_syncs_merge_and_disjoint_stay_apart() {
        let (_dir, tracker) = tracker().await;
        tracker.record_sync(day(1), day(2), stats(1, 1, 0)).await.unwrap();
        tracker.record_sync(day(2), day(3), stats(1, 1, 0)).await.unwrap();
        tracker.record_sync(day(10), day(12), stats(1, 1, 0)).await.unwrap();

        let periods = tracker.periods().await.unwrap();
        assert_eq!(periods.len(), 2);
        assert_eq!((periods[0].start, periods[0].end), (day(1), day(3)));
        assert_eq!((periods[1].start, periods[1].end), (day(10), day(12)));

        let bridged = tracker.record_sync(day(3), day(10), stats(2, 0, 2)).await.unwrap();
        assert_eq!((bridged.start, bridged.end), (day(1), day(12)));
        assert_eq!(bridged.conversation_count, 5);
        assert_eq!(tracker.periods().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_inverted_range_rejected() {
        let (_dir, tracker) = tracker().await;
        assert!(matches!(
            tracker.record_sync(day(3), day(1), SyncStats::default()).await,
            Err(MirrorError::InvalidFilter(_))
        ));
        assert!(matches!(
            tracker.coverage(day(3), day(1)).await,
            Err(MirrorError::InvalidFilter(_))
        ));
    }

    #[tokio::test]
    async fn test_coverage_of_partial_and_instant_windows() {
        let (_dir, tracker) = tracker().await;
        let period = tracker.record_sync(day(1), day(3), stats(1, 1, 0)).await.unwrap();

        let full = tracker.coverage(day(1), day(2)).await.unwrap();
        assert!(full.is_complete());
        assert_eq!(full.most_recent_sync, Some(period.last_synced));

        let half = tracker.coverage(day(2), day(4)).await.unwrap();
        assert!((half.fraction - 0.5).abs() < 1e-9);

        let instant = tracker.coverage(day(2), day(2)).await.unwrap();
        assert!((instant.fraction - 1.0).abs() < f64::EPSILON);
        let outside = tracker.coverage(day(5), day(5)).await.unwrap();
        assert_eq!(outside, Coverage::none());
    }

    #[tokio::test]
    async fn test_last_synced_is_monotonic() {
        let (_dir, tracker) = tracker().await;
        let first = tracker.record_sync(day(1), day(2), stats(1, 1, 0)).await.unwrap();
        let second = tracker.record_sync(day(5), day(6), stats(1, 1, 0)).await.unwrap();
        assert!(second.last_synced >= first.last_synced);

        let recent = tracker.recent_periods(1).await.unwrap();
        assert_eq!(recent, vec![second.clone()]);
        assert_eq!(tracker.last_sync().await.unwrap(), Some(second.last_synced));
    }

    fn union_of(ranges: &[(i64, i64)]) -> Vec<(i64, i64)> {
        let mut sorted = ranges.to_vec();
        sorted.sort_unstable();
        let mut merged: Vec<(i64, i64)> = Vec::new();
        for (s, e) in sorted {
            match merged.last_mut() {
                Some(last) if s <= last.1 => last.1 = last.1.max(e),
                _ => merged.push((s, e)),
            }
        }
        merged
    }

    #[tokio::test]
    async fn test_random_sequences_keep_disjoint_union_and_monotonic_coverage() {
        let (_dir, tracker) = tracker().await;
        let mut rng = StdRng::seed_from_u64(7);
        let origin = day(1);
        let window = (origin + ChronoDuration::hours(100), origin + ChronoDuration::hours(300));
        let mut recorded = Vec::new();
        let mut previous_fraction = 0.0;

        for _ in 0..40 {
            let start_h = rng.gen_range(0..500_i64);
            let len_h = rng.gen_range(0..60_i64);
            let start = origin + ChronoDuration::hours(start_h);
            let end = start + ChronoDuration::hours(len_h);
            tracker.record_sync(start, end, stats(1, 1, 0)).await.unwrap();
            recorded.push((start.timestamp_millis(), end.timestamp_millis()));

            let fraction = tracker.coverage(window.0, window.1).await.unwrap().fraction;
            assert!(fraction >= previous_fraction);
            previous_fraction = fraction;
        }

        let periods = tracker.periods().await.unwrap();
        for pair in periods.windows(2) {
            assert!(pair[0].end < pair[1].start, "periods overlap or touch");
        }
        let stored: Vec<(i64, i64)> = periods
            .iter()
            .map(|p| (p.start.timestamp_millis(), p.end.timestamp_millis()))
            .collect();
        assert_eq!(stored, union_of(&recorded));
        let total: u64 = periods.iter().map(|p| p.conversation_count).sum();
        assert_eq!(total, 40);
    }

    #[tokio::test]
    async fn test_concurrent_overlapping_merges_serialize() {
        let (_dir, tracker) = tracker().await;
        let tracker = Arc::new(tracker);
        let tasks: Vec<_> = (0..10)
            .map(|i| {
                let tracker = Arc::clone(&tracker);
                tokio::spawn(async move {
                    let start = day(1) + ChronoDuration::hours(i * 6);
                    tracker
                        .record_sync(start, start + ChronoDuration::hours(12), stats(2, 1, 1))
                        .await
                })
            })
            .collect();
        for task in futures::future::join_all(tasks).await {
            task.unwrap().unwrap();
        }

        let periods = tracker.periods().await.unwrap();
        assert_eq!(periods.len(), 1);
        assert_eq!(periods[0].start, day(1));
        assert_eq!(periods[0].end, day(1) + ChronoDuration::hours(66));
        assert_eq!(periods[0].conversation_count, 20);
        assert_eq!(periods[0].new_conversations, 10);
    }
}
