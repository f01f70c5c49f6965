//! Request pattern log: which windows were asked for and how well covered they were.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::mirror::core::errors::{MirrorError, MirrorResult};
use crate::mirror::core::sync::Coverage;
use crate::mirror::storage::pool::SqlitePool;
use crate::mirror::storage::schema::millis_to_datetime;

/// One logged window request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RequestPattern {
    /// Requested window start.
    pub window_start: DateTime<Utc>,
    /// Requested window end.
    pub window_end: DateTime<Utc>,
    /// When the request was made.
    pub requested_at: DateTime<Utc>,
    /// Covered fraction at request time.
    pub coverage: f64,
    /// Seconds since the newest sync touching the window, if any.
    pub freshness_seconds: Option<i64>,
    /// Whether the request triggered a fetch.
    pub sync_triggered: bool,
}

impl RequestPattern {
    /// Build a pattern from a coverage measurement taken at `now`.
    #[must_use]
    pub fn observed(
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        coverage: &Coverage,
        now: DateTime<Utc>,
        sync_triggered: bool,
    ) -> Self {
        Self {
            window_start,
            window_end,
            requested_at: now,
            coverage: coverage.fraction,
            freshness_seconds: coverage.age(now).map(|age| age.num_seconds()),
            sync_triggered,
        }
    }
}

/// Append-only log of request patterns.
pub struct RequestLog {
    pool: Arc<SqlitePool>,
}

impl RequestLog {
    /// Create a log over a shared pool.
    #[must_use]
    pub const fn new(pool: Arc<SqlitePool>) -> Self {
        Self { pool }
    }

    /// Append one pattern.
    ///
    /// # Errors
    /// Returns `InvalidFilter` for an inverted window or a storage error.
    pub async fn record(&self, pattern: &RequestPattern) -> MirrorResult<()> {
        if pattern.window_start > pattern.window_end {
            return Err(MirrorError::InvalidFilter(
                "request window start is after its end".to_string(),
            ));
        }
        let row = (
            pattern.window_start.timestamp_millis(),
            pattern.window_end.timestamp_millis(),
            pattern.requested_at.timestamp_millis(),
            pattern.coverage,
            pattern.freshness_seconds,
            pattern.sync_triggered,
        );
        let conn = self.pool.acquire().await?;
        conn.call(move |conn| {
            conn.execute(
                "INSERT INTO request_patterns
                    (window_start, window_end, requested_at, coverage, freshness_seconds, sync_triggered)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![row.0, row.1, row.2, row.3, row.4, row.5],
            )?;
            Ok(())
        })
        .await?;
        debug!(coverage = pattern.coverage, sync_triggered = pattern.sync_triggered, "Logged request pattern");
        Ok(())
    }

    /// The `limit` most recent patterns, newest first.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    pub async fn recent(&self, limit: usize) -> MirrorResult<Vec<RequestPattern>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let conn = self.pool.acquire().await?;
        let rows = conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT window_start, window_end, requested_at, coverage, freshness_seconds, sync_triggered
                     FROM request_patterns
                     ORDER BY requested_at DESC, id DESC
                     LIMIT ?1",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![limit], |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, i64>(1)?,
                            row.get::<_, i64>(2)?,
                            row.get::<_, f64>(3)?,
                            row.get::<_, Option<i64>>(4)?,
                            row.get::<_, bool>(5)?,
                        ))
                    })?
                    .collect::<Result<Vec<_>, rusqlite::Error>>()?;
                Ok(rows)
            })
            .await?;

        rows.into_iter()
            .map(|(start, end, requested, coverage, freshness_seconds, sync_triggered)| {
                Ok(RequestPattern {
                    window_start: millis_to_datetime(start)?,
                    window_end: millis_to_datetime(end)?,
                    requested_at: millis_to_datetime(requested)?,
                    coverage,
                    freshness_seconds,
                    sync_triggered,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::TimeZone;

    use super::*;

    #[tokio::test]
    async fn test_record_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let pool = SqlitePool::open(dir.path().join("data.db"), 1, Duration::from_secs(5))
            .await
            .unwrap();
        let log = RequestLog::new(Arc::new(pool));

        let now = Utc.with_ymd_and_hms(2024, 1, 8, 12, 0, 0).unwrap();
        let coverage = Coverage {
            fraction: 0.75,
            most_recent_sync: Some(now - chrono::Duration::seconds(90)),
        };
        let pattern =
            RequestPattern::observed(now - chrono::Duration::days(7), now, &coverage, now, false);
        assert_eq!(pattern.freshness_seconds, Some(90));

        log.record(&pattern).await.unwrap();
        log.record(&RequestPattern::observed(now, now, &Coverage::none(), now, true))
            .await
            .unwrap();

        let recent = log.recent(10).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert!(recent.contains(&pattern));
        assert!(recent.iter().any(|p| p.sync_triggered && p.freshness_seconds.is_none()));
    }

    #[tokio::test]
    async fn test_inverted_window_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let pool = SqlitePool::open(dir.path().join("data.db"), 1, Duration::from_secs(5))
            .await
            .unwrap();
        let log = RequestLog::new(Arc::new(pool));
        let now = Utc::now();
        let pattern = RequestPattern::observed(now, now - chrono::Duration::hours(1), &Coverage::none(), now, false);
        assert!(matches!(log.record(&pattern).await, Err(MirrorError::InvalidFilter(_))));
    }
}
