//! Sync period, sync statistics and coverage models.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A merged, completed fetch over a contiguous time range.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct SyncPeriod {
    /// Range start (inclusive).
    pub start: DateTime<Utc>,
    /// Range end (inclusive).
    pub end: DateTime<Utc>,
    /// When the range was last fetched.
    pub last_synced: DateTime<Utc>,
    /// Conversations touched by the fetches merged into this period.
    pub conversation_count: u64,
    /// Conversations that were new to the mirror.
    pub new_conversations: u64,
    /// Conversations that already existed and were refreshed.
    pub updated_conversations: u64,
}

impl SyncPeriod {
    /// Whether `instant` falls inside this period.
    #[must_use]
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant <= self.end
    }

    /// Whether the closed ranges overlap or touch.
    #[must_use]
    pub fn touches(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.start <= end && self.end >= start
    }
}

/// Summary of one sync operation.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct SyncStats {
    /// Conversations delivered by the fetch.
    pub total_conversations: u64,
    /// Conversations new to the mirror.
    pub new_conversations: u64,
    /// Conversations refreshed in the mirror.
    pub updated_conversations: u64,
    /// Messages written.
    pub total_messages: u64,
    /// Wall time of the sync in milliseconds.
    pub duration_ms: u64,
    /// Remote API calls made.
    pub api_calls_made: u64,
}

/// How much of a window is already mirrored, and how recently.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Coverage {
    /// Covered share of the window, in `[0, 1]`.
    pub fraction: f64,
    /// Newest `last_synced` among periods intersecting the window.
    pub most_recent_sync: Option<DateTime<Utc>>,
}

impl Coverage {
    /// Coverage of a window nothing has been synced for.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            fraction: 0.0,
            most_recent_sync: None,
        }
    }

    /// Whether the whole window is covered.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.fraction >= 1.0
    }

    /// Time since the most recent sync.
    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.most_recent_sync.map(|synced| now - synced)
    }

    /// Fully covered and synced no longer than `max_age` ago.
    #[must_use]
    pub fn is_fresh(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        self.is_complete() && self.age(now).is_some_and(|age| age <= max_age)
    }
}
