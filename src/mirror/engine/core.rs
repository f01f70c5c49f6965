//! Mirror engine orchestration.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::mirror::core::config::MirrorConfig;
use crate::mirror::core::conversation::Conversation;
use crate::mirror::core::errors::{MirrorError, MirrorResult};
use crate::mirror::core::filters::ConversationFilters;
use crate::mirror::core::sync::{Coverage, SyncPeriod, SyncStats};
use crate::mirror::engine::source::ConversationSource;
use crate::mirror::retrieval::search::ConversationSearcher;
use crate::mirror::storage::conversation_store::{
    ConversationStore, SqliteConversationStore, StoreReport,
};
use crate::mirror::storage::pool::SqlitePool;
use crate::mirror::storage::request_log::{RequestLog, RequestPattern};
use crate::mirror::storage::status::{MirrorStatus, StatusReporter};
use crate::mirror::storage::sync_tracker::{SqliteSyncTracker, SyncTracker};

/// Backend dependencies for the mirror engine.
pub struct MirrorBackends {
    /// Shared connection pool.
    pub pool: Arc<SqlitePool>,
    /// Conversation store implementation.
    pub conversation_store: Arc<dyn ConversationStore>,
    /// Sync tracker implementation.
    pub sync_tracker: Arc<dyn SyncTracker>,
}

impl MirrorBackends {
    /// Build `SQLite` backends from config.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened.
    pub async fn sqlite(config: &MirrorConfig) -> MirrorResult<Self> {
        let pool = Arc::new(SqlitePool::from_config(&config.storage).await?);
        let conversation_store = Arc::new(SqliteConversationStore::new(Arc::clone(&pool)));
        let sync_tracker = Arc::new(SqliteSyncTracker::new(Arc::clone(&pool), &config.sync));
        Ok(Self {
            pool,
            conversation_store,
            sync_tracker,
        })
    }
}

/// Result of [`MirrorEngine::ensure_fresh`].
#[derive(Clone, Debug, PartialEq)]
pub struct Freshness {
    /// Coverage measured before any fetch.
    pub coverage: Coverage,
    /// Stats of the fetch, when one ran.
    pub synced: Option<SyncStats>,
}

/// Local conversation mirror.
pub struct MirrorEngine {
    config: MirrorConfig,
    pool: Arc<SqlitePool>,
    conversations: Arc<dyn ConversationStore>,
    tracker: Arc<dyn SyncTracker>,
    searcher: ConversationSearcher,
    reporter: StatusReporter,
    requests: RequestLog,
    source: Option<Arc<dyn ConversationSource>>,
}

impl MirrorEngine {
    /// Create an engine over existing backends.
    ///
    /// # Errors
    /// Returns `InvalidConfig` if the configuration is invalid.
    pub fn new(config: MirrorConfig, backends: MirrorBackends) -> MirrorResult<Self> {
        config.validate()?;
        let searcher = ConversationSearcher::new(Arc::clone(&backends.pool), config.search.max_limit);
        let reporter = StatusReporter::new(Arc::clone(&backends.pool));
        let requests = RequestLog::new(Arc::clone(&backends.pool));

        Ok(Self {
            config,
            pool: backends.pool,
            conversations: backends.conversation_store,
            tracker: backends.sync_tracker,
            searcher,
            reporter,
            requests,
            source: None,
        })
    }

    /// Open the database named by `config` and build the engine.
    ///
    /// # Errors
    /// Returns an error if the config is invalid or the database cannot be opened.
    pub async fn open(config: MirrorConfig) -> MirrorResult<Self> {
        config.validate()?;
        let backends = MirrorBackends::sqlite(&config).await?;
        Self::new(config, backends)
    }

    /// Attach the remote fetch collaborator.
    #[must_use]
    pub fn with_source(mut self, source: Arc<dyn ConversationSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Whether a fetch collaborator is attached.
    #[must_use]
    pub fn has_source(&self) -> bool {
        self.source.is_some()
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &MirrorConfig {
        &self.config
    }

    /// Upsert a batch and return how many conversations were stored.
    ///
    /// # Errors
    /// Returns an error if no connection can be obtained.
    pub async fn store_conversations(&self, batch: Vec<Conversation>) -> MirrorResult<usize> {
        Ok(self.store_conversations_report(batch).await?.stored)
    }

    /// Upsert a batch and return the detailed outcome.
    ///
    /// # Errors
    /// Returns an error if no connection can be obtained.
    pub async fn store_conversations_report(
        &self,
        batch: Vec<Conversation>,
    ) -> MirrorResult<StoreReport> {
        self.conversations.store_conversations(batch).await
    }

    /// Load one conversation; `None` when it is not mirrored.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    pub async fn get_conversation(&self, id: &str) -> MirrorResult<Option<Conversation>> {
        self.conversations.get_conversation(id).await
    }

    /// Record a completed fetch of `[start, end]`.
    ///
    /// # Errors
    /// See [`SyncTracker::record_sync`].
    pub async fn record_sync(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        stats: SyncStats,
    ) -> MirrorResult<SyncPeriod> {
        self.tracker.record_sync(start, end, stats).await
    }

    /// Coverage of `[start, end]`.
    ///
    /// # Errors
    /// See [`SyncTracker::coverage`].
    pub async fn coverage(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> MirrorResult<Coverage> {
        self.tracker.coverage(start, end).await
    }

    /// All merged sync periods, ordered by start.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    pub async fn sync_periods(&self) -> MirrorResult<Vec<SyncPeriod>> {
        self.tracker.periods().await
    }

    /// Search mirrored conversations.
    ///
    /// # Errors
    /// Returns `InvalidFilter` for an inverted date range or a storage error.
    pub async fn search(&self, filters: &ConversationFilters) -> MirrorResult<Vec<Conversation>> {
        self.searcher.search(filters).await
    }

    /// Status with the configured number of recent periods.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    pub async fn status(&self) -> MirrorResult<MirrorStatus> {
        self.reporter.status(self.config.sync.recent_history).await
    }

    /// Status with `recent` recent periods.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    pub async fn status_with_recent(&self, recent: usize) -> MirrorResult<MirrorStatus> {
        self.reporter.status(recent).await
    }

    /// Log a window request together with its coverage.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    pub async fn record_request_pattern(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        coverage: &Coverage,
        sync_triggered: bool,
    ) -> MirrorResult<()> {
        let pattern = RequestPattern::observed(start, end, coverage, Utc::now(), sync_triggered);
        self.requests.record(&pattern).await
    }

    /// Most recent logged window requests.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    pub async fn recent_requests(&self, limit: usize) -> MirrorResult<Vec<RequestPattern>> {
        self.requests.recent(limit).await
    }

    /// Fetch `[start, end]` from the source, store it and record the sync.
    ///
    /// # Errors
    /// Returns `CollaboratorUnavailable` without a source, `InvalidFilter` for
    /// an inverted window, `IncompleteSync` when any fetched conversation was
    /// not stored (the window is then left unrecorded), or any fetch/storage
    /// error.
    pub async fn sync_window(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> MirrorResult<SyncStats> {
        let source = self
            .source
            .as_ref()
            .ok_or(MirrorError::CollaboratorUnavailable("conversation source"))?;
        if start > end {
            return Err(MirrorError::InvalidFilter(
                "sync window start is after its end".to_string(),
            ));
        }

        let started = Instant::now();
        let batch = source.fetch_window(start, end).await?;
        let delivered = batch.conversations.len();
        let report = self.conversations.store_conversations(batch.conversations).await?;
        if report.failed > 0 {
            warn!(
                failed = report.failed,
                fetched = delivered,
                "Not recording sync window with unstored conversations"
            );
            return Err(MirrorError::IncompleteSync {
                failed: report.failed,
                fetched: delivered,
            });
        }

        let stats = SyncStats {
            total_conversations: to_u64(delivered),
            new_conversations: to_u64(report.new),
            updated_conversations: to_u64(report.updated),
            total_messages: to_u64(report.messages),
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            api_calls_made: batch.api_calls,
        };
        self.tracker.record_sync(start, end, stats.clone()).await?;

        info!(
            conversations = stats.total_conversations,
            new = stats.new_conversations,
            updated = stats.updated_conversations,
            duration_ms = stats.duration_ms,
            "Synced window"
        );
        Ok(stats)
    }

    /// Sync `[start, end]` when its cached copy is incomplete or older than `max_age`.
    ///
    /// Without a source nothing is fetched; the measurement is still logged.
    ///
    /// # Errors
    /// Returns an error if coverage, the fetch or the request log fails.
    pub async fn ensure_fresh(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        max_age: Duration,
    ) -> MirrorResult<Freshness> {
        let coverage = self.tracker.coverage(start, end).await?;
        let stale = !coverage.is_fresh(Utc::now(), max_age);

        let synced = if stale && self.has_source() {
            Some(self.sync_window(start, end).await?)
        } else {
            if stale {
                debug!(fraction = coverage.fraction, "Window is stale but no source is attached");
            }
            None
        };

        self.record_request_pattern(start, end, &coverage, synced.is_some())
            .await?;
        Ok(Freshness { coverage, synced })
    }

    /// Stop handing out connections.
    pub fn close(&self) {
        self.pool.close();
    }
}

fn to_u64(value: usize) -> u64 {
    u64::try_from(value).unwrap_or(u64::MAX)
}
