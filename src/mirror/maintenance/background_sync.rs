//! Background sync worker.
//!
//! Periodically checks the trailing window and fetches it again when its
//! cached copy is incomplete or older than the configured maximum age.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::mirror::core::config::BackgroundSyncConfig;
use crate::mirror::core::errors::MirrorResult;
use crate::mirror::engine::core::{Freshness, MirrorEngine};

/// Background worker keeping the recent window of the mirror fresh.
pub struct BackgroundSync {
    engine: Arc<MirrorEngine>,
    config: BackgroundSyncConfig,
    shutdown: Arc<Notify>,
}

impl BackgroundSync {
    /// Create a new worker.
    #[must_use]
    pub fn new(engine: Arc<MirrorEngine>, config: BackgroundSyncConfig) -> Self {
        Self {
            engine,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a shutdown notifier to stop the worker.
    #[must_use]
    pub fn shutdown_notifier(&self) -> Arc<Notify> {
        Arc::clone(&self.shutdown)
    }

    /// Spawn the worker as a tokio task.
    #[must_use]
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&self) {
        if !self.config.enabled {
            info!("Background sync is disabled");
            return;
        }
        if !self.engine.has_source() {
            warn!("Background sync enabled without a conversation source, not starting");
            return;
        }

        let interval = Duration::from_secs(self.config.interval_seconds);
        info!(?interval, lookback_hours = self.config.lookback_hours, "Starting background sync worker");

        loop {
            tokio::select! {
                () = tokio::time::sleep(interval) => {
                    match self.run_once().await {
                        Ok(Freshness { synced: Some(stats), .. }) => {
                            info!(
                                conversations = stats.total_conversations,
                                duration_ms = stats.duration_ms,
                                "Background sync completed"
                            );
                        }
                        Ok(Freshness { coverage, .. }) => {
                            debug!(fraction = coverage.fraction, "Recent window already fresh");
                        }
                        Err(err) => {
                            warn!(%err, "Background sync failed");
                        }
                    }
                }
                () = self.shutdown.notified() => {
                    info!("Background sync worker shutting down");
                    break;
                }
            }
        }
    }

    /// Check the trailing window once, syncing it if stale.
    ///
    /// # Errors
    /// Returns an error if coverage, the fetch or storage fails.
    pub async fn run_once(&self) -> MirrorResult<Freshness> {
        let end = Utc::now();
        let start = end - chrono::Duration::hours(i64::from(self.config.lookback_hours));
        let max_age = i64::try_from(self.config.max_age_seconds)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX);
        self.engine.ensure_fresh(start, end, max_age).await
    }
}

/// Builder for background sync configuration.
#[derive(Debug, Clone, Default)]
pub struct BackgroundSyncConfigBuilder {
    enabled: Option<bool>,
    interval_seconds: Option<u64>,
    lookback_hours: Option<u32>,
    max_age_seconds: Option<u64>,
}

impl BackgroundSyncConfigBuilder {
    /// Create a new builder with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable the worker.
    #[must_use]
    pub const fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    /// Set the check interval in seconds.
    #[must_use]
    pub const fn interval_seconds(mut self, seconds: u64) -> Self {
        self.interval_seconds = Some(seconds);
        self
    }

    /// Set the trailing window in hours.
    #[must_use]
    pub const fn lookback_hours(mut self, hours: u32) -> Self {
        self.lookback_hours = Some(hours);
        self
    }

    /// Set the maximum sync age in seconds.
    #[must_use]
    pub const fn max_age_seconds(mut self, seconds: u64) -> Self {
        self.max_age_seconds = Some(seconds);
        self
    }

    /// Build the configuration.
    #[must_use]
    pub fn build(self) -> BackgroundSyncConfig {
        let default = BackgroundSyncConfig::default();
        BackgroundSyncConfig {
            enabled: self.enabled.unwrap_or(default.enabled),
            interval_seconds: self.interval_seconds.unwrap_or(default.interval_seconds),
            lookback_hours: self.lookback_hours.unwrap_or(default.lookback_hours),
            max_age_seconds: self.max_age_seconds.unwrap_or(default.max_age_seconds),
        }
    }
}
