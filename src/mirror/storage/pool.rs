//! Bounded pool of `SQLite` connections.
//!
//! Every pooled connection runs on its own `tokio-rusqlite` worker thread.
//! The semaphore is the only admission point: a caller holds exactly one
//! permit per checked-out connection, so the pool size is a hard bound and
//! an exhausted pool makes callers wait instead of opening more handles.

use std::fs;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{Semaphore, SemaphorePermit};
use tokio_rusqlite::Connection;
use tracing::{debug, info};

use crate::mirror::core::config::StorageConfig;
use crate::mirror::core::errors::{MirrorError, MirrorResult};
use crate::mirror::storage::schema;

/// Pool of connections to one mirror database file.
pub struct SqlitePool {
    path: PathBuf,
    connections: Vec<Connection>,
    idle: Mutex<Vec<usize>>,
    permits: Semaphore,
    acquire_timeout: Duration,
}

impl SqlitePool {
    /// Open (creating if needed) the database and its schema.
    ///
    /// # Errors
    /// Returns `InvalidConfig` for an empty pool and `StorageUnavailable` if
    /// the file cannot be created, opened or initialized.
    pub async fn open(
        path: impl AsRef<Path>,
        pool_size: usize,
        acquire_timeout: Duration,
    ) -> MirrorResult<Self> {
        if pool_size == 0 {
            return Err(MirrorError::InvalidConfig(
                "pool size must be > 0".to_string(),
            ));
        }

        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|err| unavailable(&path, &err))?;
        }

        let mut connections = Vec::with_capacity(pool_size);
        for index in 0..pool_size {
            let conn = Connection::open(&path)
                .await
                .map_err(|err| unavailable(&path, &err))?;
            conn.call(move |conn| {
                schema::prepare_connection(conn)?;
                if index == 0 {
                    schema::apply_schema(conn)?;
                }
                Ok(())
            })
            .await
            .map_err(|err| unavailable(&path, &err))?;
            connections.push(conn);
        }

        info!(path = %path.display(), pool_size, "Opened conversation mirror database");

        Ok(Self {
            path,
            connections,
            idle: Mutex::new((0..pool_size).rev().collect()),
            permits: Semaphore::new(pool_size),
            acquire_timeout,
        })
    }

    /// Open the pool described by a storage config.
    ///
    /// # Errors
    /// See [`SqlitePool::open`].
    pub async fn from_config(config: &StorageConfig) -> MirrorResult<Self> {
        Self::open(
            &config.database_path,
            config.pool_size,
            Duration::from_millis(config.acquire_timeout_ms),
        )
        .await
    }

    /// Check out one connection, waiting up to the acquire timeout.
    ///
    /// Dropping the returned guard (or the pending future) releases it.
    ///
    /// # Errors
    /// Returns `PoolTimeout` when no connection frees up in time and
    /// `PoolClosed` after [`SqlitePool::close`].
    pub async fn acquire(&self) -> MirrorResult<PooledConnection<'_>> {
        let permit = match tokio::time::timeout(self.acquire_timeout, self.permits.acquire()).await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(MirrorError::PoolClosed),
            Err(_) => {
                debug!(timeout = ?self.acquire_timeout, "Connection pool exhausted");
                return Err(MirrorError::PoolTimeout(self.acquire_timeout));
            }
        };

        let index = self.lock_idle().pop().ok_or_else(|| {
            MirrorError::StorageUnavailable("no idle connection behind a free permit".to_string())
        })?;

        Ok(PooledConnection {
            pool: self,
            index,
            _permit: permit,
        })
    }

    /// Stop handing out connections. Waiters and later callers get `PoolClosed`.
    pub fn close(&self) {
        self.permits.close();
    }

    /// Database file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Configured number of connections.
    #[must_use]
    pub fn size(&self) -> usize {
        self.connections.len()
    }

    /// Connections not currently checked out.
    #[must_use]
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    fn lock_idle(&self) -> MutexGuard<'_, Vec<usize>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A checked-out connection; returned to the pool on drop.
pub struct PooledConnection<'a> {
    pool: &'a SqlitePool,
    index: usize,
    _permit: SemaphorePermit<'a>,
}

impl Deref for PooledConnection<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.pool.connections[self.index]
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        // The index goes back before the permit field is dropped.
        self.pool.lock_idle().push(self.index);
    }
}

fn unavailable(path: &Path, err: &dyn std::fmt::Display) -> MirrorError {
    MirrorError::StorageUnavailable(format!("{}: {err}", path.display()))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    async fn open_pool(dir: &tempfile::TempDir, size: usize, timeout_ms: u64) -> SqlitePool {
        SqlitePool::open(
            dir.path().join("data.db"),
            size,
            Duration::from_millis(timeout_ms),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_open_creates_file_and_tables() {
        let dir = tempfile::tempdir().unwrap();
        let pool = SqlitePool::open(
            dir.path().join("nested").join("data.db"),
            2,
            Duration::from_secs(1),
        )
        .await
        .unwrap();
        assert!(pool.path().exists());

        let conn = pool.acquire().await.unwrap();
        let count: i64 = conn
            .call(|conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE name IN ('conversations', 'messages', 'sync_periods', 'request_patterns')",
                    [],
                    |row| row.get(0),
                )?)
            })
            .await
            .unwrap();
        assert_eq!(count, 4);
    }

    #[tokio::test]
    async fn test_zero_size_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let result = SqlitePool::open(dir.path().join("data.db"), 0, Duration::from_secs(1)).await;
        assert!(matches!(result, Err(MirrorError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_unwritable_location_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, b"not a directory").unwrap();
        let result = SqlitePool::open(blocker.join("data.db"), 1, Duration::from_secs(1)).await;
        assert!(matches!(result, Err(MirrorError::StorageUnavailable(_))));
    }

    #[tokio::test]
    async fn test_exhausted_pool_times_out_then_recovers() {
        let dir = tempfile::tempdir().unwrap();
        let pool = open_pool(&dir, 1, 50).await;

        let held = pool.acquire().await.unwrap();
        assert_eq!(pool.available(), 0);
        assert!(matches!(
            pool.acquire().await,
            Err(MirrorError::PoolTimeout(_))
        ));

        drop(held);
        assert_eq!(pool.available(), 1);
        assert!(pool.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn test_waiter_gets_released_connection() {
        let dir = tempfile::tempdir().unwrap();
        let pool = Arc::new(open_pool(&dir, 1, 2_000).await);

        let held = pool.acquire().await.unwrap();
        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.acquire().await.map(|conn| conn.index) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(held);

        let index = waiter.await.unwrap().unwrap();
        assert_eq!(index, 0);
    }

    #[tokio::test]
    async fn test_checkouts_never_exceed_size() {
        let dir = tempfile::tempdir().unwrap();
        let pool = Arc::new(open_pool(&dir, 3, 5_000).await);

        let tasks: Vec<_> = (0..12)
            .map(|_| {
                let pool = Arc::clone(&pool);
                tokio::spawn(async move {
                    let conn = pool.acquire().await.unwrap();
                    let in_use = pool.size() - pool.available();
                    conn.call(|conn| Ok(conn.execute_batch("SELECT 1")?))
                        .await
                        .unwrap();
                    in_use
                })
            })
            .collect();

        for task in futures::future::join_all(tasks).await {
            assert!(task.unwrap() <= 3);
        }
        assert_eq!(pool.available(), 3);
    }

    #[tokio::test]
    async fn test_closed_pool_rejects_acquire() {
        let dir = tempfile::tempdir().unwrap();
        let pool = open_pool(&dir, 1, 50).await;
        pool.close();
        assert!(matches!(pool.acquire().await, Err(MirrorError::PoolClosed)));
    }
}
