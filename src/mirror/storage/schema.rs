//! Table layout and per-connection setup for the mirror database.

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::functions::FunctionFlags;

use crate::mirror::core::errors::{MirrorError, MirrorResult};

/// Current schema version, stored in `PRAGMA user_version`.
pub const SCHEMA_VERSION: i64 = 1;

/// Name of the case-folding substring SQL function.
pub const CONTAINS_FN: &str = "mirror_contains";

const SCHEMA_SQL: &str = "
    CREATE TABLE IF NOT EXISTS conversations (
        id TEXT PRIMARY KEY,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        customer_email TEXT,
        message_count INTEGER NOT NULL DEFAULT 0,
        stored_at INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_conversations_updated
        ON conversations (updated_at DESC);
    CREATE INDEX IF NOT EXISTS idx_conversations_email
        ON conversations (customer_email);

    CREATE TABLE IF NOT EXISTS conversation_tags (
        conversation_id TEXT NOT NULL REFERENCES conversations (id) ON DELETE CASCADE,
        tag TEXT NOT NULL,
        PRIMARY KEY (conversation_id, tag)
    );
    CREATE INDEX IF NOT EXISTS idx_conversation_tags_tag
        ON conversation_tags (tag);

    CREATE TABLE IF NOT EXISTS messages (
        conversation_id TEXT NOT NULL REFERENCES conversations (id) ON DELETE CASCADE,
        id TEXT NOT NULL,
        position INTEGER NOT NULL,
        author_type TEXT NOT NULL,
        body TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        part_type TEXT,
        PRIMARY KEY (conversation_id, id)
    );
    CREATE INDEX IF NOT EXISTS idx_messages_position
        ON messages (conversation_id, position);

    CREATE TABLE IF NOT EXISTS sync_periods (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        start_ts INTEGER NOT NULL,
        end_ts INTEGER NOT NULL CHECK (end_ts >= start_ts),
        last_synced INTEGER NOT NULL,
        conversation_count INTEGER NOT NULL DEFAULT 0,
        new_conversations INTEGER NOT NULL DEFAULT 0,
        updated_conversations INTEGER NOT NULL DEFAULT 0
    );
    CREATE INDEX IF NOT EXISTS idx_sync_periods_range
        ON sync_periods (start_ts, end_ts);
    CREATE INDEX IF NOT EXISTS idx_sync_periods_last_synced
        ON sync_periods (last_synced DESC);

    CREATE TABLE IF NOT EXISTS request_patterns (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        window_start INTEGER NOT NULL,
        window_end INTEGER NOT NULL,
        requested_at INTEGER NOT NULL,
        coverage REAL NOT NULL,
        freshness_seconds INTEGER,
        sync_triggered INTEGER NOT NULL DEFAULT 0
    );
    CREATE INDEX IF NOT EXISTS idx_request_patterns_requested
        ON request_patterns (requested_at DESC);
";

/// Per-connection pragmas and SQL functions. Run on every pooled connection.
///
/// # Errors
/// Returns an error if a pragma or function registration fails.
pub fn prepare_connection(conn: &rusqlite::Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;",
    )?;
    conn.create_scalar_function(
        CONTAINS_FN,
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let haystack = ctx.get::<Option<String>>(0)?;
            let needle = ctx.get::<Option<String>>(1)?;
            Ok(match (haystack, needle) {
                (Some(haystack), Some(needle)) => {
                    haystack.to_lowercase().contains(&needle.to_lowercase())
                }
                _ => false,
            })
        },
    )?;
    Ok(())
}

/// Create all tables and indexes if absent.
///
/// # Errors
/// Returns an error if the DDL cannot be applied.
pub fn apply_schema(conn: &rusqlite::Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    conn.execute_batch(&format!("PRAGMA user_version = {SCHEMA_VERSION};"))?;
    Ok(())
}

/// Convert a stored millisecond timestamp.
///
/// # Errors
/// Returns `InvalidRecord` if the value is out of range.
pub fn millis_to_datetime(millis: i64) -> MirrorResult<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| MirrorError::InvalidRecord(format!("invalid timestamp {millis}")))
}

/// Convert a stored count column.
///
/// # Errors
/// Returns `InvalidRecord` for negative values.
pub fn count_from_sql(value: i64) -> MirrorResult<u64> {
    u64::try_from(value).map_err(|_| MirrorError::InvalidRecord(format!("invalid count {value}")))
}

/// Convert a count for storage.
///
/// # Errors
/// Returns `InvalidRecord` if the count does not fit in an `INTEGER`.
pub fn count_to_sql(value: u64) -> MirrorResult<i64> {
    i64::try_from(value).map_err(|_| MirrorError::InvalidRecord(format!("count too large {value}")))
}
