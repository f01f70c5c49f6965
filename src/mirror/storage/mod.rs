//! `SQLite` storage: pool, schema, conversations, sync periods and status.

pub mod conversation_store;
pub mod pool;
pub mod request_log;
pub mod schema;
pub mod status;
pub mod sync_tracker;

pub use conversation_store::{
    ConversationStore, SqliteConversationStore, StoreFuture, StoreReport,
};
pub use pool::{PooledConnection, SqlitePool};
pub use request_log::{RequestLog, RequestPattern};
pub use status::{MirrorStatus, StatusReporter};
pub use sync_tracker::{SqliteSyncTracker, SyncTracker};
