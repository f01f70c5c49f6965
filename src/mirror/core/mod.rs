//! Core mirror types: configuration, errors and models.

pub mod config;
pub mod conversation;
pub mod errors;
pub mod filters;
pub mod sync;

pub use config::{
    BackgroundSyncConfig, MirrorConfig, RemoteConfig, SearchConfig, ServerConfig, StorageConfig,
    SyncConfig,
};
pub use conversation::{AuthorType, Conversation, Message, PartKind};
pub use errors::{MirrorError, MirrorResult};
pub use filters::{ConversationFilters, DEFAULT_SEARCH_LIMIT};
pub use sync::{Coverage, SyncPeriod, SyncStats};
