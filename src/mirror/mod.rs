//! Local conversation mirror.
//!
//! Conversations fetched from the remote support API are persisted in one
//! `SQLite` file together with the time ranges already fetched. Callers ask
//! how well a window is covered before fetching, and search or look up
//! conversations without touching the remote API.

pub mod core;
pub mod engine;
pub mod maintenance;
pub mod retrieval;
pub mod storage;

pub use self::core::{
    AuthorType, Conversation, ConversationFilters, Coverage, Message, MirrorConfig, MirrorError,
    MirrorResult, PartKind, SyncPeriod, SyncStats,
};
pub use engine::{ConversationSource, Freshness, MirrorEngine, SourceBatch};
pub use maintenance::BackgroundSync;
pub use retrieval::parse_timeframe;
pub use storage::{MirrorStatus, StoreReport};
