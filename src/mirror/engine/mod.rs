//! Mirror engine orchestration module.

pub mod core;
pub mod source;

pub use self::core::{Freshness, MirrorBackends, MirrorEngine};
pub use source::{ConversationSource, SourceBatch};
