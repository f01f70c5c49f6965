//! Boundary to the remote conversation API.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::mirror::core::conversation::Conversation;
use crate::mirror::core::errors::MirrorResult;

/// Conversations fetched for one window.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceBatch {
    /// Conversations updated inside the window.
    pub conversations: Vec<Conversation>,
    /// Remote API calls spent on the fetch.
    pub api_calls: u64,
}

/// Fetches conversations from the remote support API.
///
/// Implementations own pagination, rate limiting and retries against the
/// remote service; the mirror only sees the finished batch.
#[async_trait]
pub trait ConversationSource: Send + Sync {
    /// Fetch every conversation updated within `[start, end]`.
    async fn fetch_window(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> MirrorResult<SourceBatch>;
}
