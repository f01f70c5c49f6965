//! Search filters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::mirror::core::errors::{MirrorError, MirrorResult};

/// Default number of results when a filter sets no limit.
pub const DEFAULT_SEARCH_LIMIT: usize = 100;

/// Filters for a conversation search. Built per request, never stored.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationFilters {
    /// Case-insensitive text looked up in message bodies.
    pub query: Option<String>,
    /// Lower bound on `updated_at` (inclusive).
    pub start_date: Option<DateTime<Utc>>,
    /// Upper bound on `updated_at` (inclusive).
    pub end_date: Option<DateTime<Utc>>,
    /// Exact customer email.
    pub customer_email: Option<String>,
    /// Match conversations carrying any of these tags.
    pub tags: Option<Vec<String>>,
    /// Maximum number of results, capped by the engine ceiling.
    pub limit: usize,
}

impl Default for ConversationFilters {
    fn default() -> Self {
        Self {
            query: None,
            start_date: None,
            end_date: None,
            customer_email: None,
            tags: None,
            limit: DEFAULT_SEARCH_LIMIT,
        }
    }
}

impl ConversationFilters {
    /// Create filters with default limit and no constraints.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the free-text query.
    #[must_use]
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    /// Set the `updated_at` range.
    #[must_use]
    pub const fn with_date_range(
        mut self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Self {
        self.start_date = start;
        self.end_date = end;
        self
    }

    /// Set the customer email.
    #[must_use]
    pub fn with_customer_email(mut self, email: impl Into<String>) -> Self {
        self.customer_email = Some(email.into());
        self
    }

    /// Set the tag set.
    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = Some(tags.into_iter().map(Into::into).collect());
        self
    }

    /// Set the result limit.
    #[must_use]
    pub const fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Reject structurally invalid filters.
    ///
    /// # Errors
    /// Returns `InvalidFilter` when `start_date` is after `end_date`.
    pub fn validate(&self) -> MirrorResult<()> {
        if let (Some(start), Some(end)) = (self.start_date, self.end_date)
            && start > end
        {
            return Err(MirrorError::InvalidFilter(format!(
                "start date {} is after end date {}",
                start.to_rfc3339(),
                end.to_rfc3339()
            )));
        }
        Ok(())
    }

    /// Query text as given; a blank query is no filter.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        self.query
            .as_deref()
            .filter(|text| !text.trim().is_empty())
    }

    /// Non-empty tag list, if any.
    #[must_use]
    pub fn tag_set(&self) -> Option<&[String]> {
        self.tags.as_deref().filter(|tags| !tags.is_empty())
    }

    /// Limit after applying the hard ceiling.
    #[must_use]
    pub fn effective_limit(&self, ceiling: usize) -> usize {
        self.limit.min(ceiling)
    }
}
