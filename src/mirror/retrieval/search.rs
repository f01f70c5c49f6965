//! Filtered conversation search.

use std::sync::Arc;

use rusqlite::types::Value;
use tracing::debug;

use crate::mirror::core::conversation::Conversation;
use crate::mirror::core::errors::MirrorResult;
use crate::mirror::core::filters::ConversationFilters;
use crate::mirror::storage::conversation_store::{
    RawConversation, SELECT_CONVERSATION, load_details, read_header,
};
use crate::mirror::storage::pool::SqlitePool;
use crate::mirror::storage::schema::CONTAINS_FN;

/// Runs [`ConversationFilters`] against the mirror.
pub struct ConversationSearcher {
    pool: Arc<SqlitePool>,
    max_limit: usize,
}

impl ConversationSearcher {
    /// Create a searcher; `max_limit` caps every request.
    #[must_use]
    pub const fn new(pool: Arc<SqlitePool>, max_limit: usize) -> Self {
        Self { pool, max_limit }
    }

    /// Conversations matching every filter, newest `updated_at` first.
    ///
    /// # Errors
    /// Returns `InvalidFilter` for an inverted date range or a storage error.
    pub async fn search(&self, filters: &ConversationFilters) -> MirrorResult<Vec<Conversation>> {
        filters.validate()?;
        let limit = filters.effective_limit(self.max_limit);
        if limit == 0 {
            return Ok(Vec::new());
        }

        let (sql, params) = build_query(filters, limit);
        debug!(%sql, limit, "Searching conversations");

        let conn = self.pool.acquire().await?;
        let rows = conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let mut rows = stmt
                    .query_map(rusqlite::params_from_iter(params), read_header)?
                    .collect::<Result<Vec<RawConversation>, rusqlite::Error>>()?;
                for raw in &mut rows {
                    load_details(conn, raw)?;
                }
                Ok(rows)
            })
            .await?;

        rows.into_iter()
            .map(RawConversation::into_conversation)
            .collect()
    }
}

/// SQL text and positional parameters for a validated filter set.
fn build_query(filters: &ConversationFilters, limit: usize) -> (String, Vec<Value>) {
    let mut clauses: Vec<String> = Vec::new();
    let mut params: Vec<Value> = Vec::new();

    if let Some(start) = filters.start_date {
        params.push(Value::Integer(start.timestamp_millis()));
        clauses.push(format!("c.updated_at >= ?{}", params.len()));
    }
    if let Some(end) = filters.end_date {
        params.push(Value::Integer(end.timestamp_millis()));
        clauses.push(format!("c.updated_at <= ?{}", params.len()));
    }
    if let Some(email) = &filters.customer_email {
        params.push(Value::Text(email.clone()));
        clauses.push(format!("c.customer_email = ?{}", params.len()));
    }
    if let Some(tags) = filters.tag_set() {
        let mut slots = Vec::with_capacity(tags.len());
        for tag in tags {
            params.push(Value::Text(tag.clone()));
            slots.push(format!("?{}", params.len()));
        }
        clauses.push(format!(
            "EXISTS (SELECT 1 FROM conversation_tags t WHERE t.conversation_id = c.id AND t.tag IN ({}))",
            slots.join(", ")
        ));
    }
    if let Some(text) = filters.text() {
        params.push(Value::Text(text.to_string()));
        clauses.push(format!(
            "EXISTS (SELECT 1 FROM messages m WHERE m.conversation_id = c.id AND {CONTAINS_FN}(m.body, ?{}))",
            params.len()
        ));
    }

    let mut sql = SELECT_CONVERSATION.to_string();
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    params.push(Value::Integer(i64::try_from(limit).unwrap_or(i64::MAX)));
    sql.push_str(&format!(
        " ORDER BY c.updated_at DESC, c.id ASC LIMIT ?{}",
        params.len()
    ));
    (sql, params)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::{DateTime, TimeZone, Utc};

    use super::*;
    use crate::mirror::core::conversation::{AuthorType, Message};
    use crate::mirror::core::errors::MirrorError;
    use crate::mirror::storage::conversation_store::{ConversationStore, SqliteConversationStore};

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, 12, 0, 0).unwrap()
    }

    fn conversation(id: &str, updated: u32, email: &str, tags: &[&str], body: &str) -> Conversation {
        Conversation::new(id, at(1), at(updated))
            .with_customer_email(email)
            .with_tags(tags.iter().copied())
            .with_message(Message::new(format!("{id}-1"), AuthorType::Customer, body, at(1)))
            .with_message(Message::new(format!("{id}-2"), AuthorType::Agent, "Thanks for reaching out", at(1)))
    }

    async fn seeded(max_limit: usize) -> (tempfile::TempDir, ConversationSearcher) {
        let dir = tempfile::tempdir().unwrap();
        let pool = Arc::new(
            SqlitePool::open(dir.path().join("data.db"), 2, Duration::from_secs(5))
                .await
                .unwrap(),
        );
        SqliteConversationStore::new(Arc::clone(&pool))
            .store_conversations(vec![
                conversation("a", 5, "ann@example.com", &["billing"], "Need a REFUND please"),
                conversation("b", 7, "bob@example.com", &["bug"], "The app crashes"),
                conversation("c", 7, "ann@example.com", &["billing", "vip"], "Invoice question"),
                conversation("d", 2, "dan@example.com", &[], "refund status?"),
            ])
            .await
            .unwrap();
        (dir, ConversationSearcher::new(pool, max_limit))
    }

    fn ids(results: &[Conversation]) -> Vec<&str> {
        results.iter().map(|c| c.id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_no_filters_orders_by_updated_then_id() {
        let (_dir, searcher) = seeded(500).await;
        let results = searcher.search(&ConversationFilters::new()).await.unwrap();
        assert_eq!(ids(&results), vec!["b", "c", "a", "d"]);
        assert_eq!(results[0].messages.len(), 2);
    }

    #[tokio::test]
    async fn test_text_is_case_insensitive_substring() {
        let (_dir, searcher) = seeded(500).await;
        let results = searcher
            .search(&ConversationFilters::new().with_query("refund"))
            .await
            .unwrap();
        assert_eq!(ids(&results), vec!["a", "d"]);

        let padded = searcher
            .search(&ConversationFilters::new().with_query(" refund "))
            .await
            .unwrap();
        assert_eq!(ids(&padded), vec!["a"]);

        let blank = searcher
            .search(&ConversationFilters::new().with_query("  "))
            .await
            .unwrap();
        assert_eq!(blank.len(), 4);
    }

    #[tokio::test]
    async fn test_date_range_is_inclusive_on_updated_at() {
        let (_dir, searcher) = seeded(500).await;
        let results = searcher
            .search(&ConversationFilters::new().with_date_range(Some(at(5)), Some(at(7))))
            .await
            .unwrap();
        assert_eq!(ids(&results), vec!["b", "c", "a"]);

        let open_end = searcher
            .search(&ConversationFilters::new().with_date_range(None, Some(at(2))))
            .await
            .unwrap();
        assert_eq!(ids(&open_end), vec!["d"]);
    }

    #[tokio::test]
    async fn test_email_and_tags_combine() {
        let (_dir, searcher) = seeded(500).await;
        let by_email = searcher
            .search(&ConversationFilters::new().with_customer_email("ann@example.com"))
            .await
            .unwrap();
        assert_eq!(ids(&by_email), vec!["c", "a"]);

        let by_tags = searcher
            .search(&ConversationFilters::new().with_tags(["vip", "bug"]))
            .await
            .unwrap();
        assert_eq!(ids(&by_tags), vec!["b", "c"]);

        let combined = searcher
            .search(
                &ConversationFilters::new()
                    .with_customer_email("ann@example.com")
                    .with_tags(["billing"])
                    .with_query("invoice"),
            )
            .await
            .unwrap();
        assert_eq!(ids(&combined), vec!["c"]);
    }

    #[tokio::test]
    async fn test_limit_is_capped_and_empty_is_ok() {
        let (_dir, searcher) = seeded(2).await;
        let capped = searcher
            .search(&ConversationFilters::new().with_limit(50))
            .await
            .unwrap();
        assert_eq!(capped.len(), 2);

        let none = searcher
            .search(&ConversationFilters::new().with_customer_email("nobody@example.com"))
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_inverted_range_rejected() {
        let (_dir, searcher) = seeded(500).await;
        let result = searcher
            .search(&ConversationFilters::new().with_date_range(Some(at(7)), Some(at(1))))
            .await;
        assert!(matches!(result, Err(MirrorError::InvalidFilter(_))));
    }

    #[test]
    fn test_query_numbers_parameters_in_order() {
        let filters = ConversationFilters::new()
            .with_customer_email("x@example.com")
            .with_tags(["a", "b"])
            .with_query("hi");
        let (sql, params) = build_query(&filters, 10);
        assert!(sql.contains("c.customer_email = ?1"));
        assert!(sql.contains("IN (?2, ?3)"));
        assert!(sql.contains(&format!("{CONTAINS_FN}(m.body, ?4)")));
        assert!(sql.ends_with("LIMIT ?5"));
        assert_eq!(params.len(), 5);
    }
}
