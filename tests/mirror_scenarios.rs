//! End-to-end scenarios against an on-disk mirror.

use chrono::{DateTime, Duration, TimeZone, Utc};
use fastintercom::mirror::{
    AuthorType, Conversation, ConversationFilters, Message, MirrorConfig, MirrorEngine, SyncStats,
};

fn day(d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, d, 0, 0, 0).unwrap()
}

async fn engine(dir: &tempfile::TempDir) -> MirrorEngine {
    let mut config = MirrorConfig::default();
    config.storage.database_path = dir.path().join("data.db");
    config.storage.pool_size = 2;
    MirrorEngine::open(config).await.unwrap()
}

fn stats(total: u64) -> SyncStats {
    SyncStats {
        total_conversations: total,
        new_conversations: total,
        ..SyncStats::default()
    }
}

#[tokio::test]
async fn overlapping_syncs_merge_into_one_period() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(&dir).await;

    engine.record_sync(day(1), day(3), stats(5)).await.unwrap();
    let half = engine.coverage(day(2), day(4)).await.unwrap();
    assert!((half.fraction - 0.5).abs() < 1e-9);

    engine.record_sync(day(2), day(4), stats(3)).await.unwrap();
    let periods = engine.sync_periods().await.unwrap();
    assert_eq!(periods.len(), 1);
    assert_eq!(periods[0].start, day(1));
    assert_eq!(periods[0].end, day(4));
    assert_eq!(periods[0].conversation_count, 8);

    let full = engine.coverage(day(1), day(4)).await.unwrap();
    assert!(full.is_complete());
    assert!(full.most_recent_sync.is_some());

    let outside = engine.coverage(day(10), day(12)).await.unwrap();
    assert!(outside.fraction.abs() < f64::EPSILON);
    assert!(outside.most_recent_sync.is_none());
}

#[tokio::test]
async fn stored_conversations_are_searchable_and_counted() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(&dir).await;

    let refund = Conversation::new("c1", day(1), day(2))
        .with_customer_email("ana@example.com")
        .with_tags(["billing"])
        .with_message(Message::new("m1", AuthorType::Customer, "I want a REFUND please", day(1)))
        .with_message(Message::new("m2", AuthorType::Agent, "Sure, processing it", day(2)));
    let login = Conversation::new("c2", day(3), day(4))
        .with_customer_email("bo@example.com")
        .with_message(Message::new("m3", AuthorType::Customer, "Cannot log in", day(3)));

    assert_eq!(engine.store_conversations(vec![refund, login]).await.unwrap(), 2);

    let hits = engine
        .search(&ConversationFilters::new().with_query("refund"))
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, "c1");
    assert_eq!(hits[0].messages.len(), 2);

    let newest_first = engine.search(&ConversationFilters::new()).await.unwrap();
    let ids: Vec<&str> = newest_first.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, ["c2", "c1"]);

    let by_date = engine
        .search(&ConversationFilters::new().with_date_range(Some(day(3)), Some(day(5))))
        .await
        .unwrap();
    assert_eq!(by_date.len(), 1);
    assert_eq!(by_date[0].id, "c2");

    engine.record_sync(day(1), day(5), stats(2)).await.unwrap();
    let status = engine.status().await.unwrap();
    assert_eq!(status.total_conversations, 2);
    assert_eq!(status.total_messages, 3);
    assert_eq!(status.total_sync_periods, 1);
    assert!(status.database_size_bytes > 0);
    assert!(status.last_sync.is_some());
    assert_eq!(status.recent_syncs.len(), 1);
}

#[tokio::test]
async fn restoring_a_conversation_replaces_its_messages() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(&dir).await;

    let first = Conversation::new("c1", day(1), day(1))
        .with_message(Message::new("m1", AuthorType::Customer, "hello", day(1)));
    engine.store_conversations(vec![first]).await.unwrap();

    let second = Conversation::new("c1", day(1), day(1) + Duration::hours(2))
        .with_message(Message::new("m2", AuthorType::Agent, "hi there", day(1)));
    engine.store_conversations(vec![second]).await.unwrap();

    let stored = engine.get_conversation("c1").await.unwrap().unwrap();
    assert_eq!(stored.updated_at, day(1) + Duration::hours(2));
    assert_eq!(stored.messages.len(), 1);
    assert_eq!(stored.messages[0].id, "m2");
    assert!(engine.get_conversation("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn empty_mirror_reports_zeroes() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(&dir).await;

    let status = engine.status().await.unwrap();
    assert_eq!(status.total_conversations, 0);
    assert_eq!(status.total_messages, 0);
    assert_eq!(status.total_sync_periods, 0);
    assert!(status.last_sync.is_none());
    assert!(status.recent_syncs.is_empty());
    assert_eq!(status.database_path, dir.path().join("data.db"));
}
