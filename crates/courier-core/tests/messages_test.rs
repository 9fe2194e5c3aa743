//! PostgreSQL repository tests.
//!
//! Each test creates its own database; all are skipped when `DATABASE_URL`
//! is not set.

use std::collections::HashSet;

use courier_core::{CoreError, MessageId, MessageStatus};
use courier_testing::{MessageBuilder, TestDatabase};

macro_rules! test_db {
    () => {
        match TestDatabase::from_env().await.unwrap() {
            Some(db) => db,
            None => return,
        }
    };
}

#[tokio::test]
async fn claim_returns_oldest_queued_in_order() {
    let db = test_db!();
    let storage = db.storage();

    let newest = MessageBuilder::new().created_offset(30).insert(db.pool()).await.unwrap();
    let oldest = MessageBuilder::new().created_offset(10).insert(db.pool()).await.unwrap();
    let middle = MessageBuilder::new().created_offset(20).insert(db.pool()).await.unwrap();
    MessageBuilder::new()
        .created_offset(0)
        .status(MessageStatus::Failed)
        .retry_count(3)
        .insert(db.pool())
        .await
        .unwrap();

    let batch = storage.messages.claim_next_batch(2).await.unwrap();

    assert_eq!(batch.iter().map(|m| m.id).collect::<Vec<_>>(), vec![oldest.id, middle.id]);
    assert!(batch.iter().all(|m| m.status == MessageStatus::Processing));

    let untouched = storage.messages.find_by_id(newest.id).await.unwrap().unwrap();
    assert_eq!(untouched.status, MessageStatus::Queued);

    db.cleanup().await.unwrap();
}

#[tokio::test]
async fn empty_queue_claims_nothing() {
    let db = test_db!();
    let storage = db.storage();

    assert!(storage.messages.claim_next_batch(10).await.unwrap().is_empty());
    assert!(storage.messages.claim_next_batch(0).await.unwrap().is_empty());

    db.cleanup().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_claims_never_overlap() {
    let db = test_db!();
    let storage = db.storage();

    for offset in 0..60 {
        MessageBuilder::new().created_offset(offset).insert(db.pool()).await.unwrap();
    }

    let tasks = (0..6).map(|_| {
        let storage = storage.clone();
        tokio::spawn(async move {
            let mut claimed = Vec::new();
            loop {
                let batch = storage.messages.claim_next_batch(4).await.unwrap();
                if batch.is_empty() {
                    break;
                }
                claimed.extend(batch.into_iter().map(|m| m.id));
            }
            claimed
        })
    });

    let mut seen: HashSet<MessageId> = HashSet::new();
    for task in futures::future::join_all(tasks).await {
        for id in task.unwrap() {
            assert!(seen.insert(id), "message {id} claimed twice");
        }
    }
    assert_eq!(seen.len(), 60);

    db.cleanup().await.unwrap();
}

#[tokio::test]
async fn mark_sent_records_provider_id_and_time() {
    let db = test_db!();
    let storage = db.storage();
    let message = MessageBuilder::new().insert(db.pool()).await.unwrap();
    storage.messages.claim_next_batch(1).await.unwrap();

    storage.messages.mark_sent(message.id, "prov-9").await.unwrap();

    let stored = storage.messages.find_by_id(message.id).await.unwrap().unwrap();
    assert_eq!(stored.status, MessageStatus::Sent);
    assert_eq!(stored.provider_message_id.as_deref(), Some("prov-9"));
    assert!(stored.sent_at.is_some());
    assert!(stored.is_consistent());

    db.cleanup().await.unwrap();
}

#[tokio::test]
async fn mark_sent_rejects_non_processing_rows() {
    let db = test_db!();
    let storage = db.storage();
    let message = MessageBuilder::new().insert(db.pool()).await.unwrap();

    let queued = storage.messages.mark_sent(message.id, "prov-1").await;
    assert!(matches!(queued, Err(CoreError::InvalidTransition(_))));

    let missing = storage.messages.mark_sent(MessageId::new(), "prov-1").await;
    assert!(matches!(missing, Err(CoreError::NotFound(_))));

    let empty = storage.messages.mark_sent(message.id, "").await;
    assert!(matches!(empty, Err(CoreError::InvalidInput(_))));

    db.cleanup().await.unwrap();
}

#[tokio::test]
async fn mark_failed_requeues_then_fails_at_ceiling() {
    let db = test_db!();
    let storage = db.storage();
    let message = MessageBuilder::new().insert(db.pool()).await.unwrap();

    storage.messages.claim_next_batch(1).await.unwrap();
    let first = storage.messages.mark_failed(message.id, "HTTP 500", 2).await.unwrap();
    assert_eq!(first, MessageStatus::Queued);

    storage.messages.claim_next_batch(1).await.unwrap();
    let second = storage.messages.mark_failed(message.id, "timeout", 2).await.unwrap();
    assert_eq!(second, MessageStatus::Failed);

    let stored = storage.messages.find_by_id(message.id).await.unwrap().unwrap();
    assert_eq!(stored.retry_count, 2);
    assert_eq!(stored.last_error.as_deref(), Some("timeout"));
    assert!(storage.messages.claim_next_batch(1).await.unwrap().is_empty());

    let again = storage.messages.mark_failed(message.id, "late", 2).await;
    assert!(matches!(again, Err(CoreError::InvalidTransition(_))));

    db.cleanup().await.unwrap();
}

#[tokio::test]
async fn create_and_list_sent() {
    let db = test_db!();
    let storage = db.storage();

    let first = storage.messages.create("+15550001111", "one").await.unwrap();
    let second = storage.messages.create("+15550002222", "two").await.unwrap();
    assert_eq!(first.status, MessageStatus::Queued);
    assert_eq!(first.retry_count, 0);

    storage.messages.claim_next_batch(2).await.unwrap();
    storage.messages.mark_sent(first.id, "p-1").await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    storage.messages.mark_sent(second.id, "p-2").await.unwrap();

    let page = storage.messages.list_sent(10, 0).await.unwrap();
    assert_eq!(page.iter().map(|m| m.id).collect::<Vec<_>>(), vec![second.id, first.id]);

    let offset = storage.messages.list_sent(10, 1).await.unwrap();
    assert_eq!(offset.len(), 1);
    assert_eq!(offset[0].id, first.id);

    assert!(storage.messages.list_sent(10, 5).await.unwrap().is_empty());

    db.cleanup().await.unwrap();
}

#[tokio::test]
async fn schema_rejects_sent_without_provider_id() {
    let db = test_db!();

    let result = sqlx::query(
        "INSERT INTO messages (to_phone, content, status) VALUES ('+1', 'x', 'sent')",
    )
    .execute(db.pool())
    .await;
    assert!(matches!(result.map_err(CoreError::from), Err(CoreError::ConstraintViolation(_))));

    db.storage().health_check().await.unwrap();
    db.storage().ensure_schema().await.unwrap();

    db.cleanup().await.unwrap();
}
