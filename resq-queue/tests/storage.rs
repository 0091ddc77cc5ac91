use std::time::Duration;

use jiff::{SignedDuration, Timestamp};
use resq_core::{EventStatus, EventType, QueuedEvent};
use resq_queue::storage::memory::{MemoryStorage, MemoryStorageError};
use resq_queue::storage::sqlite::{SqliteStorage, SqliteStorageError};
use resq_queue::{EventStorage, StatusUpdate};
use serde_json::json;
use tempfile::NamedTempFile;

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

fn event(n: u32) -> QueuedEvent {
    QueuedEvent::new(EventType::PersonnelStatus, json!({ "n": n }), 2)
}

async fn status_lifecycle<S: EventStorage>(storage: &S) -> Result<(), S::Error> {
    let first = event(1);
    let second = event(2);
    let third = event(3);
    let ids = [first.id, second.id, third.id];
    for e in [first, second, third] {
        storage.insert(e).await?;
    }

    let pending: Vec<_> = storage.fetch_pending().await?.iter().map(|e| e.id).collect();
    assert_eq!(pending, ids);

    storage
        .update_status(ids[0], StatusUpdate::new(EventStatus::Processing))
        .await?;
    storage
        .update_status(ids[0], StatusUpdate::new(EventStatus::Completed))
        .await?;
    storage
        .update_status(ids[1], StatusUpdate::failed("502"))
        .await?;

    // A failed event with budget left is still pending.
    let pending: Vec<_> = storage.fetch_pending().await?.iter().map(|e| e.id).collect();
    assert_eq!(pending, vec![ids[1], ids[2]]);

    storage
        .update_status(ids[1], StatusUpdate::failed("502"))
        .await?;
    let pending: Vec<_> = storage.fetch_pending().await?.iter().map(|e| e.id).collect();
    assert_eq!(pending, vec![ids[2]]);

    let stats = storage.get_stats().await?;
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.exhausted, 1);
    assert_eq!(stats.pending, 1);
    assert_eq!(stats.total, 3);

    assert!(storage.remove(ids[2]).await?);
    assert!(!storage.remove(ids[2]).await?);
    assert_eq!(storage.list().await?.len(), 2);

    Ok(())
}

async fn refused_event_is_terminal<S: EventStorage>(storage: &S) -> Result<(), S::Error> {
    let refused = event(1);
    let retried = event(2);
    let (refused_id, retried_id) = (refused.id, retried.id);
    storage.insert(refused).await?;
    storage.insert(retried).await?;

    storage
        .update_status(refused_id, StatusUpdate::failed("422").exhausting())
        .await?;
    storage
        .update_status(retried_id, StatusUpdate::failed("503"))
        .await?;

    let stored = storage.get(refused_id).await?.unwrap();
    assert_eq!(stored.status, EventStatus::Failed);
    assert_eq!(stored.retry_count, 2);
    assert_eq!(stored.error_message.as_deref(), Some("422"));

    let pending: Vec<_> = storage.fetch_pending().await?.iter().map(|e| e.id).collect();
    assert_eq!(pending, vec![retried_id]);
    assert_eq!(storage.get(retried_id).await?.unwrap().retry_count, 1);
    Ok(())
}

async fn interrupted_events_reset<S: EventStorage>(storage: &S) -> Result<(), S::Error> {
    let e = event(1);
    let id = e.id;
    storage.insert(e).await?;
    storage
        .update_status(id, StatusUpdate::new(EventStatus::Processing))
        .await?;
    assert!(storage.fetch_pending().await?.is_empty());

    assert_eq!(storage.reset_interrupted().await?, 1);

    let stored = storage.get(id).await?.unwrap();
    assert_eq!(stored.status, EventStatus::Pending);
    assert_eq!(stored.retry_count, 0);
    Ok(())
}

async fn retention_keeps_recent_completions<S: EventStorage>(storage: &S) -> Result<(), S::Error> {
    let now = Timestamp::now();
    let stale = event(1);
    let fresh = event(2);
    let failed = event(3);
    let ids = [stale.id, fresh.id, failed.id];
    for e in [stale, fresh, failed] {
        storage.insert(e).await?;
    }

    let old = now - SignedDuration::from_hours(25);
    storage
        .update_status(ids[0], StatusUpdate::new(EventStatus::Completed).at(old))
        .await?;
    storage
        .update_status(
            ids[1],
            StatusUpdate::new(EventStatus::Completed).at(now - SignedDuration::from_hours(23)),
        )
        .await?;
    storage
        .update_status(ids[2], StatusUpdate::failed("x").at(old))
        .await?;

    let stats = storage.cleanup_completed(DAY).await?;
    assert_eq!(stats.completed_deleted, 1);

    let remaining: Vec<_> = storage.list().await?.iter().map(|e| e.id).collect();
    assert_eq!(remaining, vec![ids[1], ids[2]]);

    assert_eq!(storage.clear().await?, 2);
    assert!(storage.list().await?.is_empty());
    Ok(())
}

/// memory storage tests
#[tokio::test]
async fn memory_status_lifecycle() -> Result<(), MemoryStorageError> {
    status_lifecycle(&MemoryStorage::default()).await
}

#[tokio::test]
async fn memory_interrupted_events_reset() -> Result<(), MemoryStorageError> {
    interrupted_events_reset(&MemoryStorage::default()).await
}

#[tokio::test]
async fn memory_refused_event_is_terminal() -> Result<(), MemoryStorageError> {
    refused_event_is_terminal(&MemoryStorage::default()).await
}

#[tokio::test]
async fn memory_retention() -> Result<(), MemoryStorageError> {
    retention_keeps_recent_completions(&MemoryStorage::default()).await
}

/// sqlite storage tests
#[tokio::test]
async fn sqlite_status_lifecycle() -> Result<(), SqliteStorageError> {
    status_lifecycle(&SqliteStorage::new_in_memory().await?).await
}

#[tokio::test]
async fn sqlite_interrupted_events_reset() -> Result<(), SqliteStorageError> {
    interrupted_events_reset(&SqliteStorage::new_in_memory().await?).await
}

#[tokio::test]
async fn sqlite_refused_event_is_terminal() -> Result<(), SqliteStorageError> {
    refused_event_is_terminal(&SqliteStorage::new_in_memory().await?).await
}

#[tokio::test]
async fn sqlite_retention() -> Result<(), SqliteStorageError> {
    retention_keeps_recent_completions(&SqliteStorage::new_in_memory().await?).await
}

#[tokio::test]
async fn sqlite_queue_survives_reopen() -> Result<(), SqliteStorageError> {
    let file = NamedTempFile::new().unwrap();

    let first = event(1);
    let second = event(2);
    let ids = [first.id, second.id];
    {
        let storage = SqliteStorage::new(file.path()).await?;
        storage.insert(first).await?;
        storage.insert(second).await?;
        storage
            .update_status(ids[0], StatusUpdate::failed("offline"))
            .await?;
    }

    let storage = SqliteStorage::new(file.path()).await?;
    let events = storage.list().await?;

    assert_eq!(events.iter().map(|e| e.id).collect::<Vec<_>>(), ids);
    assert_eq!(events[0].status, EventStatus::Failed);
    assert_eq!(events[0].retry_count, 1);
    assert_eq!(events[0].error_message.as_deref(), Some("offline"));
    assert_eq!(events[1].data, json!({"n": 2}));
    Ok(())
}
