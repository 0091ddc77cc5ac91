use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use resq_core::{EventId, EventStatus, QueuedEvent};

use crate::storage::{
    CleanupStats, EventStorage, StatusUpdate, StorageStats, is_expired, retention_cutoff,
};

/// In-memory storage implementation.
///
/// Nothing survives a restart. Used by tests and when the daemon is
/// configured without a database.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    events: Arc<Mutex<Vec<QueuedEvent>>>,
}

/// Error type for MemoryStorage
#[derive(Debug)]
pub enum MemoryStorageError {
    MutexPoisoned(String),
}

impl std::error::Error for MemoryStorageError {}

impl fmt::Display for MemoryStorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryStorageError::MutexPoisoned(msg) => write!(f, "Mutex poisoned: {}", msg),
        }
    }
}

impl<T> From<PoisonError<T>> for MemoryStorageError {
    fn from(err: PoisonError<T>) -> Self {
        MemoryStorageError::MutexPoisoned(err.to_string())
    }
}

#[async_trait]
impl EventStorage for MemoryStorage {
    type Error = MemoryStorageError;

    async fn insert(&self, event: QueuedEvent) -> Result<(), Self::Error> {
        let mut events = self.events.lock()?;
        events.push(event);
        Ok(())
    }

    async fn get(&self, id: EventId) -> Result<Option<QueuedEvent>, Self::Error> {
        let events = self.events.lock()?;
        Ok(events.iter().find(|e| e.id == id).cloned())
    }

    async fn list(&self) -> Result<Vec<QueuedEvent>, Self::Error> {
        let events = self.events.lock()?;
        Ok(events.clone())
    }

    async fn fetch_pending(&self) -> Result<Vec<QueuedEvent>, Self::Error> {
        let events = self.events.lock()?;

        Ok(events.iter().filter(|e| e.is_pending()).cloned().collect())
    }

    async fn update_status(&self, id: EventId, update: StatusUpdate) -> Result<bool, Self::Error> {
        let mut events = self.events.lock()?;

        match events.iter_mut().find(|e| e.id == id) {
            Some(event) => {
                update.apply(event);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn remove(&self, id: EventId) -> Result<bool, Self::Error> {
        let mut events = self.events.lock()?;

        let before = events.len();
        events.retain(|e| e.id != id);
        Ok(events.len() != before)
    }

    async fn reset_interrupted(&self) -> Result<usize, Self::Error> {
        let mut events = self.events.lock()?;

        let mut reset = 0;
        for event in events
            .iter_mut()
            .filter(|e| e.status == EventStatus::Processing)
        {
            StatusUpdate::new(EventStatus::Pending).apply(event);
            reset += 1;
        }

        Ok(reset)
    }

    async fn cleanup_completed(&self, older_than: Duration) -> Result<CleanupStats, Self::Error> {
        let mut events = self.events.lock()?;
        let cutoff = retention_cutoff(older_than);

        let before = events.len();
        events.retain(|e| !is_expired(e, cutoff));

        Ok(CleanupStats {
            completed_deleted: before - events.len(),
        })
    }

    async fn clear(&self) -> Result<usize, Self::Error> {
        let mut events = self.events.lock()?;
        let removed = events.len();
        events.clear();
        Ok(removed)
    }

    async fn get_stats(&self) -> Result<StorageStats, Self::Error> {
        let events = self.events.lock()?;

        let mut stats = StorageStats {
            total: events.len(),
            ..StorageStats::default()
        };
        for event in events.iter() {
            match event.status {
                EventStatus::Pending => stats.pending += 1,
                EventStatus::Processing => stats.processing += 1,
                EventStatus::Completed => stats.completed += 1,
                EventStatus::Failed if event.retries_exhausted() => stats.exhausted += 1,
                EventStatus::Failed => stats.failed += 1,
            }
        }

        Ok(stats)
    }
}
