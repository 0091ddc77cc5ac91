pub mod memory;
pub mod sqlite;

use std::time::Duration;

use async_trait::async_trait;
use jiff::Timestamp;
use resq_core::{BoxStr, EventId, EventStatus, QueuedEvent};
use serde::Serialize;

/// Storage abstraction for the offline queue.
///
/// Implementations persist events in insertion order and apply the status
/// bookkeeping described on [`StatusUpdate`].
#[async_trait]
pub trait EventStorage: Send + Sync + 'static {
    /// Error type specific to this storage implementation
    type Error: std::error::Error + Send + Sync + 'static;

    /// Append a new event.
    async fn insert(&self, event: QueuedEvent) -> Result<(), Self::Error>;

    async fn get(&self, id: EventId) -> Result<Option<QueuedEvent>, Self::Error>;

    /// All events, oldest first.
    async fn list(&self) -> Result<Vec<QueuedEvent>, Self::Error>;

    /// Events eligible for the next flush pass, oldest first.
    async fn fetch_pending(&self) -> Result<Vec<QueuedEvent>, Self::Error>;

    /// Apply a status transition. Returns `false` when the id is unknown.
    async fn update_status(&self, id: EventId, update: StatusUpdate) -> Result<bool, Self::Error>;

    /// Returns `false` when the id is unknown.
    async fn remove(&self, id: EventId) -> Result<bool, Self::Error>;

    /// Move every `Processing` event back to `Pending`.
    async fn reset_interrupted(&self) -> Result<usize, Self::Error>;

    /// Delete completed events whose last attempt is older than `older_than`.
    async fn cleanup_completed(&self, older_than: Duration) -> Result<CleanupStats, Self::Error>;

    /// Delete everything. Returns the number of removed events.
    async fn clear(&self) -> Result<usize, Self::Error>;

    async fn get_stats(&self) -> Result<StorageStats, Self::Error>;
}

/// A status transition together with its bookkeeping inputs.
///
/// * `Failed` increments `retry_count` and records the message and attempt time.
///   An exhausting failure also raises `retry_count` to `max_retries`.
/// * `Processing` and `Completed` record the attempt time.
/// * `Pending` leaves the counters and timestamps alone.
///
/// Every status other than `Failed` clears the error message.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub status: EventStatus,
    pub error_message: Option<BoxStr>,
    pub at: Timestamp,
    /// Spend the remaining retry budget. Only meaningful for `Failed`.
    pub exhaust: bool,
}

impl StatusUpdate {
    pub fn new(status: EventStatus) -> Self {
        Self {
            status,
            error_message: None,
            at: Timestamp::now(),
            exhaust: false,
        }
    }

    pub fn failed(message: impl Into<BoxStr>) -> Self {
        Self {
            status: EventStatus::Failed,
            error_message: Some(message.into()),
            at: Timestamp::now(),
            exhaust: false,
        }
    }

    pub fn at(mut self, at: Timestamp) -> Self {
        self.at = at;
        self
    }

    pub fn exhausting(mut self) -> Self {
        self.exhaust = true;
        self
    }

    /// Apply this transition to an in-memory event.
    pub fn apply(&self, event: &mut QueuedEvent) {
        event.status = self.status;
        match self.status {
            EventStatus::Failed => {
                event.retry_count = event.retry_count.saturating_add(1);
                if self.exhaust {
                    event.retry_count = event.retry_count.max(event.max_retries);
                }
                event.error_message = self.error_message.clone();
                event.last_attempt_at = Some(self.at);
            }
            EventStatus::Processing | EventStatus::Completed => {
                event.error_message = None;
                event.last_attempt_at = Some(self.at);
            }
            EventStatus::Pending => {
                event.error_message = None;
            }
        }
    }
}

/// Statistics about stored events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StorageStats {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    /// Failed events that will still be retried.
    pub failed: usize,
    /// Failed events whose retry budget is spent.
    pub exhausted: usize,
    pub total: usize,
}

/// Statistics about a cleanup operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupStats {
    /// Number of completed events deleted.
    pub completed_deleted: usize,
}

/// Whether a completed event falls outside the retention window.
pub(crate) fn is_expired(event: &QueuedEvent, cutoff: Timestamp) -> bool {
    event.status == EventStatus::Completed
        && event.last_attempt_at.unwrap_or(event.created_at) < cutoff
}

/// Cutoff timestamp for a retention window ending now.
pub(crate) fn retention_cutoff(older_than: Duration) -> Timestamp {
    let now = Timestamp::now();
    jiff::SignedDuration::try_from(older_than)
        .ok()
        .and_then(|window| now.checked_sub(window).ok())
        .unwrap_or(Timestamp::MIN)
}
