use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use resq_core::{
    DEFAULT_MAX_RETRIES, EventId, EventStatus, EventType, NetworkState, PersonnelStatusInput,
    QueuedEvent,
};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use crate::error::QueueError;
use crate::monitor::{NetworkMonitor, Subscription};
use crate::storage::{CleanupStats, EventStorage, StatusUpdate, StorageStats};

/// Which event, if any, the processor is currently submitting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingState {
    pub is_processing: bool,
    pub current_event_id: Option<EventId>,
}

/// Shared handle to the offline queue.
///
/// Owns the durable event list plus two observable flags: the processor's
/// progress and the last known connectivity.
pub struct QueueStore<S> {
    inner: Arc<Inner<S>>,
}

struct Inner<S> {
    storage: S,
    processing: watch::Sender<ProcessingState>,
    network: watch::Sender<Option<NetworkState>>,
    listener: Mutex<Option<Subscription>>,
}

impl<S> Clone for QueueStore<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: EventStorage> QueueStore<S> {
    /// Open the queue on top of `storage`.
    ///
    /// Events left in `Processing` by a previous run are moved back to
    /// `Pending` so they are retried.
    pub async fn open(storage: S) -> Result<Self, QueueError> {
        let reset = storage
            .reset_interrupted()
            .await
            .map_err(QueueError::storage)?;
        if reset > 0 {
            warn!(count = reset, "Recovered events interrupted mid-submission");
        }

        let (processing, _) = watch::channel(ProcessingState::default());
        let (network, _) = watch::channel(None);

        Ok(Self {
            inner: Arc::new(Inner {
                storage,
                processing,
                network,
                listener: Mutex::new(None),
            }),
        })
    }

    pub fn storage(&self) -> &S {
        &self.inner.storage
    }

    /// Append an event in `Pending` state and return its id.
    #[instrument(skip_all, fields(%event_type))]
    pub async fn add_event(
        &self,
        event_type: EventType,
        data: serde_json::Value,
        max_retries: Option<u32>,
    ) -> Result<EventId, QueueError> {
        let event = QueuedEvent::new(
            event_type,
            data,
            max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
        );
        let id = event.id;

        self.inner
            .storage
            .insert(event)
            .await
            .map_err(QueueError::storage)?;

        info!(event_id = %id, "Event queued");
        Ok(id)
    }

    pub async fn enqueue_personnel_status(
        &self,
        input: &PersonnelStatusInput,
        max_retries: Option<u32>,
    ) -> Result<EventId, QueueError> {
        let data = serde_json::to_value(input)?;
        self.add_event(EventType::PersonnelStatus, data, max_retries)
            .await
    }

    /// Events the next flush pass should attempt, oldest first.
    pub async fn get_pending_events(&self) -> Result<Vec<QueuedEvent>, QueueError> {
        self.inner
            .storage
            .fetch_pending()
            .await
            .map_err(QueueError::storage)
    }

    pub async fn events(&self) -> Result<Vec<QueuedEvent>, QueueError> {
        self.inner.storage.list().await.map_err(QueueError::storage)
    }

    pub async fn event(&self, id: EventId) -> Result<Option<QueuedEvent>, QueueError> {
        self.inner.storage.get(id).await.map_err(QueueError::storage)
    }

    /// Record a status transition.
    ///
    /// Unknown ids and storage failures are logged, never returned.
    pub async fn update_event_status(
        &self,
        id: EventId,
        status: EventStatus,
        error_message: Option<&str>,
    ) {
        let update = StatusUpdate {
            error_message: error_message.map(Into::into),
            ..StatusUpdate::new(status)
        };
        self.apply_update(id, update).await;
    }

    /// Mark an event `Failed`. A permanent failure spends the rest of its
    /// retry budget so later passes skip it.
    pub async fn record_failure(&self, id: EventId, message: &str, permanent: bool) {
        let update = StatusUpdate::failed(message);
        let update = if permanent { update.exhausting() } else { update };
        self.apply_update(id, update).await;
    }

    async fn apply_update(&self, id: EventId, update: StatusUpdate) {
        let status = update.status;
        match self.inner.storage.update_status(id, update).await {
            Ok(true) => debug!(event_id = %id, %status, "Event status updated"),
            Ok(false) => debug!(event_id = %id, %status, "Status update for unknown event ignored"),
            Err(e) => error!(event_id = %id, %status, error = %e, "Failed to update event status"),
        }
    }

    /// Delete an event. Returns `false` if it did not exist.
    pub async fn remove_event(&self, id: EventId) -> Result<bool, QueueError> {
        let removed = self
            .inner
            .storage
            .remove(id)
            .await
            .map_err(QueueError::storage)?;

        if removed {
            info!(event_id = %id, "Event removed");
        }
        Ok(removed)
    }

    /// Move orphaned `Processing` events back to `Pending`.
    pub async fn reset_interrupted(&self) -> Result<usize, QueueError> {
        self.inner
            .storage
            .reset_interrupted()
            .await
            .map_err(QueueError::storage)
    }

    pub async fn cleanup_completed(&self, retention: Duration) -> Result<CleanupStats, QueueError> {
        self.inner
            .storage
            .cleanup_completed(retention)
            .await
            .map_err(QueueError::storage)
    }

    /// Remove every event. Returns how many were dropped.
    pub async fn clear(&self) -> Result<usize, QueueError> {
        let removed = self
            .inner
            .storage
            .clear()
            .await
            .map_err(QueueError::storage)?;

        warn!(count = removed, "Offline queue cleared");
        Ok(removed)
    }

    pub async fn stats(&self) -> Result<StorageStats, QueueError> {
        self.inner
            .storage
            .get_stats()
            .await
            .map_err(QueueError::storage)
    }

    pub fn set_processing(&self, is_processing: bool, current_event_id: Option<EventId>) {
        self.inner.processing.send_replace(ProcessingState {
            is_processing,
            current_event_id: if is_processing { current_event_id } else { None },
        });
    }

    pub fn processing(&self) -> ProcessingState {
        *self.inner.processing.borrow()
    }

    /// Last connectivity seen by the network listener, `None` before it is wired.
    pub fn network_state(&self) -> Option<NetworkState> {
        *self.inner.network.borrow()
    }

    pub fn is_online(&self) -> bool {
        self.network_state().is_some_and(|s| s.is_online())
    }

    pub fn has_network_listener(&self) -> bool {
        self.lock_listener()
            .as_ref()
            .is_some_and(Subscription::is_active)
    }

    /// Mirror `monitor` into [`Self::network_state`]. Calling it again while a
    /// listener is active does nothing.
    pub async fn initialize_network_listener(
        &self,
        monitor: Arc<dyn NetworkMonitor>,
    ) -> Result<(), QueueError> {
        if self.has_network_listener() {
            debug!("Network listener already initialized");
            return Ok(());
        }

        let initial = monitor.fetch_state().await?;
        self.inner.network.send_replace(Some(initial));
        info!(online = initial.is_online(), "Network listener initialized");

        let mut rx = monitor.subscribe();
        let weak = Arc::downgrade(&self.inner);
        let subscription = Subscription::spawn(move |cancel| async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    changed = rx.changed() => {
                        if changed.is_err() {
                            debug!("Network monitor closed");
                            break;
                        }
                        let state = *rx.borrow_and_update();
                        let Some(inner) = weak.upgrade() else {
                            break;
                        };

                        let was_online = inner.network.borrow().is_some_and(|s| s.is_online());
                        inner.network.send_replace(Some(state));

                        match (was_online, state.is_online()) {
                            (false, true) => info!("Network connectivity restored"),
                            (true, false) => warn!("Network connectivity lost, events will be queued"),
                            _ => debug!(?state, "Network state updated"),
                        }
                    }
                }
            }
        });

        let mut listener = self.lock_listener();
        if listener.as_ref().is_some_and(Subscription::is_active) {
            // Lost a race with a concurrent initializer; keep theirs.
            subscription.unsubscribe();
        } else {
            *listener = Some(subscription);
        }

        Ok(())
    }

    pub fn shutdown_network_listener(&self) {
        if let Some(subscription) = self.lock_listener().take() {
            subscription.unsubscribe();
            info!("Network listener shut down");
        }
    }

    fn lock_listener(&self) -> std::sync::MutexGuard<'_, Option<Subscription>> {
        self.inner
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
