use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use resq_core::{
    AppState, DEFAULT_MAX_RETRIES, EventId, EventStatus, EventType, PersonnelStatusInput,
    QueuedEvent,
};
use serde::Serialize;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use crate::error::QueueError;
use crate::monitor::{
    AppLifecycle, BackgroundTask, BackgroundTaskRegistry, BackgroundTaskResult, NetworkMonitor,
    Subscription, task_from_fn,
};
use crate::pii;
use crate::store::QueueStore;
use crate::storage::EventStorage;
use crate::submit::Submitters;

pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);
pub const DEFAULT_BACKGROUND_TASK_NAME: &str = "offline-queue-processor";

#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Period of the foreground flush timer.
    pub flush_interval: Duration,
    /// How long completed events are kept before the sweep deletes them.
    pub retention: Duration,
    pub background_task_name: String,
    /// Retry ceiling for events enqueued without one.
    pub max_retries: u32,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            retention: DEFAULT_RETENTION,
            background_task_name: DEFAULT_BACKGROUND_TASK_NAME.to_owned(),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

/// Host facilities the processor listens to.
#[derive(Clone)]
pub struct Collaborators {
    pub network: Arc<dyn NetworkMonitor>,
    pub lifecycle: Arc<dyn AppLifecycle>,
    pub registry: Arc<dyn BackgroundTaskRegistry>,
}

/// What asked for a flush pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FlushTrigger {
    Reconnect,
    Foreground,
    Interval,
    Background,
    Enqueue,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FlushState {
    #[default]
    Idle,
    Flushing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Another pass holds the flight guard.
    AlreadyFlushing,
    Offline,
    ConnectivityCheckFailed,
    StorageUnavailable,
}

/// Counters for one completed pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PassReport {
    pub attempted: usize,
    pub completed: usize,
    pub failed: usize,
    /// Failures that spent the event's last retry.
    pub exhausted: usize,
    /// Completed events removed by the retention sweep.
    pub purged: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum FlushOutcome {
    Skipped { reason: SkipReason },
    Completed(PassReport),
}

impl FlushOutcome {
    pub fn report(&self) -> Option<&PassReport> {
        match self {
            FlushOutcome::Completed(report) => Some(report),
            FlushOutcome::Skipped { .. } => None,
        }
    }
}

/// Snapshot of the processor's scheduling state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessorStatus {
    pub state: FlushState,
    pub interval_running: bool,
    pub listening_network: bool,
    pub listening_app_state: bool,
    pub coalesced_triggers: u64,
}

/// Drains the offline queue whenever delivery might succeed.
///
/// At most one flush pass runs at a time per processor. Triggers that arrive
/// during a pass are counted and dropped.
pub struct QueueProcessor<S> {
    inner: Arc<Inner<S>>,
}

struct Inner<S> {
    store: QueueStore<S>,
    collaborators: Collaborators,
    submitters: Submitters,
    config: ProcessorConfig,
    flush: Mutex<FlushState>,
    coalesced: AtomicU64,
    handles: Mutex<Handles>,
}

#[derive(Default)]
struct Handles {
    /// Bumped by `cleanup`. Work started under an older epoch installs nothing.
    epoch: u64,
    interval: Option<Subscription>,
    network: Option<Subscription>,
    app_state: Option<Subscription>,
}

/// Holds the flight guard for one pass. Dropping it returns the processor to
/// `Idle` and clears the store's processing flag, also on early return.
struct FlushGuard<'a, S: EventStorage> {
    inner: &'a Inner<S>,
}

impl<S: EventStorage> Drop for FlushGuard<'_, S> {
    fn drop(&mut self) {
        *lock(&self.inner.flush) = FlushState::Idle;
        self.inner.store.set_processing(false, None);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<S> Clone for QueueProcessor<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: EventStorage> QueueProcessor<S> {
    pub fn new(
        store: QueueStore<S>,
        collaborators: Collaborators,
        submitters: Submitters,
        config: ProcessorConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                collaborators,
                submitters,
                config,
                flush: Mutex::new(FlushState::Idle),
                coalesced: AtomicU64::new(0),
                handles: Mutex::new(Handles::default()),
            }),
        }
    }

    pub fn store(&self) -> &QueueStore<S> {
        &self.inner.store
    }

    pub fn network(&self) -> Arc<dyn NetworkMonitor> {
        Arc::clone(&self.inner.collaborators.network)
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.inner.config
    }

    pub fn state(&self) -> FlushState {
        *lock(&self.inner.flush)
    }

    pub fn status(&self) -> ProcessorStatus {
        let handles = lock(&self.inner.handles);
        let active = |h: &Option<Subscription>| h.as_ref().is_some_and(Subscription::is_active);

        ProcessorStatus {
            state: self.state(),
            interval_running: active(&handles.interval),
            listening_network: active(&handles.network),
            listening_app_state: active(&handles.app_state),
            coalesced_triggers: self.inner.coalesced.load(Ordering::Relaxed),
        }
    }

    fn downgrade(&self) -> Weak<Inner<S>> {
        Arc::downgrade(&self.inner)
    }

    fn upgrade(weak: &Weak<Inner<S>>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    fn try_begin_flush(&self) -> Option<FlushGuard<'_, S>> {
        let mut state = lock(&self.inner.flush);
        if *state == FlushState::Flushing {
            return None;
        }
        *state = FlushState::Flushing;

        Some(FlushGuard { inner: &self.inner })
    }

    /// Run one flush pass.
    ///
    /// Pending events are submitted sequentially in insertion order. A failed
    /// submission marks that event `Failed` and the pass moves on.
    #[instrument(name = "flush_pass", skip(self))]
    pub async fn flush(&self, trigger: FlushTrigger) -> FlushOutcome {
        let Some(guard) = self.try_begin_flush() else {
            let coalesced = self.inner.coalesced.fetch_add(1, Ordering::Relaxed) + 1;
            debug!(coalesced, "Flush already in progress, trigger coalesced");
            return FlushOutcome::Skipped {
                reason: SkipReason::AlreadyFlushing,
            };
        };

        match self.inner.collaborators.network.fetch_state().await {
            Ok(state) if state.is_online() => {}
            Ok(state) => {
                debug!(?state, "Offline, skipping flush");
                return FlushOutcome::Skipped {
                    reason: SkipReason::Offline,
                };
            }
            Err(e) => {
                warn!(error = %e, "Connectivity check failed, skipping flush");
                return FlushOutcome::Skipped {
                    reason: SkipReason::ConnectivityCheckFailed,
                };
            }
        }

        let store = &self.inner.store;

        match store.reset_interrupted().await {
            Ok(0) => {}
            Ok(count) => warn!(count, "Reset events left in processing"),
            Err(e) => warn!(error = %e, "Failed to reset interrupted events"),
        }

        let pending = match store.get_pending_events().await {
            Ok(pending) => pending,
            Err(e) => {
                error!(error = %e, "Failed to load pending events");
                return FlushOutcome::Skipped {
                    reason: SkipReason::StorageUnavailable,
                };
            }
        };

        let mut report = PassReport::default();
        if pending.is_empty() {
            debug!("No pending events");
        } else {
            info!(count = pending.len(), "Processing offline queue");
            for event in &pending {
                self.process_event(event, &mut report).await;
            }
        }

        drop(guard);
        report.purged = self.sweep().await;

        if report.attempted > 0 {
            info!(
                completed = report.completed,
                failed = report.failed,
                exhausted = report.exhausted,
                "Offline queue pass finished"
            );
        }

        FlushOutcome::Completed(report)
    }

    async fn process_event(&self, event: &QueuedEvent, report: &mut PassReport) {
        let store = &self.inner.store;
        let id = event.id;

        store
            .update_event_status(id, EventStatus::Processing, None)
            .await;
        store.set_processing(true, Some(id));
        report.attempted += 1;

        debug!(
            event_id = %id,
            event_type = %event.event_type,
            data = %pii::sanitize_for_logging(event).data,
            "Submitting event"
        );

        match self.inner.submitters.dispatch(event).await {
            Ok(()) => {
                store
                    .update_event_status(id, EventStatus::Completed, None)
                    .await;
                report.completed += 1;
                info!(event_id = %id, event_type = %event.event_type, "Event delivered");
            }
            Err(e) => {
                let permanent = e.is_permanent();
                store
                    .record_failure(id, &e.to_string(), permanent)
                    .await;
                report.failed += 1;

                let attempts = event.retry_count.saturating_add(1);
                if permanent {
                    report.exhausted += 1;
                    warn!(
                        event_id = %id,
                        attempts,
                        error = %e,
                        "Event rejected by the server and will not be retried"
                    );
                } else if attempts >= event.max_retries {
                    report.exhausted += 1;
                    warn!(
                        event_id = %id,
                        attempts,
                        max_retries = event.max_retries,
                        error = %e,
                        "Event exhausted its retries and will not be retried"
                    );
                } else {
                    warn!(
                        event_id = %id,
                        attempts,
                        max_retries = event.max_retries,
                        error = %e,
                        "Event submission failed, will retry"
                    );
                }
            }
        }
    }

    async fn sweep(&self) -> usize {
        match self
            .inner
            .store
            .cleanup_completed(self.inner.config.retention)
            .await
        {
            Ok(stats) => {
                if stats.completed_deleted > 0 {
                    info!(
                        deleted = stats.completed_deleted,
                        "Removed expired completed events"
                    );
                }
                stats.completed_deleted
            }
            Err(e) => {
                warn!(error = %e, "Retention sweep failed");
                0
            }
        }
    }

    /// Enqueue an event and, if the device looks online, flush right away.
    pub async fn enqueue(
        &self,
        event_type: EventType,
        data: serde_json::Value,
        max_retries: Option<u32>,
    ) -> Result<EventId, QueueError> {
        let max_retries = max_retries.unwrap_or(self.inner.config.max_retries);
        let id = self
            .inner
            .store
            .add_event(event_type, data, Some(max_retries))
            .await?;

        self.spawn_flush_if_online();
        Ok(id)
    }

    pub async fn enqueue_personnel_status(
        &self,
        input: &PersonnelStatusInput,
        max_retries: Option<u32>,
    ) -> Result<EventId, QueueError> {
        let data = serde_json::to_value(input)?;
        self.enqueue(EventType::PersonnelStatus, data, max_retries)
            .await
    }

    fn spawn_flush_if_online(&self) {
        let weak = self.downgrade();
        tokio::spawn(async move {
            let Some(processor) = Self::upgrade(&weak) else {
                return;
            };

            match processor.inner.collaborators.network.fetch_state().await {
                Ok(state) if state.is_online() => {
                    processor.flush(FlushTrigger::Enqueue).await;
                }
                Ok(_) => debug!("Offline, event will be sent after reconnect"),
                Err(e) => debug!(error = %e, "Connectivity unknown, event stays queued"),
            }
        });
    }

    fn epoch(&self) -> u64 {
        lock(&self.inner.handles).epoch
    }

    /// Enter foreground mode: flush once now, then every `flush_interval`.
    ///
    /// Restarting replaces the existing timer instead of adding a second one.
    pub async fn start_processing(&self) {
        let epoch = self.epoch();
        self.run_foreground(epoch).await;
    }

    async fn run_foreground(&self, epoch: u64) {
        if !self.initialize_listeners(epoch) {
            debug!("Processor was cleaned up, not entering foreground mode");
            return;
        }
        self.stop_processing();

        info!(
            interval_secs = self.inner.config.flush_interval.as_secs(),
            "Starting foreground processing"
        );
        self.flush(FlushTrigger::Foreground).await;

        let weak = self.downgrade();
        let period = self.inner.config.flush_interval;
        let interval = Subscription::spawn(move |cancel| async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(processor) = Self::upgrade(&weak) else {
                            break;
                        };
                        processor.flush(FlushTrigger::Interval).await;
                    }
                }
            }
        });

        let previous = {
            let mut handles = lock(&self.inner.handles);
            if handles.epoch != epoch {
                debug!("Processor was cleaned up during the foreground flush");
                return;
            }
            // A concurrent start may have installed a timer while we flushed.
            handles.interval.replace(interval)
        };
        if let Some(previous) = previous {
            previous.unsubscribe();
        }
    }

    /// Enter background mode: make sure the background task is registered
    /// and stop the foreground timer.
    pub async fn start_background_processing(&self) -> Result<(), QueueError> {
        let epoch = self.epoch();
        self.run_background(epoch).await
    }

    async fn run_background(&self, epoch: u64) -> Result<(), QueueError> {
        let registry = &self.inner.collaborators.registry;
        let name = self.inner.config.background_task_name.as_str();

        if self.epoch() != epoch {
            debug!(task = name, "Processor was cleaned up, not registering");
            return Ok(());
        }

        if registry.is_registered(name).await? {
            debug!(task = name, "Background task already registered");
        } else {
            registry.register(name, self.background_task()).await?;
            info!(task = name, "Registered background processing task");

            // `cleanup` may have run its unregister while we were registering.
            if self.epoch() != epoch {
                registry.unregister(name).await?;
                debug!(task = name, "Processor was cleaned up, registration withdrawn");
                return Ok(());
            }
        }

        self.stop_processing();
        Ok(())
    }

    fn background_task(&self) -> BackgroundTask {
        let weak = self.downgrade();
        task_from_fn(move || {
            let weak = weak.clone();
            async move {
                let Some(processor) = Self::upgrade(&weak) else {
                    return BackgroundTaskResult::NoData;
                };

                match processor.flush(FlushTrigger::Background).await {
                    FlushOutcome::Completed(report) if report.attempted > 0 => {
                        BackgroundTaskResult::NewData
                    }
                    FlushOutcome::Completed(_) => BackgroundTaskResult::NoData,
                    FlushOutcome::Skipped {
                        reason: SkipReason::StorageUnavailable,
                    } => BackgroundTaskResult::Failed,
                    FlushOutcome::Skipped { .. } => BackgroundTaskResult::NoData,
                }
            }
        })
    }

    /// Cancel the foreground timer. Listeners stay attached.
    pub fn stop_processing(&self) {
        if let Some(interval) = lock(&self.inner.handles).interval.take() {
            interval.unsubscribe();
            info!("Foreground processing stopped");
        }
    }

    /// Attach the connectivity and app-state watchers once.
    ///
    /// Returns `false` if `epoch` is stale.
    fn initialize_listeners(&self, epoch: u64) -> bool {
        let mut handles = lock(&self.inner.handles);
        if handles.epoch != epoch {
            return false;
        }

        if handles.network.is_none() {
            let mut rx = self.inner.collaborators.network.subscribe();
            let weak = self.downgrade();
            handles.network = Some(Subscription::spawn(move |cancel| async move {
                let mut was_online = rx.borrow_and_update().is_online();
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        changed = rx.changed() => {
                            if changed.is_err() {
                                break;
                            }
                            let online = rx.borrow_and_update().is_online();
                            let reconnected = online && !was_online;
                            was_online = online;

                            if reconnected {
                                let Some(processor) = Self::upgrade(&weak) else {
                                    break;
                                };
                                info!("Network reconnected, flushing offline queue");
                                processor.flush(FlushTrigger::Reconnect).await;
                            }
                        }
                    }
                }
            }));
        }

        if handles.app_state.is_none() {
            let mut rx = self.inner.collaborators.lifecycle.subscribe();
            let weak = self.downgrade();
            handles.app_state = Some(Subscription::spawn(move |cancel| async move {
                let mut previous = *rx.borrow_and_update();
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        changed = rx.changed() => {
                            if changed.is_err() {
                                break;
                            }
                            let state = *rx.borrow_and_update();
                            if state == previous {
                                continue;
                            }
                            previous = state;

                            let Some(processor) = Self::upgrade(&weak) else {
                                break;
                            };
                            match state {
                                AppState::Active => {
                                    info!("App foregrounded, resuming processing");
                                    processor.run_foreground(epoch).await;
                                }
                                AppState::Background => {
                                    info!("App backgrounded, switching to background processing");
                                    if let Err(e) = processor.run_background(epoch).await {
                                        error!(error = %e, "Failed to start background processing");
                                    }
                                }
                                AppState::Inactive => {}
                            }
                        }
                    }
                }
            }));
        }

        true
    }

    /// Detach everything this processor attached. Safe to call repeatedly,
    /// also before anything was started.
    pub async fn cleanup(&self) {
        let (interval, network, app_state) = {
            let mut handles = lock(&self.inner.handles);
            handles.epoch = handles.epoch.wrapping_add(1);
            (
                handles.interval.take(),
                handles.network.take(),
                handles.app_state.take(),
            )
        };

        for subscription in [interval, network, app_state].into_iter().flatten() {
            subscription.unsubscribe();
        }

        let registry = &self.inner.collaborators.registry;
        let name = self.inner.config.background_task_name.as_str();
        match registry.is_registered(name).await {
            Ok(true) => match registry.unregister(name).await {
                Ok(()) => info!(task = name, "Unregistered background processing task"),
                Err(e) => warn!(task = name, error = %e, "Failed to unregister background task"),
            },
            Ok(false) => {}
            Err(e) => warn!(task = name, error = %e, "Failed to query background task"),
        }

        debug!("Processor cleaned up");
    }
}
