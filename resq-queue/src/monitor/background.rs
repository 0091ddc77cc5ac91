use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::RegistryError;
use crate::monitor::Subscription;

/// What a background run achieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackgroundTaskResult {
    NewData,
    NoData,
    Failed,
}

pub type TaskFuture = Pin<Box<dyn Future<Output = BackgroundTaskResult> + Send>>;

pub type BackgroundTask = Arc<dyn Fn() -> TaskFuture + Send + Sync>;

/// Wrap an async closure as a [`BackgroundTask`].
pub fn task_from_fn<F, Fut>(f: F) -> BackgroundTask
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = BackgroundTaskResult> + Send + 'static,
{
    Arc::new(move || -> TaskFuture { Box::pin(f()) })
}

/// Host facility that runs named tasks while the application is backgrounded.
#[async_trait]
pub trait BackgroundTaskRegistry: Send + Sync + 'static {
    async fn is_registered(&self, name: &str) -> Result<bool, RegistryError>;

    /// Fails with [`RegistryError::AlreadyRegistered`] on a duplicate name.
    async fn register(&self, name: &str, task: BackgroundTask) -> Result<(), RegistryError>;

    /// Fails with [`RegistryError::NotRegistered`] for an unknown name.
    async fn unregister(&self, name: &str) -> Result<(), RegistryError>;
}

/// Runs every registered task on a fixed period.
///
/// Each run gets `budget` to finish. Overruns are abandoned and logged.
pub struct IntervalTaskRegistry {
    min_interval: Duration,
    budget: Duration,
    tasks: Mutex<HashMap<String, Subscription>>,
}

impl IntervalTaskRegistry {
    pub fn new(min_interval: Duration, budget: Duration) -> Self {
        Self {
            min_interval,
            budget,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    pub fn registered_names(&self) -> Vec<String> {
        let tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.keys().cloned().collect()
    }
}

#[async_trait]
impl BackgroundTaskRegistry for IntervalTaskRegistry {
    async fn is_registered(&self, name: &str) -> Result<bool, RegistryError> {
        let tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(tasks.get(name).is_some_and(Subscription::is_active))
    }

    async fn register(&self, name: &str, task: BackgroundTask) -> Result<(), RegistryError> {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        if tasks.get(name).is_some_and(Subscription::is_active) {
            return Err(RegistryError::AlreadyRegistered(name.to_owned()));
        }

        let period = self.min_interval;
        let budget = self.budget;
        let task_name = name.to_owned();

        let subscription = Subscription::spawn(move |cancel| async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        match tokio::time::timeout(budget, task()).await {
                            Ok(result) => debug!(task = %task_name, ?result, "Background task finished"),
                            Err(_) => warn!(
                                task = %task_name,
                                budget_secs = budget.as_secs(),
                                "Background task exceeded its budget"
                            ),
                        }
                    }
                }
            }
        });

        tasks.insert(name.to_owned(), subscription);
        info!(
            task = name,
            min_interval_secs = period.as_secs(),
            "Background task registered"
        );

        Ok(())
    }

    async fn unregister(&self, name: &str) -> Result<(), RegistryError> {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        match tasks.remove(name) {
            Some(subscription) => {
                subscription.unsubscribe();
                info!(task = name, "Background task unregistered");
                Ok(())
            }
            None => Err(RegistryError::NotRegistered(name.to_owned())),
        }
    }
}
