pub mod background;
pub mod lifecycle;
pub mod network;

use std::future::Future;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub use background::{
    BackgroundTask, BackgroundTaskRegistry, BackgroundTaskResult, IntervalTaskRegistry,
    TaskFuture, task_from_fn,
};
pub use lifecycle::{AppLifecycle, LifecycleController};
pub use network::{ManualNetworkMonitor, NetworkMonitor, ProbeNetworkMonitor};

/// Handle to a spawned listener task.
///
/// Dropping the handle cancels the task.
#[derive(Debug)]
pub struct Subscription {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Subscription {
    pub fn spawn<F, Fut>(f: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(f(cancel.clone()));
        Self { cancel, task }
    }

    pub fn is_active(&self) -> bool {
        !self.cancel.is_cancelled() && !self.task.is_finished()
    }

    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
