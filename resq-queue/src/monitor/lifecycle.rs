use resq_core::AppState;
use tokio::sync::watch;
use tracing::info;

/// Source of application foreground/background transitions.
pub trait AppLifecycle: Send + Sync + 'static {
    fn current(&self) -> AppState;

    fn subscribe(&self) -> watch::Receiver<AppState>;
}

/// Lifecycle source driven by whoever embeds the queue.
#[derive(Debug)]
pub struct LifecycleController {
    tx: watch::Sender<AppState>,
}

impl LifecycleController {
    pub fn new(initial: AppState) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx }
    }

    /// Publish a new state. Repeating the current state notifies nobody.
    pub fn set(&self, state: AppState) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });

        if changed {
            info!(?state, "App state changed");
        }
    }
}

impl Default for LifecycleController {
    fn default() -> Self {
        Self::new(AppState::Active)
    }
}

impl AppLifecycle for LifecycleController {
    fn current(&self) -> AppState {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<AppState> {
        self.tx.subscribe()
    }
}
