use tokio::sync::Mutex;
use tracing::{error, info};

use crate::error::QueueError;
use crate::processor::QueueProcessor;
use crate::storage::EventStorage;

/// Entry point that wires the store's network listener and the processor
/// together, exactly once.
pub struct QueueService<S> {
    processor: QueueProcessor<S>,
    initialized: Mutex<bool>,
}

impl<S: EventStorage> QueueService<S> {
    pub fn new(processor: QueueProcessor<S>) -> Self {
        Self {
            processor,
            initialized: Mutex::new(false),
        }
    }

    pub fn processor(&self) -> &QueueProcessor<S> {
        &self.processor
    }

    pub async fn is_initialized(&self) -> bool {
        *self.initialized.lock().await
    }

    /// Attach the store to the network monitor and start foreground
    /// processing. Later calls are no-ops until [`Self::cleanup`].
    pub async fn initialize(&self) -> Result<(), QueueError> {
        let mut initialized = self.initialized.lock().await;
        if *initialized {
            info!("Offline queue service already initialized");
            return Ok(());
        }

        info!("Initializing offline queue service");
        if let Err(e) = self
            .processor
            .store()
            .initialize_network_listener(self.processor.network())
            .await
        {
            error!(error = %e, "Failed to initialize offline queue service");
            return Err(e);
        }
        self.processor.start_processing().await;

        *initialized = true;
        info!("Offline queue service initialized");
        Ok(())
    }

    /// Tear down listeners, timers and the background task. Never fails.
    pub async fn cleanup(&self) {
        let mut initialized = self.initialized.lock().await;

        self.processor.cleanup().await;
        self.processor.store().shutdown_network_listener();

        *initialized = false;
        info!("Offline queue service cleaned up");
    }
}
