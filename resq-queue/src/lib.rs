pub mod config;
pub mod error;
pub mod http;
pub mod monitor;
pub mod pii;
pub mod processor;
pub mod service;
pub mod storage;
pub mod store;
pub mod submit;

pub use config::{
    ApiConfig, BackgroundConfig, Config, NetworkConfig, QueueConfig, ServerConfig, StorageConfig,
};
pub use error::{MonitorError, QueueError, RegistryError, SubmitError};
pub use monitor::{
    AppLifecycle, BackgroundTask, BackgroundTaskRegistry, BackgroundTaskResult,
    IntervalTaskRegistry, LifecycleController, ManualNetworkMonitor, NetworkMonitor,
    ProbeNetworkMonitor, Subscription, TaskFuture, task_from_fn,
};
pub use processor::{
    Collaborators, FlushOutcome, FlushState, FlushTrigger, PassReport, ProcessorConfig,
    ProcessorStatus, QueueProcessor, SkipReason,
};
pub use service::QueueService;
pub use storage::memory::MemoryStorage;
pub use storage::sqlite::SqliteStorage;
pub use storage::{CleanupStats, EventStorage, StatusUpdate, StorageStats};
pub use store::{ProcessingState, QueueStore};
pub use submit::{PersonnelStatusApi, PersonnelStatusSubmitter, Submitter, Submitters};
