use resq_core::EventType;
use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("storage error: {0}")]
    Storage(#[source] BoxError),
    #[error("payload encoding failed: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("network monitor error: {0}")]
    Monitor(#[from] MonitorError),
    #[error("background task registry error: {0}")]
    Registry(#[from] RegistryError),
}

impl QueueError {
    pub fn storage<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        QueueError::Storage(Box::new(err))
    }
}

#[derive(Debug, Clone, Error)]
pub enum MonitorError {
    #[error("network state unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("task {0} is already registered")]
    AlreadyRegistered(String),
    #[error("task {0} is not registered")]
    NotRegistered(String),
}

/// Why a single event could not be delivered.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("no submitter registered for event type {0}")]
    UnknownEventType(EventType),
    #[error("invalid payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),
    #[error("remote api: {0}")]
    Api(#[from] resq_api::ApiError),
}

impl SubmitError {
    /// The server refused the request itself. Repeating it cannot succeed.
    pub fn is_permanent(&self) -> bool {
        match self {
            SubmitError::Api(e) => !e.is_transient(),
            SubmitError::UnknownEventType(_) | SubmitError::InvalidPayload(_) => false,
        }
    }
}
