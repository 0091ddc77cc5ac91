use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use resq_api::{Client, SavePersonStatusInput};
use resq_core::{EventType, PersonnelStatusInput, QueuedEvent};
use tracing::debug;

use crate::error::SubmitError;

/// Replays one queued event against the remote API.
#[async_trait]
pub trait Submitter: Send + Sync + 'static {
    async fn submit(&self, event: &QueuedEvent) -> Result<(), SubmitError>;
}

/// Dispatch table from event type to submitter.
#[derive(Clone, Default)]
pub struct Submitters {
    table: HashMap<EventType, Arc<dyn Submitter>>,
}

impl Submitters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, event_type: EventType, submitter: impl Submitter) -> Self {
        self.insert(event_type, submitter);
        self
    }

    pub fn insert(&mut self, event_type: EventType, submitter: impl Submitter) {
        self.table.insert(event_type, Arc::new(submitter));
    }

    /// Route `event` to the submitter registered for its type.
    pub async fn dispatch(&self, event: &QueuedEvent) -> Result<(), SubmitError> {
        match self.table.get(&event.event_type) {
            Some(submitter) => submitter.submit(event).await,
            None => Err(SubmitError::UnknownEventType(event.event_type.clone())),
        }
    }
}

impl fmt::Debug for Submitters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.table.keys()).finish()
    }
}

/// The remote call behind `PERSONNEL_STATUS` events.
#[async_trait]
pub trait PersonnelStatusApi: Send + Sync + 'static {
    async fn save_personnel_status(&self, input: &SavePersonStatusInput)
    -> Result<(), SubmitError>;
}

#[async_trait]
impl PersonnelStatusApi for Client {
    async fn save_personnel_status(
        &self,
        input: &SavePersonStatusInput,
    ) -> Result<(), SubmitError> {
        let result = Client::save_personnel_status(self, input).await?;
        debug!(id = %result.id, "Personnel status saved");
        Ok(())
    }
}

/// Decodes a [`PersonnelStatusInput`] payload and saves it remotely.
///
/// A payload that does not decode fails the event like any other error.
#[derive(Debug, Clone)]
pub struct PersonnelStatusSubmitter<A> {
    api: A,
}

impl<A: PersonnelStatusApi> PersonnelStatusSubmitter<A> {
    pub fn new(api: A) -> Self {
        Self { api }
    }
}

#[async_trait]
impl<A: PersonnelStatusApi> Submitter for PersonnelStatusSubmitter<A> {
    async fn submit(&self, event: &QueuedEvent) -> Result<(), SubmitError> {
        let input: PersonnelStatusInput = serde_json::from_value(event.data.clone())?;
        let request = SavePersonStatusInput::from(&input);

        self.api.save_personnel_status(&request).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;

    #[derive(Default)]
    struct RecordingApi {
        requests: Mutex<Vec<SavePersonStatusInput>>,
    }

    #[async_trait]
    impl PersonnelStatusApi for Arc<RecordingApi> {
        async fn save_personnel_status(
            &self,
            input: &SavePersonStatusInput,
        ) -> Result<(), SubmitError> {
            self.requests.lock().unwrap().push(input.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn personnel_status_is_decoded_and_sent() {
        let api = Arc::new(RecordingApi::default());
        let submitters = Submitters::new().with(
            EventType::PersonnelStatus,
            PersonnelStatusSubmitter::new(api.clone()),
        );

        let mut input = PersonnelStatusInput::new("u-9", "3");
        input.note = Some("on scene".into());
        let event = QueuedEvent::new(
            EventType::PersonnelStatus,
            serde_json::to_value(&input).unwrap(),
            3,
        );

        submitters.dispatch(&event).await.unwrap();

        let requests = api.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].user_id, "u-9");
        assert_eq!(requests[0].note, "on scene");
    }

    #[tokio::test]
    async fn malformed_payload_fails_the_event() {
        let submitters = Submitters::new().with(
            EventType::PersonnelStatus,
            PersonnelStatusSubmitter::new(Arc::new(RecordingApi::default())),
        );
        let event = QueuedEvent::new(EventType::PersonnelStatus, json!({"note": 5}), 3);

        let err = submitters.dispatch(&event).await.unwrap_err();
        assert!(matches!(err, SubmitError::InvalidPayload(_)));
    }

    #[test]
    fn only_server_refusals_are_permanent() {
        let refused = SubmitError::Api(resq_api::ApiError::Status {
            status: 422,
            body: "invalid status type".into(),
        });
        assert!(refused.is_permanent());

        let unavailable = SubmitError::Api(resq_api::ApiError::Status {
            status: 503,
            body: String::new(),
        });
        assert!(!unavailable.is_permanent());
        assert!(!SubmitError::UnknownEventType(EventType::from("SHIFT_SIGNUP")).is_permanent());
    }

    #[tokio::test]
    async fn unknown_type_has_no_submitter() {
        let submitters = Submitters::new();
        let event = QueuedEvent::new(EventType::from("SHIFT_SIGNUP"), json!({}), 3);

        let err = submitters.dispatch(&event).await.unwrap_err();
        assert!(matches!(err, SubmitError::UnknownEventType(_)));
    }
}
