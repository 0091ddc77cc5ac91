use std::str::FromStr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use resq_core::{AppState, EventId, NetworkState, PersonnelStatusInput};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::monitor::{LifecycleController, ManualNetworkMonitor};
use crate::pii::{self, PiiAudit};
use crate::processor::{ProcessorStatus, QueueProcessor};
use crate::storage::{EventStorage, StorageStats};
use crate::store::ProcessingState;

/// Shared state of the admin HTTP surface.
pub struct HttpState<S> {
    pub processor: QueueProcessor<S>,
    /// Present only when connectivity is driven by hand.
    pub manual_network: Option<Arc<ManualNetworkMonitor>>,
    pub lifecycle: Arc<LifecycleController>,
}

impl<S> Clone for HttpState<S> {
    fn clone(&self) -> Self {
        Self {
            processor: self.processor.clone(),
            manual_network: self.manual_network.clone(),
            lifecycle: Arc::clone(&self.lifecycle),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueStatusRequest {
    #[serde(flatten)]
    pub status: PersonnelStatusInput,
    pub max_retries: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueResponse {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct LifecycleRequest {
    pub state: AppState,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub storage: StorageStats,
    pub processor: ProcessorStatus,
    pub processing: ProcessingState,
    pub network: Option<NetworkState>,
    pub pii: PiiAudit,
}

pub fn router<S: EventStorage>(state: HttpState<S>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/events", get(list_events::<S>))
        .route("/events/pending", get(pending_events::<S>))
        .route("/events/personnel-status", post(enqueue_status::<S>))
        .route("/events/{id}", delete(remove_event::<S>))
        .route("/stats", get(stats::<S>))
        .route("/network", put(set_network::<S>))
        .route("/lifecycle", put(set_lifecycle::<S>))
        .with_state(state)
}

fn error_response(status: StatusCode, message: String) -> Response {
    let api_response = ApiResponse::<()> {
        success: false,
        data: None,
        message: Some(message),
    };
    (status, Json(api_response)).into_response()
}

fn success_response<T: Serialize>(status: StatusCode, data: T, message: Option<String>) -> Response {
    let api_response = ApiResponse {
        success: true,
        data: Some(data),
        message,
    };
    (status, Json(api_response)).into_response()
}

fn internal_error(e: impl std::fmt::Display) -> Response {
    error!(error = %e, "Request failed");
    error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

async fn health() -> &'static str {
    "OK"
}

async fn list_events<S: EventStorage>(State(state): State<HttpState<S>>) -> Response {
    match state.processor.store().events().await {
        Ok(events) => success_response(StatusCode::OK, events, None),
        Err(e) => internal_error(e),
    }
}

async fn pending_events<S: EventStorage>(State(state): State<HttpState<S>>) -> Response {
    match state.processor.store().get_pending_events().await {
        Ok(events) => success_response(StatusCode::OK, events, None),
        Err(e) => internal_error(e),
    }
}

async fn enqueue_status<S: EventStorage>(
    State(state): State<HttpState<S>>,
    Json(request): Json<EnqueueStatusRequest>,
) -> Response {
    match state
        .processor
        .enqueue_personnel_status(&request.status, request.max_retries)
        .await
    {
        Ok(id) => success_response(
            StatusCode::ACCEPTED,
            EnqueueResponse { id: id.to_string() },
            Some("Status queued".into()),
        ),
        Err(e) => internal_error(e),
    }
}

async fn remove_event<S: EventStorage>(
    State(state): State<HttpState<S>>,
    Path(id): Path<String>,
) -> Response {
    let Ok(id) = EventId::from_str(&id) else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "Invalid event ID format. Expected ULID.".into(),
        );
    };

    match state.processor.store().remove_event(id).await {
        Ok(true) => success_response(StatusCode::OK, (), Some("Event removed".into())),
        Ok(false) => error_response(StatusCode::NOT_FOUND, format!("Event {id} not found")),
        Err(e) => internal_error(e),
    }
}

async fn stats<S: EventStorage>(State(state): State<HttpState<S>>) -> Response {
    let store = state.processor.store();

    let storage = match store.stats().await {
        Ok(stats) => stats,
        Err(e) => return internal_error(e),
    };
    let events = match store.events().await {
        Ok(events) => events,
        Err(e) => return internal_error(e),
    };

    let response = StatsResponse {
        storage,
        processor: state.processor.status(),
        processing: store.processing(),
        network: store.network_state(),
        pii: pii::audit(&events),
    };
    success_response(StatusCode::OK, response, None)
}

async fn set_network<S: EventStorage>(
    State(state): State<HttpState<S>>,
    Json(network): Json<NetworkState>,
) -> Response {
    match &state.manual_network {
        Some(monitor) => {
            monitor.set(network);
            success_response(StatusCode::OK, network, None)
        }
        None => error_response(
            StatusCode::CONFLICT,
            "Network state is probed and cannot be set".into(),
        ),
    }
}

async fn set_lifecycle<S: EventStorage>(
    State(state): State<HttpState<S>>,
    Json(request): Json<LifecycleRequest>,
) -> Response {
    state.lifecycle.set(request.state);
    success_response(StatusCode::OK, request.state, None)
}
