use std::fmt;
use std::str::FromStr;

use ordered_float::NotNan;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

// We use `Box<str>` for strings that are never grown after construction.
// This keeps queued events compact and avoids accidental cloning of large
// values.
pub type BoxStr = Box<str>;

/// Retry ceiling applied when the caller does not supply one.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Unique identifier for a queued event. Assigned at enqueue time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(pub Ulid);

impl EventId {
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for EventId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(s).map(EventId)
    }
}

/// Tag selecting which remote operation replays an event.
///
/// Tags this build does not know about are kept verbatim in `Other` so a
/// queue written by a newer build survives a round trip through storage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventType {
    PersonnelStatus,
    Other(BoxStr),
}

impl EventType {
    pub fn as_str(&self) -> &str {
        match self {
            EventType::PersonnelStatus => "PERSONNEL_STATUS",
            EventType::Other(tag) => tag,
        }
    }
}

impl From<String> for EventType {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "PERSONNEL_STATUS" => EventType::PersonnelStatus,
            _ => EventType::Other(tag.into_boxed_str()),
        }
    }
}

impl From<&str> for EventType {
    fn from(tag: &str) -> Self {
        EventType::from(tag.to_owned())
    }
}

impl From<EventType> for String {
    fn from(event_type: EventType) -> Self {
        event_type.as_str().to_owned()
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Processing status of a queued event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Pending => "pending",
            EventStatus::Processing => "processing",
            EventStatus::Completed => "completed",
            EventStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStatus(pub String);

impl fmt::Display for UnknownStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown event status: {}", self.0)
    }
}

impl std::error::Error for UnknownStatus {}

impl FromStr for EventStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(EventStatus::Pending),
            "processing" => Ok(EventStatus::Processing),
            "completed" => Ok(EventStatus::Completed),
            "failed" => Ok(EventStatus::Failed),
            other => Err(UnknownStatus(other.to_owned())),
        }
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of deferred work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedEvent {
    /// Stable identity, never changes after enqueue.
    pub id: EventId,
    /// Which remote operation replays this event.
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// Type-specific payload, decoded by the matching submitter.
    pub data: serde_json::Value,
    pub status: EventStatus,
    /// Failed attempts so far.
    pub retry_count: u32,
    /// Once `retry_count` reaches this the event stays `Failed`.
    pub max_retries: u32,
    pub created_at: jiff::Timestamp,
    /// Most recent processing attempt. Drives the retention sweep.
    pub last_attempt_at: Option<jiff::Timestamp>,
    /// Last failure message, only present while `Failed`.
    pub error_message: Option<BoxStr>,
}

impl QueuedEvent {
    pub fn new(event_type: EventType, data: serde_json::Value, max_retries: u32) -> Self {
        Self {
            id: EventId::new(),
            event_type,
            data,
            status: EventStatus::Pending,
            retry_count: 0,
            max_retries,
            created_at: jiff::Timestamp::now(),
            last_attempt_at: None,
            error_message: None,
        }
    }

    pub fn retries_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }

    /// Whether the next flush pass should pick this event up.
    ///
    /// Failed events re-enter the pending set until their retry budget is
    /// spent.
    pub fn is_pending(&self) -> bool {
        match self.status {
            EventStatus::Pending => true,
            EventStatus::Failed => !self.retries_exhausted(),
            EventStatus::Processing | EventStatus::Completed => false,
        }
    }
}

/// A GPS fix attached to a status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GpsFix {
    pub latitude: NotNan<f64>,
    pub longitude: NotNan<f64>,
    /// Horizontal accuracy in meters.
    pub accuracy: Option<NotNan<f64>>,
    /// Altitude in meters.
    pub altitude: Option<NotNan<f64>>,
    pub altitude_accuracy: Option<NotNan<f64>>,
    /// Ground speed in meters per second.
    pub speed: Option<NotNan<f64>>,
    /// Heading in degrees from true north.
    pub heading: Option<NotNan<f64>>,
}

/// Payload of a `PERSONNEL_STATUS` event: a responder changing their status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonnelStatusInput {
    pub user_id: BoxStr,
    /// Status code selected by the responder.
    pub status_type: BoxStr,
    pub note: Option<BoxStr>,
    /// Call or station the responder is heading to.
    pub responding_to: Option<BoxStr>,
    /// When the status was chosen on the device.
    #[serde(default = "jiff::Timestamp::now")]
    pub timestamp: jiff::Timestamp,
    pub gps: Option<GpsFix>,
    /// Correlation id of the call or group behind `responding_to`.
    pub event_id: Option<BoxStr>,
}

impl PersonnelStatusInput {
    pub fn new(user_id: impl Into<BoxStr>, status_type: impl Into<BoxStr>) -> Self {
        Self {
            user_id: user_id.into(),
            status_type: status_type.into(),
            note: None,
            responding_to: None,
            timestamp: jiff::Timestamp::now(),
            gps: None,
            event_id: None,
        }
    }
}

/// Connectivity as reported by the OS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkState {
    pub is_connected: bool,
    /// `None` while reachability has not been determined yet.
    pub is_internet_reachable: Option<bool>,
}

impl NetworkState {
    pub fn online() -> Self {
        Self {
            is_connected: true,
            is_internet_reachable: Some(true),
        }
    }

    pub fn offline() -> Self {
        Self {
            is_connected: false,
            is_internet_reachable: Some(false),
        }
    }

    pub fn is_online(&self) -> bool {
        self.is_connected && self.is_internet_reachable == Some(true)
    }
}

/// Foreground state of the host application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppState {
    #[default]
    Active,
    Inactive,
    Background,
}
