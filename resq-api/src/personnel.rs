use resq_core::PersonnelStatusInput;
use serde::{Deserialize, Serialize};

/// Request body of `SavePersonnelStatus`.
///
/// The endpoint expects every field as a string and treats an empty string
/// as "not provided".
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SavePersonStatusInput {
    pub user_id: String,
    #[serde(rename = "Type")]
    pub status_type: String,
    pub timestamp: String,
    pub timestamp_utc: String,
    pub note: String,
    pub responding_to: String,
    pub latitude: String,
    pub longitude: String,
    pub accuracy: String,
    pub altitude: String,
    pub altitude_accuracy: String,
    pub speed: String,
    pub heading: String,
    pub event_id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct SavePersonStatusResult {
    pub id: String,
    pub status: String,
}

fn text<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

impl From<&PersonnelStatusInput> for SavePersonStatusInput {
    fn from(input: &PersonnelStatusInput) -> Self {
        let gps = input.gps;

        Self {
            user_id: input.user_id.to_string(),
            status_type: input.status_type.to_string(),
            timestamp: input
                .timestamp
                .strftime("%Y-%m-%dT%H:%M:%S%.3fZ")
                .to_string(),
            timestamp_utc: input
                .timestamp
                .strftime("%a, %d %b %Y %H:%M:%S GMT")
                .to_string(),
            note: text(input.note.as_deref()),
            responding_to: text(input.responding_to.as_deref()),
            latitude: text(gps.map(|g| g.latitude)),
            longitude: text(gps.map(|g| g.longitude)),
            accuracy: text(gps.and_then(|g| g.accuracy)),
            altitude: text(gps.and_then(|g| g.altitude)),
            altitude_accuracy: text(gps.and_then(|g| g.altitude_accuracy)),
            speed: text(gps.and_then(|g| g.speed)),
            heading: text(gps.and_then(|g| g.heading)),
            event_id: text(input.event_id.as_deref()),
        }
    }
}
