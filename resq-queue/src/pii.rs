//! Handling of personal data carried in queued payloads.

use resq_core::QueuedEvent;
use serde::Serialize;
use serde_json::{Map, Value};

/// Payload keys that may identify a responder.
const SENSITIVE_FIELDS: [&str; 6] = ["userId", "note", "latitude", "longitude", "filePath", "name"];

const REDACTED: &str = "[REDACTED]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Coordinate,
    Note,
    Identifier,
}

fn classify(key: &str) -> Option<Field> {
    let field = SENSITIVE_FIELDS
        .iter()
        .find(|f| f.eq_ignore_ascii_case(key))?;

    Some(match *field {
        "latitude" | "longitude" => Field::Coordinate,
        "note" => Field::Note,
        _ => Field::Identifier,
    })
}

fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        _ => true,
    }
}

fn payload_contains_pii(value: &Value) -> bool {
    match value {
        Value::Object(map) => map.iter().any(|(key, value)| {
            (classify(key).is_some() && is_present(value)) || payload_contains_pii(value)
        }),
        Value::Array(items) => items.iter().any(payload_contains_pii),
        _ => false,
    }
}

/// Whether the event payload carries any personal field.
pub fn contains_pii(event: &QueuedEvent) -> bool {
    payload_contains_pii(&event.data)
}

fn round_coordinate(value: &Value) -> Option<Value> {
    let raw = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };

    let rounded = (raw * 100.0).round() / 100.0;
    serde_json::Number::from_f64(rounded).map(Value::Number)
}

/// Copy of `payload` safe to write to logs.
///
/// Coordinates are rounded to two decimals, notes are replaced by a marker
/// and other identifying fields are dropped. Nested objects are handled too.
pub fn sanitize_payload(payload: &Value) -> Value {
    match payload {
        Value::Object(map) => {
            let mut sanitized = Map::with_capacity(map.len());
            for (key, value) in map {
                match classify(key) {
                    Some(Field::Coordinate) => {
                        let value = round_coordinate(value).unwrap_or_else(|| value.clone());
                        sanitized.insert(key.clone(), value);
                    }
                    Some(Field::Note) => {
                        let marker = if is_present(value) { REDACTED } else { "" };
                        sanitized.insert(key.clone(), Value::from(marker));
                    }
                    Some(Field::Identifier) => {}
                    None => {
                        sanitized.insert(key.clone(), sanitize_payload(value));
                    }
                }
            }
            Value::Object(sanitized)
        }
        Value::Array(items) => Value::Array(items.iter().map(sanitize_payload).collect()),
        other => other.clone(),
    }
}

pub fn sanitize_for_logging(event: &QueuedEvent) -> QueuedEvent {
    QueuedEvent {
        data: sanitize_payload(&event.data),
        ..event.clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PiiAudit {
    pub total_events: usize,
    pub events_with_pii: usize,
    pub risk_level: RiskLevel,
    pub recommendations: Vec<&'static str>,
}

/// Rate the exposure of a queue's contents.
pub fn audit(events: &[QueuedEvent]) -> PiiAudit {
    let total_events = events.len();
    let events_with_pii = events.iter().filter(|e| contains_pii(e)).count();

    let mut recommendations = Vec::new();
    // Integer comparison of the share of PII-bearing events.
    let risk_level = if events_with_pii * 100 > total_events * 50 {
        recommendations.extend([
            "Consider implementing field-level encryption for PII data",
            "Rotate encryption keys more frequently",
            "Implement automatic PII data expiration",
        ]);
        RiskLevel::High
    } else if events_with_pii * 100 > total_events * 20 {
        recommendations.extend([
            "Monitor PII data retention policies",
            "Consider data minimization strategies",
        ]);
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    };

    if total_events > 1000 {
        recommendations.push("Implement automatic cleanup of old offline queue events");
    }

    PiiAudit {
        total_events,
        events_with_pii,
        risk_level,
        recommendations,
    }
}

#[cfg(test)]
mod tests {
    use resq_core::EventType;
    use serde_json::json;

    use super::*;

    fn event(data: Value) -> QueuedEvent {
        QueuedEvent::new(EventType::PersonnelStatus, data, 3)
    }

    #[test]
    fn empty_fields_are_not_pii() {
        assert!(!contains_pii(&event(json!({"userId": "", "note": null, "statusType": "1"}))));
        assert!(contains_pii(&event(json!({"note": "back at station"}))));
        assert!(contains_pii(&event(json!({"UserId": "u-1"}))));
        assert!(contains_pii(&event(json!({"gps": {"latitude": 39.7}}))));
    }

    #[test]
    fn sanitize_masks_each_field_kind() {
        let sanitized = sanitize_payload(&json!({
            "userId": "u-1",
            "statusType": "2",
            "note": "patient at 12 Elm St",
            "name": "Sam",
            "gps": { "latitude": 39.739_236, "longitude": "-104.990251", "heading": 90 },
            "Latitude": "not a number"
        }));

        assert_eq!(
            sanitized,
            json!({
                "statusType": "2",
                "note": "[REDACTED]",
                "gps": { "latitude": 39.74, "longitude": -104.99, "heading": 90 },
                "Latitude": "not a number"
            })
        );
    }

    #[test]
    fn sanitized_event_keeps_metadata() {
        let original = event(json!({"userId": "u-1", "note": ""}));
        let sanitized = sanitize_for_logging(&original);

        assert_eq!(sanitized.id, original.id);
        assert_eq!(sanitized.data, json!({"note": ""}));
    }

    #[test]
    fn audit_grades_by_share_of_pii_events() {
        let with = event(json!({"userId": "u-1"}));
        let without = event(json!({"statusType": "1"}));

        let high = audit(&[with.clone(), with.clone(), without.clone()]);
        assert_eq!(high.risk_level, RiskLevel::High);
        assert_eq!(high.events_with_pii, 2);
        assert_eq!(high.recommendations.len(), 3);

        let medium = audit(&[with.clone(), without.clone(), without.clone()]);
        assert_eq!(medium.risk_level, RiskLevel::Medium);

        let low = audit(&[with, without.clone(), without.clone(), without.clone(), without]);
        assert_eq!(low.risk_level, RiskLevel::Low);
        assert!(low.recommendations.is_empty());

        assert_eq!(audit(&[]).risk_level, RiskLevel::Low);
    }
}
