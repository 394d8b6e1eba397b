//! Text-frame envelope: `{ "type": <event name>, "payload": <event JSON> }`
//!
//! The payload is deserialized straight into the named event type; it never
//! passes through the binary decoder. Anything that does not fit is ignored.

use super::event::{Event, EventKind};
use serde::Deserialize;

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Option<serde_json::Value>,
}

/// Parse a text frame into an event.
///
/// Returns `None` for invalid JSON, a missing or unknown `type`, a missing or
/// null `payload`, a payload that is not a JSON object, or one that does not
/// match the event's shape.
pub fn parse_envelope(text: &str) -> Option<Event> {
    let envelope: Envelope = serde_json::from_str(text).ok()?;
    let kind = EventKind::from_wire_name(&envelope.kind)?;
    let payload = envelope.payload.filter(|p| p.is_object())?;

    let event = match kind {
        EventKind::Camera => Event::Camera(serde_json::from_value(payload).ok()?),
        EventKind::VideoInit => Event::VideoInit(serde_json::from_value(payload).ok()?),
        EventKind::VideoSegment => Event::VideoSegment(serde_json::from_value(payload).ok()?),
        EventKind::Telemetry => Event::Telemetry(serde_json::from_value(payload).ok()?),
        EventKind::AudioLevel => Event::AudioLevel(serde_json::from_value(payload).ok()?),
        EventKind::AudioData => Event::AudioData(serde_json::from_value(payload).ok()?),
    };
    Some(event)
}

/// Wrap an event in a text envelope
pub fn to_envelope(event: &Event) -> serde_json::Result<String> {
    serde_json::to_string(&serde_json::json!({
        "type": event.kind().wire_name(),
        "payload": event.payload_json()?,
    }))
}
