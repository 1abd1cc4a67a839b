// ── Push envelopes ──
//
// `deviceUpdate` and `eventUpdate` pushes wrap their entity in a small
// envelope naming the target and whether this is a create or an update.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::device::Device;
use super::event::Event;
use super::payload::{get_i64, get_str};

/// Kind of change an update push describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[non_exhaustive]
pub enum UpdateKind {
    Unknown,
    Create,
    Update,
}

impl UpdateKind {
    pub fn from_wire(value: &str) -> Self {
        match value {
            "create" => Self::Create,
            "update" => Self::Update,
            other => {
                tracing::warn!(value = other, "unknown update kind");
                Self::Unknown
            }
        }
    }
}

fn kind_of(payload: &Value) -> UpdateKind {
    get_str(payload, "type")
        .map(|raw| UpdateKind::from_wire(&raw))
        .unwrap_or(UpdateKind::Unknown)
}

/// A pushed change to a device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceUpdate {
    pub device_id: String,
    pub kind: UpdateKind,
    pub body: Option<Device>,
}

impl DeviceUpdate {
    pub fn from_payload(payload: &Value) -> Option<Self> {
        let device_id = get_str(payload, "deviceId")?;
        let body = payload
            .get("body")
            .and_then(|body| Device::from_payload(body, Some(&device_id)));

        Some(Self {
            kind: kind_of(payload),
            device_id,
            body,
        })
    }
}

/// A pushed fragment of a flap event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventUpdate {
    pub device_id: String,
    pub event_id: i64,
    pub kind: UpdateKind,
    pub body: Option<Event>,
}

impl EventUpdate {
    pub fn from_payload(payload: &Value) -> Option<Self> {
        Some(Self {
            device_id: get_str(payload, "deviceId")?,
            event_id: get_i64(payload, "eventId")?,
            kind: kind_of(payload),
            body: payload.get("body").and_then(Event::from_payload),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn device_update_parses_envelope_and_body() {
        let update = DeviceUpdate::from_payload(&json!({
            "deviceId": "OC-001",
            "type": "update",
            "body": {"description": "Back door"},
        }))
        .unwrap();

        assert_eq!(update.device_id, "OC-001");
        assert_eq!(update.kind, UpdateKind::Update);
        // body inherits the envelope's device id
        assert_eq!(update.body.unwrap().device_id, "OC-001");
    }

    #[test]
    fn event_update_requires_both_ids() {
        let update = EventUpdate::from_payload(&json!({
            "deviceId": "OC-001",
            "eventId": 42,
            "type": "create",
            "body": {"eventTriggerSource": 3},
        }))
        .unwrap();
        assert_eq!(update.event_id, 42);
        assert_eq!(update.kind, UpdateKind::Create);
        assert!(update.body.is_some());

        assert!(EventUpdate::from_payload(&json!({"deviceId": "OC-001"})).is_none());
        assert!(EventUpdate::from_payload(&json!({"eventId": 42})).is_none());
    }

    #[test]
    fn unknown_kind_is_tolerated() {
        let update = DeviceUpdate::from_payload(&json!({
            "deviceId": "OC-001",
            "type": "upsert",
        }))
        .unwrap();
        assert_eq!(update.kind, UpdateKind::Unknown);
        assert!(update.body.is_none());
    }
}
