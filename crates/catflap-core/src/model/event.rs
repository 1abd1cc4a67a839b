// ── Flap event domain types ──
//
// An event is not a single message: the gateway streams fragments that
// share a `(device_id, event_id)` key, each carrying whatever fields the
// device has learned so far (motion source first, RFID reads later, the
// frame count last). The struct therefore keeps every field optional and
// accumulates via [`Event::merge_from`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::payload::{get_i64, get_iso_datetime, get_str, get_str_list};

/// What caused a flap event.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display,
)]
#[non_exhaustive]
pub enum EventTriggerSource {
    Unknown,
    Manual,
    Remote,
    IndoorMotion,
    OutdoorMotion,
}

impl EventTriggerSource {
    /// Map the wire integer, falling back to `Unknown` for values this
    /// client does not know yet (the gateway extends the set over time).
    pub fn from_wire(value: i64) -> Self {
        match value {
            -1 => Self::Unknown,
            0 => Self::Manual,
            1 => Self::Remote,
            2 => Self::IndoorMotion,
            3 => Self::OutdoorMotion,
            other => {
                tracing::warn!(value = other, "unknown event trigger source");
                Self::Unknown
            }
        }
    }

    pub fn is_motion(self) -> bool {
        matches!(self, Self::IndoorMotion | Self::OutdoorMotion)
    }
}

/// What the device's classifier made of the event.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display,
)]
#[non_exhaustive]
pub enum EventClassification {
    Unknown,
    Clear,
    Suspicious,
    Contraband,
    HumanActivity,
    RemoteUnlock,
}

impl EventClassification {
    pub fn from_wire(value: i64) -> Self {
        match value {
            0 => Self::Unknown,
            1 => Self::Clear,
            2 => Self::Suspicious,
            3 => Self::Contraband,
            4 => Self::HumanActivity,
            10 => Self::RemoteUnlock,
            other => {
                tracing::warn!(value = other, "unknown event classification");
                Self::Unknown
            }
        }
    }
}

/// One flap event, accumulated from stream fragments.
///
/// Not safe to treat as complete until [`is_concluded`](Self::is_concluded)
/// holds: a non-null `frame_count` is the terminal marker, after which the
/// gateway will reuse the `event_id` for a future, unrelated event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub global_id: Option<i64>,
    pub device_id: Option<String>,
    pub event_id: Option<i64>,
    pub timestamp: Option<DateTime<Utc>>,
    pub frame_count: Option<i64>,
    pub event_trigger_source: Option<EventTriggerSource>,
    pub event_classification: Option<EventClassification>,
    pub poster_frame_index: Option<i64>,
    pub access_token: Option<String>,
    pub rfid_codes: Option<Vec<String>>,
}

impl Event {
    /// Build an event from a gateway payload. `None` for null/empty input.
    ///
    /// Event timestamps travel as ISO-8601 strings (unlike connectivity
    /// timestamps, which are epoch millis).
    pub fn from_payload(payload: &Value) -> Option<Self> {
        let body = payload.as_object()?;
        if body.is_empty() {
            return None;
        }

        Some(Self {
            global_id: get_i64(payload, "globalId"),
            device_id: get_str(payload, "deviceId"),
            event_id: get_i64(payload, "eventId"),
            timestamp: get_iso_datetime(payload, "timestamp"),
            frame_count: get_i64(payload, "frameCount"),
            event_trigger_source: get_i64(payload, "eventTriggerSource")
                .map(EventTriggerSource::from_wire),
            event_classification: get_i64(payload, "eventClassification")
                .map(EventClassification::from_wire),
            poster_frame_index: get_i64(payload, "posterFrameIndex"),
            access_token: get_str(payload, "accessToken"),
            rfid_codes: get_str_list(payload, "rfidCodes"),
        })
    }

    /// Fold a partial update into this event.
    ///
    /// Present fields overwrite; absent fields never clear accumulated
    /// state. The exhaustive destructure makes adding a field without
    /// extending the merge a compile error.
    pub fn merge_from(&mut self, update: Event) {
        let Event {
            global_id,
            device_id,
            event_id,
            timestamp,
            frame_count,
            event_trigger_source,
            event_classification,
            poster_frame_index,
            access_token,
            rfid_codes,
        } = update;

        merge_field(&mut self.global_id, global_id);
        merge_field(&mut self.device_id, device_id);
        merge_field(&mut self.event_id, event_id);
        merge_field(&mut self.timestamp, timestamp);
        merge_field(&mut self.frame_count, frame_count);
        merge_field(&mut self.event_trigger_source, event_trigger_source);
        merge_field(&mut self.event_classification, event_classification);
        merge_field(&mut self.poster_frame_index, poster_frame_index);
        merge_field(&mut self.access_token, access_token);
        merge_field(&mut self.rfid_codes, rfid_codes);
    }

    /// A non-null frame count marks the fragment stream as finished.
    /// Consumers must reset their working copy after observing this —
    /// event ids are reused indefinitely.
    pub fn is_concluded(&self) -> bool {
        self.frame_count.is_some()
    }

    /// Whether this event carries the given RFID code.
    pub fn carries_rfid(&self, rfid_code: &str) -> bool {
        self.rfid_codes
            .as_ref()
            .is_some_and(|codes| codes.iter().any(|c| c == rfid_code))
    }
}

pub(crate) fn merge_field<T>(base: &mut Option<T>, update: Option<T>) {
    if update.is_some() {
        *base = update;
    }
}
