// ── Pet aggregate ──
//
// The gateway never pushes pets. They are derived client-side by
// cross-referencing the device's last-seen RFID sightings with recent
// events, then decorated with the optional RFID profile label.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::device::Device;
use super::event::{Event, EventTriggerSource};
use super::payload::{get_iso_datetime, get_str};
use super::policy::PolicyResult;

/// One chipped pet known to a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pet {
    /// The device this pet was derived from (non-owning, lookup by id).
    pub device_id: String,
    pub rfid_code: String,
    pub last_seen: DateTime<Utc>,
    /// Most recent event carrying this pet's rfid code, if any.
    pub last_seen_event: Option<Event>,
    pub label: Option<String>,
}

impl Pet {
    /// Build a pet from one `getLastSeenRfidCodesByDevice` entry.
    pub fn from_sighting(payload: &Value, device_id: &str) -> Option<Self> {
        payload.as_object()?;
        Some(Self {
            device_id: device_id.to_owned(),
            rfid_code: get_str(payload, "rfidCode")?,
            last_seen: get_iso_datetime(payload, "timestamp")?,
            last_seen_event: None,
            label: None,
        })
    }

    /// Apply a `getRfidProfile` response (currently just the label).
    pub fn apply_profile(&mut self, payload: &Value) {
        if let Some(label) = get_str(payload, "label") {
            self.label = Some(label);
        }
    }

    /// Human-facing name: the profile label, or the raw chip code.
    pub fn display_name(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.rfid_code)
    }

    /// Infer this pet's presence from a flap event.
    ///
    /// Only a motion-triggered transit carrying this pet's chip says
    /// anything: an allowed entry (outdoor motion) means the pet is now
    /// inside, an allowed exit (indoor motion) means outside. A locked or
    /// undecidable verdict means the attempt had no observable effect —
    /// `None` leaves the caller's last known state standing.
    pub fn is_present(&self, event: &Event, device: &Device) -> Option<bool> {
        if !event.carries_rfid(&self.rfid_code) {
            return None;
        }
        let source = event.event_trigger_source?;
        if !source.is_motion() {
            return None;
        }

        match device.determine_policy_result(event) {
            PolicyResult::Locked | PolicyResult::Unknown => None,
            PolicyResult::Unlocked => Some(source == EventTriggerSource::OutdoorMotion),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::policy::{
        DeviceTransitPolicy, Rule, RuleAction, RuleCriteria, TransitPolicy,
    };
    use serde_json::json;

    fn pet() -> Pet {
        let mut pet = Pet::from_sighting(
            &json!({"rfidCode": "A", "timestamp": "2026-03-01T08:00:00Z"}),
            "OC-001",
        )
        .unwrap();
        pet.apply_profile(&json!({"label": "Miso"}));
        pet
    }

    fn permissive_device() -> Device {
        let mut device =
            Device::from_payload(&json!({"deviceId": "OC-001", "deviceTransitPolicyId": 1}), None)
                .unwrap();
        device.attach_policy(DeviceTransitPolicy {
            device_transit_policy_id: 1,
            device_id: "OC-001".into(),
            name: None,
            transit_policy: Some(TransitPolicy {
                rules: vec![Rule {
                    criteria: Some(RuleCriteria::default()),
                    action: Some(RuleAction {
                        lock: false,
                        lockout_duration: None,
                        sound: None,
                    }),
                    description: None,
                    enabled: true,
                }],
                idle_lock: true,
                idle_lock_battery: false,
            }),
        });
        device
    }

    fn motion(source: EventTriggerSource, rfid: &str) -> Event {
        Event {
            event_id: Some(1),
            timestamp: Some(chrono::Utc::now()),
            event_trigger_source: Some(source),
            rfid_codes: Some(vec![rfid.to_owned()]),
            ..Event::default()
        }
    }

    #[test]
    fn sighting_and_profile_build_a_pet() {
        let pet = pet();
        assert_eq!(pet.rfid_code, "A");
        assert_eq!(pet.display_name(), "Miso");
        assert_eq!(pet.device_id, "OC-001");
    }

    #[test]
    fn display_name_falls_back_to_chip_code() {
        let unnamed = Pet::from_sighting(
            &json!({"rfidCode": "B", "timestamp": "2026-03-01T08:00:00Z"}),
            "OC-001",
        )
        .unwrap();
        assert_eq!(unnamed.display_name(), "B");
    }

    #[test]
    fn allowed_entry_means_present() {
        let device = permissive_device();
        let entered = motion(EventTriggerSource::OutdoorMotion, "A");
        assert_eq!(pet().is_present(&entered, &device), Some(true));
    }

    #[test]
    fn allowed_exit_means_absent() {
        let device = permissive_device();
        let left = motion(EventTriggerSource::IndoorMotion, "A");
        assert_eq!(pet().is_present(&left, &device), Some(false));
    }

    #[test]
    fn other_pets_events_say_nothing() {
        let device = permissive_device();
        let stranger = motion(EventTriggerSource::OutdoorMotion, "Z");
        assert_eq!(pet().is_present(&stranger, &device), None);
    }

    #[test]
    fn non_motion_triggers_say_nothing() {
        let device = permissive_device();
        let remote = motion(EventTriggerSource::Remote, "A");
        assert_eq!(pet().is_present(&remote, &device), None);
    }

    #[test]
    fn locked_or_unknown_verdicts_leave_presence_unchanged() {
        // device without a resolved policy: UNKNOWN verdict
        let bare =
            Device::from_payload(&json!({"deviceId": "OC-001"}), None).unwrap();
        let event = motion(EventTriggerSource::OutdoorMotion, "A");
        assert_eq!(pet().is_present(&event, &bare), None);

        // device with an always-lock policy: LOCKED verdict
        let mut locked = permissive_device();
        locked
            .device_transit_policy
            .as_mut()
            .unwrap()
            .transit_policy
            .as_mut()
            .unwrap()
            .rules[0]
            .action
            .as_mut()
            .unwrap()
            .lock = true;
        assert_eq!(pet().is_present(&event, &locked), None);
    }
}
