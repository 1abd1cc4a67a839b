// ── Device domain types ──

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::event::{Event, EventTriggerSource};
use super::payload::{get_bool, get_epoch_millis, get_i64, get_str};
use super::policy::{DeviceTransitPolicy, PolicyResult};

/// Cloud-link state of a device.
///
/// Connectivity timestamps travel as epoch milliseconds (unlike event
/// timestamps, which are ISO-8601).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConnectivity {
    pub connected: bool,
    pub disconnect_reason: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl DeviceConnectivity {
    pub fn from_payload(payload: &Value) -> Option<Self> {
        payload.as_object()?;
        Some(Self {
            connected: get_bool(payload, "connected").unwrap_or(false),
            disconnect_reason: get_str(payload, "disconnectReason"),
            timestamp: get_epoch_millis(payload, "timestamp"),
        })
    }
}

/// The canonical pet-flap device.
///
/// Created on discovery, mutated in place by merges for the lifetime of
/// the session, rebuilt from scratch on reconnect. `device_transit_policy`
/// is the lazily resolved active policy and is only ever attached when its
/// id matches `device_transit_policy_id` — the two move in lockstep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub device_id: String,
    pub connectivity: Option<DeviceConnectivity>,
    pub description: Option<String>,
    /// IANA zone as last reported. `None` means never reported; evaluation
    /// treats that as UTC (see [`tz`](Self::tz)) without pretending the
    /// gateway told us so — a later partial update must not be able to
    /// "reset" a known zone by omission.
    pub time_zone: Option<Tz>,
    pub device_transit_policy_id: Option<i64>,
    pub device_transit_policy: Option<DeviceTransitPolicy>,
}

impl Device {
    /// Build a device from a gateway payload.
    ///
    /// `fallback_device_id` covers update bodies that omit `deviceId`
    /// because the enclosing envelope already named the device.
    pub fn from_payload(payload: &Value, fallback_device_id: Option<&str>) -> Option<Self> {
        payload.as_object()?;

        let device_id = get_str(payload, "deviceId")
            .or_else(|| fallback_device_id.map(str::to_owned))?;

        let time_zone = get_str(payload, "timeZone").map(|raw| {
            raw.parse::<Tz>().unwrap_or_else(|_| {
                tracing::warn!(device_id = %device_id, zone = %raw, "unable to parse time zone, using UTC");
                Tz::UTC
            })
        });

        Some(Self {
            device_id,
            connectivity: payload
                .get("connectivity")
                .and_then(DeviceConnectivity::from_payload),
            description: get_str(payload, "description"),
            time_zone,
            device_transit_policy_id: get_i64(payload, "deviceTransitPolicyId"),
            device_transit_policy: None,
        })
    }

    /// The zone used for policy evaluation; UTC until the gateway reports one.
    pub fn tz(&self) -> Tz {
        self.time_zone.unwrap_or(Tz::UTC)
    }

    /// Fold a partial update into this device.
    ///
    /// Present fields overwrite, absent fields never clear known state
    /// (omission is "no information"). Identity is immutable. If the
    /// active policy id changes, a previously resolved policy object that
    /// no longer matches is detached rather than left stale.
    pub fn merge_from(&mut self, update: Device) {
        let Device {
            device_id: _,
            connectivity,
            description,
            time_zone,
            device_transit_policy_id,
            device_transit_policy,
        } = update;

        super::event::merge_field(&mut self.connectivity, connectivity);
        super::event::merge_field(&mut self.description, description);
        super::event::merge_field(&mut self.time_zone, time_zone);
        super::event::merge_field(&mut self.device_transit_policy_id, device_transit_policy_id);
        super::event::merge_field(&mut self.device_transit_policy, device_transit_policy);

        if let Some(policy) = self.device_transit_policy.as_ref() {
            if self.device_transit_policy_id != Some(policy.device_transit_policy_id) {
                tracing::debug!(
                    device_id = %self.device_id,
                    stale_policy_id = policy.device_transit_policy_id,
                    active_policy_id = ?self.device_transit_policy_id,
                    "active policy changed, detaching stale resolved policy"
                );
                self.device_transit_policy = None;
            }
        }
    }

    /// Attach a resolved policy, keeping the id/object lockstep invariant.
    ///
    /// Returns `false` (and leaves the device untouched) when the policy
    /// is not the active one.
    pub fn attach_policy(&mut self, policy: DeviceTransitPolicy) -> bool {
        if self.device_transit_policy_id == Some(policy.device_transit_policy_id) {
            self.device_transit_policy = Some(policy);
            true
        } else {
            tracing::debug!(
                device_id = %self.device_id,
                policy_id = policy.device_transit_policy_id,
                active_policy_id = ?self.device_transit_policy_id,
                "not attaching inactive policy"
            );
            false
        }
    }

    /// Evaluate the active policy against an event.
    pub fn determine_policy_result(&self, event: &Event) -> PolicyResult {
        match self.device_transit_policy.as_ref() {
            Some(policy) => policy.determine_policy_result(event, self.tz()),
            None => {
                tracing::warn!(
                    device_id = %self.device_id,
                    event_id = ?event.event_id,
                    "no active transit policy resolved for device"
                );
                PolicyResult::Unknown
            }
        }
    }

    /// Lock state with no event in flight: the policy's idle default.
    /// `None` when no policy is resolved.
    pub fn is_unlocked_in_idle_state(&self) -> Option<bool> {
        let transit = self
            .device_transit_policy
            .as_ref()
            .and_then(|p| p.transit_policy.as_ref());
        match transit {
            Some(policy) => Some(!policy.idle_lock),
            None => {
                tracing::debug!(
                    device_id = %self.device_id,
                    "unable to determine idle lock state, no transit policy set"
                );
                None
            }
        }
    }

    /// Lock state implied by an event.
    ///
    /// A remote trigger always means an intentional unlock, whatever the
    /// policy says. Otherwise the verdict decides; UNKNOWN yields `None`
    /// so the caller retains its previously observed state.
    pub fn is_unlocked_by_event(&self, event: &Event) -> Option<bool> {
        if event.event_trigger_source == Some(EventTriggerSource::Remote) {
            return Some(true);
        }
        match self.determine_policy_result(event) {
            PolicyResult::Unlocked => Some(true),
            PolicyResult::Locked => Some(false),
            PolicyResult::Unknown => None,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::policy::{RuleAction, RuleCriteria, TransitPolicy};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn device_payload() -> Value {
        json!({
            "deviceId": "OC-001",
            "description": "Back door",
            "timeZone": "Europe/Berlin",
            "deviceTransitPolicyId": 5,
            "connectivity": {
                "connected": true,
                "disconnectReason": null,
                "timestamp": 1_767_225_600_000_i64,
            },
        })
    }

    fn resolved_policy(id: i64, idle_lock: bool) -> DeviceTransitPolicy {
        DeviceTransitPolicy {
            device_transit_policy_id: id,
            device_id: "OC-001".into(),
            name: Some("Default".into()),
            transit_policy: Some(TransitPolicy {
                rules: vec![],
                idle_lock,
                idle_lock_battery: false,
            }),
        }
    }

    #[test]
    fn from_payload_parses_device() {
        let device = Device::from_payload(&device_payload(), None).unwrap();
        assert_eq!(device.device_id, "OC-001");
        assert_eq!(device.description.as_deref(), Some("Back door"));
        assert_eq!(device.time_zone, Some(chrono_tz::Europe::Berlin));
        assert_eq!(device.device_transit_policy_id, Some(5));

        let connectivity = device.connectivity.unwrap();
        assert!(connectivity.connected);
        assert_eq!(connectivity.timestamp.unwrap().timestamp(), 1_767_225_600);
    }

    #[test]
    fn fallback_device_id_is_used_when_body_omits_it() {
        let device = Device::from_payload(&json!({"description": "Front"}), Some("OC-002")).unwrap();
        assert_eq!(device.device_id, "OC-002");

        // no id from anywhere: not a device
        assert!(Device::from_payload(&json!({"description": "Front"}), None).is_none());
    }

    #[test]
    fn bad_time_zone_falls_back_to_utc() {
        let device =
            Device::from_payload(&json!({"deviceId": "OC-001", "timeZone": "Mars/Olympus"}), None)
                .unwrap();
        assert_eq!(device.time_zone, Some(Tz::UTC));
        assert_eq!(device.tz(), Tz::UTC);
    }

    #[test]
    fn absent_time_zone_stays_unknown_but_evaluates_as_utc() {
        let device = Device::from_payload(&json!({"deviceId": "OC-001"}), None).unwrap();
        assert!(device.time_zone.is_none());
        assert_eq!(device.tz(), Tz::UTC);
    }

    #[test]
    fn merge_never_downgrades_known_fields() {
        let mut device = Device::from_payload(&device_payload(), None).unwrap();
        let sparse_update =
            Device::from_payload(&json!({"deviceId": "OC-001"}), None).unwrap();

        device.merge_from(sparse_update);

        assert_eq!(device.description.as_deref(), Some("Back door"));
        assert_eq!(device.time_zone, Some(chrono_tz::Europe::Berlin));
        assert!(device.connectivity.is_some());
    }

    #[test]
    fn merge_with_empty_update_is_identity() {
        let mut device = Device::from_payload(&device_payload(), None).unwrap();
        let before = device.clone();
        device.merge_from(Device::from_payload(&json!({"deviceId": "OC-001"}), None).unwrap());
        assert_eq!(device, before);
    }

    #[test]
    fn merge_overwrites_present_fields() {
        let mut device = Device::from_payload(&device_payload(), None).unwrap();
        let update = Device::from_payload(
            &json!({
                "deviceId": "OC-001",
                "connectivity": {"connected": false, "disconnectReason": "powerLoss", "timestamp": 1_767_229_200_000_i64},
            }),
            None,
        )
        .unwrap();

        device.merge_from(update);

        let connectivity = device.connectivity.unwrap();
        assert!(!connectivity.connected);
        assert_eq!(connectivity.disconnect_reason.as_deref(), Some("powerLoss"));
        // untouched field survives
        assert_eq!(device.description.as_deref(), Some("Back door"));
    }

    #[test]
    fn policy_id_change_detaches_stale_policy() {
        let mut device = Device::from_payload(&device_payload(), None).unwrap();
        assert!(device.attach_policy(resolved_policy(5, true)));
        assert!(device.device_transit_policy.is_some());

        let update = Device::from_payload(
            &json!({"deviceId": "OC-001", "deviceTransitPolicyId": 9}),
            None,
        )
        .unwrap();
        device.merge_from(update);

        assert_eq!(device.device_transit_policy_id, Some(9));
        assert!(
            device.device_transit_policy.is_none(),
            "stale resolved policy must not survive an id change"
        );
    }

    #[test]
    fn attach_rejects_inactive_policy() {
        let mut device = Device::from_payload(&device_payload(), None).unwrap();
        assert!(!device.attach_policy(resolved_policy(99, true)));
        assert!(device.device_transit_policy.is_none());
    }

    #[test]
    fn idle_lock_state() {
        let mut device = Device::from_payload(&device_payload(), None).unwrap();
        assert_eq!(device.is_unlocked_in_idle_state(), None);

        device.attach_policy(resolved_policy(5, true));
        assert_eq!(device.is_unlocked_in_idle_state(), Some(false));

        device.attach_policy(resolved_policy(5, false));
        assert_eq!(device.is_unlocked_in_idle_state(), Some(true));
    }

    #[test]
    fn remote_trigger_overrides_a_locking_policy() {
        let mut device = Device::from_payload(&device_payload(), None).unwrap();
        // a policy that locks everything
        let mut policy = resolved_policy(5, true);
        policy.transit_policy.as_mut().unwrap().rules.push(crate::model::Rule {
            criteria: Some(RuleCriteria::default()),
            action: Some(RuleAction {
                lock: true,
                lockout_duration: None,
                sound: None,
            }),
            description: Some("lockdown".into()),
            enabled: true,
        });
        device.attach_policy(policy);

        let remote = Event {
            event_trigger_source: Some(EventTriggerSource::Remote),
            ..Event::default()
        };
        assert_eq!(device.is_unlocked_by_event(&remote), Some(true));

        let motion = Event {
            event_trigger_source: Some(EventTriggerSource::OutdoorMotion),
            timestamp: Some(chrono::Utc::now()),
            ..Event::default()
        };
        assert_eq!(device.is_unlocked_by_event(&motion), Some(false));
    }

    #[test]
    fn unresolved_policy_yields_none_not_panic() {
        let device = Device::from_payload(&json!({"deviceId": "OC-001"}), None).unwrap();
        let event = Event::default();
        assert_eq!(device.determine_policy_result(&event), PolicyResult::Unknown);
        assert_eq!(device.is_unlocked_by_event(&event), None);
    }
}
