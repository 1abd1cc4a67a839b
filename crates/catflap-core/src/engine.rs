// ── Per-event consumer lifecycle and inference ──
//
// A consumer of one device's event stream walks a strict lifecycle:
// OPEN (fragments merging into a working copy) → CONCLUDED (a fragment
// delivered a non-null frame count) → reset to a fresh OPEN copy for the
// next event id. The transition is one-directional per event id; ids are
// reused by the gateway, so the reset is what keeps stale fields from a
// finished event out of the next one.

use crate::model::{Device, Event, EventClassification, PolicyResult};

/// Where one absorbed fragment left the working event.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPhase {
    /// Still accumulating; the merged state so far.
    Open(Event),
    /// The fragment concluded the event; the final merged state.
    /// The working copy has already been reset.
    Concluded(Event),
}

impl EventPhase {
    pub fn event(&self) -> &Event {
        match self {
            Self::Open(event) | Self::Concluded(event) => event,
        }
    }

    pub fn is_concluded(&self) -> bool {
        matches!(self, Self::Concluded(_))
    }
}

/// The working copy of a device's in-flight event.
#[derive(Debug, Default)]
pub struct WorkingEvent {
    current: Event,
}

impl WorkingEvent {
    pub fn new() -> Self {
        Self::default()
    }

    /// The merged state so far.
    pub fn current(&self) -> &Event {
        &self.current
    }

    /// Merge one fragment, resetting the working copy if it concluded
    /// the event.
    pub fn absorb(&mut self, fragment: Event) -> EventPhase {
        self.current.merge_from(fragment);

        if self.current.is_concluded() {
            let finished = std::mem::take(&mut self.current);
            EventPhase::Concluded(finished)
        } else {
            EventPhase::Open(self.current.clone())
        }
    }
}

/// Everything the policy engine can say about one merged event state.
#[derive(Debug, Clone, PartialEq)]
pub struct EventAssessment {
    /// The raw policy verdict.
    pub verdict: PolicyResult,
    /// Lock inference (remote override applied); `None` = no change.
    pub unlocked: Option<bool>,
    /// The device's classifier flagged contraband.
    pub contraband: bool,
}

/// Assess one merged event state against its device.
pub fn assess_event(device: &Device, event: &Event) -> EventAssessment {
    EventAssessment {
        verdict: device.determine_policy_result(event),
        unlocked: device.is_unlocked_by_event(event),
        contraband: event.event_classification == Some(EventClassification::Contraband),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::{
        DeviceTransitPolicy, EventTriggerSource, Pet, Rule, RuleAction, RuleCriteria,
        TransitPolicy,
    };
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn fragment(payload: serde_json::Value) -> Event {
        Event::from_payload(&payload).unwrap()
    }

    #[test]
    fn working_event_accumulates_until_frame_count() {
        let mut working = WorkingEvent::new();

        let phase = working.absorb(fragment(json!({
            "deviceId": "OC-001", "eventId": 42, "eventTriggerSource": 3,
        })));
        assert!(!phase.is_concluded());

        let phase = working.absorb(fragment(json!({"eventId": 42, "rfidCodes": ["A"]})));
        assert!(!phase.is_concluded());
        assert!(phase.event().carries_rfid("A"));

        let phase = working.absorb(fragment(json!({"eventId": 42, "frameCount": 180})));
        assert!(phase.is_concluded());
        // the final state carries everything accumulated on the way
        assert!(phase.event().carries_rfid("A"));
        assert_eq!(
            phase.event().event_trigger_source,
            Some(EventTriggerSource::OutdoorMotion)
        );
    }

    #[test]
    fn conclusion_resets_the_working_copy() {
        let mut working = WorkingEvent::new();
        working.absorb(fragment(json!({
            "eventId": 42, "rfidCodes": ["A"], "frameCount": 10,
        })));

        // next event reuses the id space; nothing must leak across
        assert_eq!(*working.current(), Event::default());
        let phase = working.absorb(fragment(json!({"eventId": 43, "eventTriggerSource": 2})));
        assert!(!phase.event().carries_rfid("A"));
    }

    // ── End-to-end scenario ──────────────────────────────────────────
    //
    // Device with one rule: outdoor motion by chip "A" unlocks; idle
    // state is locked. Chip "A" gets in (and is inferred present); an
    // unknown chip hits the idle lock and presence stays untouched.

    fn scenario_device() -> Device {
        let mut device = Device::from_payload(
            &json!({"deviceId": "D1", "deviceTransitPolicyId": 1}),
            None,
        )
        .unwrap();
        device.attach_policy(DeviceTransitPolicy {
            device_transit_policy_id: 1,
            device_id: "D1".into(),
            name: Some("Curfew".into()),
            transit_policy: Some(TransitPolicy {
                rules: vec![Rule {
                    criteria: Some(RuleCriteria {
                        event_trigger_sources: Some(vec![EventTriggerSource::OutdoorMotion]),
                        rfid_codes: Some(vec!["A".into()]),
                        ..RuleCriteria::default()
                    }),
                    action: Some(RuleAction {
                        lock: false,
                        lockout_duration: Some(0),
                        sound: None,
                    }),
                    description: Some("Let A in".into()),
                    enabled: true,
                }],
                idle_lock: true,
                idle_lock_battery: false,
            }),
        });
        device
    }

    fn scenario_pet() -> Pet {
        Pet::from_sighting(
            &json!({"rfidCode": "A", "timestamp": "2026-03-01T08:00:00Z"}),
            "D1",
        )
        .unwrap()
    }

    #[test]
    fn known_chip_unlocks_and_is_present() {
        let device = scenario_device();
        let pet = scenario_pet();

        let mut working = WorkingEvent::new();
        let phase = working.absorb(fragment(json!({
            "deviceId": "D1",
            "eventId": 1,
            "timestamp": "2026-03-01T20:00:00Z",
            "eventTriggerSource": 3,
            "rfidCodes": ["A"],
        })));

        let assessment = assess_event(&device, phase.event());
        assert_eq!(assessment.verdict, PolicyResult::Unlocked);
        assert_eq!(assessment.unlocked, Some(true));
        assert!(!assessment.contraband);

        assert_eq!(pet.is_present(phase.event(), &device), Some(true));
    }

    #[test]
    fn unknown_chip_hits_idle_lock_and_presence_is_unchanged() {
        let device = scenario_device();
        let pet = scenario_pet();

        let event = fragment(json!({
            "deviceId": "D1",
            "eventId": 2,
            "timestamp": "2026-03-01T20:05:00Z",
            "eventTriggerSource": 3,
            "rfidCodes": ["B"],
        }));

        let assessment = assess_event(&device, &event);
        assert_eq!(assessment.verdict, PolicyResult::Locked);
        assert_eq!(assessment.unlocked, Some(false));

        // pet "A" is not on this event at all: no presence inference
        assert_eq!(pet.is_present(&event, &device), None);
    }

    #[test]
    fn contraband_classification_is_flagged() {
        let device = scenario_device();
        let event = fragment(json!({
            "deviceId": "D1",
            "eventId": 3,
            "eventTriggerSource": 3,
            "eventClassification": 3,
        }));
        assert!(assess_event(&device, &event).contraband);
    }
}
