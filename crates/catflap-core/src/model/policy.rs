// ── Transit policy domain types and rule evaluation ──
//
// A device carries a set of named transit policies; exactly one is active
// at a time. A policy is an ordered rule list plus an idle default. Rule
// evaluation is strictly first-match-wins: no scoring, no conflict
// resolution beyond list order.

use chrono::{DateTime, NaiveTime, TimeDelta, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::event::{Event, EventClassification, EventTriggerSource};
use super::payload::{get_bool, get_i64, get_list_or_scalar, get_str, get_str_list};

/// Outcome of evaluating a policy against one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
pub enum PolicyResult {
    Unknown,
    Locked,
    Unlocked,
}

/// Sounds a rule action can play on the device speaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[non_exhaustive]
pub enum SoundAction {
    Unknown,
    Affirm,
    Alarm,
    AngryMeow,
    Bell,
    Choir,
    Coin,
    Deny,
    Fanfare,
    Success,
}

impl SoundAction {
    pub fn from_wire(value: &str) -> Self {
        match value {
            "affirm" => Self::Affirm,
            "alarm" => Self::Alarm,
            "angry-meow" => Self::AngryMeow,
            "bell" => Self::Bell,
            "choir" => Self::Choir,
            "coin" => Self::Coin,
            "deny" => Self::Deny,
            "fanfare" => Self::Fanfare,
            "success" => Self::Success,
            other => {
                tracing::warn!(value = other, "unknown sound action");
                Self::Unknown
            }
        }
    }
}

/// What a matched rule does to the flap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleAction {
    pub lock: bool,
    pub lockout_duration: Option<i64>,
    pub sound: Option<SoundAction>,
}

impl RuleAction {
    pub fn from_payload(payload: &Value) -> Option<Self> {
        payload.as_object()?;
        Some(Self {
            lock: get_bool(payload, "lock").unwrap_or(false),
            lockout_duration: get_i64(payload, "lockoutDuration"),
            sound: get_str(payload, "sound")
                .map(|raw| SoundAction::from_wire(&raw)),
        })
    }
}

/// A daily window in device-local time. `start > end` wraps past midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start_hour: u32,
    pub start_minute: u32,
    pub end_hour: u32,
    pub end_minute: u32,
}

impl TimeRange {
    /// Parse the wire form `"HH:MM-HH:MM"`.
    pub fn from_wire(raw: &str) -> Option<Self> {
        let (start, end) = raw.split_once('-')?;
        let (start_hour, start_minute) = parse_hhmm(start)?;
        let (end_hour, end_minute) = parse_hhmm(end)?;
        Some(Self {
            start_hour,
            start_minute,
            end_hour,
            end_minute,
        })
    }

    /// Whether the instant falls inside this window, in the given zone.
    ///
    /// Same-day boundaries are built from the event's local date; for an
    /// overnight range the boundary on the wrong side of the event is
    /// shifted by a day so the window spans midnight correctly whether
    /// the event lands before or after it. The end boundary is padded to
    /// the last nanosecond of its minute so boundary events stay inside.
    pub fn contains(&self, timestamp: DateTime<Utc>, tz: Tz) -> bool {
        let event_time = timestamp.with_timezone(&tz);

        let Some(mut start) = at_local_time(&event_time, self.start_hour, self.start_minute, 0, 0)
        else {
            return false;
        };
        let Some(mut end) =
            at_local_time(&event_time, self.end_hour, self.end_minute, 59, 999_999_999)
        else {
            return false;
        };

        // Overnight range, e.g. 22:00-02:00
        if start > end {
            if start > event_time {
                start -= TimeDelta::days(1);
            } else {
                end += TimeDelta::days(1);
            }
        }

        start <= event_time && event_time <= end
    }
}

fn parse_hhmm(raw: &str) -> Option<(u32, u32)> {
    let (hour, minute) = raw.trim().split_once(':')?;
    let hour: u32 = hour.parse().ok()?;
    let minute: u32 = minute.parse().ok()?;
    (hour < 24 && minute < 60).then_some((hour, minute))
}

/// Rebuild the given local datetime at a fixed wall-clock time.
fn at_local_time(
    local: &DateTime<Tz>,
    hour: u32,
    minute: u32,
    second: u32,
    nano: u32,
) -> Option<DateTime<Tz>> {
    let time = NaiveTime::from_hms_nano_opt(hour, minute, second, nano)?;
    // A DST gap can make a wall-clock time ambiguous or nonexistent;
    // take the earliest valid interpretation.
    local.with_time(time).earliest()
}

/// Filters a rule applies to an event. Every absent/empty filter is
/// unconstrained; present filters AND together.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleCriteria {
    pub event_trigger_sources: Option<Vec<EventTriggerSource>>,
    pub event_classifications: Option<Vec<EventClassification>>,
    pub time_ranges: Option<Vec<TimeRange>>,
    pub rfid_codes: Option<Vec<String>>,
    pub rfid_timeout: Option<i64>,
}

impl RuleCriteria {
    pub fn from_payload(payload: &Value) -> Option<Self> {
        payload.as_object()?;
        Some(Self {
            event_trigger_sources: get_list_or_scalar(payload, "eventTriggerSource").map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_i64)
                    .map(EventTriggerSource::from_wire)
                    .collect()
            }),
            event_classifications: get_list_or_scalar(payload, "eventClassification").map(
                |items| {
                    items
                        .iter()
                        .filter_map(Value::as_i64)
                        .map(EventClassification::from_wire)
                        .collect()
                },
            ),
            time_ranges: get_str_list(payload, "timeRange")
                .map(|items| items.iter().filter_map(|s| TimeRange::from_wire(s)).collect()),
            rfid_codes: get_str_list(payload, "rfidCode"),
            rfid_timeout: get_i64(payload, "rfidTimeout"),
        })
    }

    /// Whether the event satisfies every present filter.
    pub fn matches(&self, event: &Event, tz: Tz) -> bool {
        if let Some(sources) = non_empty(self.event_trigger_sources.as_deref()) {
            match event.event_trigger_source {
                Some(source) if sources.contains(&source) => {}
                _ => return false,
            }
        }

        if let Some(classifications) = non_empty(self.event_classifications.as_deref()) {
            match event.event_classification {
                Some(classification) if classifications.contains(&classification) => {}
                _ => return false,
            }
        }

        if let Some(filter) = non_empty(self.rfid_codes.as_deref()) {
            // An event with no RFID reads never matches an RFID filter.
            let Some(codes) = event.rfid_codes.as_ref() else {
                return false;
            };
            if !codes.iter().any(|code| filter.contains(code)) {
                return false;
            }
        }

        if let Some(ranges) = non_empty(self.time_ranges.as_deref()) {
            let Some(timestamp) = event.timestamp else {
                return false;
            };
            return ranges.iter().any(|range| range.contains(timestamp, tz));
        }

        true
    }
}

fn non_empty<T>(items: Option<&[T]>) -> Option<&[T]> {
    items.filter(|i| !i.is_empty())
}

/// One criteria → action pair within a transit policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub criteria: Option<RuleCriteria>,
    pub action: Option<RuleAction>,
    pub description: Option<String>,
    pub enabled: bool,
}

impl Rule {
    pub fn from_payload(payload: &Value) -> Option<Self> {
        payload.as_object()?;
        Some(Self {
            criteria: payload.get("criteria").and_then(RuleCriteria::from_payload),
            action: payload.get("action").and_then(RuleAction::from_payload),
            description: get_str(payload, "description"),
            enabled: get_bool(payload, "enabled").unwrap_or(true),
        })
    }
}

/// The rule set itself: ordered rules plus the idle defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransitPolicy {
    pub rules: Vec<Rule>,
    pub idle_lock: bool,
    pub idle_lock_battery: bool,
}

impl TransitPolicy {
    pub fn from_payload(payload: &Value) -> Option<Self> {
        payload.as_object()?;
        let rules = payload
            .get("rules")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Rule::from_payload).collect())
            .unwrap_or_default();

        Some(Self {
            rules,
            idle_lock: get_bool(payload, "idleLock").unwrap_or(false),
            idle_lock_battery: get_bool(payload, "idleLockBattery").unwrap_or(false),
        })
    }
}

/// A named, device-scoped transit policy as the gateway stores it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceTransitPolicy {
    pub device_transit_policy_id: i64,
    pub device_id: String,
    pub name: Option<String>,
    pub transit_policy: Option<TransitPolicy>,
}

impl DeviceTransitPolicy {
    pub fn from_payload(payload: &Value) -> Option<Self> {
        payload.as_object()?;
        Some(Self {
            device_transit_policy_id: get_i64(payload, "deviceTransitPolicyId")?,
            device_id: get_str(payload, "deviceId")?,
            name: get_str(payload, "name"),
            transit_policy: payload
                .get("transitPolicy")
                .and_then(TransitPolicy::from_payload),
        })
    }

    /// Evaluate this policy against an event in the device's time zone.
    ///
    /// First enabled rule with matching criteria wins; a rule without an
    /// explicit criteria object can never match. With no match the idle
    /// lock state decides. UNKNOWN only when the rule set itself was never
    /// resolved — an operational gap, logged as such, never an error.
    pub fn determine_policy_result(&self, event: &Event, tz: Tz) -> PolicyResult {
        let Some(policy) = self.transit_policy.as_ref() else {
            tracing::warn!(
                event_id = ?event.event_id,
                policy_id = self.device_transit_policy_id,
                "no transit policy resolved, unable to determine policy result"
            );
            return PolicyResult::Unknown;
        };

        for rule in &policy.rules {
            if !rule.enabled {
                continue;
            }
            let Some(criteria) = rule.criteria.as_ref() else {
                continue;
            };
            if !criteria.matches(event, tz) {
                continue;
            }

            let locked = rule.action.as_ref().is_some_and(|action| action.lock);
            let result = if locked {
                PolicyResult::Locked
            } else {
                PolicyResult::Unlocked
            };
            tracing::debug!(
                event_id = ?event.event_id,
                rule = rule.description.as_deref().unwrap_or("<unnamed>"),
                %result,
                "rule matched"
            );
            return result;
        }

        tracing::debug!(
            event_id = ?event.event_id,
            idle_lock = policy.idle_lock,
            "no matching rule, falling back to idle lock state"
        );
        if policy.idle_lock {
            PolicyResult::Locked
        } else {
            PolicyResult::Unlocked
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    fn motion_event(source: EventTriggerSource, rfid: &[&str]) -> Event {
        Event {
            event_id: Some(7),
            timestamp: Some(utc(2026, 3, 1, 12, 0)),
            event_trigger_source: Some(source),
            rfid_codes: Some(rfid.iter().map(|&s| s.to_owned()).collect()),
            ..Event::default()
        }
    }

    fn policy_with_rules(rules: Vec<Rule>, idle_lock: bool) -> DeviceTransitPolicy {
        DeviceTransitPolicy {
            device_transit_policy_id: 1,
            device_id: "OC-001".into(),
            name: Some("Day".into()),
            transit_policy: Some(TransitPolicy {
                rules,
                idle_lock,
                idle_lock_battery: false,
            }),
        }
    }

    fn rule(criteria: Option<RuleCriteria>, lock: bool) -> Rule {
        Rule {
            criteria,
            action: Some(RuleAction {
                lock,
                lockout_duration: Some(0),
                sound: None,
            }),
            description: None,
            enabled: true,
        }
    }

    // ── TimeRange ────────────────────────────────────────────────────

    #[test]
    fn time_range_parses_wire_form() {
        let range = TimeRange::from_wire("22:00-02:30").unwrap();
        assert_eq!(range.start_hour, 22);
        assert_eq!(range.start_minute, 0);
        assert_eq!(range.end_hour, 2);
        assert_eq!(range.end_minute, 30);

        assert!(TimeRange::from_wire("22:00").is_none());
        assert!(TimeRange::from_wire("25:00-02:00").is_none());
        assert!(TimeRange::from_wire("nonsense").is_none());
    }

    #[test]
    fn daytime_range_contains_and_excludes() {
        let range = TimeRange::from_wire("08:00-17:00").unwrap();
        assert!(range.contains(utc(2026, 3, 1, 12, 0), Tz::UTC));
        assert!(!range.contains(utc(2026, 3, 1, 6, 0), Tz::UTC));
        assert!(!range.contains(utc(2026, 3, 1, 18, 0), Tz::UTC));
    }

    #[test]
    fn overnight_range_wraps_midnight() {
        let range = TimeRange::from_wire("22:00-02:00").unwrap();
        // just before midnight
        assert!(range.contains(utc(2026, 3, 1, 23, 30), Tz::UTC));
        // just after midnight
        assert!(range.contains(utc(2026, 3, 2, 1, 0), Tz::UTC));
        // midday is outside
        assert!(!range.contains(utc(2026, 3, 1, 12, 0), Tz::UTC));
    }

    #[test]
    fn end_minute_is_inclusive() {
        let range = TimeRange::from_wire("08:00-17:00").unwrap();
        assert!(range.contains(utc(2026, 3, 1, 17, 0), Tz::UTC));
        assert!(!range.contains(utc(2026, 3, 1, 17, 1), Tz::UTC));
    }

    #[test]
    fn containment_respects_device_time_zone() {
        let range = TimeRange::from_wire("22:00-02:00").unwrap();
        // 21:30 UTC in July is 23:30 in Berlin (CEST): inside the window
        let instant = utc(2026, 7, 1, 21, 30);
        assert!(range.contains(instant, chrono_tz::Europe::Berlin));
        assert!(!range.contains(instant, Tz::UTC));
    }

    // ── Criteria matching ────────────────────────────────────────────

    #[test]
    fn absent_filters_match_everything() {
        let criteria = RuleCriteria::default();
        let event = motion_event(EventTriggerSource::OutdoorMotion, &["A"]);
        assert!(criteria.matches(&event, Tz::UTC));
    }

    #[test]
    fn trigger_source_filter() {
        let criteria = RuleCriteria {
            event_trigger_sources: Some(vec![EventTriggerSource::OutdoorMotion]),
            ..RuleCriteria::default()
        };
        assert!(criteria.matches(&motion_event(EventTriggerSource::OutdoorMotion, &[]), Tz::UTC));
        assert!(!criteria.matches(&motion_event(EventTriggerSource::IndoorMotion, &[]), Tz::UTC));

        // event without a trigger source fails a present filter
        let untagged = Event {
            timestamp: Some(utc(2026, 3, 1, 12, 0)),
            ..Event::default()
        };
        assert!(!criteria.matches(&untagged, Tz::UTC));
    }

    #[test]
    fn rfid_filter_requires_intersection() {
        let criteria = RuleCriteria {
            rfid_codes: Some(vec!["A".into(), "B".into()]),
            ..RuleCriteria::default()
        };

        assert!(criteria.matches(&motion_event(EventTriggerSource::OutdoorMotion, &["B"]), Tz::UTC));
        assert!(!criteria.matches(&motion_event(EventTriggerSource::OutdoorMotion, &["C"]), Tz::UTC));

        // no RFID reads at all: never matches a non-empty filter
        let mut chipless = motion_event(EventTriggerSource::OutdoorMotion, &[]);
        chipless.rfid_codes = None;
        assert!(!criteria.matches(&chipless, Tz::UTC));
    }

    #[test]
    fn time_filter_needs_a_timestamp() {
        let criteria = RuleCriteria {
            time_ranges: Some(vec![TimeRange::from_wire("00:00-23:59").unwrap()]),
            ..RuleCriteria::default()
        };
        let mut event = motion_event(EventTriggerSource::OutdoorMotion, &[]);
        assert!(criteria.matches(&event, Tz::UTC));

        event.timestamp = None;
        assert!(!criteria.matches(&event, Tz::UTC));
    }

    #[test]
    fn criteria_parses_scalar_and_list_payloads() {
        let criteria = RuleCriteria::from_payload(&json!({
            "eventTriggerSource": 3,
            "eventClassification": [1, 2],
            "timeRange": "22:00-02:00",
            "rfidCode": ["A", "B"],
            "rfidTimeout": 30,
        }))
        .unwrap();

        assert_eq!(
            criteria.event_trigger_sources,
            Some(vec![EventTriggerSource::OutdoorMotion])
        );
        assert_eq!(
            criteria.event_classifications,
            Some(vec![
                EventClassification::Clear,
                EventClassification::Suspicious
            ])
        );
        assert_eq!(criteria.time_ranges.as_ref().map(Vec::len), Some(1));
        assert_eq!(criteria.rfid_codes, Some(vec!["A".into(), "B".into()]));
        assert_eq!(criteria.rfid_timeout, Some(30));
    }

    // ── Policy evaluation ────────────────────────────────────────────

    #[test]
    fn first_matching_rule_wins() {
        let policy = policy_with_rules(
            vec![
                rule(Some(RuleCriteria::default()), true),
                rule(Some(RuleCriteria::default()), false),
            ],
            false,
        );
        let event = motion_event(EventTriggerSource::OutdoorMotion, &["A"]);
        assert_eq!(
            policy.determine_policy_result(&event, Tz::UTC),
            PolicyResult::Locked
        );
    }

    #[test]
    fn idle_lock_decides_when_no_rule_matches() {
        let event = motion_event(EventTriggerSource::OutdoorMotion, &["A"]);

        let locked_idle = policy_with_rules(vec![], true);
        assert_eq!(
            locked_idle.determine_policy_result(&event, Tz::UTC),
            PolicyResult::Locked
        );

        let open_idle = policy_with_rules(vec![], false);
        assert_eq!(
            open_idle.determine_policy_result(&event, Tz::UTC),
            PolicyResult::Unlocked
        );
    }

    #[test]
    fn rule_without_criteria_never_matches() {
        let policy = policy_with_rules(vec![rule(None, false)], true);
        let event = motion_event(EventTriggerSource::OutdoorMotion, &["A"]);
        assert_eq!(
            policy.determine_policy_result(&event, Tz::UTC),
            PolicyResult::Locked
        );
    }

    #[test]
    fn disabled_rules_are_skipped() {
        let mut disabled = rule(Some(RuleCriteria::default()), false);
        disabled.enabled = false;
        let policy = policy_with_rules(vec![disabled], true);

        let event = motion_event(EventTriggerSource::OutdoorMotion, &["A"]);
        assert_eq!(
            policy.determine_policy_result(&event, Tz::UTC),
            PolicyResult::Locked
        );
    }

    #[test]
    fn unresolved_policy_yields_unknown() {
        let policy = DeviceTransitPolicy {
            device_transit_policy_id: 1,
            device_id: "OC-001".into(),
            name: None,
            transit_policy: None,
        };
        let event = motion_event(EventTriggerSource::OutdoorMotion, &["A"]);
        assert_eq!(
            policy.determine_policy_result(&event, Tz::UTC),
            PolicyResult::Unknown
        );
    }

    #[test]
    fn evaluation_is_deterministic() {
        let policy = policy_with_rules(
            vec![rule(
                Some(RuleCriteria {
                    event_trigger_sources: Some(vec![EventTriggerSource::OutdoorMotion]),
                    ..RuleCriteria::default()
                }),
                false,
            )],
            true,
        );
        let event = motion_event(EventTriggerSource::OutdoorMotion, &["A"]);

        let first = policy.determine_policy_result(&event, Tz::UTC);
        for _ in 0..10 {
            assert_eq!(policy.determine_policy_result(&event, Tz::UTC), first);
        }
    }

    // ── Payload parsing ──────────────────────────────────────────────

    #[test]
    fn device_transit_policy_from_payload() {
        let policy = DeviceTransitPolicy::from_payload(&json!({
            "deviceTransitPolicyId": 12,
            "deviceId": "OC-001",
            "name": "Night curfew",
            "transitPolicy": {
                "rules": [{
                    "criteria": {"eventTriggerSource": 3, "rfidCode": "A"},
                    "action": {"lock": false, "lockoutDuration": 0, "sound": "affirm"},
                    "description": "Let A in",
                }],
                "idleLock": true,
                "idleLockBattery": false,
            },
        }))
        .unwrap();

        assert_eq!(policy.device_transit_policy_id, 12);
        assert_eq!(policy.name.as_deref(), Some("Night curfew"));
        let transit = policy.transit_policy.as_ref().unwrap();
        assert!(transit.idle_lock);
        assert_eq!(transit.rules.len(), 1);
        let first = &transit.rules[0];
        assert!(first.enabled, "enabled defaults to true");
        assert_eq!(
            first.action.as_ref().unwrap().sound,
            Some(SoundAction::Affirm)
        );
    }

    #[test]
    fn policy_without_id_is_absent() {
        assert!(DeviceTransitPolicy::from_payload(&json!({"deviceId": "OC-001"})).is_none());
        assert!(DeviceTransitPolicy::from_payload(&Value::Null).is_none());
    }

    #[test]
    fn unknown_sound_maps_to_unknown() {
        assert_eq!(SoundAction::from_wire("kazoo"), SoundAction::Unknown);
    }
}
