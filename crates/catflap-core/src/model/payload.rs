// ── Loosely-typed payload access ──
//
// The gateway sends JSON objects whose fields come and go between message
// types and firmware versions. These helpers read optional fields without
// ever failing: a missing or mistyped field is simply absent.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;

pub(crate) fn get_str(payload: &Value, key: &str) -> Option<String> {
    payload.get(key)?.as_str().map(str::to_owned)
}

pub(crate) fn get_i64(payload: &Value, key: &str) -> Option<i64> {
    payload.get(key)?.as_i64()
}

pub(crate) fn get_bool(payload: &Value, key: &str) -> Option<bool> {
    payload.get(key)?.as_bool()
}

/// Parse an ISO-8601 timestamp string, normalized to UTC.
///
/// Accepts an explicit offset or a bare local-less timestamp (treated as
/// UTC, which is what the gateway emits in practice).
pub(crate) fn parse_iso_datetime(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Read an ISO-8601 timestamp field.
pub(crate) fn get_iso_datetime(payload: &Value, key: &str) -> Option<DateTime<Utc>> {
    let raw = get_str(payload, key)?;
    let parsed = parse_iso_datetime(&raw);
    if parsed.is_none() {
        tracing::warn!(field = key, value = %raw, "unparseable timestamp");
    }
    parsed
}

/// Read an epoch-milliseconds timestamp field.
pub(crate) fn get_epoch_millis(payload: &Value, key: &str) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(get_i64(payload, key)?)
}

/// Read a field that may be a single scalar or a list of scalars.
///
/// The gateway collapses one-element lists to a bare value in several
/// criteria fields; normalize both shapes to a list. `None` means the
/// field is absent or null.
pub(crate) fn get_list_or_scalar(payload: &Value, key: &str) -> Option<Vec<Value>> {
    match payload.get(key)? {
        Value::Null => None,
        Value::Array(items) => Some(items.clone()),
        scalar => Some(vec![scalar.clone()]),
    }
}

/// Read a list of strings (scalar-or-list shaped).
pub(crate) fn get_str_list(payload: &Value, key: &str) -> Option<Vec<String>> {
    let items = get_list_or_scalar(payload, key)?;
    Some(
        items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_owned))
            .collect(),
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn iso_datetime_with_offset() {
        let dt = parse_iso_datetime("2026-03-01T21:30:00+01:00").unwrap();
        assert_eq!(dt.to_rfc3339(), "2026-03-01T20:30:00+00:00");
    }

    #[test]
    fn iso_datetime_without_offset_is_utc() {
        let dt = parse_iso_datetime("2026-03-01T20:30:00").unwrap();
        assert_eq!(dt.to_rfc3339(), "2026-03-01T20:30:00+00:00");
    }

    #[test]
    fn epoch_millis_field() {
        let payload = json!({"timestamp": 1_767_225_600_000_i64});
        let dt = get_epoch_millis(&payload, "timestamp").unwrap();
        assert_eq!(dt.timestamp(), 1_767_225_600);
    }

    #[test]
    fn scalar_normalizes_to_single_element_list() {
        let payload = json!({"rfidCode": "A1B2"});
        assert_eq!(get_str_list(&payload, "rfidCode").unwrap(), vec!["A1B2"]);
    }

    #[test]
    fn list_passes_through() {
        let payload = json!({"rfidCode": ["A1B2", "C3D4"]});
        assert_eq!(
            get_str_list(&payload, "rfidCode").unwrap(),
            vec!["A1B2", "C3D4"]
        );
    }

    #[test]
    fn null_and_missing_are_absent() {
        let payload = json!({"rfidCode": null});
        assert!(get_str_list(&payload, "rfidCode").is_none());
        assert!(get_str_list(&payload, "other").is_none());
        assert!(get_i64(&payload, "other").is_none());
    }

    #[test]
    fn mistyped_field_is_absent() {
        let payload = json!({"frameCount": "twelve"});
        assert!(get_i64(&payload, "frameCount").is_none());
    }
}
