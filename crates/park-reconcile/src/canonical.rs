use chrono::{DateTime, TimeZone, Utc};
use park_schemas::RawStatus;
use serde_json::Value;

use crate::{Occupancy, SlotId};

/// Canonicalizer rejections. Both carry the offending raw value so the
/// caller can log it.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CanonicalError {
    #[error("invalid slot label {raw:?}")]
    InvalidSlotLabel { raw: String },
    #[error("invalid status {raw}")]
    InvalidStatus { raw: String },
}

/// Extract the canonical slot id from a label.
///
/// Takes the first contiguous run of ASCII digits: `"slot1"` → 1,
/// `"slot 08"` → 8, `"8"` → 8. Labels with no digits, a zero value, or a
/// value that does not fit `i64` are rejected.
pub fn normalize_slot_id(label: &str) -> Result<SlotId, CanonicalError> {
    let reject = || CanonicalError::InvalidSlotLabel {
        raw: label.to_string(),
    };

    let start = label.find(|c: char| c.is_ascii_digit()).ok_or_else(reject)?;
    let rest = &label[start..];
    let end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());

    let n: i64 = rest[..end].parse().map_err(|_| reject())?;
    SlotId::new(n).ok_or_else(reject)
}

/// Map a raw status to [`Occupancy`].
///
/// `"occupied"` and `"empty"` are matched literally. Any other string is
/// trimmed and read as a number; numbers are accepted only when exactly 0 or 1.
pub fn normalize_status(raw: &RawStatus) -> Result<Occupancy, CanonicalError> {
    let reject = || CanonicalError::InvalidStatus {
        raw: raw.to_string(),
    };

    let n = match raw {
        RawStatus::Text(s) if s == "occupied" => return Ok(Occupancy::Occupied),
        RawStatus::Text(s) if s == "empty" => return Ok(Occupancy::Empty),
        RawStatus::Text(s) => s.trim().parse::<f64>().map_err(|_| reject())?,
        RawStatus::Number(n) => *n,
        RawStatus::Other(_) => return Err(reject()),
    };

    if n == 0.0 {
        Ok(Occupancy::Empty)
    } else if n == 1.0 {
        Ok(Occupancy::Occupied)
    } else {
        Err(reject())
    }
}

/// Epoch values below this are read as seconds, at or above as milliseconds.
const EPOCH_MILLIS_THRESHOLD: f64 = 1e11;

/// Best-effort parse of a publisher timestamp.
///
/// Accepts RFC 3339 strings and epoch numbers (seconds or milliseconds).
/// Returns `None` for anything else; the timestamp is advisory.
pub fn parse_event_timestamp(v: &Value) -> Option<DateTime<Utc>> {
    match v {
        Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => {
            let f = n.as_f64()?;
            if !f.is_finite() || f < 0.0 {
                return None;
            }
            let millis = if f < EPOCH_MILLIS_THRESHOLD {
                f * 1000.0
            } else {
                f
            };
            Utc.timestamp_millis_opt(millis as i64).single()
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn slot(n: i64) -> SlotId {
        SlotId::new(n).unwrap()
    }

    #[test]
    fn slot_labels_resolve_to_first_digit_run() {
        assert_eq!(normalize_slot_id("slot1"), Ok(slot(1)));
        assert_eq!(normalize_slot_id("slot 08"), Ok(slot(8)));
        assert_eq!(normalize_slot_id("8"), Ok(slot(8)));
        assert_eq!(normalize_slot_id("A12-B7"), Ok(slot(12)));
        assert_eq!(normalize_slot_id("  slot_42  "), Ok(slot(42)));
    }

    #[test]
    fn slot_labels_without_positive_digits_are_rejected() {
        for bad in ["", "slot", "slot-x", "0", "slot 000", "99999999999999999999999"] {
            assert_eq!(
                normalize_slot_id(bad),
                Err(CanonicalError::InvalidSlotLabel { raw: bad.to_string() }),
                "label {bad:?}"
            );
        }
    }

    #[test]
    fn status_words_and_digits_are_accepted() {
        let ok = [
            (RawStatus::Text("occupied".into()), Occupancy::Occupied),
            (RawStatus::Text("empty".into()), Occupancy::Empty),
            (RawStatus::Text("1".into()), Occupancy::Occupied),
            (RawStatus::Text("0".into()), Occupancy::Empty),
            (RawStatus::Text(" 1 ".into()), Occupancy::Occupied),
            (RawStatus::Number(1.0), Occupancy::Occupied),
            (RawStatus::Number(0.0), Occupancy::Empty),
        ];
        for (raw, want) in ok {
            assert_eq!(normalize_status(&raw), Ok(want), "raw {raw}");
        }
    }

    #[test]
    fn other_statuses_are_rejected() {
        let bad = [
            RawStatus::Text("bad".into()),
            RawStatus::Text("Occupied".into()),
            RawStatus::Text("".into()),
            RawStatus::Text("NaN".into()),
            RawStatus::Text("2".into()),
            RawStatus::Number(-1.0),
            RawStatus::Number(0.5),
            RawStatus::Number(f64::NAN),
            RawStatus::Other(json!(true)),
            RawStatus::Other(json!(null)),
        ];
        for raw in bad {
            assert!(
                matches!(normalize_status(&raw), Err(CanonicalError::InvalidStatus { .. })),
                "raw {raw} must be rejected"
            );
        }
    }

    #[test]
    fn invalid_status_error_carries_raw_value() {
        let err = normalize_status(&RawStatus::Text("bad".into())).unwrap_err();
        assert_eq!(err.to_string(), "invalid status \"bad\"");
    }

    #[test]
    fn event_timestamps_parse_from_rfc3339_and_epoch() {
        let want = Utc.with_ymd_and_hms(2025, 11, 2, 10, 0, 0).unwrap();
        assert_eq!(parse_event_timestamp(&json!("2025-11-02T10:00:00Z")), Some(want));
        assert_eq!(parse_event_timestamp(&json!("2025-11-02T19:00:00+09:00")), Some(want));
        assert_eq!(parse_event_timestamp(&json!(want.timestamp())), Some(want));
        assert_eq!(parse_event_timestamp(&json!(want.timestamp_millis())), Some(want));
        assert_eq!(parse_event_timestamp(&json!("yesterday")), None);
        assert_eq!(parse_event_timestamp(&json!({"t": 1})), None);
        assert_eq!(parse_event_timestamp(&json!(-5)), None);
    }
}
