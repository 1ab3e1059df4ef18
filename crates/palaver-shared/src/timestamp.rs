//! Timestamp parsing and canonical formatting.
//!
//! Remote rows carry timestamps as strings in whatever shape the remote
//! database emits (RFC 3339 with or without fractional seconds, or the
//! space-separated Postgres form). Locally every timestamp is written in a
//! single fixed-width UTC form so that string ordering and chronological
//! ordering agree.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serializer};

/// Parse a timestamp string leniently. Returns `None` when nothing matches.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    // Postgres text output: `2025-03-07 10:15:00.123456+00`
    for fmt in ["%Y-%m-%d %H:%M:%S%.f%#z", "%Y-%m-%d %H:%M:%S%.f%:z"] {
        if let Ok(dt) = DateTime::parse_from_str(raw, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
    }

    // No offset at all: treat as UTC.
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(naive.and_utc());
        }
    }

    None
}

/// Canonical storage form: RFC 3339, UTC, microsecond precision, `Z` suffix.
pub fn to_storage_string(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Serde helper: write a timestamp in the canonical storage form.
pub fn serialize_storage<S>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&to_storage_string(ts))
}

/// Serde helper: [`serialize_storage`] for optional timestamps.
pub fn serialize_storage_opt<S: Serializer>(
    ts: &Option<DateTime<Utc>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match ts {
        Some(ts) => serialize_storage(ts, serializer),
        None => serializer.serialize_none(),
    }
}

/// Serde helper: an optional timestamp that degrades to `None` instead of
/// failing the whole record when the value is absent, null or unparseable.
pub fn deserialize_lenient<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(|v| v.as_str()).and_then(parse_timestamp))
}
