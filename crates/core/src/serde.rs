//! Serde helpers for client payloads.
//!
//! Client devices send optional fields as empty strings, omit them, or send
//! explicit `null`s with different meanings. These helpers normalize that.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};

use crate::sql::parse_timestamp;

/// Deserialize an optional string, treating empty strings as None.
pub fn deserialize_optional_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let s: Option<String> = Option::deserialize(deserializer)?;
    Ok(s.filter(|s| !s.trim().is_empty()))
}

/// Deserialize an optional timestamp in any stored layout, treating empty
/// strings as None.
pub fn deserialize_optional_timestamp<'de, D>(
    deserializer: D,
) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let s: Option<String> = Option::deserialize(deserializer)?;
    match s {
        Some(s) if !s.trim().is_empty() => parse_timestamp(&s)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {s}"))),
        _ => Ok(None),
    }
}

/// Deserialize a timestamp that distinguishes "absent" from "null".
///
/// Use with `#[serde(default)]`: a missing field stays `None` (keep the
/// stored value), `null` becomes `Some(None)` (clear it), and a value becomes
/// `Some(Some(ts))`.
pub fn deserialize_timestamp_patch<'de, D>(
    deserializer: D,
) -> Result<Option<Option<DateTime<Utc>>>, D::Error>
where
    D: Deserializer<'de>,
{
    deserialize_optional_timestamp(deserializer).map(Some)
}
