//! Serde helper for `Duration` fields that accept either a suffixed string
//! (`"90s"`, `"500ms"`, `"5m"`, `"1h"`) or the default `{secs, nanos}` object
//! form. Used by provider configuration and proxy settings so TOML/JSON
//! config files can write human-friendly durations.

use serde::{Deserializer, Serializer};
use std::time::Duration;

pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&format!("{}ms", duration.as_millis()))
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;
    use serde_json::Value;

    let value = Value::deserialize(deserializer)?;
    match value {
        Value::String(s) => parse_duration_string(&s).map_err(Error::custom),
        Value::Number(n) => {
            let ms = n
                .as_u64()
                .ok_or_else(|| Error::custom("duration number must be a non-negative integer"))?;
            Ok(Duration::from_millis(ms))
        }
        Value::Object(obj) => {
            let secs = obj
                .get("secs")
                .and_then(|v| v.as_u64())
                .ok_or_else(|| Error::custom("missing 'secs' field"))?;
            let nanos = obj.get("nanos").and_then(|v| v.as_u64()).unwrap_or(0);
            Ok(Duration::new(secs, nanos as u32))
        }
        _ => Err(Error::custom("invalid duration format")),
    }
}

pub fn parse_duration_string(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }
    if let Some(stripped) = s.strip_suffix("ms") {
        let num: u64 = stripped
            .parse()
            .map_err(|_| format!("invalid number: {stripped}"))?;
        return Ok(Duration::from_millis(num));
    }
    if let Some(stripped) = s.strip_suffix('h') {
        let num: u64 = stripped
            .parse()
            .map_err(|_| format!("invalid number: {stripped}"))?;
        return Ok(Duration::from_secs(num * 3600));
    }
    if let Some(stripped) = s.strip_suffix('m') {
        let num: u64 = stripped
            .parse()
            .map_err(|_| format!("invalid number: {stripped}"))?;
        return Ok(Duration::from_secs(num * 60));
    }
    if let Some(stripped) = s.strip_suffix('s') {
        let num: f64 = stripped
            .parse()
            .map_err(|_| format!("invalid number: {stripped}"))?;
        let secs = num.trunc() as u64;
        let nanos = (num.fract() * 1_000_000_000.0).round() as u32;
        return Ok(Duration::new(secs, nanos));
    }
    Err(format!("unknown duration unit: {s}"))
}

/// Same helper for `Option<Duration>` fields, used wherever a timeout is
/// optional (e.g. a provider configuration that defers to the engine's
/// default timeout table).
pub mod option {
    use super::{deserialize as deserialize_duration, serialize as serialize_duration};
    use serde::{Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(d) => serialize_duration(d, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<serde_json::Value>::deserialize(deserializer)?;
        match value {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(v) => deserialize_duration(v).map(Some).map_err(serde::de::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::parse_duration_string;
    use std::time::Duration;

    #[test]
    fn parses_milliseconds() {
        assert_eq!(parse_duration_string("500ms").unwrap(), Duration::from_millis(500));
    }

    #[test]
    fn parses_seconds() {
        assert_eq!(parse_duration_string("90s").unwrap(), Duration::from_secs(90));
    }

    #[test]
    fn parses_minutes_and_hours() {
        assert_eq!(parse_duration_string("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration_string("1h").unwrap(), Duration::from_secs(3600));
    }

    #[test]
    fn rejects_unknown_unit() {
        assert!(parse_duration_string("5x").is_err());
    }
}
