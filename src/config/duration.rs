//! Duration parsing for topology files.

use std::time::Duration;

use serde::{Deserialize, Deserializer};

/// Parse a duration string like "250ms", "30s", "2m", "1h" or "30".
/// Supports:
/// - Plain numbers (interpreted as seconds): "30"
/// - Milliseconds suffix: "250ms"
/// - Seconds suffix: "30s"
/// - Minutes suffix: "2m"
/// - Hours suffix: "1h"
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("Empty duration string".to_string());
    }

    // "ms" before "m" and "s"
    if let Some(num_str) = s.strip_suffix("ms") {
        return parse_count(num_str, "milliseconds").map(Duration::from_millis);
    }
    if let Some(num_str) = s.strip_suffix('h') {
        return scaled_secs(num_str, "hours", 3600);
    }
    if let Some(num_str) = s.strip_suffix('m') {
        return scaled_secs(num_str, "minutes", 60);
    }
    if let Some(num_str) = s.strip_suffix('s') {
        return parse_count(num_str, "seconds").map(Duration::from_secs);
    }

    // No suffix - treat as seconds
    parse_count(s, "duration").map(Duration::from_secs)
}

fn parse_count(num_str: &str, unit: &str) -> Result<u64, String> {
    num_str
        .trim()
        .parse()
        .map_err(|_| format!("Invalid {unit} value: {num_str}"))
}

fn scaled_secs(num_str: &str, unit: &str, secs_per_unit: u64) -> Result<Duration, String> {
    let count = parse_count(num_str, unit)?;
    count
        .checked_mul(secs_per_unit)
        .map(Duration::from_secs)
        .ok_or_else(|| format!("Duration out of range: {count} {unit}"))
}

/// Serde adapter for duration fields written as strings or bare seconds.
pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Seconds(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Seconds(secs) => Ok(Duration::from_secs(secs)),
        Raw::Text(text) => parse_duration(&text).map_err(serde::de::Error::custom),
    }
}
