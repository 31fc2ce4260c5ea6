//! Human-readable durations such as `5s`, `1m30s` or `500ms`.
//!
//! Used with `#[serde(with = "duration")]`. Plain integers are read as
//! seconds.

use regex::Regex;
use serde::{de, Deserialize, Deserializer, Serializer};
use std::sync::OnceLock;
use std::time::Duration;

fn component_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(\d+(?:\.\d+)?)(ns|us|µs|ms|s|m|h)").expect("duration pattern is valid")
    })
}

/// Parses a sequence of `<number><unit>` components, e.g. `1h2m3.5s`.
pub fn parse(input: &str) -> Result<Duration, String> {
    let input = input.trim();
    if input.is_empty() {
        return Err("empty duration".to_string());
    }
    if input == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total = 0f64;
    let mut consumed = 0;
    for caps in component_re().captures_iter(input) {
        let whole = caps.get(0).map_or(0..0, |m| m.range());
        if whole.start != consumed {
            return Err(format!("invalid duration {input:?}"));
        }
        consumed = whole.end;

        let value: f64 = caps[1]
            .parse()
            .map_err(|_| format!("invalid number in duration {input:?}"))?;
        let seconds_per_unit = match &caps[2] {
            "ns" => 1e-9,
            "us" | "µs" => 1e-6,
            "ms" => 1e-3,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            unit => return Err(format!("unknown unit {unit:?} in duration {input:?}")),
        };
        total += value * seconds_per_unit;
    }

    if consumed != input.len() {
        return Err(format!("invalid duration {input:?}"));
    }
    Duration::try_from_secs_f64(total).map_err(|e| format!("invalid duration {input:?}: {e}"))
}

/// Formats a duration in the same notation `parse` accepts.
pub fn format(duration: &Duration) -> String {
    let total_ms = duration.as_millis();
    if total_ms == 0 {
        return "0s".to_string();
    }
    if total_ms < 1000 {
        return format!("{total_ms}ms");
    }

    let hours = total_ms / 3_600_000;
    let minutes = (total_ms / 60_000) % 60;
    let millis = total_ms % 60_000;

    let mut out = String::new();
    if hours > 0 {
        out.push_str(&format!("{hours}h"));
    }
    if minutes > 0 {
        out.push_str(&format!("{minutes}m"));
    }
    if millis > 0 {
        if millis % 1000 == 0 {
            out.push_str(&format!("{}s", millis / 1000));
        } else {
            out.push_str(&format!("{}s", millis as f64 / 1000.0));
        }
    }
    out
}

pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format(duration))
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Seconds(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Seconds(secs) => Ok(Duration::from_secs(secs)),
        Raw::Text(text) => parse(&text).map_err(de::Error::custom),
    }
}
