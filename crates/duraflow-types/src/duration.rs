//! Human-readable duration parsing for the step API.
//!
//! Workflow authors write sleeps and retry delays as strings like
//! "20 seconds", "5 second", "15 minutes", or a bare "12s". This module
//! normalizes those to `std::time::Duration`.

use std::time::Duration;

use thiserror::Error;

/// Error parsing a human-readable duration string.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DurationParseError {
    #[error("unrecognized duration format: '{0}'")]
    Unrecognized(String),

    #[error("duration must be greater than zero: '{0}'")]
    Zero(String),
}

/// Parse a human-readable duration string.
///
/// Accepted forms (case-insensitive, singular or plural units):
/// - "N milliseconds" / "N ms"
/// - "N seconds" / "N secs" / "N s"
/// - "N minutes" / "N mins" / "N m"
/// - "N hours" / "N hrs" / "N h"
/// - "N days" / "N d"
/// - bare suffixed numbers: "12s", "500ms", "15m", "2h"
pub fn parse_duration(input: &str) -> Result<Duration, DurationParseError> {
    let trimmed = input.trim().to_lowercase();

    let (number, unit) = match trimmed.split_once(char::is_whitespace) {
        Some((n, u)) => (n.trim().to_string(), u.trim().to_string()),
        None => split_suffixed(&trimmed)
            .ok_or_else(|| DurationParseError::Unrecognized(input.to_string()))?,
    };

    let n: u64 = number
        .parse()
        .map_err(|_| DurationParseError::Unrecognized(input.to_string()))?;
    if n == 0 {
        return Err(DurationParseError::Zero(input.to_string()));
    }

    let unit = unit.trim_end_matches('s');
    match unit {
        "m" if trimmed.ends_with("ms") => Ok(Duration::from_millis(n)),
        "millisecond" | "milli" | "msec" => Ok(Duration::from_millis(n)),
        "second" | "sec" | "" | "s" => Ok(Duration::from_secs(n)),
        "minute" | "min" | "m" => Ok(Duration::from_secs(n * 60)),
        "hour" | "hr" | "h" => Ok(Duration::from_secs(n * 3600)),
        "day" | "d" => Ok(Duration::from_secs(n * 86_400)),
        _ => Err(DurationParseError::Unrecognized(input.to_string())),
    }
}

/// Split a bare suffixed number like "12s" or "500ms" into (digits, unit).
fn split_suffixed(s: &str) -> Option<(String, String)> {
    let digits_end = s.find(|c: char| !c.is_ascii_digit())?;
    if digits_end == 0 {
        return None;
    }
    let (digits, unit) = s.split_at(digits_end);
    Some((digits.to_string(), unit.to_string()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
