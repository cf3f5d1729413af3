//! RFC 3339 timestamp handling.

use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

/// Error parsing an RFC 3339 timestamp.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct TimeParseError(String);

/// Parses an RFC 3339 date into a UTC timestamp.
pub fn parse_rfc3339(s: &str) -> Result<DateTime<Utc>, TimeParseError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| TimeParseError(e.to_string()))
}

/// Formats a UTC timestamp as an RFC 3339 date with second precision,
/// the resolution the wire format uses.
pub fn format_rfc3339(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_format_round_trip() {
        let t = parse_rfc3339("2024-01-01T10:30:00Z").unwrap();
        assert_eq!(format_rfc3339(t), "2024-01-01T10:30:00Z");
    }

    #[test]
    fn parse_accepts_offsets() {
        let t = parse_rfc3339("2017-01-01T02:00:00+02:00").unwrap();
        assert_eq!(format_rfc3339(t), "2017-01-01T00:00:00Z");
    }

    #[test]
    fn parse_rejects_partial_dates() {
        assert!(parse_rfc3339("12:30").is_err());
        assert!(parse_rfc3339("").is_err());
    }
}
