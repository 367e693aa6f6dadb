//! Timestamp formatting helpers.

use chrono::{DateTime, Utc};

/// A UTC timestamp.
pub type Timestamp = DateTime<Utc>;

/// Formats a timestamp as ISO 8601 with microseconds:
/// `YYYY-MM-DDTHH:MM:SS.ffffff+00:00`.
///
/// # Examples
///
/// ```
/// use stagegraph::utils::{iso_timestamp, now_utc};
///
/// let ts = iso_timestamp(&now_utc());
/// assert!(ts.contains('T'));
/// assert!(ts.ends_with("+00:00"));
/// ```
#[must_use]
pub fn iso_timestamp(ts: &Timestamp) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.6f+00:00").to_string()
}

/// Returns the current UTC timestamp.
#[must_use]
pub fn now_utc() -> Timestamp {
    Utc::now()
}

/// Formats a timestamp as a sortable directory stamp: `YYYYmmdd-HHMMSS`.
#[must_use]
pub fn run_stamp(ts: &Timestamp) -> String {
    ts.format("%Y%m%d-%H%M%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed() -> Timestamp {
        Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap()
    }

    #[test]
    fn test_iso_timestamp_format() {
        assert_eq!(iso_timestamp(&fixed()), "2024-03-09T07:05:01.000000+00:00");
    }

    #[test]
    fn test_run_stamp_format() {
        assert_eq!(run_stamp(&fixed()), "20240309-070501");
    }
}
