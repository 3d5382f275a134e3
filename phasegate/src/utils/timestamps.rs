//! Timestamp helpers.

use chrono::{DateTime, Utc};

/// Represents a timestamp that can be serialized/deserialized.
pub type Timestamp = DateTime<Utc>;

/// Returns the current UTC time as an ISO 8601 formatted string.
///
/// Format: `YYYY-MM-DDTHH:MM:SS.ffffff+00:00`
///
/// # Examples
///
/// ```
/// use phasegate::utils::iso_timestamp;
///
/// let ts = iso_timestamp();
/// assert!(ts.contains('T'));
/// ```
#[must_use]
pub fn iso_timestamp() -> String {
    to_iso(&Utc::now())
}

/// Formats a timestamp in the same ISO 8601 layout as [`iso_timestamp`].
#[must_use]
pub fn to_iso(ts: &Timestamp) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.6f+00:00").to_string()
}

/// Returns the current UTC timestamp.
#[must_use]
pub fn now_utc() -> Timestamp {
    Utc::now()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_to_iso_layout() {
        let ts = Utc.with_ymd_and_hms(2026, 3, 1, 12, 30, 5).single();
        assert!(ts.is_some());
        if let Some(ts) = ts {
            assert_eq!(to_iso(&ts), "2026-03-01T12:30:05.000000+00:00");
        }
    }
}
