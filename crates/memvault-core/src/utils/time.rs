//! Time Utilities

use chrono::{DateTime, NaiveDate, Utc};

/// Parse an RFC 3339 timestamp, or a bare `YYYY-MM-DD` date taken as
/// midnight UTC
pub fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Format datetime as RFC 3339 string
pub fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_parse_format_roundtrip() {
        let now = Utc::now();
        let parsed = parse_datetime(&format_datetime(&now)).unwrap();
        assert_eq!(now, parsed);
    }

    #[test]
    fn test_parse_invalid() {
        assert!(parse_datetime("not a date").is_none());
        assert!(parse_datetime("").is_none());
        assert!(parse_datetime("2024-13-40").is_none());
    }

    #[test]
    fn test_parse_offset_and_date() {
        let dt = parse_datetime("2024-01-15T10:30:00+02:00").unwrap();
        assert_eq!(dt.hour(), 8);

        let day = parse_datetime("2024-01-15").unwrap();
        assert_eq!((day.year(), day.month(), day.day(), day.hour()), (2024, 1, 15, 0));
    }
}
