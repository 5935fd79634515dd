use anyhow::Result;
use chrono::{DateTime, Utc};

/// Parse a datetime from either RFC 3339 or the SQLite storage format.
pub fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Ok(dt.and_utc());
    }
    Err(anyhow::anyhow!("Failed to parse datetime: {}", s))
}

/// Canonical storage representation; round-trips through `parse_datetime`.
pub fn format_for_storage(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

pub fn parse_optional(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
    s.map(|v| parse_datetime(&v)).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone, Timelike};

    #[test]
    fn test_parse_rfc3339() {
        let dt = parse_datetime("2023-01-01T12:00:00Z").unwrap();
        assert_eq!(dt.year(), 2023);
        assert_eq!(dt.month(), 1);
        assert_eq!(dt.day(), 1);
        assert_eq!(dt.hour(), 12);
    }

    #[test]
    fn test_parse_sqlite_format() {
        let dt = parse_datetime("2023-01-01 12:00:00").unwrap();
        assert_eq!(dt.year(), 2023);
        assert_eq!(dt.hour(), 12);
    }

    #[test]
    fn test_parse_with_timezone() {
        let dt = parse_datetime("2023-01-01T12:00:00+02:00").unwrap();
        // Converted to UTC
        assert_eq!(dt.hour(), 10);
    }

    #[test]
    fn test_invalid_format() {
        assert!(parse_datetime("invalid-date").is_err());
    }

    #[test]
    fn test_storage_round_trip() {
        let dt = Utc.with_ymd_and_hms(2023, 6, 15, 8, 30, 0).unwrap();
        let stored = format_for_storage(&dt);
        assert_eq!(parse_datetime(&stored).unwrap(), dt);
    }

    #[test]
    fn test_parse_optional() {
        assert_eq!(parse_optional(None).unwrap(), None);
        assert!(parse_optional(Some("2023-01-01 12:00:00".to_string()))
            .unwrap()
            .is_some());
        assert!(parse_optional(Some("nope".to_string())).is_err());
    }
}
