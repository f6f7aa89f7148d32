//! Timestamp handling and the 48-week detection calendar.

use chrono::{DateTime, Datelike, Local, SecondsFormat, Timelike, Utc};

use crate::constants::calendar::{DAYS_PER_WEEK, WEEKS_PER_YEAR};

/// Current UTC time as ISO-8601 with a trailing `Z`.
#[must_use]
pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Milliseconds since the Unix epoch.
#[must_use]
pub fn epoch_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Current week of the detection calendar (1..=48), from local time.
#[must_use]
pub fn current_week() -> i64 {
    let day_of_year = Local::now().ordinal();
    let week = (day_of_year - 1) / DAYS_PER_WEEK + 1;
    i64::from(week.clamp(1, WEEKS_PER_YEAR))
}

/// Parse an ISO-8601 timestamp, tolerating the trailing `Z` form.
///
/// Returns `None` for empty or unparseable input.
#[must_use]
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if value.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Normalize a client-supplied timestamp to stored form.
///
/// Empty or invalid input falls back to the current time; valid input is
/// converted to UTC with a trailing `Z`.
#[must_use]
pub fn normalize_timestamp(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return now_iso();
    }
    match parse_timestamp(trimmed) {
        Some(dt) => dt.to_rfc3339_opts(SecondsFormat::Micros, true),
        None => now_iso(),
    }
}

/// Index of the current half-hour bucket in local time (0..=47).
#[must_use]
pub fn current_local_bucket() -> usize {
    let now = Local::now();
    let hour_fraction =
        f64::from(now.hour()) + f64::from(now.minute()) / 60.0 + f64::from(now.second()) / 3600.0;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let bucket = (hour_fraction * 2.0) as usize;
    bucket.min(47)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_now_iso_ends_with_z() {
        let stamp = now_iso();
        assert!(stamp.ends_with('Z'));
        assert!(parse_timestamp(&stamp).is_some());
    }

    #[test]
    fn test_current_week_in_range() {
        let week = current_week();
        assert!((1..=48).contains(&week));
    }

    #[test]
    fn test_parse_timestamp_accepts_z_suffix() {
        let dt = parse_timestamp("2024-05-01T12:30:00Z").unwrap();
        assert_eq!(dt.to_rfc3339_opts(SecondsFormat::Secs, true), "2024-05-01T12:30:00Z");
    }

    #[test]
    fn test_parse_timestamp_rejects_garbage() {
        assert!(parse_timestamp("").is_none());
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn test_normalize_timestamp_converts_offset_to_utc() {
        let normalized = normalize_timestamp("2024-05-01T12:00:00+02:00");
        assert_eq!(normalized, "2024-05-01T10:00:00.000000Z");
    }

    #[test]
    fn test_normalize_timestamp_falls_back_to_now() {
        let normalized = normalize_timestamp("not a date");
        assert!(normalized.ends_with('Z'));
        assert!(parse_timestamp(&normalized).is_some());
    }
}
