// src/shift.rs
//! Production day boundaries.
//!
//! A production day starts at a fixed local hour (06:00 by default) and lasts
//! 24 hours. Scans made before that hour belong to the previous day.

use chrono::{
    DateTime, Duration, FixedOffset, LocalResult, NaiveDate, NaiveTime, TimeZone, Timelike, Utc,
};
use serde::Serialize;

/// Half-open interval `[start, end)` in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ShiftWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl ShiftWindow {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at < self.end
    }
}

#[derive(Debug, Clone)]
pub struct ShiftCalendar<Tz: TimeZone> {
    tz: Tz,
    start_hour: u32,
}

impl<Tz: TimeZone> ShiftCalendar<Tz> {
    pub fn new(tz: Tz, start_hour: u32) -> Self {
        Self { tz, start_hour: start_hour.min(23) }
    }

    pub fn timezone(&self) -> &Tz {
        &self.tz
    }

    /// Calendar date of the production day containing `now`.
    pub fn production_date(&self, now: DateTime<Utc>) -> NaiveDate {
        let local = now.with_timezone(&self.tz);
        let date = local.date_naive();
        if local.hour() < self.start_hour {
            date.pred_opt().unwrap_or(date)
        } else {
            date
        }
    }

    /// Wall-clock date in the deployment zone, used in scan codes.
    pub fn local_date(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.tz).date_naive()
    }

    pub fn window_at(&self, now: DateTime<Utc>) -> ShiftWindow {
        let day = self.production_date(now);
        let start_time = NaiveTime::from_hms_opt(self.start_hour, 0, 0).unwrap_or(NaiveTime::MIN);
        let naive = day.and_time(start_time);

        let start = match self.tz.from_local_datetime(&naive) {
            LocalResult::Single(dt) => dt.with_timezone(&Utc),
            LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
            // Boundary falls in a DST gap; treat the naive time as UTC rather than fail
            LocalResult::None => Utc.from_utc_datetime(&naive),
        };

        ShiftWindow { start, end: start + Duration::hours(24) }
    }

    pub fn current(&self) -> ShiftWindow {
        self.window_at(Utc::now())
    }
}

/// Parses `+07:00`, `-0530`, `+7` or `Z` into a fixed offset.
pub fn parse_utc_offset(value: &str) -> Result<FixedOffset, String> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("z") || value.eq_ignore_ascii_case("utc") {
        return FixedOffset::east_opt(0).ok_or_else(|| "invalid offset".to_string());
    }

    let (sign, rest) = match value.chars().next() {
        Some('+') => (1, &value[1..]),
        Some('-') => (-1, &value[1..]),
        _ => return Err(format!("UTC offset '{}' must start with '+' or '-'", value)),
    };

    let (hours, minutes) = match rest.split_once(':') {
        Some((h, m)) => (h, m),
        None if rest.len() == 4 => rest.split_at(2),
        None => (rest, "0"),
    };

    let hours: i32 = hours
        .parse()
        .map_err(|_| format!("Invalid hours in UTC offset '{}'", value))?;
    let minutes: i32 = minutes
        .parse()
        .map_err(|_| format!("Invalid minutes in UTC offset '{}'", value))?;

    if hours > 14 || minutes > 59 {
        return Err(format!("UTC offset '{}' is out of range", value));
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
        .ok_or_else(|| format!("UTC offset '{}' is out of range", value))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jakarta() -> ShiftCalendar<FixedOffset> {
        ShiftCalendar::new(parse_utc_offset("+07:00").unwrap(), 6)
    }

    fn local(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_before_start_hour_belongs_to_previous_day() {
        let cal = jakarta();
        let window = cal.window_at(local("2024-10-18T05:59:00+07:00"));
        assert_eq!(window.start, local("2024-10-17T06:00:00+07:00"));
        assert_eq!(window.end, local("2024-10-18T06:00:00+07:00"));
    }

    #[test]
    fn test_start_hour_opens_new_day() {
        let cal = jakarta();
        let window = cal.window_at(local("2024-10-18T06:00:00+07:00"));
        assert_eq!(window.start, local("2024-10-18T06:00:00+07:00"));
        assert!(window.contains(local("2024-10-19T05:59:59+07:00")));
        assert!(!window.contains(window.end));
    }

    #[test]
    fn test_production_date_and_local_date() {
        let cal = jakarta();
        let early = local("2024-10-18T02:00:00+07:00");
        assert_eq!(cal.production_date(early), NaiveDate::from_ymd_opt(2024, 10, 17).unwrap());
        assert_eq!(cal.local_date(early), NaiveDate::from_ymd_opt(2024, 10, 18).unwrap());
    }

    #[test]
    fn test_window_is_independent_of_server_zone() {
        // 23:30 UTC is already 06:30 the next morning in +07:00
        let cal = jakarta();
        let window = cal.window_at(local("2024-10-17T23:30:00Z"));
        assert_eq!(window.start, local("2024-10-17T23:00:00Z"));
    }

    #[test]
    fn test_parse_utc_offset() {
        assert_eq!(parse_utc_offset("+07:00").unwrap().local_minus_utc(), 7 * 3600);
        assert_eq!(parse_utc_offset("-0530").unwrap().local_minus_utc(), -(5 * 3600 + 30 * 60));
        assert_eq!(parse_utc_offset("+7").unwrap().local_minus_utc(), 7 * 3600);
        assert_eq!(parse_utc_offset("Z").unwrap().local_minus_utc(), 0);
        assert!(parse_utc_offset("07:00").is_err());
        assert!(parse_utc_offset("+25:00").is_err());
        assert!(parse_utc_offset("+ab").is_err());
    }
}
