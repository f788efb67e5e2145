//! Fixed-offset business time utilities.
//!
//! All business-hour comparisons and queue dates use a single configured
//! offset (JST, +09:00, by default). Database writes use the equivalent UTC
//! instants; only the calendar-day and window math happens in local time.

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// Default zone offset in seconds (+09:00).
pub const DEFAULT_OFFSET_SECS: i32 = 9 * 3600;

/// The configured fixed offset. Invalid offsets fall back to +09:00.
pub fn zone(offset_secs: i32) -> FixedOffset {
    FixedOffset::east_opt(offset_secs)
        .unwrap_or_else(|| FixedOffset::east_opt(DEFAULT_OFFSET_SECS).unwrap())
}

/// Current time in the configured zone.
pub fn now_fixed(offset_secs: i32) -> DateTime<FixedOffset> {
    Utc::now().with_timezone(&zone(offset_secs))
}

/// The queue calendar day for an instant, in the configured zone.
pub fn queue_day(instant: DateTime<Utc>, offset_secs: i32) -> NaiveDate {
    instant.with_timezone(&zone(offset_secs)).date_naive()
}

/// Tenant-configured send window: a days-of-week set plus an inclusive
/// `[start, end]` time range in the fixed zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessHours {
    /// Days of week, 0 = Sunday .. 6 = Saturday
    pub days_of_week: Vec<u8>,
    /// Window start, inclusive
    pub start: NaiveTime,
    /// Window end, inclusive
    pub end: NaiveTime,
    /// Zone offset in seconds
    pub offset_secs: i32,
}

impl BusinessHours {
    /// Parse from the tenant config representation (`"HH:MM"` strings and
    /// 0-6 integers). Returns None on malformed input; callers validate
    /// formats separately and treat None as a configuration error.
    pub fn parse(
        days_of_week: &[u8],
        start: &str,
        end: &str,
        offset_secs: i32,
    ) -> Option<Self> {
        let start = NaiveTime::parse_from_str(start, "%H:%M").ok()?;
        let end = NaiveTime::parse_from_str(end, "%H:%M").ok()?;
        if days_of_week.iter().any(|d| *d > 6) {
            return None;
        }
        Some(Self {
            days_of_week: days_of_week.to_vec(),
            start,
            end,
            offset_secs,
        })
    }

    /// Whether work may start at `instant`. The end bound is inclusive: at
    /// exactly `end` work still begins; one minute past it is deferred.
    pub fn permits(&self, instant: DateTime<Utc>) -> bool {
        let local = instant.with_timezone(&zone(self.offset_secs));
        let dow = local.weekday().num_days_from_sunday() as u8;
        if !self.days_of_week.contains(&dow) {
            return false;
        }
        // Compare at minute granularity; seconds inside the end minute count.
        let t = NaiveTime::from_hms_opt(local.hour(), local.minute(), 0).unwrap();
        self.start <= t && t <= self.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn hours() -> BusinessHours {
        BusinessHours::parse(&[1, 2, 3, 4, 5], "09:00", "18:00", DEFAULT_OFFSET_SECS).unwrap()
    }

    fn jst(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        zone(DEFAULT_OFFSET_SECS)
            .with_ymd_and_hms(y, mo, d, h, mi, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_window_start_is_inclusive() {
        // 2026-07-27 is a Monday
        assert!(hours().permits(jst(2026, 7, 27, 9, 0)));
        assert!(!hours().permits(jst(2026, 7, 27, 8, 59)));
    }

    #[test]
    fn test_window_end_is_inclusive() {
        assert!(hours().permits(jst(2026, 7, 27, 18, 0)));
        assert!(!hours().permits(jst(2026, 7, 27, 18, 1)));
    }

    #[test]
    fn test_day_of_week_gate() {
        // 2026-07-26 is a Sunday
        assert!(!hours().permits(jst(2026, 7, 26, 10, 0)));
    }

    #[test]
    fn test_queue_day_crosses_utc_midnight() {
        // 23:30 UTC on the 1st is already the 2nd in JST.
        let instant = Utc.with_ymd_and_hms(2026, 3, 1, 23, 30, 0).unwrap();
        assert_eq!(
            queue_day(instant, DEFAULT_OFFSET_SECS),
            NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
        );
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(BusinessHours::parse(&[7], "09:00", "18:00", DEFAULT_OFFSET_SECS).is_none());
        assert!(BusinessHours::parse(&[1], "9am", "18:00", DEFAULT_OFFSET_SECS).is_none());
    }
}
