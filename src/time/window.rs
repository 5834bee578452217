//! Pure time-window evaluation.
//!
//! Given a schedule's start/end time-of-day, IANA timezone, and active days, decides
//! whether "now" falls inside the active window. No I/O, no side effects — this module
//! is deterministic and safe to property-test.

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Datelike, LocalResult, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};

/// The set of weekdays on which a schedule is active. Never empty for a valid schedule.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WeekdaySet(HashSet<Weekday>);

impl WeekdaySet {
    pub fn new(days: impl IntoIterator<Item = Weekday>) -> Self {
        Self(days.into_iter().collect())
    }

    pub fn contains(&self, day: Weekday) -> bool {
        self.0.contains(&day)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parse from three-letter abbreviations (`"Mon"`, `"tue"`, ...), case-insensitively.
    pub fn parse(days: &[impl AsRef<str>]) -> Result<Self, String> {
        let mut set = HashSet::with_capacity(days.len());
        for raw in days {
            set.insert(parse_weekday(raw.as_ref())?);
        }
        Ok(Self(set))
    }
}

fn parse_weekday(s: &str) -> Result<Weekday, String> {
    match s.to_lowercase().as_str() {
        "mon" | "monday" => Ok(Weekday::Mon),
        "tue" | "tuesday" => Ok(Weekday::Tue),
        "wed" | "wednesday" => Ok(Weekday::Wed),
        "thu" | "thursday" => Ok(Weekday::Thu),
        "fri" | "friday" => Ok(Weekday::Fri),
        "sat" | "saturday" => Ok(Weekday::Sat),
        "sun" | "sunday" => Ok(Weekday::Sun),
        other => Err(format!("unknown weekday '{other}'")),
    }
}

fn weekday_abbrev(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "Mon",
        Weekday::Tue => "Tue",
        Weekday::Wed => "Wed",
        Weekday::Thu => "Thu",
        Weekday::Fri => "Fri",
        Weekday::Sat => "Sat",
        Weekday::Sun => "Sun",
    }
}

impl Serialize for WeekdaySet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut days: Vec<&str> = self.0.iter().copied().map(weekday_abbrev).collect();
        days.sort_unstable();
        days.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for WeekdaySet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw: Vec<String> = Vec::deserialize(deserializer)?;
        WeekdaySet::parse(&raw).map_err(D::Error::custom)
    }
}

/// Error constructing a [`TimeWindow`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeWindowError {
    EqualStartEnd,
    InvalidTimezone(String),
    InvalidTimeOfDay(String),
    EmptyActiveDays,
}

impl fmt::Display for TimeWindowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EqualStartEnd => write!(f, "start and end time-of-day must differ"),
            Self::InvalidTimezone(tz) => write!(f, "'{tz}' is not a valid IANA timezone"),
            Self::InvalidTimeOfDay(t) => write!(f, "'{t}' is not a valid HH:MM:SS time of day"),
            Self::EmptyActiveDays => write!(f, "active_days must not be empty"),
        }
    }
}

impl std::error::Error for TimeWindowError {}

/// A schedule's active window, independent of any particular calendar date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub tz: Tz,
    pub active_days: WeekdaySet,
}

impl TimeWindow {
    pub fn new(start: NaiveTime, end: NaiveTime, tz: Tz, active_days: WeekdaySet) -> Result<Self, TimeWindowError> {
        if start == end {
            return Err(TimeWindowError::EqualStartEnd);
        }
        if active_days.is_empty() {
            return Err(TimeWindowError::EmptyActiveDays);
        }
        Ok(Self {
            start,
            end,
            tz,
            active_days,
        })
    }

    /// Parse a timezone by IANA name and build a window, surfacing an error for
    /// malformed schedules rather than panicking.
    pub fn from_parts(
        start: NaiveTime,
        end: NaiveTime,
        tz_name: &str,
        active_days: WeekdaySet,
    ) -> Result<Self, TimeWindowError> {
        let tz: Tz = tz_name
            .parse()
            .map_err(|_| TimeWindowError::InvalidTimezone(tz_name.to_string()))?;
        Self::new(start, end, tz, active_days)
    }

    /// True if the window rolls past midnight (end time-of-day is not after start).
    pub fn is_overnight(&self) -> bool {
        self.end <= self.start
    }
}

/// Which edge of the window a local datetime is being resolved for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Boundary {
    Start,
    End,
}

/// Resolve `date @ time` in `tz` to an absolute instant, handling DST transitions by
/// erring toward the window being active:
///
/// - Ambiguous local time (fall-back repeated hour): the start boundary takes the
///   earliest occurrence (window opens as early as possible) and the end boundary
///   takes the latest occurrence (window closes as late as possible).
/// - Nonexistent local time (spring-forward gap): the boundary is treated as if the
///   clock had already advanced past the gap — we walk forward in one-minute steps
///   until we land on a wall-clock time that exists, which is always within the gap's
///   duration (at most a couple of hours for any real-world zone).
fn resolve_boundary(tz: &Tz, date: NaiveDate, time: NaiveTime, boundary: Boundary) -> DateTime<Tz> {
    let naive = date.and_time(time);
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => dt,
        LocalResult::Ambiguous(earliest, latest) => match boundary {
            Boundary::Start => earliest,
            Boundary::End => latest,
        },
        LocalResult::None => {
            let mut probe = naive;
            for _ in 0..240 {
                probe += chrono::Duration::minutes(1);
                if let LocalResult::Single(dt) = tz.from_local_datetime(&probe) {
                    return dt;
                }
            }
            // Exhausted a 4-hour search window; no real DST transition is this long.
            // Fall back to a UTC-offset interpretation rather than panicking.
            tz.from_utc_datetime(&naive)
        }
    }
}

/// Build the `[start, end)` window anchored to `anchor_date` as the window's "start day".
fn candidate_window(window: &TimeWindow, anchor_date: NaiveDate) -> (DateTime<Tz>, DateTime<Tz>) {
    let start = resolve_boundary(&window.tz, anchor_date, window.start, Boundary::Start);
    let end_date = if window.is_overnight() {
        anchor_date + chrono::Duration::days(1)
    } else {
        anchor_date
    };
    let end = resolve_boundary(&window.tz, end_date, window.end, Boundary::End);
    (start, end)
}

/// Evaluate whether `window` is active at the absolute instant `now_utc`.
///
/// Day-of-week membership is checked against the weekday of the window's *start*
/// day, not of "now". An overnight window anchored on Friday (e.g. `22:00->06:00`)
/// is still active at 01:00 on Saturday morning even though Saturday itself need not
/// be in `active_days` — the window instance that opened Friday night hasn't closed
/// yet. Two candidate window instances are checked: one anchored "today" and, for
/// overnight windows, one anchored "yesterday" (covering the spillover from last
/// night); `now_utc` is active if it falls inside either.
pub fn evaluate(window: &TimeWindow, now_utc: DateTime<Utc>) -> bool {
    let now_local = now_utc.with_timezone(&window.tz);
    let today = now_local.date_naive();

    if window.active_days.contains(today.weekday()) {
        let (start, end) = candidate_window(window, today);
        if now_local >= start && now_local < end {
            return true;
        }
    }

    if window.is_overnight() {
        let yesterday = today - chrono::Duration::days(1);
        if window.active_days.contains(yesterday.weekday()) {
            let (start, end) = candidate_window(window, yesterday);
            if now_local >= start && now_local < end {
                return true;
            }
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    fn window(start: &str, end: &str, tz: &str, days: &[&str]) -> TimeWindow {
        TimeWindow::from_parts(
            NaiveTime::parse_from_str(start, "%H:%M:%S").unwrap(),
            NaiveTime::parse_from_str(end, "%H:%M:%S").unwrap(),
            tz,
            WeekdaySet::parse(days).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn same_day_window_active_inside() {
        let w = window("09:00:00", "17:00:00", "UTC", &["Mon", "Tue", "Wed", "Thu", "Fri"]);
        assert!(evaluate(&w, utc(2026, 7, 27, 9, 30))); // Monday
        assert!(!evaluate(&w, utc(2026, 7, 27, 8, 59)));
        assert!(!evaluate(&w, utc(2026, 7, 27, 17, 0)));
        assert!(!evaluate(&w, utc(2026, 8, 1, 10, 0))); // Saturday, not in active_days
    }

    #[test]
    fn overnight_window_spans_midnight_on_active_day() {
        // 2026-07-27 is a Monday.
        let w = window("22:00:00", "06:00:00", "UTC", &["Mon"]);
        assert!(evaluate(&w, utc(2026, 7, 27, 23, 0))); // Mon 23:00
        assert!(evaluate(&w, utc(2026, 7, 28, 5, 0))); // Tue 05:00, spillover from Mon
        assert!(!evaluate(&w, utc(2026, 7, 28, 7, 0))); // Tue 07:00, too late
        assert!(!evaluate(&w, utc(2026, 8, 2, 23, 0))); // Sunday 23:00, Sun not active and Sat not active
    }

    #[test]
    fn overnight_window_exact_boundaries() {
        let w = window("22:00:00", "06:00:00", "UTC", &["Mon"]);
        assert!(evaluate(&w, utc(2026, 7, 27, 22, 0))); // start inclusive
        assert!(evaluate(&w, utc(2026, 7, 28, 5, 59))); // just before end
        assert!(!evaluate(&w, utc(2026, 7, 28, 6, 0))); // end exclusive
    }

    #[test]
    fn empty_resource_schedule_is_pure() {
        let w = window("00:00:00", "01:00:00", "America/New_York", &["Wed"]);
        let now = utc(2026, 7, 29, 12, 0);
        assert_eq!(evaluate(&w, now), evaluate(&w, now));
    }

    #[test]
    fn timezone_east_of_utc_does_not_corrupt_day_of_week() {
        // 2026-07-28 00:30 in Tokyo (UTC+9) is still 2026-07-27 15:30 UTC.
        // A Tuesday-only window should be active, not Monday.
        let w = window("00:00:00", "01:00:00", "Asia/Tokyo", &["Tue"]);
        let now = utc(2026, 7, 27, 15, 30);
        assert!(evaluate(&w, now));
    }

    #[test]
    fn rejects_equal_start_and_end() {
        let err = TimeWindow::from_parts(
            NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            "UTC",
            WeekdaySet::parse(&["Mon"]).unwrap(),
        )
        .unwrap_err();
        assert_eq!(err, TimeWindowError::EqualStartEnd);
    }

    #[test]
    fn rejects_invalid_timezone() {
        let err = TimeWindow::from_parts(
            NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
            "Not/AZone",
            WeekdaySet::parse(&["Mon"]).unwrap(),
        )
        .unwrap_err();
        assert!(matches!(err, TimeWindowError::InvalidTimezone(_)));
    }

    #[test]
    fn spring_forward_gap_is_treated_as_after_the_jump() {
        // America/New_York springs forward at 2026-03-08 02:00 local -> 03:00 local;
        // 02:30 local does not exist. A window opening at 02:30 should behave as if
        // the clock had already advanced, i.e. open at the equivalent post-jump instant.
        let w = window("02:30:00", "04:00:00", "America/New_York", &["Sun"]);
        // 2026-03-08 07:00 UTC is 03:00 EDT, just after the gap closes.
        assert!(evaluate(&w, utc(2026, 3, 8, 7, 0)));
        // 2026-03-08 06:00 UTC is 01:00 EST, before the window's nominal start.
        assert!(!evaluate(&w, utc(2026, 3, 8, 6, 0)));
    }

    #[test]
    fn fall_back_ambiguous_hour_errs_toward_active() {
        // America/New_York falls back at 2026-11-01 02:00 EDT -> 01:00 EST; the
        // 01:00-02:00 hour occurs twice. A window covering it should be active
        // during both occurrences: the start boundary takes the earliest
        // occurrence and the end boundary the latest.
        let w = window("01:00:00", "02:00:00", "America/New_York", &["Sun"]);
        // First occurrence of 01:30 local (EDT, UTC-4): 2026-11-01 05:30 UTC.
        assert!(evaluate(&w, utc(2026, 11, 1, 5, 30)));
        // Second occurrence of 01:30 local (EST, UTC-5): 2026-11-01 06:30 UTC.
        assert!(evaluate(&w, utc(2026, 11, 1, 6, 30)));
        // Before the first occurrence starts.
        assert!(!evaluate(&w, utc(2026, 11, 1, 4, 30)));
        // After the second occurrence ends (02:00 EST = 07:00 UTC).
        assert!(!evaluate(&w, utc(2026, 11, 1, 7, 0)));
    }

    proptest::proptest! {
        #[test]
        fn evaluate_is_deterministic(hour in 0u32..24, minute in 0u32..60, offset_days in 0i64..10) {
            let w = window("09:00:00", "17:00:00", "UTC", &["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"]);
            let now = utc(2026, 7, 27, hour, minute) + chrono::Duration::days(offset_days);
            assert_eq!(evaluate(&w, now), evaluate(&w, now));
        }
    }
}
