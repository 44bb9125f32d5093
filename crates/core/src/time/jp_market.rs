use anyhow::Context;
use chrono::{DateTime, Datelike, Duration, NaiveDate, Timelike, Utc};
use std::collections::HashSet;

const JST_OFFSET_SECS: i32 = 9 * 3600;

/// TSE afternoon session close, minutes after midnight JST (15:30 since Nov 2024).
pub const TSE_CLOSE_MINUTE_OF_DAY: u32 = 15 * 60 + 30;

// Runs before close + SETTLE_MINUTES label the previous session.
const SETTLE_MINUTES: u32 = 30;

/// The trading date a run reports on: an explicit `YYYY-MM-DD`, or the latest session that has
/// closed as of `now_utc`.
pub fn resolve_as_of_date(
    as_of_date_arg: Option<&str>,
    now_utc: DateTime<Utc>,
) -> anyhow::Result<NaiveDate> {
    if let Some(s) = as_of_date_arg {
        return NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .with_context(|| format!("invalid as-of date {s}; expected YYYY-MM-DD"));
    }

    let jst = chrono::FixedOffset::east_opt(JST_OFFSET_SECS).context("invalid JST offset")?;
    let now_jst = now_utc.with_timezone(&jst);

    let minute_of_day = now_jst.hour() * 60 + now_jst.minute();
    let cutoff_reached = minute_of_day >= TSE_CLOSE_MINUTE_OF_DAY + SETTLE_MINUTES;
    let mut date = now_jst.date_naive();
    if !cutoff_reached {
        date = date - Duration::days(1);
    }

    let holidays = configured_holidays();
    while is_weekend(date) || holidays.contains(&date) {
        date = date - Duration::days(1);
    }

    Ok(date)
}

fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), chrono::Weekday::Sat | chrono::Weekday::Sun)
}

fn configured_holidays() -> HashSet<NaiveDate> {
    // Exchange year-end closure (Dec 31 - Jan 3). National holidays move every year; list them
    // in JP_MARKET_HOLIDAYS="YYYY-MM-DD,YYYY-MM-DD".
    let mut out = HashSet::new();
    for y in 2024..=2030 {
        for (m, d) in [(1, 1), (1, 2), (1, 3), (12, 31)] {
            if let Some(date) = NaiveDate::from_ymd_opt(y, m, d) {
                out.insert(date);
            }
        }
    }

    if let Ok(s) = std::env::var("JP_MARKET_HOLIDAYS") {
        for part in s.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            if let Ok(d) = NaiveDate::parse_from_str(part, "%Y-%m-%d") {
                out.insert(d);
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn explicit_date_wins() {
        let now = Utc.with_ymd_and_hms(2026, 10, 16, 12, 0, 0).unwrap();
        let d = resolve_as_of_date(Some("2026-10-01"), now).unwrap();
        assert_eq!(d, NaiveDate::from_ymd_opt(2026, 10, 1).unwrap());
        assert!(resolve_as_of_date(Some("10/01/2026"), now).is_err());
    }

    #[test]
    fn uses_same_day_after_cutoff() {
        // 2026-10-15 08:00 UTC = 17:00 JST Thursday.
        let now = Utc.with_ymd_and_hms(2026, 10, 15, 8, 0, 0).unwrap();
        let d = resolve_as_of_date(None, now).unwrap();
        assert_eq!(d, NaiveDate::from_ymd_opt(2026, 10, 15).unwrap());
    }

    #[test]
    fn uses_previous_day_before_cutoff() {
        // 2026-10-15 05:00 UTC = 14:00 JST Thursday.
        let now = Utc.with_ymd_and_hms(2026, 10, 15, 5, 0, 0).unwrap();
        let d = resolve_as_of_date(None, now).unwrap();
        assert_eq!(d, NaiveDate::from_ymd_opt(2026, 10, 14).unwrap());
    }

    #[test]
    fn just_after_the_bell_still_labels_previous_session() {
        // 2026-10-15 06:45 UTC = 15:45 JST Thursday: TSE has closed but data has not settled.
        let now = Utc.with_ymd_and_hms(2026, 10, 15, 6, 45, 0).unwrap();
        let d = resolve_as_of_date(None, now).unwrap();
        assert_eq!(d, NaiveDate::from_ymd_opt(2026, 10, 14).unwrap());

        // 07:00 UTC = 16:00 JST, close plus settle window.
        let now = Utc.with_ymd_and_hms(2026, 10, 15, 7, 0, 0).unwrap();
        let d = resolve_as_of_date(None, now).unwrap();
        assert_eq!(d, NaiveDate::from_ymd_opt(2026, 10, 15).unwrap());
    }

    #[test]
    fn rolls_back_over_weekend() {
        // 2026-10-19 01:00 UTC = 10:00 JST Monday; previous day is Sunday.
        let now = Utc.with_ymd_and_hms(2026, 10, 19, 1, 0, 0).unwrap();
        let d = resolve_as_of_date(None, now).unwrap();
        assert_eq!(d, NaiveDate::from_ymd_opt(2026, 10, 16).unwrap());
    }

    #[test]
    fn rolls_back_over_year_end_closure() {
        // 2027-01-04 01:00 UTC = 10:00 JST Monday; Jan 3 .. Dec 31 are closed.
        let now = Utc.with_ymd_and_hms(2027, 1, 4, 1, 0, 0).unwrap();
        let d = resolve_as_of_date(None, now).unwrap();
        assert_eq!(d, NaiveDate::from_ymd_opt(2026, 12, 30).unwrap());
    }
}
