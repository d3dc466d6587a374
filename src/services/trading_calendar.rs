use chrono::{Datelike, Duration, NaiveDate, Weekday};

/// US equity trading calendar: weekends plus the fixed and floating NYSE
/// holidays, with weekend-observed shifts for the fixed-date ones.
///
/// Good Friday is intentionally absent (it needs an Easter computus and the
/// pipeline tolerates a spurious trading day as a no-op fetch), so the
/// calendar is slightly permissive rather than wrong in the other direction.
pub fn is_trading_day(date: NaiveDate) -> bool {
    match date.weekday() {
        Weekday::Sat | Weekday::Sun => false,
        _ => !is_market_holiday(date),
    }
}

/// Most recent trading day on or before `date`.
pub fn most_recent_trading_day(date: NaiveDate) -> NaiveDate {
    let mut d = date;
    while !is_trading_day(d) {
        d -= Duration::days(1);
    }
    d
}

/// Next trading day strictly after `date`.
pub fn next_trading_day(date: NaiveDate) -> NaiveDate {
    let mut d = date + Duration::days(1);
    while !is_trading_day(d) {
        d += Duration::days(1);
    }
    d
}

/// Trading days strictly after `start` up to and including `end`, ascending.
pub fn trading_days_between(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    let mut days = Vec::new();
    let mut d = start + Duration::days(1);
    while d <= end {
        if is_trading_day(d) {
            days.push(d);
        }
        d += Duration::days(1);
    }
    days
}

fn is_market_holiday(date: NaiveDate) -> bool {
    let year = date.year();

    // Fixed-date holidays, shifted to the nearest weekday when observed
    let fixed = [
        (1, 1),   // New Year's Day
        (6, 19),  // Juneteenth
        (7, 4),   // Independence Day
        (12, 25), // Christmas Day
    ];
    for (month, day) in fixed {
        if let Some(holiday) = NaiveDate::from_ymd_opt(year, month, day) {
            if observed(holiday) == date {
                return true;
            }
        }
    }

    // Floating holidays
    date == nth_weekday(year, 1, Weekday::Mon, 3)      // MLK Day: 3rd Mon of Jan
        || date == nth_weekday(year, 2, Weekday::Mon, 3)  // Presidents Day: 3rd Mon of Feb
        || date == last_weekday(year, 5, Weekday::Mon)    // Memorial Day: last Mon of May
        || date == nth_weekday(year, 9, Weekday::Mon, 1)  // Labor Day: 1st Mon of Sep
        || date == nth_weekday(year, 11, Weekday::Thu, 4) // Thanksgiving: 4th Thu of Nov
}

/// Saturday holidays are observed Friday, Sunday holidays Monday.
fn observed(holiday: NaiveDate) -> NaiveDate {
    match holiday.weekday() {
        Weekday::Sat => holiday - Duration::days(1),
        Weekday::Sun => holiday + Duration::days(1),
        _ => holiday,
    }
}

fn nth_weekday(year: i32, month: u32, weekday: Weekday, n: u32) -> NaiveDate {
    let first = NaiveDate::from_ymd_opt(year, month, 1).unwrap();
    let offset = (7 + weekday.num_days_from_monday() as i64
        - first.weekday().num_days_from_monday() as i64)
        % 7;
    first + Duration::days(offset + 7 * (n as i64 - 1))
}

fn last_weekday(year: i32, month: u32, weekday: Weekday) -> NaiveDate {
    let first_next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1).unwrap()
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1).unwrap()
    };
    let mut d = first_next - Duration::days(1);
    while d.weekday() != weekday {
        d -= Duration::days(1);
    }
    d
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_weekends_are_not_trading_days() {
        assert!(!is_trading_day(date(2025, 1, 11))); // Saturday
        assert!(!is_trading_day(date(2025, 1, 12))); // Sunday
        assert!(is_trading_day(date(2025, 1, 10))); // Friday
    }

    #[test]
    fn test_fixed_holidays() {
        assert!(!is_trading_day(date(2025, 1, 1))); // New Year's
        assert!(!is_trading_day(date(2025, 7, 4))); // July 4th
        assert!(!is_trading_day(date(2025, 12, 25))); // Christmas
    }

    #[test]
    fn test_observed_shift_for_weekend_holiday() {
        // July 4th 2026 is a Saturday; observed Friday July 3rd
        assert!(!is_trading_day(date(2026, 7, 3)));
        assert!(is_trading_day(date(2026, 7, 6)));
    }

    #[test]
    fn test_floating_holidays_2025() {
        assert!(!is_trading_day(date(2025, 1, 20))); // MLK Day
        assert!(!is_trading_day(date(2025, 2, 17))); // Presidents Day
        assert!(!is_trading_day(date(2025, 5, 26))); // Memorial Day
        assert!(!is_trading_day(date(2025, 9, 1))); // Labor Day
        assert!(!is_trading_day(date(2025, 11, 27))); // Thanksgiving
    }

    #[test]
    fn test_most_recent_trading_day_rolls_back_over_weekend() {
        assert_eq!(
            most_recent_trading_day(date(2025, 1, 12)),
            date(2025, 1, 10)
        );
        assert_eq!(
            most_recent_trading_day(date(2025, 1, 10)),
            date(2025, 1, 10)
        );
    }

    #[test]
    fn test_next_trading_day_skips_weekend() {
        assert_eq!(next_trading_day(date(2025, 1, 10)), date(2025, 1, 13));
    }

    #[test]
    fn test_trading_days_between_is_exclusive_start_inclusive_end() {
        let days = trading_days_between(date(2025, 1, 10), date(2025, 1, 15));
        assert_eq!(
            days,
            vec![date(2025, 1, 13), date(2025, 1, 14), date(2025, 1, 15)]
        );
    }

    #[test]
    fn test_trading_days_between_empty_when_no_room() {
        assert!(trading_days_between(date(2025, 1, 10), date(2025, 1, 10)).is_empty());
        assert!(trading_days_between(date(2025, 1, 10), date(2025, 1, 12)).is_empty());
    }
}
