//! Gap Detection and Backfill Planning Tests
//!
//! Self-contained checks of the date arithmetic behind the market-data
//! collector (minimal missing-range detection) and the batch backfill
//! (watermark advance, chronological processing).

use chrono::{Datelike, Duration, NaiveDate, Weekday};

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

// ---------------------------------------------------------------------------
// Minimal missing-range detection
// ---------------------------------------------------------------------------

#[derive(Debug, PartialEq)]
enum Plan {
    FullyCached,
    Incremental(NaiveDate, NaiveDate),
    Backfill(NaiveDate, NaiveDate),
    FullBackfill {
        back: (NaiveDate, NaiveDate),
        incr: (NaiveDate, NaiveDate),
    },
}

/// Coverage boundaries -> minimal fetch, mirroring the collector's planner.
fn plan(
    required_start: NaiveDate,
    required_end: NaiveDate,
    earliest_covered: Option<NaiveDate>,
    latest_covered: Option<NaiveDate>,
) -> Plan {
    match (earliest_covered, latest_covered) {
        (Some(earliest), Some(latest)) => {
            let leading = earliest > required_start;
            let trailing = latest < required_end;
            match (leading, trailing) {
                (false, false) => Plan::FullyCached,
                (false, true) => Plan::Incremental(latest + Duration::days(1), required_end),
                (true, false) => Plan::Backfill(required_start, earliest - Duration::days(1)),
                (true, true) => Plan::FullBackfill {
                    back: (required_start, earliest - Duration::days(1)),
                    incr: (latest + Duration::days(1), required_end),
                },
            }
        }
        _ => Plan::Backfill(required_start, required_end),
    }
}

#[test]
fn test_store_with_d0_to_d5_missing_to_d10_fetches_exactly_the_gap() {
    // Spec property: store covers [d0, d5], request reaches d10 ->
    // fetch exactly [d6, d10] and nothing else.
    let d0 = date(2025, 3, 3);
    let d5 = date(2025, 3, 10);
    let d10 = date(2025, 3, 17);

    let got = plan(d0, d10, Some(d0), Some(d5));
    assert_eq!(got, Plan::Incremental(d5 + Duration::days(1), d10));
}

#[test]
fn test_complete_coverage_fetches_nothing() {
    let got = plan(
        date(2025, 1, 1),
        date(2025, 6, 1),
        Some(date(2024, 12, 1)),
        Some(date(2025, 6, 1)),
    );
    assert_eq!(got, Plan::FullyCached);
}

#[test]
fn test_first_run_backfills_whole_window() {
    let got = plan(date(2024, 6, 1), date(2025, 6, 1), None, None);
    assert_eq!(got, Plan::Backfill(date(2024, 6, 1), date(2025, 6, 1)));
}

#[test]
fn test_outage_with_stale_tail_produces_both_ranges() {
    let got = plan(
        date(2025, 1, 1),
        date(2025, 6, 10),
        Some(date(2025, 2, 1)),
        Some(date(2025, 5, 30)),
    );
    assert_eq!(
        got,
        Plan::FullBackfill {
            back: (date(2025, 1, 1), date(2025, 1, 31)),
            incr: (date(2025, 5, 31), date(2025, 6, 10)),
        }
    );
}

// ---------------------------------------------------------------------------
// Backfill enumeration and watermark advance
// ---------------------------------------------------------------------------

fn is_weekday(d: NaiveDate) -> bool {
    !matches!(d.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Trading days strictly after the watermark up to the target, ascending.
fn missing_trading_days(watermark: NaiveDate, target: NaiveDate) -> Vec<NaiveDate> {
    let mut days = Vec::new();
    let mut d = watermark + Duration::days(1);
    while d <= target {
        if is_weekday(d) {
            days.push(d);
        }
        d += Duration::days(1);
    }
    days
}

#[test]
fn test_backfill_dates_are_strictly_ascending() {
    let days = missing_trading_days(date(2025, 1, 3), date(2025, 1, 31));
    assert!(!days.is_empty());
    for pair in days.windows(2) {
        assert!(pair[0] < pair[1], "dates must be processed chronologically");
    }
}

#[test]
fn test_backfill_excludes_watermark_includes_target() {
    let days = missing_trading_days(date(2025, 1, 6), date(2025, 1, 8));
    assert_eq!(days, vec![date(2025, 1, 7), date(2025, 1, 8)]);
}

#[test]
fn test_backfill_over_weekend_has_no_weekend_dates() {
    let days = missing_trading_days(date(2025, 1, 10), date(2025, 1, 13));
    assert_eq!(days, vec![date(2025, 1, 13)]);
}

#[test]
fn test_caught_up_watermark_yields_empty_plan() {
    assert!(missing_trading_days(date(2025, 1, 8), date(2025, 1, 8)).is_empty());
}

/// Watermark advance rule: a date moves the watermark only if its
/// hard-dependency phases succeeded globally.
fn advance_watermark(watermark: NaiveDate, runs: &[(NaiveDate, bool)]) -> NaiveDate {
    let mut current = watermark;
    for &(day, hard_deps_ok) in runs {
        if day > current && hard_deps_ok {
            current = day;
        }
    }
    current
}

#[test]
fn test_watermark_only_passes_hard_dep_successes() {
    let start = date(2025, 1, 3);
    let runs = [
        (date(2025, 1, 6), true),
        (date(2025, 1, 7), false), // P&L failed for one portfolio
        (date(2025, 1, 8), true),
    ];
    // The 8th succeeded, so the watermark lands there; the 7th stays
    // visible as a partial run for a later re-run.
    assert_eq!(advance_watermark(start, &runs), date(2025, 1, 8));
}

#[test]
fn test_watermark_stalls_when_everything_fails() {
    let start = date(2025, 1, 3);
    let runs = [(date(2025, 1, 6), false), (date(2025, 1, 7), false)];
    assert_eq!(advance_watermark(start, &runs), start);
}

// ---------------------------------------------------------------------------
// Retry backoff shape
// ---------------------------------------------------------------------------

fn backoff_ms(attempt: u32, base: u64, cap: u64) -> u64 {
    let exp = attempt.saturating_sub(1).min(16);
    (base.saturating_mul(1 << exp)).min(cap)
}

#[test]
fn test_backoff_doubles_then_caps() {
    assert_eq!(backoff_ms(1, 500, 30_000), 500);
    assert_eq!(backoff_ms(2, 500, 30_000), 1_000);
    assert_eq!(backoff_ms(3, 500, 30_000), 2_000);
    assert_eq!(backoff_ms(4, 500, 30_000), 4_000);
    assert_eq!(backoff_ms(20, 500, 30_000), 30_000);
}
