use std::collections::HashSet;
use std::sync::OnceLock;

use chrono::{Duration, NaiveDate};
use regex::Regex;
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::db::{market_data_queries, position_queries, profile_queries};
use crate::errors::AppError;
use crate::external::provider_chain::ProviderChain;
use crate::models::FactorType;
use crate::services::failure_cache::{FailureCache, FailureType};
use crate::services::trading_calendar;

/// Market benchmark for the single-factor beta regression; always fetched.
pub const MARKET_BENCHMARK: &str = "SPY";

/// ETFs and funds we never fetch company profiles for (there is no company
/// behind them). Factor ETFs are included implicitly.
const KNOWN_FUNDS: &[&str] = &[
    "SPY", "QQQ", "IWM", "DIA", "VTI", "VOO", "VTV", "VUG", "MTUM", "QUAL", "USMV", "SPLV",
    "VLUE", "IUSV", "IWF", "PDP", "DGRW",
];

// ============================================================================
// Universe construction
// ============================================================================

/// Symbols the collector guarantees coverage for: open-position pricing
/// symbols plus the factor benchmark ETFs plus the market benchmark, with
/// invalid tickers dropped before any provider quota is spent.
pub async fn build_universe(
    pool: &PgPool,
    portfolio_ids: Option<&[Uuid]>,
) -> Result<Vec<String>, AppError> {
    let mut universe = position_queries::fetch_open_symbols(pool, portfolio_ids).await?;

    for factor in FactorType::all() {
        let etf = factor.benchmark_etf().to_string();
        if !universe.contains(&etf) {
            universe.push(etf);
        }
    }
    if !universe.contains(&MARKET_BENCHMARK.to_string()) {
        universe.push(MARKET_BENCHMARK.to_string());
    }

    let before = universe.len();
    universe.retain(|s| is_valid_symbol(s));
    if universe.len() < before {
        warn!("Dropped {} invalid symbols from universe", before - universe.len());
    }

    Ok(universe)
}

/// Lightweight ticker shape check, so obviously bogus symbols (placeholders,
/// free-text labels) never reach a provider.
pub fn is_valid_symbol(symbol: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"^[A-Z][A-Z0-9.\-]{0,9}$").unwrap());
    re.is_match(symbol)
}

/// Synthetic placeholders and fund tickers have no company profile to fetch.
pub fn is_profile_eligible(symbol: &str) -> bool {
    is_valid_symbol(symbol) && !KNOWN_FUNDS.contains(&symbol)
}

// ============================================================================
// Gap planning
// ============================================================================

/// What the two coverage probes saw over the required range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoverageProbe {
    /// Earliest date with >= threshold coverage ("historical coverage").
    pub earliest_covered: Option<NaiveDate>,
    /// Latest date with >= threshold coverage ("current coverage").
    pub latest_covered: Option<NaiveDate>,
}

/// The minimal fetch the store needs to satisfy the required range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchPlan {
    /// Range already covered; nothing to do.
    FullyCached,
    /// Only a trailing gap: fetch just the new dates.
    Incremental { start: NaiveDate, end: NaiveDate },
    /// Leading gap (first run or long outage): fetch the older range.
    Backfill { start: NaiveDate, end: NaiveDate },
    /// Both gaps at once.
    FullBackfill {
        backfill_start: NaiveDate,
        backfill_end: NaiveDate,
        incremental_start: NaiveDate,
        incremental_end: NaiveDate,
    },
}

impl FetchPlan {
    pub fn label(&self) -> &'static str {
        match self {
            FetchPlan::FullyCached => "fully_cached",
            FetchPlan::Incremental { .. } => "incremental",
            FetchPlan::Backfill { .. } => "backfill",
            FetchPlan::FullBackfill { .. } => "full_backfill",
        }
    }

    /// The concrete (start, end) ranges to fetch, in chronological order.
    pub fn ranges(&self) -> Vec<(NaiveDate, NaiveDate)> {
        match *self {
            FetchPlan::FullyCached => vec![],
            FetchPlan::Incremental { start, end } => vec![(start, end)],
            FetchPlan::Backfill { start, end } => vec![(start, end)],
            FetchPlan::FullBackfill {
                backfill_start,
                backfill_end,
                incremental_start,
                incremental_end,
            } => vec![
                (backfill_start, backfill_end),
                (incremental_start, incremental_end),
            ],
        }
    }
}

/// Decide the minimal fetch from the probe results. Pure so the gap logic is
/// testable without a store.
pub fn plan_fetch(
    required_start: NaiveDate,
    required_end: NaiveDate,
    probe: CoverageProbe,
) -> FetchPlan {
    match (probe.earliest_covered, probe.latest_covered) {
        // Nothing covered at all: first run or a wiped store
        (None, _) | (_, None) => FetchPlan::Backfill {
            start: required_start,
            end: required_end,
        },
        (Some(earliest), Some(latest)) => {
            let leading_gap = earliest > required_start;
            let trailing_gap = latest < required_end;

            match (leading_gap, trailing_gap) {
                (false, false) => FetchPlan::FullyCached,
                (false, true) => FetchPlan::Incremental {
                    start: latest + Duration::days(1),
                    end: required_end,
                },
                (true, false) => FetchPlan::Backfill {
                    start: required_start,
                    end: earliest - Duration::days(1),
                },
                (true, true) => FetchPlan::FullBackfill {
                    backfill_start: required_start,
                    backfill_end: earliest - Duration::days(1),
                    incremental_start: latest + Duration::days(1),
                    incremental_end: required_end,
                },
            }
        }
    }
}

// ============================================================================
// Collection entry point
// ============================================================================

/// What one collection run did, for the orchestrator's phase record.
#[derive(Debug, Clone)]
pub struct CollectionSummary {
    pub universe_size: usize,
    pub plan: &'static str,
    pub symbols_fetched: usize,
    pub symbols_missing: Vec<String>,
    pub coverage_pct: f64,
    pub bars_upserted: usize,
}

/// Guarantee the trailing lookback window of daily bars exists for the
/// universe, fetching only what is missing through the provider chain.
/// Replays are idempotent: bars land via (symbol, date) upserts.
pub async fn collect_market_data(
    pool: &PgPool,
    chain: &ProviderChain,
    failure_cache: &FailureCache,
    config: &PipelineConfig,
    calc_date: NaiveDate,
    portfolio_ids: Option<&[Uuid]>,
) -> Result<CollectionSummary, AppError> {
    let universe = build_universe(pool, portfolio_ids).await?;

    if universe.is_empty() {
        info!("Universe is empty; nothing to collect");
        return Ok(CollectionSummary {
            universe_size: 0,
            plan: "fully_cached",
            symbols_fetched: 0,
            symbols_missing: vec![],
            coverage_pct: 100.0,
            bars_upserted: 0,
        });
    }

    let required_start = calc_date - Duration::days(config.lookback_days);

    // A non-trading end date pulls back to the last session; if that lands
    // before the window start the whole request is vacuous.
    let required_end = trading_calendar::most_recent_trading_day(calc_date);
    if required_end < required_start {
        info!("Resolved fetch range is empty; reporting full coverage");
        return Ok(CollectionSummary {
            universe_size: universe.len(),
            plan: "fully_cached",
            symbols_fetched: 0,
            symbols_missing: vec![],
            coverage_pct: 100.0,
            bars_upserted: 0,
        });
    }

    let probe = probe_coverage(pool, &universe, required_start, required_end, config).await?;
    let plan = plan_fetch(required_start, required_end, probe);

    info!(
        "📈 Market data plan for {}: {} (universe {})",
        calc_date,
        plan.label(),
        universe.len()
    );

    let mut fetched: HashSet<String> = HashSet::new();
    let mut bars_upserted = 0usize;

    for (start, end) in plan.ranges() {
        // Only symbols actually missing bars in this sub-range, minus
        // recently-failed tickers that would just burn quota again.
        let have: HashSet<String> = market_data_queries::symbols_with_data(pool, &universe, start, end)
            .await?
            .into_iter()
            .collect();
        let missing: Vec<String> = universe
            .iter()
            .filter(|s| !have.contains(s.as_str()))
            .filter(|s| {
                if let Some(failure) = failure_cache.is_failed(s) {
                    info!(
                        "⚠️ Skipping {} - in failure cache ({:?}) until TTL expires",
                        s, failure.error_type
                    );
                    false
                } else {
                    true
                }
            })
            .cloned()
            .collect();

        if missing.is_empty() {
            continue;
        }

        info!(
            "Fetching {} symbols for [{} .. {}]",
            missing.len(),
            start,
            end
        );

        let supplied = chain.fetch_prices(&missing, start, end).await;

        for symbol in &missing {
            match supplied.get(symbol) {
                Some(sourced) => {
                    market_data_queries::upsert_bars(pool, symbol, &sourced.bars, &sourced.source)
                        .await?;
                    bars_upserted += sourced.bars.len();
                    fetched.insert(symbol.clone());
                    failure_cache.clear(symbol);
                }
                None => {
                    failure_cache.record_failure(symbol, FailureType::NotFound);
                }
            }
        }
    }

    // Re-probe for the reported coverage figure
    let final_probe =
        probe_coverage(pool, &universe, required_start, required_end, config).await?;
    let coverage_pct = coverage_percent(&plan, &final_probe, required_start, required_end);

    let symbols_missing: Vec<String> = match plan {
        FetchPlan::FullyCached => vec![],
        _ => {
            let have: HashSet<String> =
                market_data_queries::symbols_with_data(pool, &universe, required_start, required_end)
                    .await?
                    .into_iter()
                    .collect();
            universe
                .iter()
                .filter(|s| !have.contains(s.as_str()))
                .cloned()
                .collect()
        }
    };

    if !symbols_missing.is_empty() {
        warn!(
            "Collection left {} symbols without any bars: {:?}",
            symbols_missing.len(),
            symbols_missing
        );
    }

    Ok(CollectionSummary {
        universe_size: universe.len(),
        plan: plan.label(),
        symbols_fetched: fetched.len(),
        symbols_missing,
        coverage_pct,
        bars_upserted,
    })
}

async fn probe_coverage(
    pool: &PgPool,
    universe: &[String],
    start: NaiveDate,
    end: NaiveDate,
    config: &PipelineConfig,
) -> Result<CoverageProbe, AppError> {
    let counts = market_data_queries::symbol_counts_by_date(pool, universe, start, end).await?;
    Ok(probe_from_counts(
        &counts,
        universe.len(),
        config.coverage_threshold,
    ))
}

/// Reduce per-date symbol counts to the two coverage boundary dates.
pub fn probe_from_counts(
    counts: &[(NaiveDate, i64)],
    universe_size: usize,
    threshold: f64,
) -> CoverageProbe {
    let needed = (universe_size as f64 * threshold).ceil() as i64;

    let covered: Vec<NaiveDate> = counts
        .iter()
        .filter(|(_, count)| *count >= needed)
        .map(|(date, _)| *date)
        .collect();

    CoverageProbe {
        earliest_covered: covered.first().copied(),
        latest_covered: covered.last().copied(),
    }
}

fn coverage_percent(
    plan: &FetchPlan,
    probe: &CoverageProbe,
    required_start: NaiveDate,
    required_end: NaiveDate,
) -> f64 {
    if matches!(plan, FetchPlan::FullyCached) {
        return 100.0;
    }
    match (probe.earliest_covered, probe.latest_covered) {
        (Some(earliest), Some(latest)) => {
            let required = (required_end - required_start).num_days().max(1) as f64;
            let covered = (latest - earliest).num_days().max(0) as f64;
            (covered / required * 100.0).clamp(0.0, 100.0)
        }
        _ => 0.0,
    }
}

// ============================================================================
// Company profiles (fundamentals phase)
// ============================================================================

#[derive(Debug, Clone)]
pub struct ProfileRefreshSummary {
    pub considered: usize,
    pub refreshed: usize,
}

/// Refresh stale or missing company profiles for the position universe.
/// Failures here are non-fatal to the date's processing: the phase reports
/// what it managed and moves on.
pub async fn refresh_company_profiles(
    pool: &PgPool,
    chain: &ProviderChain,
    config: &PipelineConfig,
    portfolio_ids: Option<&[Uuid]>,
) -> Result<ProfileRefreshSummary, AppError> {
    let universe = position_queries::fetch_open_symbols(pool, portfolio_ids).await?;

    let eligible: Vec<String> = universe
        .into_iter()
        .filter(|s| is_profile_eligible(s))
        .collect();

    let stale =
        profile_queries::symbols_needing_refresh(pool, &eligible, config.profile_staleness_days)
            .await?;

    if stale.is_empty() {
        return Ok(ProfileRefreshSummary {
            considered: eligible.len(),
            refreshed: 0,
        });
    }

    info!("🏷️ Refreshing {} stale company profiles", stale.len());

    let profiles = chain.fetch_profiles(&stale).await;

    let mut refreshed = 0usize;
    for (symbol, profile) in &profiles {
        match profile_queries::upsert_profile(pool, symbol, profile).await {
            Ok(()) => refreshed += 1,
            Err(e) => warn!("Failed to persist profile for {}: {}", symbol, e),
        }
    }

    Ok(ProfileRefreshSummary {
        considered: eligible.len(),
        refreshed,
    })
}

// ============================================================================
// Mock seeding (development environments without provider keys)
// ============================================================================

/// Seed a symbol with a random-walk bar history so the pipeline can run end
/// to end against an empty database. Never used by scheduled runs.
pub async fn generate_mock_bars(
    pool: &PgPool,
    symbol: &str,
    calc_date: NaiveDate,
    days: i64,
) -> Result<usize, AppError> {
    use crate::external::market_provider::ProviderBar;

    let mut bars = Vec::new();
    let mut current = 100.0_f64;

    let mut d = calc_date - Duration::days(days);
    while d <= calc_date {
        if trading_calendar::is_trading_day(d) {
            current *= 1.0 + (rand::random::<f64>() - 0.5) * 0.02;
            let spread = current * 0.01;
            bars.push(ProviderBar {
                date: d,
                open: current - spread / 2.0,
                high: current + spread,
                low: current - spread,
                close: current,
                volume: 1_000_000 + (rand::random::<f64>() * 500_000.0) as i64,
            });
        }
        d += Duration::days(1);
    }

    market_data_queries::upsert_bars(pool, symbol, &bars, "mock").await?;
    Ok(bars.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_symbol_validity() {
        assert!(is_valid_symbol("AAPL"));
        assert!(is_valid_symbol("BRK.B"));
        assert!(is_valid_symbol("RY.TO"));
        assert!(!is_valid_symbol("aapl"));
        assert!(!is_valid_symbol(""));
        assert!(!is_valid_symbol("MY PRIVATE FUND"));
        assert!(!is_valid_symbol("1COV"));
    }

    #[test]
    fn test_profile_eligibility_excludes_funds() {
        assert!(is_profile_eligible("AAPL"));
        assert!(!is_profile_eligible("SPY"));
        assert!(!is_profile_eligible("USMV"));
        assert!(!is_profile_eligible("not a ticker"));
    }

    #[test]
    fn test_plan_fully_cached() {
        let plan = plan_fetch(
            date(2025, 1, 1),
            date(2025, 6, 1),
            CoverageProbe {
                earliest_covered: Some(date(2025, 1, 1)),
                latest_covered: Some(date(2025, 6, 1)),
            },
        );
        assert_eq!(plan, FetchPlan::FullyCached);
    }

    #[test]
    fn test_plan_trailing_gap_is_incremental() {
        let plan = plan_fetch(
            date(2025, 1, 1),
            date(2025, 6, 10),
            CoverageProbe {
                earliest_covered: Some(date(2025, 1, 1)),
                latest_covered: Some(date(2025, 6, 5)),
            },
        );
        assert_eq!(
            plan,
            FetchPlan::Incremental {
                start: date(2025, 6, 6),
                end: date(2025, 6, 10),
            }
        );
    }

    #[test]
    fn test_plan_leading_gap_is_backfill() {
        // Store holds [d0, d5]; request reaches back before d0
        let plan = plan_fetch(
            date(2025, 1, 1),
            date(2025, 6, 1),
            CoverageProbe {
                earliest_covered: Some(date(2025, 3, 1)),
                latest_covered: Some(date(2025, 6, 1)),
            },
        );
        assert_eq!(
            plan,
            FetchPlan::Backfill {
                start: date(2025, 1, 1),
                end: date(2025, 2, 28),
            }
        );
    }

    #[test]
    fn test_plan_both_gaps_is_full_backfill() {
        let plan = plan_fetch(
            date(2025, 1, 1),
            date(2025, 6, 10),
            CoverageProbe {
                earliest_covered: Some(date(2025, 2, 1)),
                latest_covered: Some(date(2025, 6, 1)),
            },
        );
        assert_eq!(
            plan,
            FetchPlan::FullBackfill {
                backfill_start: date(2025, 1, 1),
                backfill_end: date(2025, 1, 31),
                incremental_start: date(2025, 6, 2),
                incremental_end: date(2025, 6, 10),
            }
        );
    }

    #[test]
    fn test_plan_empty_store_backfills_whole_range() {
        let plan = plan_fetch(
            date(2025, 1, 1),
            date(2025, 6, 1),
            CoverageProbe {
                earliest_covered: None,
                latest_covered: None,
            },
        );
        assert_eq!(
            plan,
            FetchPlan::Backfill {
                start: date(2025, 1, 1),
                end: date(2025, 6, 1),
            }
        );
    }

    #[test]
    fn test_gap_detection_fetches_exactly_the_missing_range() {
        // Spec scenario: data for [d0, d5], missing [d6, d10], request to d10
        let d0 = date(2025, 1, 6);
        let d5 = date(2025, 1, 13);
        let d6 = date(2025, 1, 14);
        let d10 = date(2025, 1, 20);

        let plan = plan_fetch(
            d0,
            d10,
            CoverageProbe {
                earliest_covered: Some(d0),
                latest_covered: Some(d5),
            },
        );
        assert_eq!(plan, FetchPlan::Incremental { start: d6, end: d10 });
        assert_eq!(plan.ranges(), vec![(d6, d10)]);
    }

    #[test]
    fn test_probe_from_counts_applies_threshold() {
        // Universe of 10, threshold 0.8 -> need 8 symbols per date
        let counts = vec![
            (date(2025, 1, 2), 5_i64),
            (date(2025, 1, 3), 8),
            (date(2025, 1, 6), 9),
            (date(2025, 1, 7), 7),
        ];
        let probe = probe_from_counts(&counts, 10, 0.8);
        assert_eq!(probe.earliest_covered, Some(date(2025, 1, 3)));
        assert_eq!(probe.latest_covered, Some(date(2025, 1, 6)));
    }

    #[test]
    fn test_probe_from_counts_empty() {
        let probe = probe_from_counts(&[], 10, 0.8);
        assert_eq!(probe.earliest_covered, None);
        assert_eq!(probe.latest_covered, None);
    }
}
