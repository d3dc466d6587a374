use std::collections::HashMap;

use bigdecimal::{BigDecimal, FromPrimitive, ToPrimitive};
use chrono::{Duration, NaiveDate};
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::db::{
    cash_flow_queries, market_data_queries, portfolio_queries, snapshot_queries, trade_queries,
};
use crate::errors::AppError;
use crate::models::{
    CreatePortfolioSnapshot, Outcome, Portfolio, PortfolioSnapshot, Position, SkipReason,
};
use crate::services::trading_calendar;

// ============================================================================
// Pure rollforward core
// ============================================================================

/// Resolved prices for one pricing symbol on the calculation date.
#[derive(Debug, Clone, Copy)]
pub struct PricePair {
    pub current: f64,
    /// Most recent close strictly before the current one, bounded by the
    /// lookback window; equals `current` when no prior close exists (the
    /// position then contributes zero P&L).
    pub previous: f64,
}

/// One day's P&L arithmetic for a portfolio.
#[derive(Debug, Clone)]
pub struct DayPnl {
    pub unrealized_pnl: f64,
    pub realized_pnl: f64,
    pub capital_flow: f64,
    pub new_equity: f64,
    pub daily_return: Option<f64>,
    pub cumulative_pnl: f64,
    pub cumulative_realized_pnl: f64,
    pub cumulative_capital_flow: f64,
    pub gross_exposure: f64,
    pub net_exposure: f64,
    pub long_exposure: f64,
    pub short_exposure: f64,
    pub positions_priced: usize,
    pub positions_skipped: usize,
}

/// Prior-snapshot figures the rollforward accumulates from.
#[derive(Debug, Clone, Copy, Default)]
pub struct PriorFigures {
    pub equity: f64,
    pub cumulative_pnl: f64,
    pub cumulative_realized_pnl: f64,
    pub cumulative_capital_flow: f64,
}

impl PriorFigures {
    fn from_snapshot(snapshot: &PortfolioSnapshot) -> Self {
        Self {
            equity: snapshot.equity_balance.to_f64().unwrap_or(0.0),
            cumulative_pnl: snapshot.cumulative_pnl.to_f64().unwrap_or(0.0),
            cumulative_realized_pnl: snapshot.cumulative_realized_pnl.to_f64().unwrap_or(0.0),
            cumulative_capital_flow: snapshot.cumulative_capital_flow.to_f64().unwrap_or(0.0),
        }
    }
}

/// Mark open positions against the day's prices and roll equity forward.
///
/// `prior.equity` must be the equity of the most recent snapshot strictly
/// before the calculation date, or the portfolio's starting equity when no
/// snapshot exists yet — never the starting balance once snapshots exist.
pub fn compute_day_pnl(
    positions: &[Position],
    prices: &HashMap<String, PricePair>,
    prior: PriorFigures,
    realized_pnl: f64,
    capital_flow: f64,
) -> DayPnl {
    let mut unrealized = 0.0;
    let mut long = 0.0;
    let mut short = 0.0;
    let mut priced = 0usize;
    let mut skipped = 0usize;

    for position in positions {
        let class = position.class();
        if !class.has_market_price() {
            skipped += 1;
            continue;
        }

        let Some(pair) = prices.get(position.pricing_symbol()) else {
            skipped += 1;
            continue;
        };

        let multiplier = class.contract_multiplier();
        unrealized += (pair.current - pair.previous) * position.quantity * multiplier;

        let market_value = pair.current * position.quantity * multiplier;
        if market_value >= 0.0 {
            long += market_value;
        } else {
            short += market_value.abs();
        }
        priced += 1;
    }

    let new_equity = prior.equity + unrealized + realized_pnl + capital_flow;

    let day_pnl = unrealized + realized_pnl;
    let daily_return = if prior.equity.abs() > f64::EPSILON {
        Some(day_pnl / prior.equity)
    } else {
        None
    };

    DayPnl {
        unrealized_pnl: unrealized,
        realized_pnl,
        capital_flow,
        new_equity,
        daily_return,
        cumulative_pnl: prior.cumulative_pnl + day_pnl,
        cumulative_realized_pnl: prior.cumulative_realized_pnl + realized_pnl,
        cumulative_capital_flow: prior.cumulative_capital_flow + capital_flow,
        gross_exposure: long + short,
        net_exposure: long - short,
        long_exposure: long,
        short_exposure: short,
        positions_priced: priced,
        positions_skipped: skipped,
    }
}

// ============================================================================
// Persisting entry point
// ============================================================================

#[derive(Debug, Clone)]
pub struct PnlResult {
    pub snapshot_id: Uuid,
    pub new_equity: f64,
    pub unrealized_pnl: f64,
    pub realized_pnl: f64,
    pub capital_flow: f64,
    pub positions_priced: usize,
    pub positions_skipped: usize,
}

/// Compute and persist one portfolio's P&L for one date.
///
/// The equity write-back and the snapshot upsert share a transaction: either
/// both land or the phase fails. Errors out of that transaction are
/// propagated, never swallowed — a silently-missed equity update corrupts the
/// rollforward for every later date.
pub async fn run_for_portfolio(
    pool: &PgPool,
    config: &PipelineConfig,
    portfolio: &Portfolio,
    calc_date: NaiveDate,
) -> Result<Outcome<PnlResult>, AppError> {
    if !trading_calendar::is_trading_day(calc_date) {
        return Ok(Outcome::Skipped(SkipReason::NotTradingDay));
    }

    let positions =
        crate::db::position_queries::fetch_open_for_date(pool, portfolio.id, calc_date).await?;

    let prior_snapshot =
        snapshot_queries::fetch_latest_before(pool, portfolio.id, calc_date).await?;
    let prior = match &prior_snapshot {
        Some(snapshot) => PriorFigures::from_snapshot(snapshot),
        None => PriorFigures {
            equity: portfolio.starting_equity.to_f64().unwrap_or(0.0),
            ..Default::default()
        },
    };

    let realized_pnl = trade_queries::realized_pnl_on(pool, portfolio.id, calc_date)
        .await?
        .to_f64()
        .unwrap_or(0.0);
    let capital_flow = cash_flow_queries::net_flow_on(pool, portfolio.id, calc_date)
        .await?
        .to_f64()
        .unwrap_or(0.0);

    let prices = resolve_prices(pool, config, &positions, calc_date).await?;

    let pnl = compute_day_pnl(&positions, &prices, prior, realized_pnl, capital_flow);

    if pnl.positions_skipped > 0 {
        info!(
            "Portfolio {}: {} positions had no usable price and contributed zero",
            portfolio.id, pnl.positions_skipped
        );
    }

    let snapshot = CreatePortfolioSnapshot {
        portfolio_id: portfolio.id,
        calculation_date: calc_date,
        equity_balance: decimal(pnl.new_equity),
        unrealized_pnl: decimal(pnl.unrealized_pnl),
        realized_pnl: decimal(pnl.realized_pnl),
        capital_flow: decimal(pnl.capital_flow),
        cumulative_pnl: decimal(pnl.cumulative_pnl),
        cumulative_realized_pnl: decimal(pnl.cumulative_realized_pnl),
        cumulative_capital_flow: decimal(pnl.cumulative_capital_flow),
        daily_return: pnl.daily_return,
        gross_exposure: pnl.gross_exposure,
        net_exposure: pnl.net_exposure,
        long_exposure: pnl.long_exposure,
        short_exposure: pnl.short_exposure,
    };

    // Equity update and snapshot creation are atomic from the caller's view.
    let mut tx = pool.begin().await?;
    portfolio_queries::update_equity_tx(&mut tx, portfolio.id, &snapshot.equity_balance).await?;
    let snapshot_id = snapshot_queries::upsert_snapshot_tx(&mut tx, &snapshot).await?;
    tx.commit().await?;

    info!(
        "💰 Portfolio {} on {}: equity {:.2}, unrealized {:+.2}, realized {:+.2}, flow {:+.2}",
        portfolio.id, calc_date, pnl.new_equity, pnl.unrealized_pnl, pnl.realized_pnl, pnl.capital_flow
    );

    Ok(Outcome::Completed(PnlResult {
        snapshot_id,
        new_equity: pnl.new_equity,
        unrealized_pnl: pnl.unrealized_pnl,
        realized_pnl: pnl.realized_pnl,
        capital_flow: pnl.capital_flow,
        positions_priced: pnl.positions_priced,
        positions_skipped: pnl.positions_skipped,
    }))
}

/// Resolve (current, previous) closes per pricing symbol with the bounded
/// lookback: current is the most recent close on or before the calc date;
/// previous is the most recent close strictly before that one.
async fn resolve_prices(
    pool: &PgPool,
    config: &PipelineConfig,
    positions: &[Position],
    calc_date: NaiveDate,
) -> Result<HashMap<String, PricePair>, AppError> {
    let mut prices = HashMap::new();

    for position in positions {
        let symbol = position.pricing_symbol();
        if prices.contains_key(symbol) || !position.class().has_market_price() {
            continue;
        }

        let current = market_data_queries::fetch_close_on_or_before(
            pool,
            symbol,
            calc_date,
            config.price_lookback_days,
        )
        .await?;

        let Some((current_date, current_close)) = current else {
            warn!(
                "No close for {} within {} days of {}",
                symbol, config.price_lookback_days, calc_date
            );
            continue;
        };

        let previous = market_data_queries::fetch_close_on_or_before(
            pool,
            symbol,
            current_date - Duration::days(1),
            config.price_lookback_days,
        )
        .await?
        .map(|(_, close)| close)
        .unwrap_or(current_close);

        prices.insert(
            symbol.to_string(),
            PricePair {
                current: current_close,
                previous,
            },
        );
    }

    Ok(prices)
}

fn decimal(value: f64) -> BigDecimal {
    BigDecimal::from_f64(value).unwrap_or_else(|| BigDecimal::from(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn position(symbol: &str, quantity: f64, class: &str) -> Position {
        Position {
            id: Uuid::new_v4(),
            portfolio_id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            quantity,
            entry_price: 100.0,
            entry_date: NaiveDate::from_ymd_opt(2025, 1, 2).unwrap(),
            exit_date: None,
            investment_class: class.to_string(),
            underlying_symbol: None,
            strike_price: None,
            expiration_date: None,
            sector: None,
            last_price: None,
            market_value: None,
            deleted_at: None,
            created_at: Utc::now(),
        }
    }

    fn pair(current: f64, previous: f64) -> PricePair {
        PricePair { current, previous }
    }

    #[test]
    fn test_scenario_first_snapshot_then_gap() {
        // Spec scenario: no prior snapshot, starting equity 100_000.
        // 2025-01-10: unrealized +500 -> equity 100_500, return 0.5%
        let positions = vec![position("AAPL", 100.0, "public")];
        let mut prices = HashMap::new();
        prices.insert("AAPL".to_string(), pair(105.0, 100.0));

        let day1 = compute_day_pnl(
            &positions,
            &prices,
            PriorFigures {
                equity: 100_000.0,
                ..Default::default()
            },
            0.0,
            0.0,
        );
        assert!((day1.unrealized_pnl - 500.0).abs() < 1e-9);
        assert!((day1.new_equity - 100_500.0).abs() < 1e-9);
        assert!((day1.daily_return.unwrap() - 0.005).abs() < 1e-9);
        assert!((day1.cumulative_pnl - 500.0).abs() < 1e-9);

        // Next trading day: unrealized -200 -> equity 100_300, cumulative 300
        let mut prices2 = HashMap::new();
        prices2.insert("AAPL".to_string(), pair(103.0, 105.0));

        let day2 = compute_day_pnl(
            &positions,
            &prices2,
            PriorFigures {
                equity: day1.new_equity,
                cumulative_pnl: day1.cumulative_pnl,
                cumulative_realized_pnl: day1.cumulative_realized_pnl,
                cumulative_capital_flow: day1.cumulative_capital_flow,
            },
            0.0,
            0.0,
        );
        assert!((day2.unrealized_pnl + 200.0).abs() < 1e-9);
        assert!((day2.new_equity - 100_300.0).abs() < 1e-9);
        assert!((day2.cumulative_pnl - 300.0).abs() < 1e-9);
    }

    #[test]
    fn test_option_contract_multiplier() {
        let mut opt = position("AAPL250620C00200000", 2.0, "option");
        opt.underlying_symbol = Some("AAPL".to_string());

        let mut prices = HashMap::new();
        prices.insert("AAPL".to_string(), pair(101.0, 100.0));

        let pnl = compute_day_pnl(
            &[opt],
            &prices,
            PriorFigures {
                equity: 10_000.0,
                ..Default::default()
            },
            0.0,
            0.0,
        );
        // (101 - 100) * 2 contracts * 100 multiplier = 200
        assert!((pnl.unrealized_pnl - 200.0).abs() < 1e-9);
    }

    #[test]
    fn test_short_position_gains_when_price_falls() {
        let positions = vec![position("TSLA", -50.0, "public")];
        let mut prices = HashMap::new();
        prices.insert("TSLA".to_string(), pair(90.0, 100.0));

        let pnl = compute_day_pnl(
            &positions,
            &prices,
            PriorFigures {
                equity: 50_000.0,
                ..Default::default()
            },
            0.0,
            0.0,
        );
        assert!((pnl.unrealized_pnl - 500.0).abs() < 1e-9);
        assert!((pnl.short_exposure - 4_500.0).abs() < 1e-9);
        assert!((pnl.long_exposure - 0.0).abs() < 1e-9);
        assert!((pnl.gross_exposure - 4_500.0).abs() < 1e-9);
        assert!((pnl.net_exposure + 4_500.0).abs() < 1e-9);
    }

    #[test]
    fn test_private_positions_contribute_zero() {
        let positions = vec![
            position("AAPL", 10.0, "public"),
            position("PVTFUND", 1.0, "private"),
        ];
        let mut prices = HashMap::new();
        prices.insert("AAPL".to_string(), pair(100.0, 99.0));

        let pnl = compute_day_pnl(
            &positions,
            &prices,
            PriorFigures {
                equity: 1_000.0,
                ..Default::default()
            },
            0.0,
            0.0,
        );
        assert_eq!(pnl.positions_priced, 1);
        assert_eq!(pnl.positions_skipped, 1);
        assert!((pnl.unrealized_pnl - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_missing_price_skips_position_with_zero_contribution() {
        let positions = vec![position("NODATA", 10.0, "public")];
        let prices = HashMap::new();

        let pnl = compute_day_pnl(
            &positions,
            &prices,
            PriorFigures {
                equity: 1_000.0,
                ..Default::default()
            },
            0.0,
            0.0,
        );
        assert_eq!(pnl.positions_skipped, 1);
        assert!((pnl.unrealized_pnl - 0.0).abs() < 1e-9);
        assert!((pnl.new_equity - 1_000.0).abs() < 1e-9);
    }

    #[test]
    fn test_flows_and_realized_feed_equity_but_only_pnl_feeds_return() {
        let positions = vec![position("AAPL", 10.0, "public")];
        let mut prices = HashMap::new();
        prices.insert("AAPL".to_string(), pair(100.0, 100.0));

        let pnl = compute_day_pnl(
            &positions,
            &prices,
            PriorFigures {
                equity: 10_000.0,
                cumulative_pnl: 250.0,
                cumulative_realized_pnl: 50.0,
                cumulative_capital_flow: 1_000.0,
            },
            150.0,   // realized today
            2_000.0, // net contribution today
        );
        assert!((pnl.new_equity - 12_150.0).abs() < 1e-9);
        assert!((pnl.daily_return.unwrap() - 0.015).abs() < 1e-9);
        assert!((pnl.cumulative_pnl - 400.0).abs() < 1e-9);
        assert!((pnl.cumulative_realized_pnl - 200.0).abs() < 1e-9);
        assert!((pnl.cumulative_capital_flow - 3_000.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_prior_equity_gives_no_daily_return() {
        let pnl = compute_day_pnl(
            &[],
            &HashMap::new(),
            PriorFigures::default(),
            0.0,
            500.0,
        );
        assert_eq!(pnl.daily_return, None);
        assert!((pnl.new_equity - 500.0).abs() < 1e-9);
    }
}
