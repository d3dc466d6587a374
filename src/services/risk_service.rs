use chrono::{Duration, NaiveDate};
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::db::market_data_queries;
use crate::errors::AppError;
use crate::models::{InvestmentClass, Outcome, Portfolio, SkipReason};
use crate::services::factor_service::daily_returns;
use crate::services::market_data_service::MARKET_BENCHMARK;

// ============================================================================
// Market beta (single-factor OLS vs the market benchmark)
// ============================================================================

#[derive(Debug, Clone)]
pub struct MarketBetaResult {
    pub portfolio_id: Uuid,
    pub beta: f64,
    pub r_squared: f64,
    pub observations: usize,
}

/// Portfolio market beta: value-weighted position returns regressed on the
/// market benchmark with plain OLS. One regressor, so the collinearity that
/// pushes the style factors to ridge does not apply here.
pub async fn compute_market_beta(
    pool: &PgPool,
    config: &PipelineConfig,
    portfolio: &Portfolio,
    calc_date: NaiveDate,
) -> Result<Outcome<MarketBetaResult>, AppError> {
    let positions =
        crate::db::position_queries::fetch_open_for_date(pool, portfolio.id, calc_date).await?;

    let eligible: Vec<_> = positions
        .iter()
        .filter(|p| p.class() == InvestmentClass::Public)
        .collect();

    if eligible.is_empty() {
        return Ok(Outcome::Skipped(SkipReason::NoPublicPositions));
    }

    let fetch_start = calc_date
        - Duration::days(config.regression_window_days + config.regression_cushion_days);

    let mut symbols: Vec<String> = Vec::new();
    for p in &eligible {
        if !symbols.contains(&p.symbol) {
            symbols.push(p.symbol.clone());
        }
    }
    symbols.push(MARKET_BENCHMARK.to_string());

    let series =
        market_data_queries::fetch_close_series(pool, &symbols, fetch_start, calc_date).await?;

    let Some(bench_series) = series.get(MARKET_BENCHMARK) else {
        return Ok(Outcome::Skipped(SkipReason::NoPriceHistory));
    };
    let bench_returns: std::collections::HashMap<NaiveDate, f64> =
        daily_returns(bench_series).into_iter().collect();

    // Value-weighted portfolio return per date over positions with data
    let mut weighted: std::collections::HashMap<NaiveDate, (f64, f64)> =
        std::collections::HashMap::new();

    for position in &eligible {
        let Some(closes) = series.get(&position.symbol) else {
            continue;
        };
        let value = closes.last().map(|(_, c)| c * position.quantity).unwrap_or(0.0);
        if value.abs() < f64::EPSILON {
            continue;
        }
        for (date, ret) in daily_returns(closes) {
            let entry = weighted.entry(date).or_insert((0.0, 0.0));
            entry.0 += value * ret;
            entry.1 += value.abs();
        }
    }

    let mut dated: Vec<(NaiveDate, f64, f64)> = weighted
        .iter()
        .filter_map(|(date, (value_ret, total))| {
            bench_returns
                .get(date)
                .map(|b| (*date, value_ret / total.max(f64::EPSILON), *b))
        })
        .collect();
    dated.sort_by_key(|(date, _, _)| *date);

    if dated.len() < 2 {
        return Ok(Outcome::Skipped(SkipReason::NoPriceHistory));
    }

    if dated.len() > config.regression_window_days as usize {
        let cut = dated.len() - config.regression_window_days as usize;
        dated.drain(..cut);
    }

    let aligned: Vec<(f64, f64)> = dated.iter().map(|(_, r, b)| (*r, *b)).collect();

    let Some((beta, r_squared)) = ols_beta(&aligned) else {
        return Ok(Outcome::Skipped(SkipReason::NoPriceHistory));
    };

    info!(
        "📊 Market beta for portfolio {} on {}: {:.3} (R² {:.3}, n {})",
        portfolio.id,
        calc_date,
        beta,
        r_squared,
        aligned.len()
    );

    Ok(Outcome::Completed(MarketBetaResult {
        portfolio_id: portfolio.id,
        beta,
        r_squared,
        observations: aligned.len(),
    }))
}

/// Slope and R² of (portfolio_return, benchmark_return) pairs.
fn ols_beta(pairs: &[(f64, f64)]) -> Option<(f64, f64)> {
    let n = pairs.len() as f64;
    if pairs.len() < 2 {
        return None;
    }

    let mean_r = pairs.iter().map(|(r, _)| r).sum::<f64>() / n;
    let mean_b = pairs.iter().map(|(_, b)| b).sum::<f64>() / n;

    let mut cov = 0.0;
    let mut var_b = 0.0;
    let mut var_r = 0.0;
    for (r, b) in pairs {
        cov += (r - mean_r) * (b - mean_b);
        var_b += (b - mean_b).powi(2);
        var_r += (r - mean_r).powi(2);
    }

    if var_b.abs() < f64::EPSILON {
        return None;
    }

    let beta = cov / var_b;
    let r_squared = if var_r > f64::EPSILON {
        ((cov * cov) / (var_b * var_r)).clamp(0.0, 1.0)
    } else {
        0.0
    };

    Some((beta, r_squared))
}

// ============================================================================
// Market-risk scenarios
// ============================================================================

#[derive(Debug, Clone)]
pub struct MarketScenario {
    pub name: String,
    pub market_move_pct: f64,
    pub estimated_impact: f64,
}

/// First-order scenario grid: estimated P&L impact of standard market moves
/// given the portfolio's beta and current equity.
pub fn market_risk_scenarios(beta: f64, equity: f64) -> Vec<MarketScenario> {
    const MOVES: &[(&str, f64)] = &[
        ("Market -20%", -0.20),
        ("Market -10%", -0.10),
        ("Market -5%", -0.05),
        ("Market +5%", 0.05),
        ("Market +10%", 0.10),
        ("Market +20%", 0.20),
    ];

    MOVES
        .iter()
        .map(|(name, shock)| MarketScenario {
            name: name.to_string(),
            market_move_pct: shock * 100.0,
            estimated_impact: beta * shock * equity,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ols_beta_of_scaled_series_is_the_scale() {
        let pairs: Vec<(f64, f64)> = (0..100)
            .map(|i| {
                let b = ((i as f64) * 0.7).sin() * 0.01;
                (1.3 * b, b)
            })
            .collect();
        let (beta, r2) = ols_beta(&pairs).unwrap();
        assert!((beta - 1.3).abs() < 1e-9);
        assert!((r2 - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_ols_beta_flat_benchmark_is_none() {
        let pairs = vec![(0.01, 0.0), (0.02, 0.0), (-0.01, 0.0)];
        assert!(ols_beta(&pairs).is_none());
    }

    #[test]
    fn test_scenarios_scale_with_beta_and_equity() {
        let scenarios = market_risk_scenarios(1.5, 100_000.0);
        assert_eq!(scenarios.len(), 6);

        let crash = &scenarios[0];
        assert!((crash.estimated_impact + 30_000.0).abs() < 1e-9);

        let rally = scenarios.last().unwrap();
        assert!((rally.estimated_impact - 30_000.0).abs() < 1e-9);
    }
}
