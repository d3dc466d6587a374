use std::collections::HashMap;

use chrono::{Duration, NaiveDate};
use nalgebra::{DMatrix, DVector};
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::db::{factor_queries, market_data_queries, position_queries};
use crate::errors::AppError;
use crate::models::factor::{
    CreateFactorExposure, FactorExposureReport, FitQuality, LambdaCandidate, PositionFactorFit,
    RegressionMethod,
};
use crate::models::{FactorType, InvestmentClass, Outcome, Portfolio, SkipReason};

// ============================================================================
// Ridge regression core
// ============================================================================

/// One fitted regression, betas already rescaled to raw-return units.
#[derive(Debug, Clone)]
pub struct RidgeFit {
    pub betas: Vec<f64>,
    pub r_squared: f64,
    pub clipped: Vec<bool>,
}

/// Fit y on the factor columns with L2 regularization.
///
/// The six style-factor ETFs are heavily collinear; plain OLS hands back
/// sign-flipped, unstable coefficients. Ridge trades a controlled bias for
/// much lower coefficient variance. Factor columns are z-scored before the
/// solve and the coefficients divided back by each column's scale, then
/// clipped to ±`beta_cap` so an ill-conditioned fit cannot leak an absurd
/// exposure downstream.
pub fn fit_ridge(y: &[f64], x: &[Vec<f64>], lambda: f64, beta_cap: f64) -> Option<RidgeFit> {
    let n = y.len();
    if n < 2 || x.len() != n {
        return None;
    }
    let k = x[0].len();
    if k == 0 {
        return None;
    }

    // Standardize each factor column
    let mut means = vec![0.0; k];
    let mut scales = vec![0.0; k];
    for j in 0..k {
        let mean = x.iter().map(|row| row[j]).sum::<f64>() / n as f64;
        let var = x.iter().map(|row| (row[j] - mean).powi(2)).sum::<f64>() / n as f64;
        means[j] = mean;
        // A flat column gets scale 1 so it solves to a ~zero beta instead of NaN
        scales[j] = if var.sqrt() > 1e-12 { var.sqrt() } else { 1.0 };
    }

    let y_mean = y.iter().sum::<f64>() / n as f64;
    let y_centered: Vec<f64> = y.iter().map(|v| v - y_mean).collect();

    let z = DMatrix::from_fn(n, k, |i, j| (x[i][j] - means[j]) / scales[j]);
    let yv = DVector::from_column_slice(&y_centered);

    // (ZᵀZ + λI) β = Zᵀ y; positive-definite for λ > 0
    let gram = z.transpose() * &z + DMatrix::identity(k, k) * lambda;
    let rhs = z.transpose() * &yv;

    let beta_std = gram.cholesky()?.solve(&rhs);

    // R² from residuals in the standardized problem
    let residuals = &yv - &z * &beta_std;
    let ss_res: f64 = residuals.iter().map(|r| r * r).sum();
    let ss_tot: f64 = y_centered.iter().map(|v| v * v).sum();
    let r_squared = if ss_tot > 1e-12 {
        (1.0 - ss_res / ss_tot).clamp(0.0, 1.0)
    } else {
        0.0
    };

    // Rescale to raw-return units, then cap
    let mut betas = Vec::with_capacity(k);
    let mut clipped = Vec::with_capacity(k);
    for j in 0..k {
        let raw = beta_std[j] / scales[j];
        if raw.abs() > beta_cap {
            betas.push(beta_cap.copysign(raw));
            clipped.push(true);
        } else {
            betas.push(raw);
            clipped.push(false);
        }
    }

    Some(RidgeFit {
        betas,
        r_squared,
        clipped,
    })
}

/// Close-to-close daily returns keyed by the later date.
pub fn daily_returns(series: &[(NaiveDate, f64)]) -> Vec<(NaiveDate, f64)> {
    series
        .windows(2)
        .filter_map(|w| {
            let (_, prev) = w[0];
            let (date, cur) = w[1];
            if prev.abs() > f64::EPSILON {
                Some((date, (cur - prev) / prev))
            } else {
                None
            }
        })
        .collect()
}

/// Intersect a position's return dates with every factor's, producing the
/// aligned (y, X) arrays, most recent `max_observations` rows.
pub fn align_observations(
    position_returns: &[(NaiveDate, f64)],
    factor_returns: &[HashMap<NaiveDate, f64>],
    max_observations: usize,
) -> (Vec<f64>, Vec<Vec<f64>>) {
    let mut y = Vec::new();
    let mut x = Vec::new();

    for (date, ret) in position_returns {
        let row: Vec<f64> = factor_returns
            .iter()
            .filter_map(|f| f.get(date).copied())
            .collect();
        if row.len() == factor_returns.len() {
            y.push(*ret);
            x.push(row);
        }
    }

    if y.len() > max_observations {
        let cut = y.len() - max_observations;
        y.drain(..cut);
        x.drain(..cut);
    }

    (y, x)
}

// ============================================================================
// Dataset assembly
// ============================================================================

struct RegressionDataset {
    position_id: Uuid,
    symbol: String,
    weight_value: f64,
    y: Vec<f64>,
    x: Vec<Vec<f64>>,
}

/// Build the aligned per-position datasets for a portfolio and date.
///
/// Returns None when the portfolio has no eligible public positions at all —
/// a distinct, expected outcome, not an error.
async fn build_datasets(
    pool: &PgPool,
    config: &PipelineConfig,
    portfolio_id: Uuid,
    calc_date: NaiveDate,
) -> Result<Option<Vec<RegressionDataset>>, AppError> {
    let positions = position_queries::fetch_open_for_date(pool, portfolio_id, calc_date).await?;

    let eligible: Vec<_> = positions
        .iter()
        .filter(|p| p.class() == InvestmentClass::Public)
        .collect();

    if eligible.is_empty() {
        return Ok(None);
    }

    // Cushion absorbs thin trading and holiday gaps in the calendar window
    let fetch_start = calc_date
        - Duration::days(config.regression_window_days + config.regression_cushion_days);

    let mut symbols: Vec<String> = Vec::new();
    for p in &eligible {
        if !symbols.contains(&p.symbol) {
            symbols.push(p.symbol.clone());
        }
    }
    for factor in FactorType::all() {
        let etf = factor.benchmark_etf().to_string();
        if !symbols.contains(&etf) {
            symbols.push(etf);
        }
    }

    let series = market_data_queries::fetch_close_series(pool, &symbols, fetch_start, calc_date)
        .await?;

    // Factor returns as date-keyed maps for alignment
    let mut factor_returns: Vec<HashMap<NaiveDate, f64>> = Vec::new();
    for factor in FactorType::all() {
        let etf = factor.benchmark_etf();
        let returns: HashMap<NaiveDate, f64> = series
            .get(etf)
            .map(|s| daily_returns(s).into_iter().collect())
            .unwrap_or_default();
        if returns.is_empty() {
            warn!("No return history for factor ETF {}; factor fits will be thin", etf);
        }
        factor_returns.push(returns);
    }

    let mut datasets = Vec::new();

    for position in eligible {
        let Some(closes) = series.get(&position.symbol) else {
            info!(
                "Skipping {} - no price history for factor regression",
                position.symbol
            );
            continue;
        };

        let returns = daily_returns(closes);
        if returns.len() < 2 {
            info!(
                "Skipping {} - insufficient return history ({} points)",
                position.symbol,
                returns.len()
            );
            continue;
        }

        let (y, x) = align_observations(
            &returns,
            &factor_returns,
            config.regression_window_days as usize,
        );

        if y.len() < 2 {
            continue;
        }

        let last_close = closes.last().map(|(_, c)| *c).unwrap_or(0.0);
        let weight_value = last_close * position.quantity;

        datasets.push(RegressionDataset {
            position_id: position.id,
            symbol: position.symbol.clone(),
            weight_value,
            y,
            x,
        });
    }

    Ok(Some(datasets))
}

// ============================================================================
// Engine entry points
// ============================================================================

/// Fit per-position style-factor betas and the position-value-weighted
/// portfolio aggregate, persisting every row (same date overwrites).
///
/// A portfolio with zero eligible public positions yields a typed Skipped
/// outcome — callers must be able to tell "nothing to compute" from a broken
/// regression.
pub async fn compute_factor_exposures(
    pool: &PgPool,
    config: &PipelineConfig,
    portfolio: &Portfolio,
    calc_date: NaiveDate,
) -> Result<Outcome<FactorExposureReport>, AppError> {
    let Some(datasets) = build_datasets(pool, config, portfolio.id, calc_date).await? else {
        info!(
            "Portfolio {} has no public positions; factor analysis skipped",
            portfolio.id
        );
        return Ok(Outcome::Skipped(SkipReason::NoPublicPositions));
    };

    if datasets.is_empty() {
        // Public positions exist but none has usable history
        info!(
            "Portfolio {} has no positions with usable history; factor analysis skipped",
            portfolio.id
        );
        return Ok(Outcome::Skipped(SkipReason::NoPriceHistory));
    }

    let factors = FactorType::all();
    let mut fits = Vec::new();

    for ds in &datasets {
        let Some(fit) = fit_ridge(&ds.y, &ds.x, config.ridge_lambda, config.beta_cap) else {
            warn!("Ridge fit failed for {}; skipping position", ds.symbol);
            continue;
        };

        for (idx, was_clipped) in fit.clipped.iter().enumerate() {
            if *was_clipped {
                info!(
                    "β clipped to ±{} for {} on factor {}",
                    config.beta_cap,
                    ds.symbol,
                    factors[idx].label()
                );
            }
        }

        let quality = if ds.y.len() < config.min_observations {
            info!(
                "Limited-quality fit for {}: {} observations (< {})",
                ds.symbol,
                ds.y.len(),
                config.min_observations
            );
            FitQuality::Limited
        } else {
            FitQuality::Full
        };

        fits.push(PositionFactorFit {
            position_id: ds.position_id,
            symbol: ds.symbol.clone(),
            weight_value: ds.weight_value,
            betas: fit.betas,
            r_squared: fit.r_squared,
            observations: ds.y.len(),
            quality,
            clipped: fit.clipped,
        });
    }

    if fits.is_empty() {
        return Ok(Outcome::Skipped(SkipReason::NoPriceHistory));
    }

    let (portfolio_betas, portfolio_r_squared) = aggregate_portfolio_betas(&fits, factors.len());

    // Persist position rows, then the portfolio rows
    for fit in &fits {
        for (idx, factor) in factors.iter().enumerate() {
            factor_queries::upsert_exposure(
                pool,
                &CreateFactorExposure {
                    portfolio_id: portfolio.id,
                    position_id: Some(fit.position_id),
                    factor: *factor,
                    calculation_date: calc_date,
                    beta: fit.betas[idx],
                    r_squared: fit.r_squared,
                    method: RegressionMethod::Ridge,
                    lambda: Some(config.ridge_lambda),
                    observations: fit.observations as i32,
                    clipped: fit.clipped[idx],
                },
            )
            .await?;
        }
    }

    for (idx, factor) in factors.iter().enumerate() {
        factor_queries::upsert_exposure(
            pool,
            &CreateFactorExposure {
                portfolio_id: portfolio.id,
                position_id: None,
                factor: *factor,
                calculation_date: calc_date,
                beta: portfolio_betas[idx],
                r_squared: portfolio_r_squared,
                method: RegressionMethod::Ridge,
                lambda: Some(config.ridge_lambda),
                observations: fits.iter().map(|f| f.observations).max().unwrap_or(0) as i32,
                clipped: false,
            },
        )
        .await?;
    }

    info!(
        "📐 Factor exposures for portfolio {} on {}: {} positions fit, portfolio R² {:.3}",
        portfolio.id,
        calc_date,
        fits.len(),
        portfolio_r_squared
    );

    Ok(Outcome::Completed(FactorExposureReport {
        portfolio_id: portfolio.id,
        calculation_date: calc_date,
        method: RegressionMethod::Ridge,
        lambda: config.ridge_lambda,
        position_fits: fits,
        portfolio_betas,
        portfolio_r_squared,
    }))
}

/// Position-value-weighted aggregate of position betas (and R², for the
/// report); signed values so shorts offset longs.
pub fn aggregate_portfolio_betas(fits: &[PositionFactorFit], k: usize) -> (Vec<f64>, f64) {
    let total: f64 = fits.iter().map(|f| f.weight_value).sum();
    if total.abs() < f64::EPSILON {
        return (vec![0.0; k], 0.0);
    }

    let mut betas = vec![0.0; k];
    let mut r_squared = 0.0;
    for fit in fits {
        let weight = fit.weight_value / total;
        for (idx, beta) in fit.betas.iter().enumerate() {
            betas[idx] += weight * beta;
        }
        r_squared += weight * fit.r_squared;
    }

    (betas, r_squared.clamp(0.0, 1.0))
}

/// Sweep candidate regularization strengths and report the average R² per
/// candidate, to help operators pick a default lambda.
pub async fn tune_lambda(
    pool: &PgPool,
    config: &PipelineConfig,
    portfolio: &Portfolio,
    calc_date: NaiveDate,
    candidates: &[f64],
) -> Result<Outcome<Vec<LambdaCandidate>>, AppError> {
    let Some(datasets) = build_datasets(pool, config, portfolio.id, calc_date).await? else {
        return Ok(Outcome::Skipped(SkipReason::NoPublicPositions));
    };

    if datasets.is_empty() {
        return Ok(Outcome::Skipped(SkipReason::NoPriceHistory));
    }

    let mut results = Vec::with_capacity(candidates.len());

    for &lambda in candidates {
        let mut total_r2 = 0.0;
        let mut fit_count = 0usize;

        for ds in &datasets {
            if let Some(fit) = fit_ridge(&ds.y, &ds.x, lambda, config.beta_cap) {
                total_r2 += fit.r_squared;
                fit_count += 1;
            }
        }

        let mean = if fit_count > 0 {
            total_r2 / fit_count as f64
        } else {
            0.0
        };

        info!("λ = {:>8.4}: mean R² {:.4} over {} fits", lambda, mean, fit_count);

        results.push(LambdaCandidate {
            lambda,
            mean_r_squared: mean,
            positions_fit: fit_count,
        });
    }

    Ok(Outcome::Completed(results))
}
