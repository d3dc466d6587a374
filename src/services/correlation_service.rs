use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::db::{market_data_queries, position_queries};
use crate::errors::AppError;
use crate::models::{InvestmentClass, Outcome, SkipReason};
use crate::services::factor_service::daily_returns;

// ============================================================================
// Collaborator contract
// ============================================================================

#[derive(Debug, Clone)]
pub struct CorrelationResult {
    pub portfolio_id: Uuid,
    pub calculation_date: NaiveDate,
    pub symbols: Vec<String>,
    /// Row-major pairwise correlation matrix aligned with `symbols`.
    pub matrix: Vec<Vec<f64>>,
    pub average_correlation: f64,
}

/// External correlation engine. A portfolio with no eligible positions (or
/// too little shared history) yields the typed skip sentinel, never an
/// exception — the orchestrator records it and moves on.
#[async_trait]
pub trait CorrelationEngine: Send + Sync {
    async fn compute(
        &self,
        pool: &PgPool,
        portfolio_id: Uuid,
        calc_date: NaiveDate,
    ) -> Result<Outcome<CorrelationResult>, AppError>;
}

// ============================================================================
// Reference implementation
// ============================================================================

/// In-process reference engine: pairwise Pearson correlations over the
/// regression window. Stands in for the platform's dedicated service when
/// the pipeline runs standalone.
pub struct DefaultCorrelationEngine {
    window_days: i64,
}

impl DefaultCorrelationEngine {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            window_days: config.regression_window_days + config.regression_cushion_days,
        }
    }
}

#[async_trait]
impl CorrelationEngine for DefaultCorrelationEngine {
    async fn compute(
        &self,
        pool: &PgPool,
        portfolio_id: Uuid,
        calc_date: NaiveDate,
    ) -> Result<Outcome<CorrelationResult>, AppError> {
        let positions =
            position_queries::fetch_open_for_date(pool, portfolio_id, calc_date).await?;

        let mut symbols: Vec<String> = Vec::new();
        for p in positions.iter().filter(|p| p.class() == InvestmentClass::Public) {
            if !symbols.contains(&p.symbol) {
                symbols.push(p.symbol.clone());
            }
        }

        if symbols.len() < 2 {
            return Ok(Outcome::Skipped(SkipReason::NoPublicPositions));
        }

        let start = calc_date - Duration::days(self.window_days);
        let series =
            market_data_queries::fetch_close_series(pool, &symbols, start, calc_date).await?;

        let returns: HashMap<String, HashMap<NaiveDate, f64>> = symbols
            .iter()
            .filter_map(|s| {
                series
                    .get(s)
                    .map(|closes| (s.clone(), daily_returns(closes).into_iter().collect()))
            })
            .collect();

        let usable: Vec<String> = symbols
            .iter()
            .filter(|s| returns.get(*s).map(|r| r.len() >= 2).unwrap_or(false))
            .cloned()
            .collect();

        if usable.len() < 2 {
            return Ok(Outcome::Skipped(SkipReason::NoPriceHistory));
        }

        let n = usable.len();
        let mut matrix = vec![vec![0.0; n]; n];
        let mut sum = 0.0;
        let mut pairs = 0usize;

        for i in 0..n {
            matrix[i][i] = 1.0;
            for j in (i + 1)..n {
                let corr = pearson(&returns[&usable[i]], &returns[&usable[j]]).unwrap_or(0.0);
                matrix[i][j] = corr;
                matrix[j][i] = corr;
                sum += corr;
                pairs += 1;
            }
        }

        let average = if pairs > 0 { sum / pairs as f64 } else { 0.0 };

        info!(
            "🔗 Correlations for portfolio {} on {}: {} symbols, avg {:.3}",
            portfolio_id, calc_date, n, average
        );

        Ok(Outcome::Completed(CorrelationResult {
            portfolio_id,
            calculation_date: calc_date,
            symbols: usable,
            matrix,
            average_correlation: average,
        }))
    }
}

/// Pearson correlation over the dates both series share.
fn pearson(a: &HashMap<NaiveDate, f64>, b: &HashMap<NaiveDate, f64>) -> Option<f64> {
    let common: Vec<(f64, f64)> = a
        .iter()
        .filter_map(|(date, ra)| b.get(date).map(|rb| (*ra, *rb)))
        .collect();

    let n = common.len() as f64;
    if common.len() < 2 {
        return None;
    }

    let mean_a = common.iter().map(|(x, _)| x).sum::<f64>() / n;
    let mean_b = common.iter().map(|(_, y)| y).sum::<f64>() / n;

    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (x, y) in &common {
        cov += (x - mean_a) * (y - mean_b);
        var_a += (x - mean_a).powi(2);
        var_b += (y - mean_b).powi(2);
    }

    if var_a < f64::EPSILON || var_b < f64::EPSILON {
        return None;
    }

    Some((cov / (var_a.sqrt() * var_b.sqrt())).clamp(-1.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(values: &[f64]) -> HashMap<NaiveDate, f64> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| {
                (
                    NaiveDate::from_ymd_opt(2025, 1, 1).unwrap() + Duration::days(i as i64),
                    *v,
                )
            })
            .collect()
    }

    #[test]
    fn test_perfectly_correlated_series() {
        let a = series(&[0.01, -0.02, 0.03, 0.01, -0.01]);
        let b = series(&[0.02, -0.04, 0.06, 0.02, -0.02]);
        let corr = pearson(&a, &b).unwrap();
        assert!((corr - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_inversely_correlated_series() {
        let a = series(&[0.01, -0.02, 0.03, 0.01, -0.01]);
        let b = series(&[-0.01, 0.02, -0.03, -0.01, 0.01]);
        let corr = pearson(&a, &b).unwrap();
        assert!((corr + 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_flat_series_has_no_correlation() {
        let a = series(&[0.01, -0.02, 0.03]);
        let b = series(&[0.0, 0.0, 0.0]);
        assert!(pearson(&a, &b).is_none());
    }
}
