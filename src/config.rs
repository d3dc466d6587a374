use std::str::FromStr;

/// Tunables for the daily batch pipeline, read once at startup.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Trailing window of daily bars the collector guarantees, in calendar days.
    pub lookback_days: i64,
    /// Fraction of the symbol universe that must have data for a date to
    /// count as covered.
    pub coverage_threshold: f64,
    /// How far back (calendar days) the P&L engine searches for a previous close.
    pub price_lookback_days: i64,
    /// Company profiles older than this are re-fetched.
    pub profile_staleness_days: i64,
    /// Trading days in the factor regression window.
    pub regression_window_days: i64,
    /// Extra calendar days added to the window to absorb thin trading.
    pub regression_cushion_days: i64,
    /// Aligned observations below this mark a fit as limited quality.
    pub min_observations: usize,
    /// Default L2 regularization strength for factor fits.
    pub ridge_lambda: f64,
    /// Symmetric cap applied to fitted factor betas.
    pub beta_cap: f64,
    /// Retry attempts per unit of work for transient failures.
    pub max_retry_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    /// Pause between portfolios so short-lived resources wind down.
    pub inter_portfolio_delay_ms: u64,
    /// Annual risk-free rate used by the market-risk scenario phase.
    pub risk_free_rate: f64,
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        Self {
            lookback_days: env_or("PIPELINE_LOOKBACK_DAYS", 365),
            coverage_threshold: env_or("PIPELINE_COVERAGE_THRESHOLD", 0.80),
            price_lookback_days: env_or("PIPELINE_PRICE_LOOKBACK_DAYS", 10),
            profile_staleness_days: env_or("PIPELINE_PROFILE_STALENESS_DAYS", 30),
            regression_window_days: env_or("PIPELINE_REGRESSION_WINDOW_DAYS", 252),
            regression_cushion_days: env_or("PIPELINE_REGRESSION_CUSHION_DAYS", 30),
            min_observations: env_or("PIPELINE_MIN_OBSERVATIONS", 60),
            ridge_lambda: env_or("PIPELINE_RIDGE_LAMBDA", 1.0),
            beta_cap: env_or("PIPELINE_BETA_CAP", 4.0),
            max_retry_attempts: env_or("PIPELINE_MAX_RETRY_ATTEMPTS", 3),
            retry_base_delay_ms: env_or("PIPELINE_RETRY_BASE_DELAY_MS", 500),
            retry_max_delay_ms: env_or("PIPELINE_RETRY_MAX_DELAY_MS", 30_000),
            inter_portfolio_delay_ms: env_or("PIPELINE_INTER_PORTFOLIO_DELAY_MS", 250),
            risk_free_rate: env_or("RISK_FREE_RATE", 0.045),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        // Defaults match from_env with no environment set; tests rely on this.
        Self {
            lookback_days: 365,
            coverage_threshold: 0.80,
            price_lookback_days: 10,
            profile_staleness_days: 30,
            regression_window_days: 252,
            regression_cushion_days: 30,
            min_observations: 60,
            ridge_lambda: 1.0,
            beta_cap: 4.0,
            max_retry_attempts: 3,
            retry_base_delay_ms: 500,
            retry_max_delay_ms: 30_000,
            inter_portfolio_delay_ms: 250,
            risk_free_rate: 0.045,
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.lookback_days, 365);
        assert!((cfg.coverage_threshold - 0.80).abs() < f64::EPSILON);
        assert_eq!(cfg.beta_cap, 4.0);
        assert!(cfg.retry_base_delay_ms < cfg.retry_max_delay_ms);
    }
}
