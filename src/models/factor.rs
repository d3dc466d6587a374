use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ============================================================================
// Factor taxonomy
// ============================================================================

/// The six non-market style factors the exposure engine regresses against.
///
/// Market beta is deliberately absent: it is fit by a separate single-factor
/// regression against the market benchmark and combined downstream.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FactorType {
    Value,
    Growth,
    Momentum,
    Quality,
    Size,
    LowVolatility,
}

impl FactorType {
    pub fn label(&self) -> &'static str {
        match self {
            FactorType::Value => "Value",
            FactorType::Growth => "Growth",
            FactorType::Momentum => "Momentum",
            FactorType::Quality => "Quality",
            FactorType::Size => "Size",
            FactorType::LowVolatility => "Low Volatility",
        }
    }

    /// Stable key used in persistence and logs.
    pub fn key(&self) -> &'static str {
        match self {
            FactorType::Value => "value",
            FactorType::Growth => "growth",
            FactorType::Momentum => "momentum",
            FactorType::Quality => "quality",
            FactorType::Size => "size",
            FactorType::LowVolatility => "low_volatility",
        }
    }

    /// Benchmark ETF whose return series proxies this factor.
    pub fn benchmark_etf(&self) -> &'static str {
        match self {
            FactorType::Value => "VTV",
            FactorType::Growth => "VUG",
            FactorType::Momentum => "MTUM",
            FactorType::Quality => "QUAL",
            FactorType::Size => "IWM",
            FactorType::LowVolatility => "USMV",
        }
    }

    pub fn all() -> Vec<FactorType> {
        vec![
            FactorType::Value,
            FactorType::Growth,
            FactorType::Momentum,
            FactorType::Quality,
            FactorType::Size,
            FactorType::LowVolatility,
        ]
    }
}

impl std::fmt::Display for FactorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegressionMethod {
    Ols,
    Ridge,
}

impl RegressionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegressionMethod::Ols => "ols",
            RegressionMethod::Ridge => "ridge",
        }
    }
}

// ============================================================================
// Persisted exposures
// ============================================================================

/// One beta row: portfolio- or position-scoped (position_id None = portfolio).
/// Re-running a date overwrites the same (scope, factor, date) row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct FactorExposure {
    pub id: Uuid,
    pub portfolio_id: Uuid,
    pub position_id: Option<Uuid>,
    pub factor: String,
    pub calculation_date: NaiveDate,
    pub beta: f64,
    pub r_squared: f64,
    pub method: String,
    pub lambda: Option<f64>,
    pub observations: i32,
    pub clipped: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateFactorExposure {
    pub portfolio_id: Uuid,
    pub position_id: Option<Uuid>,
    pub factor: FactorType,
    pub calculation_date: NaiveDate,
    pub beta: f64,
    pub r_squared: f64,
    pub method: RegressionMethod,
    pub lambda: Option<f64>,
    pub observations: i32,
    pub clipped: bool,
}

// ============================================================================
// In-memory fit results
// ============================================================================

/// Quality of a single fit. Limited means fewer aligned observations than
/// the configured minimum, computed anyway with available data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitQuality {
    Full,
    Limited,
}

/// Per-position regression output before persistence.
#[derive(Debug, Clone)]
pub struct PositionFactorFit {
    pub position_id: Uuid,
    pub symbol: String,
    /// Position market value used for portfolio-level weighting.
    pub weight_value: f64,
    /// Betas in FactorType::all() order, rescaled to raw-return units.
    pub betas: Vec<f64>,
    pub r_squared: f64,
    pub observations: usize,
    pub quality: FitQuality,
    /// Which betas hit the symmetric cap, same order as betas.
    pub clipped: Vec<bool>,
}

/// Full engine output for one portfolio and date.
#[derive(Debug, Clone)]
pub struct FactorExposureReport {
    pub portfolio_id: Uuid,
    pub calculation_date: NaiveDate,
    pub method: RegressionMethod,
    pub lambda: f64,
    pub position_fits: Vec<PositionFactorFit>,
    /// Position-value-weighted betas in FactorType::all() order.
    pub portfolio_betas: Vec<f64>,
    pub portfolio_r_squared: f64,
}

/// One row of the lambda tuning sweep.
#[derive(Debug, Clone, Serialize)]
pub struct LambdaCandidate {
    pub lambda: f64,
    pub mean_r_squared: f64,
    pub positions_fit: usize,
}
