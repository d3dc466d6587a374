use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// End-of-day state of one portfolio: one row per (portfolio, calculation
/// date), created exclusively by the P&L phase and immutable once downstream
/// phases have read it.
///
/// Rollforward invariant: equity_balance here equals the prior snapshot's
/// equity_balance plus this row's unrealized + realized + capital_flow, where
/// "prior" is the latest snapshot strictly before calculation_date (gaps in
/// the calendar do not reset equity to the portfolio's starting balance).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PortfolioSnapshot {
    pub id: Uuid,
    pub portfolio_id: Uuid,
    pub calculation_date: NaiveDate,
    pub equity_balance: BigDecimal,
    pub unrealized_pnl: BigDecimal,
    pub realized_pnl: BigDecimal,
    pub capital_flow: BigDecimal,
    pub cumulative_pnl: BigDecimal,
    pub cumulative_realized_pnl: BigDecimal,
    pub cumulative_capital_flow: BigDecimal,
    /// Day P&L over prior equity; None on the first snapshot of a portfolio
    /// with zero prior equity.
    pub daily_return: Option<f64>,
    pub gross_exposure: f64,
    pub net_exposure: f64,
    pub long_exposure: f64,
    pub short_exposure: f64,
    pub created_at: DateTime<Utc>,
}

/// Insert shape for a snapshot row.
#[derive(Debug, Clone)]
pub struct CreatePortfolioSnapshot {
    pub portfolio_id: Uuid,
    pub calculation_date: NaiveDate,
    pub equity_balance: BigDecimal,
    pub unrealized_pnl: BigDecimal,
    pub realized_pnl: BigDecimal,
    pub capital_flow: BigDecimal,
    pub cumulative_pnl: BigDecimal,
    pub cumulative_realized_pnl: BigDecimal,
    pub cumulative_capital_flow: BigDecimal,
    pub daily_return: Option<f64>,
    pub gross_exposure: f64,
    pub net_exposure: f64,
    pub long_exposure: f64,
    pub short_exposure: f64,
}
