use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// A realized P&L event: a close or trim of a position, booked on trade_date.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RealizedTrade {
    pub id: Uuid,
    pub portfolio_id: Uuid,
    pub position_id: Uuid,
    pub symbol: String,
    pub quantity: f64,
    pub realized_pnl: BigDecimal,
    pub trade_date: NaiveDate,
}
