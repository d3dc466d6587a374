use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// One daily OHLCV bar. (symbol, date) is unique; refetches overwrite.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MarketDataPoint {
    pub id: Uuid,
    pub symbol: String,
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
    /// Which provider supplied the bar (e.g. "twelvedata").
    pub source: String,
    pub created_at: DateTime<Utc>,
}

/// Reference metadata for a symbol, refreshed on a staleness window.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CompanyProfile {
    pub symbol: String,
    pub company_name: Option<String>,
    pub sector: Option<String>,
    pub industry: Option<String>,
    pub description: Option<String>,
    pub fetched_at: DateTime<Utc>,
}
