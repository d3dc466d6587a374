use std::collections::HashMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One daily bar as returned by an external provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderBar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
}

/// Reference company metadata as returned by an external provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderProfile {
    pub company_name: Option<String>,
    pub sector: Option<String>,
    pub industry: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("network error: {0}")]
    Network(String),

    #[error("bad response: {0}")]
    BadResponse(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("rate limited")]
    RateLimited,
}

/// An external market-data source.
///
/// Both methods return per-symbol maps; a symbol missing from the map and a
/// raised error mean the same thing to callers ("this provider didn't supply
/// this symbol") — the fallback chain tries the next provider either way.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn get_historical_prices(
        &self,
        symbols: &[String],
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<HashMap<String, Vec<ProviderBar>>, ProviderError>;

    async fn get_company_profiles(
        &self,
        symbols: &[String],
    ) -> Result<HashMap<String, ProviderProfile>, ProviderError>;
}
