use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use tracing::warn;

use crate::external::market_provider::{
    MarketDataProvider, ProviderBar, ProviderError, ProviderProfile,
};
use crate::services::rate_limiter::RateLimiter;

pub struct TwelveDataProvider {
    client: reqwest::Client,
    api_key: String,
    rate_limiter: Arc<RateLimiter>,
}

impl TwelveDataProvider {
    pub fn from_env(rate_limiter: Arc<RateLimiter>) -> Result<Self, ProviderError> {
        let api_key = std::env::var("TWELVEDATA_API_KEY")
            .map_err(|_| ProviderError::BadResponse("TWELVEDATA_API_KEY not set".into()))?;

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            rate_limiter,
        })
    }

    async fn fetch_symbol_bars(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<ProviderBar>, ProviderError> {
        let url = "https://api.twelvedata.com/time_series";

        let resp = self
            .client
            .get(url)
            .query(&[
                ("symbol", symbol),
                ("interval", "1day"),
                ("start_date", &start.format("%Y-%m-%d").to_string()),
                ("end_date", &end.format("%Y-%m-%d").to_string()),
                ("apikey", self.api_key.as_str()),
            ])
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let body: TwelveDataTimeSeriesResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        if body.status != "ok" {
            if let Some(msg) = body.message {
                if msg.contains("API rate limit") || msg.contains("credits") {
                    return Err(ProviderError::RateLimited);
                }
                return Err(ProviderError::BadResponse(msg));
            }
            return Err(ProviderError::BadResponse(format!(
                "API returned status: {}",
                body.status
            )));
        }

        let values = body
            .values
            .ok_or_else(|| ProviderError::BadResponse("missing values in response".into()))?;

        let mut bars: Vec<ProviderBar> = values
            .into_iter()
            .map(|v| -> Result<ProviderBar, ProviderError> {
                // Twelve Data returns "YYYY-MM-DD HH:MM:SS" or "YYYY-MM-DD"
                let date_part = v
                    .datetime
                    .split(' ')
                    .next()
                    .ok_or_else(|| ProviderError::Parse("invalid datetime format".into()))?;
                let date = NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
                    .map_err(|e| ProviderError::Parse(e.to_string()))?;

                Ok(ProviderBar {
                    date,
                    open: parse_field(&v.open)?,
                    high: parse_field(&v.high)?,
                    low: parse_field(&v.low)?,
                    close: parse_field(&v.close)?,
                    volume: v
                        .volume
                        .as_deref()
                        .and_then(|s| s.parse::<i64>().ok())
                        .unwrap_or(0),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        // Twelve Data returns newest first, we need oldest first
        bars.reverse();

        Ok(bars)
    }
}

fn parse_field(s: &str) -> Result<f64, ProviderError> {
    s.parse::<f64>()
        .map_err(|e| ProviderError::Parse(e.to_string()))
}

#[derive(Debug, Deserialize)]
struct TwelveDataTimeSeriesResponse {
    values: Option<Vec<TwelveDataValue>>,
    status: String,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TwelveDataValue {
    datetime: String,
    open: String,
    high: String,
    low: String,
    close: String,
    volume: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TwelveDataProfileResponse {
    name: Option<String>,
    sector: Option<String>,
    industry: Option<String>,
    description: Option<String>,
    status: Option<String>,
    message: Option<String>,
}

#[async_trait]
impl MarketDataProvider for TwelveDataProvider {
    fn name(&self) -> &'static str {
        "twelvedata"
    }

    async fn get_historical_prices(
        &self,
        symbols: &[String],
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<HashMap<String, Vec<ProviderBar>>, ProviderError> {
        let mut out = HashMap::new();

        for symbol in symbols {
            let _guard = self.rate_limiter.acquire().await;

            match self.fetch_symbol_bars(symbol, start, end).await {
                Ok(bars) if !bars.is_empty() => {
                    out.insert(symbol.clone(), bars);
                }
                Ok(_) => {
                    warn!("Twelve Data returned no bars for {}", symbol);
                }
                Err(ProviderError::RateLimited) => {
                    // Out of credits: stop burning the quota; unfetched
                    // symbols fall through to the next provider.
                    warn!("Twelve Data rate limited at {}; leaving remaining symbols to fallback", symbol);
                    break;
                }
                Err(e) => {
                    warn!("Twelve Data failed for {}: {}", symbol, e);
                }
            }
        }

        Ok(out)
    }

    async fn get_company_profiles(
        &self,
        symbols: &[String],
    ) -> Result<HashMap<String, ProviderProfile>, ProviderError> {
        let url = "https://api.twelvedata.com/profile";
        let mut out = HashMap::new();

        for symbol in symbols {
            let _guard = self.rate_limiter.acquire().await;

            let resp = self
                .client
                .get(url)
                .query(&[("symbol", symbol.as_str()), ("apikey", self.api_key.as_str())])
                .send()
                .await
                .map_err(|e| ProviderError::Network(e.to_string()))?;

            let body: TwelveDataProfileResponse = match resp.json().await {
                Ok(b) => b,
                Err(e) => {
                    warn!("Twelve Data profile parse failed for {}: {}", symbol, e);
                    continue;
                }
            };

            if let Some(status) = &body.status {
                if status != "ok" {
                    warn!(
                        "Twelve Data profile error for {}: {}",
                        symbol,
                        body.message.as_deref().unwrap_or(status)
                    );
                    continue;
                }
            }

            out.insert(
                symbol.clone(),
                ProviderProfile {
                    company_name: body.name,
                    sector: body.sector,
                    industry: body.industry,
                    description: body.description,
                },
            );
        }

        Ok(out)
    }
}
