use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use tracing::warn;

use crate::external::market_provider::{
    MarketDataProvider, ProviderBar, ProviderError, ProviderProfile,
};
use crate::services::rate_limiter::RateLimiter;

pub struct AlphaVantageProvider {
    client: reqwest::Client,
    api_key: String,
    rate_limiter: Arc<RateLimiter>,
}

impl AlphaVantageProvider {
    pub fn from_env(rate_limiter: Arc<RateLimiter>) -> Result<Self, ProviderError> {
        let api_key = std::env::var("ALPHAVANTAGE_API_KEY")
            .map_err(|_| ProviderError::BadResponse("ALPHAVANTAGE_API_KEY not set".into()))?;

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
        // compact covers ~100 points; anything longer needs full
        let outputsize = if (end - start).num_days() <= 100 {
            "compact"
        } else {
            "full"
        };

        let url = "https://www.alphavantage.co/query";

        let resp = self
            .client
            .get(url)
            .query(&[
                ("function", "TIME_SERIES_DAILY"),
                ("symbol", symbol),
                ("outputsize", outputsize),
                ("apikey", self.api_key.as_str()),
            ])
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let body = resp
            .json::<AvDailyResponse>()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        if body.note.is_some() {
            // This is the throttle response
            return Err(ProviderError::RateLimited);
        }

        if let Some(msg) = body.error_message {
            return Err(ProviderError::BadResponse(msg));
        }

        let series = body
            .time_series
            .ok_or_else(|| ProviderError::BadResponse("missing time series".into()))?;

        // series is keyed by "YYYY-MM-DD"; BTreeMap iterates ascending
        let mut out: Vec<ProviderBar> = Vec::new();

        for (date_str, bar) in series {
            let date = NaiveDate::parse_from_str(&date_str, "%Y-%m-%d")
                .map_err(|e| ProviderError::Parse(e.to_string()))?;

            if date < start || date > end {
                continue;
            }

            out.push(ProviderBar {
                date,
                open: parse_field(&bar.open)?,
                high: parse_field(&bar.high)?,
                low: parse_field(&bar.low)?,
                close: parse_field(&bar.close)?,
                volume: bar.volume.parse::<i64>().unwrap_or(0),
            });
        }

        Ok(out)
    }
}

fn parse_field(s: &str) -> Result<f64, ProviderError> {
    s.parse::<f64>()
        .map_err(|e| ProviderError::Parse(e.to_string()))
}

#[derive(Debug, Deserialize)]
struct AvDailyResponse {
    #[serde(rename = "Time Series (Daily)")]
    time_series: Option<BTreeMap<String, AvDailyBar>>,

    // Rate-limit payload: { "Note": "Thank you for using Alpha Vantage! ..." }
    #[serde(rename = "Note")]
    note: Option<String>,

    #[serde(rename = "Error Message")]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AvDailyBar {
    #[serde(rename = "1. open")]
    open: String,
    #[serde(rename = "2. high")]
    high: String,
    #[serde(rename = "3. low")]
    low: String,
    #[serde(rename = "4. close")]
    close: String,
    #[serde(rename = "5. volume")]
    volume: String,
}

#[derive(Debug, Deserialize)]
struct AvOverviewResponse {
    #[serde(rename = "Name")]
    name: Option<String>,
    #[serde(rename = "Sector")]
    sector: Option<String>,
    #[serde(rename = "Industry")]
    industry: Option<String>,
    #[serde(rename = "Description")]
    description: Option<String>,
    #[serde(rename = "Note")]
    note: Option<String>,
}

#[async_trait]
impl MarketDataProvider for AlphaVantageProvider {
    fn name(&self) -> &'static str {
        "alphavantage"
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
                    warn!("Alpha Vantage returned no bars for {}", symbol);
                }
                Err(ProviderError::RateLimited) => {
                    warn!("Alpha Vantage throttled at {}; leaving remaining symbols to fallback", symbol);
                    break;
                }
                Err(e) => {
                    warn!("Alpha Vantage failed for {}: {}", symbol, e);
                }
            }
        }

        Ok(out)
    }

    async fn get_company_profiles(
        &self,
        symbols: &[String],
    ) -> Result<HashMap<String, ProviderProfile>, ProviderError> {
        let url = "https://www.alphavantage.co/query";
        let mut out = HashMap::new();

        for symbol in symbols {
            let _guard = self.rate_limiter.acquire().await;

            let resp = self
                .client
                .get(url)
                .query(&[
                    ("function", "OVERVIEW"),
                    ("symbol", symbol.as_str()),
                    ("apikey", self.api_key.as_str()),
                ])
                .send()
                .await
                .map_err(|e| ProviderError::Network(e.to_string()))?;

            let body: AvOverviewResponse = match resp.json().await {
                Ok(b) => b,
                Err(e) => {
                    warn!("Alpha Vantage profile parse failed for {}: {}", symbol, e);
                    continue;
                }
            };

            if body.note.is_some() {
                return Err(ProviderError::RateLimited);
            }

            // An unknown symbol comes back as an empty object
            if body.name.is_none() && body.sector.is_none() {
                continue;
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
