use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate};
use serde::Deserialize;
use tracing::warn;

use crate::external::market_provider::{
    MarketDataProvider, ProviderBar, ProviderError, ProviderProfile,
};

/// Last-resort provider: free, no API key, no quota worth metering.
pub struct YahooProvider {
    client: reqwest::Client,
}

impl YahooProvider {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    async fn fetch_symbol_bars(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<ProviderBar>, ProviderError> {
        let period1 = start
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc().timestamp())
            .unwrap_or(0);
        // End is inclusive; push to the end of day
        let period2 = end
            .and_hms_opt(23, 59, 59)
            .map(|dt| dt.and_utc().timestamp())
            .unwrap_or(0);

        let url = format!(
            "https://query1.finance.yahoo.com/v8/finance/chart/{symbol}?period1={period1}&period2={period2}&interval=1d"
        );

        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::RateLimited);
        }

        let body = resp
            .json::<YahooChartResponse>()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        let result = body
            .chart
            .result
            .and_then(|mut r| r.pop())
            .ok_or_else(|| ProviderError::BadResponse("missing result".into()))?;

        let quote = result
            .indicators
            .quote
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::BadResponse("missing quote".into()))?;

        let mut out = Vec::new();

        // timestamp aligns with the quote arrays by index
        for (i, ts) in result.timestamp.iter().enumerate() {
            let close = quote.close.get(i).and_then(|v| *v);
            let Some(close) = close else { continue };

            let dt = DateTime::from_timestamp(*ts, 0)
                .ok_or_else(|| ProviderError::Parse("bad timestamp".into()))?;
            let date = dt.date_naive();

            out.push(ProviderBar {
                date,
                open: quote.open.get(i).and_then(|v| *v).unwrap_or(close),
                high: quote.high.get(i).and_then(|v| *v).unwrap_or(close),
                low: quote.low.get(i).and_then(|v| *v).unwrap_or(close),
                close,
                volume: quote.volume.get(i).and_then(|v| *v).unwrap_or(0),
            });
        }

        out.sort_by_key(|p| p.date);

        Ok(out)
    }
}

// Minimal response structs (only what we need)
#[derive(Debug, Deserialize)]
struct YahooChartResponse {
    chart: YahooChart,
}

#[derive(Debug, Deserialize)]
struct YahooChart {
    result: Option<Vec<YahooResult>>,
}

#[derive(Debug, Deserialize)]
struct YahooResult {
    timestamp: Vec<i64>,
    indicators: YahooIndicators,
}

#[derive(Debug, Deserialize)]
struct YahooIndicators {
    quote: Vec<YahooQuote>,
}

#[derive(Debug, Deserialize)]
struct YahooQuote {
    open: Vec<Option<f64>>,
    high: Vec<Option<f64>>,
    low: Vec<Option<f64>>,
    close: Vec<Option<f64>>,
    volume: Vec<Option<i64>>,
}

#[async_trait]
impl MarketDataProvider for YahooProvider {
    fn name(&self) -> &'static str {
        "yahoo"
    }

    async fn get_historical_prices(
        &self,
        symbols: &[String],
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<HashMap<String, Vec<ProviderBar>>, ProviderError> {
        let mut out = HashMap::new();

        for symbol in symbols {
            match self.fetch_symbol_bars(symbol, start, end).await {
                Ok(bars) if !bars.is_empty() => {
                    out.insert(symbol.clone(), bars);
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("Yahoo failed for {}: {}", symbol, e);
                }
            }
        }

        Ok(out)
    }

    async fn get_company_profiles(
        &self,
        _symbols: &[String],
    ) -> Result<HashMap<String, ProviderProfile>, ProviderError> {
        // Yahoo's chart API carries no company reference data; an empty map
        // sends every symbol to the next provider in the chain.
        Ok(HashMap::new())
    }
}
