use std::collections::HashMap;

use chrono::NaiveDate;
use tracing::{info, warn};

use crate::external::market_provider::{MarketDataProvider, ProviderBar, ProviderProfile};

/// Bars for one symbol together with the provider that supplied them.
#[derive(Debug, Clone)]
pub struct SourcedBars {
    pub source: String,
    pub bars: Vec<ProviderBar>,
}

/// Ordered fallback chain over concrete providers.
///
/// Each provider is asked only for the symbols its predecessors failed to
/// return; a provider that errors outright is logged and skipped, never
/// aborting the whole fetch. Symbols no provider supplied are simply absent
/// from the result map — the collector decides what that means. The chain
/// itself is therefore infallible.
pub struct ProviderChain {
    providers: Vec<Box<dyn MarketDataProvider>>,
}

impl ProviderChain {
    pub fn new(providers: Vec<Box<dyn MarketDataProvider>>) -> Self {
        Self { providers }
    }

    pub async fn fetch_prices(
        &self,
        symbols: &[String],
        start: NaiveDate,
        end: NaiveDate,
    ) -> HashMap<String, SourcedBars> {
        let mut merged: HashMap<String, SourcedBars> = HashMap::new();
        let mut remaining: Vec<String> = symbols.to_vec();

        for provider in &self.providers {
            if remaining.is_empty() {
                break;
            }

            match provider.get_historical_prices(&remaining, start, end).await {
                Ok(map) => {
                    for (symbol, bars) in map {
                        if !bars.is_empty() {
                            merged.insert(
                                symbol,
                                SourcedBars {
                                    source: provider.name().to_string(),
                                    bars,
                                },
                            );
                        }
                    }
                    remaining.retain(|s| !merged.contains_key(s));
                    info!(
                        "✓ {} fetch round done, {} symbols remaining",
                        provider.name(),
                        remaining.len()
                    );
                }
                Err(e) => {
                    warn!(
                        "Provider {} failed ({}); passing {} symbols to next",
                        provider.name(),
                        e,
                        remaining.len()
                    );
                }
            }
        }

        if !remaining.is_empty() {
            warn!(
                "No provider supplied bars for {} symbols: {:?}",
                remaining.len(),
                remaining
            );
        }

        merged
    }

    pub async fn fetch_profiles(&self, symbols: &[String]) -> HashMap<String, ProviderProfile> {
        let mut merged: HashMap<String, ProviderProfile> = HashMap::new();
        let mut remaining: Vec<String> = symbols.to_vec();

        for provider in &self.providers {
            if remaining.is_empty() {
                break;
            }

            match provider.get_company_profiles(&remaining).await {
                Ok(map) => {
                    for (symbol, profile) in map {
                        merged.insert(symbol, profile);
                    }
                    remaining.retain(|s| !merged.contains_key(s));
                }
                Err(e) => {
                    warn!(
                        "Provider {} profile fetch failed ({}); trying next",
                        provider.name(),
                        e
                    );
                }
            }
        }

        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::market_provider::ProviderError;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    /// Scripted provider: supplies bars for a fixed symbol set and records
    /// what it was asked for through a shared handle.
    struct ScriptedProvider {
        name: &'static str,
        supplies: Vec<&'static str>,
        fail: bool,
        asked: Arc<Mutex<Vec<Vec<String>>>>,
    }

    impl ScriptedProvider {
        fn boxed(
            name: &'static str,
            supplies: Vec<&'static str>,
            fail: bool,
        ) -> (Box<dyn MarketDataProvider>, Arc<Mutex<Vec<Vec<String>>>>) {
            let asked = Arc::new(Mutex::new(Vec::new()));
            let provider = Box::new(Self {
                name,
                supplies,
                fail,
                asked: asked.clone(),
            });
            (provider, asked)
        }

        fn bar() -> ProviderBar {
            ProviderBar {
                date: NaiveDate::from_ymd_opt(2025, 1, 10).unwrap(),
                open: 10.0,
                high: 11.0,
                low: 9.5,
                close: 10.5,
                volume: 1000,
            }
        }
    }

    #[async_trait]
    impl MarketDataProvider for ScriptedProvider {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn get_historical_prices(
            &self,
            symbols: &[String],
            _start: NaiveDate,
            _end: NaiveDate,
        ) -> Result<HashMap<String, Vec<ProviderBar>>, ProviderError> {
            self.asked.lock().unwrap().push(symbols.to_vec());

            if self.fail {
                return Err(ProviderError::Network("connection reset".into()));
            }

            Ok(symbols
                .iter()
                .filter(|s| self.supplies.contains(&s.as_str()))
                .map(|s| (s.clone(), vec![Self::bar()]))
                .collect())
        }

        async fn get_company_profiles(
            &self,
            _symbols: &[String],
        ) -> Result<HashMap<String, ProviderProfile>, ProviderError> {
            Ok(HashMap::new())
        }
    }

    fn symbols(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn range() -> (NaiveDate, NaiveDate) {
        (
            NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2025, 1, 10).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_second_provider_only_sees_missing_symbols() {
        let (first, _) = ScriptedProvider::boxed("first", vec!["AAPL", "MSFT"], false);
        let (second, second_asked) = ScriptedProvider::boxed("second", vec!["TSLA"], false);

        let chain = ProviderChain::new(vec![first, second]);
        let (start, end) = range();
        let got = chain
            .fetch_prices(&symbols(&["AAPL", "MSFT", "TSLA"]), start, end)
            .await;

        assert_eq!(got.len(), 3);
        assert_eq!(got["AAPL"].source, "first");
        assert_eq!(got["TSLA"].source, "second");

        // The fallback must only be asked for what the primary missed
        let asked = second_asked.lock().unwrap();
        assert_eq!(asked.len(), 1);
        assert_eq!(asked[0], symbols(&["TSLA"]));
    }

    #[tokio::test]
    async fn test_failing_provider_is_skipped_not_fatal() {
        let (first, _) = ScriptedProvider::boxed("first", vec![], true);
        let (second, _) = ScriptedProvider::boxed("second", vec!["AAPL"], false);

        let chain = ProviderChain::new(vec![first, second]);
        let (start, end) = range();
        let got = chain.fetch_prices(&symbols(&["AAPL"]), start, end).await;

        assert!(got.contains_key("AAPL"));
    }

    #[tokio::test]
    async fn test_unsupplied_symbols_are_absent_not_errors() {
        let (only, _) = ScriptedProvider::boxed("only", vec!["AAPL"], false);

        let chain = ProviderChain::new(vec![only]);
        let (start, end) = range();
        let got = chain.fetch_prices(&symbols(&["AAPL", "ZZZZ"]), start, end).await;

        assert!(got.contains_key("AAPL"));
        assert!(!got.contains_key("ZZZZ"));
    }

    #[tokio::test]
    async fn test_chain_stops_once_everything_supplied() {
        let (first, _) = ScriptedProvider::boxed("first", vec!["AAPL"], false);
        let (second, second_asked) = ScriptedProvider::boxed("second", vec!["AAPL"], false);

        let chain = ProviderChain::new(vec![first, second]);
        let (start, end) = range();
        chain.fetch_prices(&symbols(&["AAPL"]), start, end).await;

        assert!(second_asked.lock().unwrap().is_empty());
    }
}
