pub mod alphavantage;
pub mod market_provider;
pub mod provider_chain;
pub mod twelvedata;
pub mod yahoo;
