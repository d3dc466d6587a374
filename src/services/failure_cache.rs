use std::sync::Arc;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

/// Information about a failed provider call for a symbol
#[derive(Debug, Clone)]
pub struct FailureInfo {
    pub failed_at: DateTime<Utc>,
    pub error_type: FailureType,
    pub ttl_hours: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FailureType {
    NotFound,    // Symbol doesn't exist or not available in any provider
    RateLimited, // Temporary quota exhaustion
    ApiError,    // Other provider errors
}

/// Thread-safe cache of symbols whose fetches recently failed, so a backfill
/// over many dates doesn't spend provider quota re-asking for known-bad
/// tickers every date.
#[derive(Clone)]
pub struct FailureCache {
    cache: Arc<DashMap<String, FailureInfo>>,
}

impl FailureCache {
    pub fn new() -> Self {
        Self {
            cache: Arc::new(DashMap::new()),
        }
    }

    /// Whether a symbol has a still-valid failure on record.
    pub fn is_failed(&self, symbol: &str) -> Option<FailureInfo> {
        if let Some(entry) = self.cache.get(symbol) {
            let info = entry.value().clone();
            let now = Utc::now();
            let expiry = info.failed_at + Duration::hours(info.ttl_hours);

            if now < expiry {
                return Some(info);
            } else {
                drop(entry); // release the read lock before mutating
                self.cache.remove(symbol);
            }
        }
        None
    }

    pub fn record_failure(&self, symbol: &str, error_type: FailureType) {
        let ttl_hours = match error_type {
            FailureType::NotFound => 24,
            FailureType::RateLimited => 1,
            FailureType::ApiError => 6,
        };

        let info = FailureInfo {
            failed_at: Utc::now(),
            error_type,
            ttl_hours,
        };

        self.cache.insert(symbol.to_string(), info);
    }

    /// Clear a symbol after a successful fetch.
    pub fn clear(&self, symbol: &str) {
        self.cache.remove(symbol);
    }

    #[allow(dead_code)]
    pub fn len(&self) -> usize {
        self.cache.len()
    }
}

impl Default for FailureCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_records_and_retrieves_failures() {
        let cache = FailureCache::new();

        cache.record_failure("INVALID", FailureType::NotFound);

        let result = cache.is_failed("INVALID");
        assert!(result.is_some());
        assert_eq!(result.unwrap().error_type, FailureType::NotFound);
    }

    #[test]
    fn test_cache_clears_symbol() {
        let cache = FailureCache::new();

        cache.record_failure("TEST", FailureType::NotFound);
        assert!(cache.is_failed("TEST").is_some());

        cache.clear("TEST");
        assert!(cache.is_failed("TEST").is_none());
    }

    #[test]
    fn test_different_ttls_for_error_types() {
        let cache = FailureCache::new();

        cache.record_failure("NOT_FOUND", FailureType::NotFound);
        cache.record_failure("RATE_LIMITED", FailureType::RateLimited);

        let not_found = cache.is_failed("NOT_FOUND").unwrap();
        let rate_limited = cache.is_failed("RATE_LIMITED").unwrap();

        assert_eq!(not_found.ttl_hours, 24);
        assert_eq!(rate_limited.ttl_hours, 1);
    }
}
