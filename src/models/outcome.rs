use serde::{Deserialize, Serialize};

/// Uniform result shape for pipeline units of work.
///
/// "Nothing to compute" is a first-class outcome, never an error: callers
/// (aggregation, reporting, the orchestrator) must be able to distinguish an
/// empty input from a broken computation. Failures stay in `Result`'s error
/// channel, classified transient/permanent by `AppError`.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Completed(T),
    Skipped(SkipReason),
}

impl<T> Outcome<T> {
    pub fn is_skipped(&self) -> bool {
        matches!(self, Outcome::Skipped(_))
    }

    pub fn completed(self) -> Option<T> {
        match self {
            Outcome::Completed(v) => Some(v),
            Outcome::Skipped(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SkipReason {
    /// Calculation date falls on a weekend or market holiday.
    NotTradingDay,
    /// No public positions with enough price history to work with.
    NoPublicPositions,
    /// No price available inside the bounded lookback.
    NoPriceHistory,
    /// A hard-dependency phase already failed for this portfolio and date.
    HardDependencyFailed,
    /// Nothing matched the requested portfolio filter.
    NoEligiblePortfolios,
}

impl SkipReason {
    pub fn code(&self) -> &'static str {
        match self {
            SkipReason::NotTradingDay => "NOT_TRADING_DAY",
            SkipReason::NoPublicPositions => "SKIPPED_NO_PUBLIC_POSITIONS",
            SkipReason::NoPriceHistory => "NO_PRICE_HISTORY",
            SkipReason::HardDependencyFailed => "HARD_DEPENDENCY_FAILED",
            SkipReason::NoEligiblePortfolios => "NO_ELIGIBLE_PORTFOLIOS",
        }
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_public_positions_is_a_value_not_an_error() {
        // The empty-portfolio case must be representable without Result's
        // error channel at all.
        let outcome: Outcome<Vec<f64>> = Outcome::Skipped(SkipReason::NoPublicPositions);
        assert!(outcome.is_skipped());
        assert_eq!(outcome.completed(), None);
    }

    #[test]
    fn test_skip_codes_are_stable() {
        // Persisted in phase records and matched by downstream consumers
        assert_eq!(
            SkipReason::NoPublicPositions.code(),
            "SKIPPED_NO_PUBLIC_POSITIONS"
        );
        assert_eq!(SkipReason::NotTradingDay.code(), "NOT_TRADING_DAY");
    }

    #[test]
    fn test_completed_unwraps_value() {
        let outcome = Outcome::Completed(42);
        assert!(!outcome.is_skipped());
        assert_eq!(outcome.completed(), Some(42));
    }
}
