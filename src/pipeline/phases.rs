use serde::{Deserialize, Serialize};

/// Every phase the orchestrator runs for one calculation date, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseName {
    MarketData,
    Fundamentals,
    PnlSnapshot,
    PositionValueRefresh,
    SectorRetag,
    MarketBeta,
    FactorExposures,
    MarketScenarios,
    StressTests,
    Correlations,
}

impl PhaseName {
    pub fn key(&self) -> &'static str {
        match self {
            PhaseName::MarketData => "market_data",
            PhaseName::Fundamentals => "fundamentals",
            PhaseName::PnlSnapshot => "pnl_snapshot",
            PhaseName::PositionValueRefresh => "position_value_refresh",
            PhaseName::SectorRetag => "sector_retag",
            PhaseName::MarketBeta => "market_beta",
            PhaseName::FactorExposures => "factor_exposures",
            PhaseName::MarketScenarios => "market_scenarios",
            PhaseName::StressTests => "stress_tests",
            PhaseName::Correlations => "correlations",
        }
    }
}

impl std::fmt::Display for PhaseName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.key())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseScope {
    Global,
    PerPortfolio,
}

/// A phase as data: one uniform executor iterates these, so retry, skip and
/// record-keeping live in exactly one place instead of per-phase plumbing.
#[derive(Debug, Clone, Copy)]
pub struct PhaseDescriptor {
    pub name: PhaseName,
    pub scope: PhaseScope,
    /// A failed hard dependency skips everything downstream for the same
    /// portfolio (or the whole date when the phase is global).
    pub hard_dependency: bool,
}

/// The full pipeline for one calculation date. Per-portfolio risk phases run
/// portfolio-by-portfolio after the globals; the descriptor order within a
/// scope is the execution order.
pub const PIPELINE: &[PhaseDescriptor] = &[
    PhaseDescriptor {
        name: PhaseName::MarketData,
        scope: PhaseScope::Global,
        hard_dependency: true,
    },
    PhaseDescriptor {
        name: PhaseName::Fundamentals,
        scope: PhaseScope::Global,
        hard_dependency: false,
    },
    PhaseDescriptor {
        name: PhaseName::PnlSnapshot,
        scope: PhaseScope::PerPortfolio,
        hard_dependency: true,
    },
    PhaseDescriptor {
        name: PhaseName::PositionValueRefresh,
        scope: PhaseScope::Global,
        hard_dependency: false,
    },
    PhaseDescriptor {
        name: PhaseName::SectorRetag,
        scope: PhaseScope::Global,
        hard_dependency: false,
    },
    PhaseDescriptor {
        name: PhaseName::MarketBeta,
        scope: PhaseScope::PerPortfolio,
        hard_dependency: false,
    },
    PhaseDescriptor {
        name: PhaseName::FactorExposures,
        scope: PhaseScope::PerPortfolio,
        hard_dependency: false,
    },
    PhaseDescriptor {
        name: PhaseName::MarketScenarios,
        scope: PhaseScope::PerPortfolio,
        hard_dependency: false,
    },
    PhaseDescriptor {
        name: PhaseName::StressTests,
        scope: PhaseScope::PerPortfolio,
        hard_dependency: false,
    },
    PhaseDescriptor {
        name: PhaseName::Correlations,
        scope: PhaseScope::PerPortfolio,
        hard_dependency: false,
    },
];

/// Risk-analytics phases run in the second per-portfolio pass, strictly
/// after the snapshot exists (stress tests read exposures off it).
pub fn risk_phases() -> impl Iterator<Item = &'static PhaseDescriptor> {
    PIPELINE.iter().filter(|d| {
        matches!(
            d.name,
            PhaseName::MarketBeta
                | PhaseName::FactorExposures
                | PhaseName::MarketScenarios
                | PhaseName::StressTests
                | PhaseName::Correlations
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_market_data_comes_first_and_is_hard() {
        assert_eq!(PIPELINE[0].name, PhaseName::MarketData);
        assert!(PIPELINE[0].hard_dependency);
    }

    #[test]
    fn test_snapshot_precedes_stress_tests() {
        let pnl = PIPELINE
            .iter()
            .position(|d| d.name == PhaseName::PnlSnapshot)
            .unwrap();
        let stress = PIPELINE
            .iter()
            .position(|d| d.name == PhaseName::StressTests)
            .unwrap();
        assert!(pnl < stress);
    }

    #[test]
    fn test_only_market_data_and_pnl_are_hard() {
        let hard: Vec<_> = PIPELINE
            .iter()
            .filter(|d| d.hard_dependency)
            .map(|d| d.name)
            .collect();
        assert_eq!(hard, vec![PhaseName::MarketData, PhaseName::PnlSnapshot]);
    }
}
