use async_trait::async_trait;
use bigdecimal::ToPrimitive;
use chrono::NaiveDate;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::db::snapshot_queries;
use crate::errors::AppError;
use crate::models::{Outcome, SkipReason};

// ============================================================================
// Collaborator contract
// ============================================================================

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ScenarioImpact {
    pub scenario: String,
    pub shock_pct: f64,
    pub estimated_pnl: f64,
    pub equity_after: f64,
}

/// External stress-test engine. Reads exposure figures off the day's
/// snapshot, which is why the orchestrator only invokes it after the P&L
/// phase has persisted one.
#[async_trait]
pub trait StressTestEngine: Send + Sync {
    async fn run(
        &self,
        pool: &PgPool,
        portfolio_id: Uuid,
        calc_date: NaiveDate,
    ) -> Result<Outcome<Vec<ScenarioImpact>>, AppError>;
}

// ============================================================================
// Reference implementation
// ============================================================================

/// In-process reference engine applying fixed shock scenarios to the
/// snapshot's gross/net exposure split.
pub struct DefaultStressTestEngine;

const SCENARIOS: &[(&str, f64)] = &[
    ("2008-style crash", -0.37),
    ("Correction", -0.10),
    ("Flash selloff", -0.05),
    ("Melt-up", 0.15),
];

#[async_trait]
impl StressTestEngine for DefaultStressTestEngine {
    async fn run(
        &self,
        pool: &PgPool,
        portfolio_id: Uuid,
        calc_date: NaiveDate,
    ) -> Result<Outcome<Vec<ScenarioImpact>>, AppError> {
        let Some(snapshot) = snapshot_queries::fetch_for_date(pool, portfolio_id, calc_date).await?
        else {
            // No snapshot means the hard-dependency phase did not land; the
            // orchestrator should have skipped us, but never guess here.
            return Err(AppError::Validation(format!(
                "stress test requires a snapshot for portfolio {} on {}",
                portfolio_id, calc_date
            )));
        };

        let equity = snapshot.equity_balance.to_f64().unwrap_or(0.0);
        let long = snapshot.long_exposure;
        let short = snapshot.short_exposure;

        if long.abs() < f64::EPSILON && short.abs() < f64::EPSILON {
            return Ok(Outcome::Skipped(SkipReason::NoPublicPositions));
        }

        let impacts: Vec<ScenarioImpact> = SCENARIOS
            .iter()
            .map(|(name, shock)| {
                // Longs move with the shock, shorts against it
                let pnl = long * shock - short * shock;
                ScenarioImpact {
                    scenario: name.to_string(),
                    shock_pct: shock * 100.0,
                    estimated_pnl: pnl,
                    equity_after: equity + pnl,
                }
            })
            .collect();

        info!(
            "🧪 Stress test for portfolio {} on {}: {} scenarios",
            portfolio_id,
            calc_date,
            impacts.len()
        );

        Ok(Outcome::Completed(impacts))
    }
}
