use chrono::NaiveDate;
use tokio::time::{sleep, Duration, Instant};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::db::{batch_run_queries, portfolio_queries, snapshot_queries, stress_test_queries};
use crate::errors::AppError;
use crate::models::{Outcome, PhaseRecord, PhaseStatus, Portfolio, RunState, SkipReason};
use crate::pipeline::context::RunContext;
use crate::pipeline::phases::{risk_phases, PhaseName, PIPELINE};
use crate::pipeline::retry::retry_delay;
use crate::services::{
    factor_service, market_data_service, pnl_service, risk_service, sector_service,
};

/// Outcome of one calculation date across all phases and portfolios.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DateRunResult {
    pub calculation_date: NaiveDate,
    pub state: RunState,
    /// True when every hard-dependency phase succeeded globally; the
    /// backfill watermark only advances past such dates.
    pub hard_deps_succeeded: bool,
    pub phases: Vec<PhaseRecord>,
}

impl DateRunResult {
    pub fn failed_phase_count(&self) -> usize {
        self.phases.iter().filter(|r| r.status.is_failed()).count()
    }
}

/// Per-portfolio values handed from one risk phase to the next within a
/// single date run. Never outlives the portfolio's pass.
#[derive(Default)]
struct PortfolioScratch {
    market_beta: Option<risk_service::MarketBetaResult>,
}

/// Run the full analytics sequence for one calculation date.
///
/// Every phase is executed in isolation: a failure is caught, recorded, and
/// only blocks downstream work that genuinely depends on it (market data
/// globally, P&L per portfolio). One portfolio's failure never aborts the
/// others.
pub async fn run_for_date(
    ctx: &RunContext,
    calc_date: NaiveDate,
    portfolio_ids: Option<&[Uuid]>,
) -> Result<DateRunResult, AppError> {
    info!("🚀 Batch run starting for {}", calc_date);

    let run_id = batch_run_queries::start_run(&ctx.pool, calc_date).await?;

    let portfolios = portfolio_queries::fetch_active(&ctx.pool, portfolio_ids).await?;
    if portfolios.is_empty() {
        info!("No active portfolios match the filter; recording empty run");
    }

    let mut records: Vec<PhaseRecord> = Vec::new();

    // ---- Global: market data (hard dependency for everything downstream)
    let market_data = execute_global(ctx, PhaseName::MarketData, calc_date, portfolio_ids).await;
    let market_data_ok = !market_data.status.is_failed();
    records.push(market_data);

    // ---- Global: fundamentals (profile refresh is never fatal to the date)
    records.push(execute_global(ctx, PhaseName::Fundamentals, calc_date, portfolio_ids).await);

    // ---- Per portfolio: P&L + snapshot. A portfolio whose snapshot did not
    // land is blocked from its risk phases with the reason why.
    let mut blocked: std::collections::HashMap<Uuid, SkipReason> =
        std::collections::HashMap::new();

    for portfolio in &portfolios {
        if !market_data_ok {
            records.push(skipped_record(
                PhaseName::PnlSnapshot,
                Some(portfolio.id),
                SkipReason::HardDependencyFailed,
            ));
            blocked.insert(portfolio.id, SkipReason::HardDependencyFailed);
            continue;
        }

        let record = execute_portfolio(
            ctx,
            PhaseName::PnlSnapshot,
            calc_date,
            portfolio,
            &mut PortfolioScratch::default(),
        )
        .await;

        match &record.status {
            PhaseStatus::Failed { .. } => {
                blocked.insert(portfolio.id, SkipReason::HardDependencyFailed);
            }
            PhaseStatus::Skipped { reason } if reason == SkipReason::NotTradingDay.code() => {
                blocked.insert(portfolio.id, SkipReason::NotTradingDay);
            }
            PhaseStatus::Skipped { .. } => {
                blocked.insert(portfolio.id, SkipReason::HardDependencyFailed);
            }
            PhaseStatus::Success => {}
        }
        records.push(record);

        sleep(Duration::from_millis(ctx.config.inter_portfolio_delay_ms)).await;
    }

    // ---- Global: position market values, then sector tags
    records.push(
        execute_global(ctx, PhaseName::PositionValueRefresh, calc_date, portfolio_ids).await,
    );
    records.push(execute_global(ctx, PhaseName::SectorRetag, calc_date, portfolio_ids).await);

    // ---- Per portfolio: risk analytics, skipping portfolios whose hard
    // dependency (P&L/snapshot) did not land
    for portfolio in &portfolios {
        let block_reason = blocked.get(&portfolio.id).cloned();
        let mut scratch = PortfolioScratch::default();

        for descriptor in risk_phases() {
            match &block_reason {
                Some(reason) => {
                    records.push(skipped_record(
                        descriptor.name,
                        Some(portfolio.id),
                        reason.clone(),
                    ));
                }
                None => {
                    records.push(
                        execute_portfolio(ctx, descriptor.name, calc_date, portfolio, &mut scratch)
                            .await,
                    );
                }
            }
        }

        if block_reason.is_none() {
            sleep(Duration::from_millis(ctx.config.inter_portfolio_delay_ms)).await;
        }
    }

    let (state, hard_deps_succeeded) = resolve_state(&records);
    let error_summary = summarize_errors(&records);

    batch_run_queries::finish_run(
        &ctx.pool,
        run_id,
        state,
        &records,
        hard_deps_succeeded,
        error_summary.as_deref(),
    )
    .await?;

    info!(
        "🏁 Batch run for {} finished: {} ({} phases, {} failed)",
        calc_date,
        state.as_str(),
        records.len(),
        records.iter().filter(|r| r.status.is_failed()).count()
    );

    Ok(DateRunResult {
        calculation_date: calc_date,
        state,
        hard_deps_succeeded,
        phases: records,
    })
}

// ============================================================================
// Phase executors (single retry/skip/record policy)
// ============================================================================

async fn execute_global(
    ctx: &RunContext,
    phase: PhaseName,
    calc_date: NaiveDate,
    portfolio_ids: Option<&[Uuid]>,
) -> PhaseRecord {
    let started = Instant::now();
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        match run_global_once(ctx, phase, calc_date, portfolio_ids).await {
            Ok(outcome) => return finished_record(phase, None, outcome, started, attempt),
            Err(e) => match retry_delay(&e, attempt, &ctx.config) {
                Some(delay) => {
                    warn!(
                        "Phase {} attempt {} failed ({}; {}), retrying in {:?}",
                        phase,
                        attempt,
                        e,
                        e.classification(),
                        delay
                    );
                    sleep(delay).await;
                }
                None => return failed_record(phase, None, e, started, attempt),
            },
        }
    }
}

async fn execute_portfolio(
    ctx: &RunContext,
    phase: PhaseName,
    calc_date: NaiveDate,
    portfolio: &Portfolio,
    scratch: &mut PortfolioScratch,
) -> PhaseRecord {
    let started = Instant::now();
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        match run_portfolio_once(ctx, phase, calc_date, portfolio, scratch).await {
            Ok(outcome) => {
                return finished_record(phase, Some(portfolio.id), outcome, started, attempt)
            }
            Err(e) => match retry_delay(&e, attempt, &ctx.config) {
                Some(delay) => {
                    warn!(
                        "Phase {} for portfolio {} attempt {} failed ({}; {}), retrying in {:?}",
                        phase,
                        portfolio.id,
                        attempt,
                        e,
                        e.classification(),
                        delay
                    );
                    sleep(delay).await;
                }
                None => return failed_record(phase, Some(portfolio.id), e, started, attempt),
            },
        }
    }
}

async fn run_global_once(
    ctx: &RunContext,
    phase: PhaseName,
    calc_date: NaiveDate,
    portfolio_ids: Option<&[Uuid]>,
) -> Result<Outcome<()>, AppError> {
    match phase {
        PhaseName::MarketData => {
            let summary = market_data_service::collect_market_data(
                &ctx.pool,
                &ctx.chain,
                &ctx.failure_cache,
                &ctx.config,
                calc_date,
                portfolio_ids,
            )
            .await?;
            info!(
                "Market data: plan {}, {} fetched, coverage {:.1}%",
                summary.plan, summary.symbols_fetched, summary.coverage_pct
            );
            Ok(Outcome::Completed(()))
        }
        PhaseName::Fundamentals => {
            let summary = market_data_service::refresh_company_profiles(
                &ctx.pool,
                &ctx.chain,
                &ctx.config,
                portfolio_ids,
            )
            .await?;
            info!(
                "Fundamentals: {} considered, {} refreshed",
                summary.considered, summary.refreshed
            );
            Ok(Outcome::Completed(()))
        }
        PhaseName::PositionValueRefresh => {
            sector_service::refresh_position_values(&ctx.pool).await?;
            Ok(Outcome::Completed(()))
        }
        PhaseName::SectorRetag => {
            sector_service::restore_sector_tags(&ctx.pool).await?;
            Ok(Outcome::Completed(()))
        }
        other => Err(AppError::Validation(format!(
            "{other} is not a global phase"
        ))),
    }
}

async fn run_portfolio_once(
    ctx: &RunContext,
    phase: PhaseName,
    calc_date: NaiveDate,
    portfolio: &Portfolio,
    scratch: &mut PortfolioScratch,
) -> Result<Outcome<()>, AppError> {
    match phase {
        PhaseName::PnlSnapshot => {
            let outcome =
                pnl_service::run_for_portfolio(&ctx.pool, &ctx.config, portfolio, calc_date)
                    .await?;
            Ok(drop_value(outcome))
        }
        PhaseName::MarketBeta => {
            let outcome =
                risk_service::compute_market_beta(&ctx.pool, &ctx.config, portfolio, calc_date)
                    .await?;
            match outcome {
                Outcome::Completed(result) => {
                    scratch.market_beta = Some(result);
                    Ok(Outcome::Completed(()))
                }
                Outcome::Skipped(reason) => Ok(Outcome::Skipped(reason)),
            }
        }
        PhaseName::FactorExposures => {
            let outcome = factor_service::compute_factor_exposures(
                &ctx.pool,
                &ctx.config,
                portfolio,
                calc_date,
            )
            .await?;
            Ok(drop_value(outcome))
        }
        PhaseName::MarketScenarios => {
            let Some(beta) = scratch.market_beta.as_ref() else {
                return Ok(Outcome::Skipped(SkipReason::NoPublicPositions));
            };

            let snapshot =
                snapshot_queries::fetch_for_date(&ctx.pool, portfolio.id, calc_date).await?;
            let Some(snapshot) = snapshot else {
                return Ok(Outcome::Skipped(SkipReason::HardDependencyFailed));
            };

            let equity = bigdecimal::ToPrimitive::to_f64(&snapshot.equity_balance).unwrap_or(0.0);
            let scenarios = risk_service::market_risk_scenarios(beta.beta, equity);
            for scenario in &scenarios {
                info!(
                    "Scenario {} for portfolio {}: {:+.0}",
                    scenario.name, portfolio.id, scenario.estimated_impact
                );
            }
            Ok(Outcome::Completed(()))
        }
        PhaseName::StressTests => {
            // The snapshot gate: stress testing reads exposures off the
            // day's snapshot, so its absence is a dependency failure, not an
            // engine problem.
            if !snapshot_queries::exists_for_date(&ctx.pool, portfolio.id, calc_date).await? {
                error!(
                    "Snapshot missing for portfolio {} on {} despite P&L success",
                    portfolio.id, calc_date
                );
                return Ok(Outcome::Skipped(SkipReason::HardDependencyFailed));
            }

            let outcome = ctx
                .stress_test_engine
                .run(&ctx.pool, portfolio.id, calc_date)
                .await?;
            match outcome {
                Outcome::Completed(impacts) => {
                    stress_test_queries::upsert_results(
                        &ctx.pool,
                        portfolio.id,
                        calc_date,
                        &impacts,
                    )
                    .await?;
                    Ok(Outcome::Completed(()))
                }
                Outcome::Skipped(reason) => Ok(Outcome::Skipped(reason)),
            }
        }
        PhaseName::Correlations => {
            let outcome = ctx
                .correlation_engine
                .compute(&ctx.pool, portfolio.id, calc_date)
                .await?;
            Ok(drop_value(outcome))
        }
        other => Err(AppError::Validation(format!(
            "{other} is not a per-portfolio phase"
        ))),
    }
}

fn drop_value<T>(outcome: Outcome<T>) -> Outcome<()> {
    match outcome {
        Outcome::Completed(_) => Outcome::Completed(()),
        Outcome::Skipped(reason) => Outcome::Skipped(reason),
    }
}

// ============================================================================
// Record construction and state resolution
// ============================================================================

fn finished_record(
    phase: PhaseName,
    portfolio_id: Option<Uuid>,
    outcome: Outcome<()>,
    started: Instant,
    attempts: u32,
) -> PhaseRecord {
    let status = match outcome {
        Outcome::Completed(()) => PhaseStatus::Success,
        Outcome::Skipped(reason) => {
            info!(
                "Phase {} skipped{}: {}",
                phase,
                portfolio_id.map(|id| format!(" for portfolio {id}")).unwrap_or_default(),
                reason
            );
            PhaseStatus::Skipped {
                reason: reason.code().to_string(),
            }
        }
    };

    PhaseRecord {
        phase: phase.key().to_string(),
        portfolio_id,
        status,
        duration_ms: started.elapsed().as_millis() as i64,
        attempts,
    }
}

fn failed_record(
    phase: PhaseName,
    portfolio_id: Option<Uuid>,
    error: AppError,
    started: Instant,
    attempts: u32,
) -> PhaseRecord {
    error!(
        "❌ Phase {} failed{} after {} attempts: {} ({})",
        phase,
        portfolio_id.map(|id| format!(" for portfolio {id}")).unwrap_or_default(),
        attempts,
        error,
        error.classification()
    );

    PhaseRecord {
        phase: phase.key().to_string(),
        portfolio_id,
        status: PhaseStatus::Failed {
            error: error.to_string(),
            class: error.classification(),
        },
        duration_ms: started.elapsed().as_millis() as i64,
        attempts,
    }
}

fn skipped_record(
    phase: PhaseName,
    portfolio_id: Option<Uuid>,
    reason: SkipReason,
) -> PhaseRecord {
    PhaseRecord {
        phase: phase.key().to_string(),
        portfolio_id,
        status: PhaseStatus::Skipped {
            reason: reason.code().to_string(),
        },
        duration_ms: 0,
        attempts: 0,
    }
}

/// Reduce the phase log to the date's terminal state.
///
/// FAILED: the global market-data phase failed (nothing downstream ran).
/// PARTIAL: something failed but the date still produced useful output.
/// COMPLETE: no failures (expected skips don't count against the date).
pub fn resolve_state(records: &[PhaseRecord]) -> (RunState, bool) {
    let hard_names: Vec<&'static str> = PIPELINE
        .iter()
        .filter(|d| d.hard_dependency)
        .map(|d| d.name.key())
        .collect();

    let any_failed = records.iter().any(|r| r.status.is_failed());
    let hard_failed = records.iter().any(|r| {
        hard_names.contains(&r.phase.as_str())
            && (r.status.is_failed()
                || matches!(
                    &r.status,
                    PhaseStatus::Skipped { reason } if reason == SkipReason::HardDependencyFailed.code()
                ))
    });
    let market_data_failed = records
        .iter()
        .any(|r| r.phase == PhaseName::MarketData.key() && r.status.is_failed());

    let state = if market_data_failed {
        RunState::Failed
    } else if any_failed {
        RunState::Partial
    } else {
        RunState::Complete
    };

    (state, !hard_failed)
}

fn summarize_errors(records: &[PhaseRecord]) -> Option<String> {
    let failures: Vec<String> = records
        .iter()
        .filter_map(|r| match &r.status {
            PhaseStatus::Failed { error, class } => Some(format!(
                "{}{}: {} ({})",
                r.phase,
                r.portfolio_id.map(|id| format!("[{id}]")).unwrap_or_default(),
                error,
                class
            )),
            _ => None,
        })
        .collect();

    if failures.is_empty() {
        None
    } else {
        Some(failures.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorClass;

    fn record(phase: PhaseName, status: PhaseStatus) -> PhaseRecord {
        PhaseRecord {
            phase: phase.key().to_string(),
            portfolio_id: None,
            status,
            duration_ms: 1,
            attempts: 1,
        }
    }

    fn failed(phase: PhaseName) -> PhaseRecord {
        record(
            phase,
            PhaseStatus::Failed {
                error: "boom".to_string(),
                class: ErrorClass::Permanent,
            },
        )
    }

    #[test]
    fn test_all_success_is_complete() {
        let records = vec![
            record(PhaseName::MarketData, PhaseStatus::Success),
            record(PhaseName::PnlSnapshot, PhaseStatus::Success),
        ];
        let (state, hard_ok) = resolve_state(&records);
        assert_eq!(state, RunState::Complete);
        assert!(hard_ok);
    }

    #[test]
    fn test_expected_skips_still_complete() {
        let records = vec![
            record(PhaseName::MarketData, PhaseStatus::Success),
            record(
                PhaseName::FactorExposures,
                PhaseStatus::Skipped {
                    reason: SkipReason::NoPublicPositions.code().to_string(),
                },
            ),
        ];
        let (state, hard_ok) = resolve_state(&records);
        assert_eq!(state, RunState::Complete);
        assert!(hard_ok);
    }

    #[test]
    fn test_market_data_failure_is_failed_and_blocks_watermark() {
        let records = vec![failed(PhaseName::MarketData)];
        let (state, hard_ok) = resolve_state(&records);
        assert_eq!(state, RunState::Failed);
        assert!(!hard_ok);
    }

    #[test]
    fn test_soft_failure_is_partial_but_advances_watermark() {
        let records = vec![
            record(PhaseName::MarketData, PhaseStatus::Success),
            record(PhaseName::PnlSnapshot, PhaseStatus::Success),
            failed(PhaseName::Correlations),
        ];
        let (state, hard_ok) = resolve_state(&records);
        assert_eq!(state, RunState::Partial);
        assert!(hard_ok, "analytic failures must not hold the watermark back");
    }

    #[test]
    fn test_pnl_failure_is_partial_and_blocks_watermark() {
        let records = vec![
            record(PhaseName::MarketData, PhaseStatus::Success),
            failed(PhaseName::PnlSnapshot),
        ];
        let (state, hard_ok) = resolve_state(&records);
        assert_eq!(state, RunState::Partial);
        assert!(!hard_ok);
    }

    #[test]
    fn test_hard_dep_skip_blocks_watermark() {
        let records = vec![
            record(PhaseName::MarketData, PhaseStatus::Success),
            record(
                PhaseName::PnlSnapshot,
                PhaseStatus::Skipped {
                    reason: SkipReason::HardDependencyFailed.code().to_string(),
                },
            ),
        ];
        let (_, hard_ok) = resolve_state(&records);
        assert!(!hard_ok);
    }
}
