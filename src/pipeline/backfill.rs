use chrono::{Duration, NaiveDate, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::{batch_run_queries, position_queries};
use crate::errors::AppError;
use crate::models::SkipReason;
use crate::pipeline::context::RunContext;
use crate::pipeline::orchestrator::{run_for_date, DateRunResult};
use crate::services::trading_calendar;

/// Structured report of one backfill invocation.
#[derive(Debug, serde::Serialize)]
pub struct BackfillReport {
    pub watermark: Option<NaiveDate>,
    pub target_date: NaiveDate,
    pub dates_processed: Vec<DateRunResult>,
    /// Set when the backfill had nothing to do and why.
    pub skipped: Option<SkipReason>,
}

impl BackfillReport {
    pub fn dates_complete(&self) -> usize {
        self.dates_processed
            .iter()
            .filter(|r| r.hard_deps_succeeded)
            .count()
    }
}

/// Detect and process every missing trading day up to the target date.
///
/// The watermark is the last date whose hard-dependency phases succeeded
/// globally; on a first run it seeds from the day before the earliest
/// position entry across the relevant portfolios. Dates are processed
/// strictly in chronological order, each with a fresh context, so equity
/// rollforward always anchors on the latest prior snapshot.
pub async fn run_with_backfill(
    ctx: &RunContext,
    target_date: Option<NaiveDate>,
    portfolio_ids: Option<&[Uuid]>,
) -> Result<BackfillReport, AppError> {
    let target = target_date.unwrap_or_else(|| Utc::now().date_naive());

    let watermark = resolve_watermark(ctx, portfolio_ids).await?;

    let Some(watermark) = watermark else {
        info!("No watermark and no positions to seed one; nothing to backfill");
        return Ok(BackfillReport {
            watermark: None,
            target_date: target,
            dates_processed: vec![],
            skipped: Some(SkipReason::NoEligiblePortfolios),
        });
    };

    let missing = trading_calendar::trading_days_between(watermark, target);

    if missing.is_empty() {
        info!(
            "Watermark {} already covers target {}; nothing to backfill",
            watermark, target
        );
        return Ok(BackfillReport {
            watermark: Some(watermark),
            target_date: target,
            dates_processed: vec![],
            skipped: None,
        });
    }

    info!(
        "📅 Backfilling {} trading days: {} → {}",
        missing.len(),
        missing.first().unwrap(),
        missing.last().unwrap()
    );

    let mut results = Vec::with_capacity(missing.len());

    for date in missing {
        // Fresh context per date: no state leaks across dates
        let date_ctx = ctx.fresh();
        let result = run_for_date(&date_ctx, date, portfolio_ids).await?;

        if !result.hard_deps_succeeded {
            warn!(
                "Date {} finished {} with {} failed phases; watermark will not pass it",
                date,
                result.state.as_str(),
                result.failed_phase_count()
            );
        }

        results.push(result);
    }

    Ok(BackfillReport {
        watermark: Some(watermark),
        target_date: target,
        dates_processed: results,
        skipped: None,
    })
}

/// Last fully-successful date, or the day before the earliest position entry
/// when the tracking table is empty (first ever run).
async fn resolve_watermark(
    ctx: &RunContext,
    portfolio_ids: Option<&[Uuid]>,
) -> Result<Option<NaiveDate>, AppError> {
    if let Some(watermark) = batch_run_queries::latest_watermark(&ctx.pool).await? {
        return Ok(Some(watermark));
    }

    let earliest = position_queries::earliest_entry_date(&ctx.pool, portfolio_ids).await?;
    Ok(earliest.map(|d| d - Duration::days(1)))
}
