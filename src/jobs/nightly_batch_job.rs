//! Nightly Batch Job
//!
//! Runs after market close and backfills every trading day the tracking
//! table has not yet seen, up to today. Because the backfill resumes from
//! the watermark, a host that was down for a week catches up on the next
//! start without operator help.

use tracing::{info, warn};

use crate::errors::AppError;
use crate::pipeline::{run_with_backfill, RunContext};
use crate::services::job_scheduler_service::JobResult;

pub async fn run_nightly_batch(ctx: RunContext) -> Result<JobResult, AppError> {
    info!("🌙 Nightly batch starting");

    let report = run_with_backfill(&ctx, None, None).await?;

    let processed = report.dates_processed.len() as i32;
    let complete = report.dates_complete() as i32;
    let failed = processed - complete;

    if let Some(reason) = &report.skipped {
        info!("Nightly batch had nothing to do: {}", reason);
    } else if failed > 0 {
        warn!(
            "Nightly batch processed {} dates, {} with hard-dependency failures",
            processed, failed
        );
    } else {
        info!("Nightly batch processed {} dates cleanly", processed);
    }

    Ok(JobResult {
        items_processed: processed,
        items_failed: failed,
    })
}
