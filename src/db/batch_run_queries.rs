use chrono::{NaiveDate, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{BatchRun, PhaseRecord, RunState};

const BATCH_RUN_COLUMNS: &str = r#"
    id, calculation_date, state, phases, hard_deps_succeeded,
    error_summary, started_at, completed_at
"#;

/// Open (or re-open, on a re-run) the tracking row for a date and mark it
/// in progress. One row per date is an invariant of the table.
pub async fn start_run(pool: &PgPool, date: NaiveDate) -> Result<Uuid, sqlx::Error> {
    sqlx::query_scalar::<_, Uuid>(
        r#"
        INSERT INTO batch_runs (id, calculation_date, state, phases, hard_deps_succeeded, started_at)
        VALUES ($1, $2, 'in_progress', '[]'::jsonb, FALSE, $3)
        ON CONFLICT (calculation_date)
        DO UPDATE SET state = 'in_progress',
                      phases = '[]'::jsonb,
                      hard_deps_succeeded = FALSE,
                      error_summary = NULL,
                      started_at = EXCLUDED.started_at,
                      completed_at = NULL
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(date)
    .bind(Utc::now())
    .fetch_one(pool)
    .await
}

/// Persist the terminal state of a date run with its full phase log.
pub async fn finish_run(
    pool: &PgPool,
    run_id: Uuid,
    state: RunState,
    phases: &[PhaseRecord],
    hard_deps_succeeded: bool,
    error_summary: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE batch_runs
        SET state = $2,
            phases = $3,
            hard_deps_succeeded = $4,
            error_summary = $5,
            completed_at = $6
        WHERE id = $1
        "#,
    )
    .bind(run_id)
    .bind(state.as_str())
    .bind(Json(phases))
    .bind(hard_deps_succeeded)
    .bind(error_summary)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    Ok(())
}

/// Backfill watermark: the most recent calculation date whose hard-dependency
/// phases succeeded globally. Partial dates count if the hard deps held.
pub async fn latest_watermark(pool: &PgPool) -> Result<Option<NaiveDate>, sqlx::Error> {
    sqlx::query_scalar::<_, Option<NaiveDate>>(
        r#"
        SELECT MAX(calculation_date)
        FROM batch_runs
        WHERE hard_deps_succeeded
          AND state IN ('complete', 'partial')
        "#,
    )
    .fetch_one(pool)
    .await
}

pub async fn fetch_by_date(
    pool: &PgPool,
    date: NaiveDate,
) -> Result<Option<BatchRun>, sqlx::Error> {
    sqlx::query_as::<_, BatchRun>(&format!(
        r#"
        SELECT {BATCH_RUN_COLUMNS}
        FROM batch_runs
        WHERE calculation_date = $1
        "#
    ))
    .bind(date)
    .fetch_optional(pool)
    .await
}
