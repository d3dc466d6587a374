use chrono::NaiveDate;
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::services::stress_test_service::ScenarioImpact;

/// Persist a portfolio's scenario impacts for a date; re-runs overwrite.
pub async fn upsert_results(
    pool: &PgPool,
    portfolio_id: Uuid,
    calc_date: NaiveDate,
    scenarios: &[ScenarioImpact],
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO stress_test_results (id, portfolio_id, calculation_date, scenarios)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (portfolio_id, calculation_date)
        DO UPDATE SET scenarios = EXCLUDED.scenarios,
                      created_at = NOW()
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(portfolio_id)
    .bind(calc_date)
    .bind(Json(scenarios))
    .execute(pool)
    .await?;

    Ok(())
}
