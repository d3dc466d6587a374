use sqlx::PgPool;
use uuid::Uuid;

use crate::models::factor::CreateFactorExposure;

/// Upsert one beta row. Position-scoped and portfolio-scoped rows have
/// separate partial unique indexes (NULL position_id marks the portfolio
/// row), so recomputation overwrites rather than appends in both scopes.
pub async fn upsert_exposure(
    pool: &PgPool,
    exposure: &CreateFactorExposure,
) -> Result<(), sqlx::Error> {
    match exposure.position_id {
        Some(position_id) => {
            sqlx::query(
                r#"
                INSERT INTO factor_exposures
                    (id, portfolio_id, position_id, factor, calculation_date, beta,
                     r_squared, method, lambda, observations, clipped)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                ON CONFLICT (portfolio_id, position_id, factor, calculation_date)
                    WHERE position_id IS NOT NULL
                DO UPDATE SET beta = EXCLUDED.beta,
                              r_squared = EXCLUDED.r_squared,
                              method = EXCLUDED.method,
                              lambda = EXCLUDED.lambda,
                              observations = EXCLUDED.observations,
                              clipped = EXCLUDED.clipped
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(exposure.portfolio_id)
            .bind(position_id)
            .bind(exposure.factor.key())
            .bind(exposure.calculation_date)
            .bind(exposure.beta)
            .bind(exposure.r_squared)
            .bind(exposure.method.as_str())
            .bind(exposure.lambda)
            .bind(exposure.observations)
            .bind(exposure.clipped)
            .execute(pool)
            .await?;
        }
        None => {
            sqlx::query(
                r#"
                INSERT INTO factor_exposures
                    (id, portfolio_id, position_id, factor, calculation_date, beta,
                     r_squared, method, lambda, observations, clipped)
                VALUES ($1, $2, NULL, $3, $4, $5, $6, $7, $8, $9, $10)
                ON CONFLICT (portfolio_id, factor, calculation_date)
                    WHERE position_id IS NULL
                DO UPDATE SET beta = EXCLUDED.beta,
                              r_squared = EXCLUDED.r_squared,
                              method = EXCLUDED.method,
                              lambda = EXCLUDED.lambda,
                              observations = EXCLUDED.observations,
                              clipped = EXCLUDED.clipped
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(exposure.portfolio_id)
            .bind(exposure.factor.key())
            .bind(exposure.calculation_date)
            .bind(exposure.beta)
            .bind(exposure.r_squared)
            .bind(exposure.method.as_str())
            .bind(exposure.lambda)
            .bind(exposure.observations)
            .bind(exposure.clipped)
            .execute(pool)
            .await?;
        }
    }

    Ok(())
}
