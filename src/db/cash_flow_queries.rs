use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use sqlx::PgPool;
use uuid::Uuid;

/// Net capital flow on a date: contributions positive, withdrawals negative.
pub async fn net_flow_on(
    pool: &PgPool,
    portfolio_id: Uuid,
    date: NaiveDate,
) -> Result<BigDecimal, sqlx::Error> {
    sqlx::query_scalar::<_, BigDecimal>(
        r#"
        SELECT COALESCE(SUM(
            CASE WHEN flow_type = 'withdrawal' THEN -amount ELSE amount END
        ), 0)
        FROM capital_flows
        WHERE portfolio_id = $1 AND flow_date = $2
        "#,
    )
    .bind(portfolio_id)
    .bind(date)
    .fetch_one(pool)
    .await
}
