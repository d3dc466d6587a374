use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use sqlx::PgPool;
use uuid::Uuid;

/// Sum of realized P&L events booked exactly on the calculation date.
pub async fn realized_pnl_on(
    pool: &PgPool,
    portfolio_id: Uuid,
    date: NaiveDate,
) -> Result<BigDecimal, sqlx::Error> {
    sqlx::query_scalar::<_, BigDecimal>(
        r#"
        SELECT COALESCE(SUM(realized_pnl), 0)
        FROM realized_trades
        WHERE portfolio_id = $1 AND trade_date = $2
        "#,
    )
    .bind(portfolio_id)
    .bind(date)
    .fetch_one(pool)
    .await
}
