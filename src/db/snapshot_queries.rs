use chrono::NaiveDate;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::models::{CreatePortfolioSnapshot, PortfolioSnapshot};

const SNAPSHOT_COLUMNS: &str = r#"
    id, portfolio_id, calculation_date, equity_balance, unrealized_pnl,
    realized_pnl, capital_flow, cumulative_pnl, cumulative_realized_pnl,
    cumulative_capital_flow, daily_return, gross_exposure, net_exposure,
    long_exposure, short_exposure, created_at
"#;

/// The most recent snapshot strictly before `date`. This is the rollforward
/// anchor: it need not be the previous calendar day.
pub async fn fetch_latest_before(
    pool: &PgPool,
    portfolio_id: Uuid,
    date: NaiveDate,
) -> Result<Option<PortfolioSnapshot>, sqlx::Error> {
    sqlx::query_as::<_, PortfolioSnapshot>(&format!(
        r#"
        SELECT {SNAPSHOT_COLUMNS}
        FROM portfolio_snapshots
        WHERE portfolio_id = $1 AND calculation_date < $2
        ORDER BY calculation_date DESC
        LIMIT 1
        "#
    ))
    .bind(portfolio_id)
    .bind(date)
    .fetch_optional(pool)
    .await
}

pub async fn fetch_for_date(
    pool: &PgPool,
    portfolio_id: Uuid,
    date: NaiveDate,
) -> Result<Option<PortfolioSnapshot>, sqlx::Error> {
    sqlx::query_as::<_, PortfolioSnapshot>(&format!(
        r#"
        SELECT {SNAPSHOT_COLUMNS}
        FROM portfolio_snapshots
        WHERE portfolio_id = $1 AND calculation_date = $2
        "#
    ))
    .bind(portfolio_id)
    .bind(date)
    .fetch_optional(pool)
    .await
}

pub async fn exists_for_date(
    pool: &PgPool,
    portfolio_id: Uuid,
    date: NaiveDate,
) -> Result<bool, sqlx::Error> {
    let count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM portfolio_snapshots
        WHERE portfolio_id = $1 AND calculation_date = $2
        "#,
    )
    .bind(portfolio_id)
    .bind(date)
    .fetch_one(pool)
    .await?;

    Ok(count > 0)
}

/// Insert (or replace, on re-run) the snapshot for a date, inside the same
/// transaction as the portfolio equity update.
pub async fn upsert_snapshot_tx(
    tx: &mut Transaction<'_, Postgres>,
    snapshot: &CreatePortfolioSnapshot,
) -> Result<Uuid, sqlx::Error> {
    let id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO portfolio_snapshots
            (id, portfolio_id, calculation_date, equity_balance, unrealized_pnl,
             realized_pnl, capital_flow, cumulative_pnl, cumulative_realized_pnl,
             cumulative_capital_flow, daily_return, gross_exposure, net_exposure,
             long_exposure, short_exposure)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
        ON CONFLICT (portfolio_id, calculation_date)
        DO UPDATE SET equity_balance = EXCLUDED.equity_balance,
                      unrealized_pnl = EXCLUDED.unrealized_pnl,
                      realized_pnl = EXCLUDED.realized_pnl,
                      capital_flow = EXCLUDED.capital_flow,
                      cumulative_pnl = EXCLUDED.cumulative_pnl,
                      cumulative_realized_pnl = EXCLUDED.cumulative_realized_pnl,
                      cumulative_capital_flow = EXCLUDED.cumulative_capital_flow,
                      daily_return = EXCLUDED.daily_return,
                      gross_exposure = EXCLUDED.gross_exposure,
                      net_exposure = EXCLUDED.net_exposure,
                      long_exposure = EXCLUDED.long_exposure,
                      short_exposure = EXCLUDED.short_exposure
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(snapshot.portfolio_id)
    .bind(snapshot.calculation_date)
    .bind(&snapshot.equity_balance)
    .bind(&snapshot.unrealized_pnl)
    .bind(&snapshot.realized_pnl)
    .bind(&snapshot.capital_flow)
    .bind(&snapshot.cumulative_pnl)
    .bind(&snapshot.cumulative_realized_pnl)
    .bind(&snapshot.cumulative_capital_flow)
    .bind(snapshot.daily_return)
    .bind(snapshot.gross_exposure)
    .bind(snapshot.net_exposure)
    .bind(snapshot.long_exposure)
    .bind(snapshot.short_exposure)
    .fetch_one(&mut **tx)
    .await?;

    Ok(id)
}
