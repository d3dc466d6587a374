use bigdecimal::BigDecimal;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::models::Portfolio;

/// Active, non-deleted portfolios, optionally restricted to an id list,
/// ordered by id for a stable processing order.
pub async fn fetch_active(
    pool: &PgPool,
    portfolio_ids: Option<&[Uuid]>,
) -> Result<Vec<Portfolio>, sqlx::Error> {
    match portfolio_ids {
        Some(ids) => {
            sqlx::query_as::<_, Portfolio>(
                r#"
                SELECT id, user_id, name, starting_equity, equity_balance,
                       is_active, deleted_at, created_at
                FROM portfolios
                WHERE is_active AND deleted_at IS NULL AND id = ANY($1)
                ORDER BY id
                "#,
            )
            .bind(ids)
            .fetch_all(pool)
            .await
        }
        None => {
            sqlx::query_as::<_, Portfolio>(
                r#"
                SELECT id, user_id, name, starting_equity, equity_balance,
                       is_active, deleted_at, created_at
                FROM portfolios
                WHERE is_active AND deleted_at IS NULL
                ORDER BY id
                "#,
            )
            .fetch_all(pool)
            .await
        }
    }
}

pub async fn fetch_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Portfolio>, sqlx::Error> {
    sqlx::query_as::<_, Portfolio>(
        r#"
        SELECT id, user_id, name, starting_equity, equity_balance,
               is_active, deleted_at, created_at
        FROM portfolios
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await
}

/// Write the rolled-forward equity onto the live portfolio row. Runs inside
/// the same transaction as the snapshot insert so the two cannot diverge.
pub async fn update_equity_tx(
    tx: &mut Transaction<'_, Postgres>,
    portfolio_id: Uuid,
    equity_balance: &BigDecimal,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE portfolios
        SET equity_balance = $2
        WHERE id = $1
        "#,
    )
    .bind(portfolio_id)
    .bind(equity_balance)
    .execute(&mut **tx)
    .await?;

    Ok(())
}
