use chrono::NaiveDate;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::Position;

const POSITION_COLUMNS: &str = r#"
    id, portfolio_id, symbol, quantity, entry_price, entry_date, exit_date,
    investment_class, underlying_symbol, strike_price, expiration_date,
    sector, last_price, market_value, deleted_at, created_at
"#;

/// Positions of one portfolio that are open on the calculation date:
/// entered on or before it, not exited before it, not soft-deleted.
pub async fn fetch_open_for_date(
    pool: &PgPool,
    portfolio_id: Uuid,
    date: NaiveDate,
) -> Result<Vec<Position>, sqlx::Error> {
    sqlx::query_as::<_, Position>(&format!(
        r#"
        SELECT {POSITION_COLUMNS}
        FROM positions
        WHERE portfolio_id = $1
          AND deleted_at IS NULL
          AND entry_date <= $2
          AND (exit_date IS NULL OR exit_date >= $2)
        ORDER BY symbol
        "#
    ))
    .bind(portfolio_id)
    .bind(date)
    .fetch_all(pool)
    .await
}

/// Distinct pricing symbols of open positions, optionally filtered to a
/// portfolio set. Private holdings carry no market symbol worth fetching.
pub async fn fetch_open_symbols(
    pool: &PgPool,
    portfolio_ids: Option<&[Uuid]>,
) -> Result<Vec<String>, sqlx::Error> {
    let rows: Vec<(String, Option<String>, String)> = match portfolio_ids {
        Some(ids) => {
            sqlx::query_as(
                r#"
                SELECT symbol, underlying_symbol, investment_class
                FROM positions
                WHERE deleted_at IS NULL
                  AND exit_date IS NULL
                  AND investment_class <> 'private'
                  AND portfolio_id = ANY($1)
                "#,
            )
            .bind(ids)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query_as(
                r#"
                SELECT symbol, underlying_symbol, investment_class
                FROM positions
                WHERE deleted_at IS NULL
                  AND exit_date IS NULL
                  AND investment_class <> 'private'
                "#,
            )
            .fetch_all(pool)
            .await?
        }
    };

    // Options price off their underlying; dedupe in insertion order.
    let mut symbols = Vec::new();
    for (symbol, underlying, class) in rows {
        let s = if class == "option" {
            underlying.unwrap_or(symbol)
        } else {
            symbol
        };
        if !symbols.contains(&s) {
            symbols.push(s);
        }
    }

    Ok(symbols)
}

/// Earliest entry date across relevant portfolios; seeds the backfill
/// watermark on a first run.
pub async fn earliest_entry_date(
    pool: &PgPool,
    portfolio_ids: Option<&[Uuid]>,
) -> Result<Option<NaiveDate>, sqlx::Error> {
    match portfolio_ids {
        Some(ids) => {
            sqlx::query_scalar::<_, Option<NaiveDate>>(
                r#"
                SELECT MIN(entry_date) FROM positions
                WHERE deleted_at IS NULL AND portfolio_id = ANY($1)
                "#,
            )
            .bind(ids)
            .fetch_one(pool)
            .await
        }
        None => {
            sqlx::query_scalar::<_, Option<NaiveDate>>(
                "SELECT MIN(entry_date) FROM positions WHERE deleted_at IS NULL",
            )
            .fetch_one(pool)
            .await
        }
    }
}

/// Refresh the pipeline-owned market-value fields from the latest close.
pub async fn update_market_value(
    pool: &PgPool,
    position_id: Uuid,
    last_price: f64,
    market_value: f64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE positions
        SET last_price = $2, market_value = $3
        WHERE id = $1
        "#,
    )
    .bind(position_id)
    .bind(last_price)
    .bind(market_value)
    .execute(pool)
    .await?;

    Ok(())
}

/// All open positions across portfolios, for the global value-refresh phase.
pub async fn fetch_all_open(pool: &PgPool) -> Result<Vec<Position>, sqlx::Error> {
    sqlx::query_as::<_, Position>(&format!(
        r#"
        SELECT {POSITION_COLUMNS}
        FROM positions
        WHERE deleted_at IS NULL AND exit_date IS NULL
        ORDER BY portfolio_id, symbol
        "#
    ))
    .fetch_all(pool)
    .await
}

/// Restore sector tags from company profiles for positions missing one or
/// carrying a stale value. Returns rows touched.
pub async fn retag_sectors_from_profiles(pool: &PgPool) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE positions p
        SET sector = cp.sector
        FROM company_profiles cp
        WHERE p.symbol = cp.symbol
          AND cp.sector IS NOT NULL
          AND p.deleted_at IS NULL
          AND (p.sector IS NULL OR p.sector <> cp.sector)
        "#,
    )
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}
