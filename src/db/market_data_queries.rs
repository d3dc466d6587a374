use std::collections::HashMap;

use chrono::NaiveDate;
use sqlx::PgPool;
use tracing::error;
use uuid::Uuid;

use crate::external::market_provider::ProviderBar;
use crate::models::MarketDataPoint;

/// Upsert a batch of bars for one symbol, keyed on (symbol, date) so replays
/// and overlapping fetches converge instead of duplicating.
pub async fn upsert_bars(
    pool: &PgPool,
    symbol: &str,
    bars: &[ProviderBar],
    source: &str,
) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await.map_err(|e| {
        error!("Failed to begin transaction for symbol {}: {}", symbol, e);
        e
    })?;

    for bar in bars {
        sqlx::query(
            r#"
            INSERT INTO market_data_points (id, symbol, date, open, high, low, close, volume, source)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (symbol, date)
            DO UPDATE SET open = EXCLUDED.open,
                          high = EXCLUDED.high,
                          low = EXCLUDED.low,
                          close = EXCLUDED.close,
                          volume = EXCLUDED.volume,
                          source = EXCLUDED.source
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(symbol)
        .bind(bar.date)
        .bind(bar.open)
        .bind(bar.high)
        .bind(bar.low)
        .bind(bar.close)
        .bind(bar.volume)
        .bind(source)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await.map_err(|e| {
        error!("Failed to commit bars for symbol {}: {}", symbol, e);
        e
    })?;

    Ok(())
}

/// Number of universe symbols with a bar on each date inside the range.
/// Feeds the coverage probes of the gap planner.
pub async fn symbol_counts_by_date(
    pool: &PgPool,
    symbols: &[String],
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<(NaiveDate, i64)>, sqlx::Error> {
    if symbols.is_empty() {
        return Ok(Vec::new());
    }

    sqlx::query_as::<_, (NaiveDate, i64)>(
        r#"
        SELECT date, COUNT(DISTINCT symbol)
        FROM market_data_points
        WHERE symbol = ANY($1) AND date BETWEEN $2 AND $3
        GROUP BY date
        ORDER BY date
        "#,
    )
    .bind(symbols)
    .bind(start)
    .bind(end)
    .fetch_all(pool)
    .await
}

/// Symbols of the universe that have at least one bar inside the range.
pub async fn symbols_with_data(
    pool: &PgPool,
    symbols: &[String],
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<String>, sqlx::Error> {
    if symbols.is_empty() {
        return Ok(Vec::new());
    }

    sqlx::query_scalar::<_, String>(
        r#"
        SELECT DISTINCT symbol
        FROM market_data_points
        WHERE symbol = ANY($1) AND date BETWEEN $2 AND $3
        "#,
    )
    .bind(symbols)
    .bind(start)
    .bind(end)
    .fetch_all(pool)
    .await
}

/// Close series per symbol over a range, ascending by date.
pub async fn fetch_close_series(
    pool: &PgPool,
    symbols: &[String],
    start: NaiveDate,
    end: NaiveDate,
) -> Result<HashMap<String, Vec<(NaiveDate, f64)>>, sqlx::Error> {
    if symbols.is_empty() {
        return Ok(HashMap::new());
    }

    let rows = sqlx::query_as::<_, (String, NaiveDate, f64)>(
        r#"
        SELECT symbol, date, close
        FROM market_data_points
        WHERE symbol = ANY($1) AND date BETWEEN $2 AND $3
        ORDER BY symbol, date
        "#,
    )
    .bind(symbols)
    .bind(start)
    .bind(end)
    .fetch_all(pool)
    .await?;

    let mut series: HashMap<String, Vec<(NaiveDate, f64)>> = HashMap::new();
    for (symbol, date, close) in rows {
        series.entry(symbol).or_default().push((date, close));
    }

    Ok(series)
}

/// Most recent close on or before `date`, looking back at most
/// `lookback_days` calendar days.
pub async fn fetch_close_on_or_before(
    pool: &PgPool,
    symbol: &str,
    date: NaiveDate,
    lookback_days: i64,
) -> Result<Option<(NaiveDate, f64)>, sqlx::Error> {
    let floor = date - chrono::Duration::days(lookback_days);

    sqlx::query_as::<_, (NaiveDate, f64)>(
        r#"
        SELECT date, close
        FROM market_data_points
        WHERE symbol = $1 AND date <= $2 AND date >= $3
        ORDER BY date DESC
        LIMIT 1
        "#,
    )
    .bind(symbol)
    .bind(date)
    .bind(floor)
    .fetch_optional(pool)
    .await
}

/// Latest close per symbol in one round trip (DISTINCT ON keeps the newest).
pub async fn fetch_latest_closes(
    pool: &PgPool,
    symbols: &[String],
) -> Result<HashMap<String, (NaiveDate, f64)>, sqlx::Error> {
    if symbols.is_empty() {
        return Ok(HashMap::new());
    }

    let rows = sqlx::query_as::<_, (String, NaiveDate, f64)>(
        r#"
        SELECT DISTINCT ON (symbol) symbol, date, close
        FROM market_data_points
        WHERE symbol = ANY($1)
        ORDER BY symbol, date DESC
        "#,
    )
    .bind(symbols)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(symbol, date, close)| (symbol, (date, close)))
        .collect())
}

#[allow(dead_code)]
pub async fn fetch_bars(
    pool: &PgPool,
    symbol: &str,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<MarketDataPoint>, sqlx::Error> {
    sqlx::query_as::<_, MarketDataPoint>(
        r#"
        SELECT id, symbol, date, open, high, low, close, volume, source, created_at
        FROM market_data_points
        WHERE symbol = $1 AND date BETWEEN $2 AND $3
        ORDER BY date
        "#,
    )
    .bind(symbol)
    .bind(start)
    .bind(end)
    .fetch_all(pool)
    .await
}
