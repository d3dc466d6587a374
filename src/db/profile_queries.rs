use chrono::{Duration, Utc};
use sqlx::PgPool;

use crate::external::market_provider::ProviderProfile;
use crate::models::CompanyProfile;

/// Of the given symbols, those with no profile row or one older than the
/// staleness window.
pub async fn symbols_needing_refresh(
    pool: &PgPool,
    symbols: &[String],
    staleness_days: i64,
) -> Result<Vec<String>, sqlx::Error> {
    if symbols.is_empty() {
        return Ok(Vec::new());
    }

    let cutoff = Utc::now() - Duration::days(staleness_days);

    let fresh: Vec<String> = sqlx::query_scalar::<_, String>(
        r#"
        SELECT symbol FROM company_profiles
        WHERE symbol = ANY($1) AND fetched_at >= $2
        "#,
    )
    .bind(symbols)
    .bind(cutoff)
    .fetch_all(pool)
    .await?;

    Ok(symbols
        .iter()
        .filter(|s| !fresh.contains(*s))
        .cloned()
        .collect())
}

pub async fn upsert_profile(
    pool: &PgPool,
    symbol: &str,
    profile: &ProviderProfile,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO company_profiles (symbol, company_name, sector, industry, description, fetched_at)
        VALUES ($1, $2, $3, $4, $5, NOW())
        ON CONFLICT (symbol)
        DO UPDATE SET company_name = EXCLUDED.company_name,
                      sector = EXCLUDED.sector,
                      industry = EXCLUDED.industry,
                      description = EXCLUDED.description,
                      fetched_at = NOW()
        "#,
    )
    .bind(symbol)
    .bind(&profile.company_name)
    .bind(&profile.sector)
    .bind(&profile.industry)
    .bind(&profile.description)
    .execute(pool)
    .await?;

    Ok(())
}

#[allow(dead_code)]
pub async fn fetch_profile(
    pool: &PgPool,
    symbol: &str,
) -> Result<Option<CompanyProfile>, sqlx::Error> {
    sqlx::query_as::<_, CompanyProfile>(
        r#"
        SELECT symbol, company_name, sector, industry, description, fetched_at
        FROM company_profiles
        WHERE symbol = $1
        "#,
    )
    .bind(symbol)
    .fetch_optional(pool)
    .await
}
