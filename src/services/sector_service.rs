use sqlx::PgPool;
use tracing::{info, warn};

use crate::db::{market_data_queries, position_queries};
use crate::errors::AppError;

// ============================================================================
// Position market-value refresh (global phase)
// ============================================================================

#[derive(Debug, Clone)]
pub struct ValueRefreshSummary {
    pub refreshed: usize,
    pub unpriced: usize,
}

/// Refresh the pipeline-owned last_price / market_value fields on every open
/// position from the latest stored close. Runs after the P&L phase so risk
/// analytics read values consistent with the day's bars.
pub async fn refresh_position_values(pool: &PgPool) -> Result<ValueRefreshSummary, AppError> {
    let positions = position_queries::fetch_all_open(pool).await?;

    let mut symbols: Vec<String> = Vec::new();
    for position in &positions {
        let symbol = position.pricing_symbol().to_string();
        if !symbols.contains(&symbol) {
            symbols.push(symbol);
        }
    }

    let latest = market_data_queries::fetch_latest_closes(pool, &symbols).await?;

    let mut refreshed = 0usize;
    let mut unpriced = 0usize;

    for position in &positions {
        if !position.class().has_market_price() {
            unpriced += 1;
            continue;
        }

        match latest.get(position.pricing_symbol()) {
            Some((_, close)) => {
                let multiplier = position.class().contract_multiplier();
                let market_value = close * position.quantity * multiplier;
                position_queries::update_market_value(pool, position.id, *close, market_value)
                    .await?;
                refreshed += 1;
            }
            None => {
                unpriced += 1;
            }
        }
    }

    if unpriced > 0 {
        warn!("{} open positions have no stored close to value against", unpriced);
    }

    info!("🔄 Refreshed market values for {} positions", refreshed);

    Ok(ValueRefreshSummary { refreshed, unpriced })
}

// ============================================================================
// Sector tag restoration (global phase)
// ============================================================================

#[derive(Debug, Clone)]
pub struct SectorRetagSummary {
    pub retagged: u64,
}

/// Restore sector tags on positions from the company-profile store. Covers
/// tags lost to user edits, imports, and newly profiled symbols.
pub async fn restore_sector_tags(pool: &PgPool) -> Result<SectorRetagSummary, AppError> {
    let retagged = position_queries::retag_sectors_from_profiles(pool).await?;

    if retagged > 0 {
        info!("🏷️ Restored sector tags on {} positions", retagged);
    }

    Ok(SectorRetagSummary { retagged })
}
