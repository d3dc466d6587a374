use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// One holding inside a portfolio. Negative quantity is a short.
///
/// Soft-deleted once a snapshot references it; the pipeline owns only
/// last_price and market_value.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Position {
    pub id: Uuid,
    pub portfolio_id: Uuid,
    pub symbol: String,
    pub quantity: f64,
    pub entry_price: f64,
    pub entry_date: NaiveDate,
    pub exit_date: Option<NaiveDate>,
    /// See InvestmentClass; stored as text.
    pub investment_class: String,
    pub underlying_symbol: Option<String>,
    pub strike_price: Option<f64>,
    pub expiration_date: Option<NaiveDate>,
    pub sector: Option<String>,
    pub last_price: Option<f64>,
    pub market_value: Option<f64>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvestmentClass {
    Public,
    Option,
    Private,
}

impl InvestmentClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvestmentClass::Public => "public",
            InvestmentClass::Option => "option",
            InvestmentClass::Private => "private",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "public" => Some(InvestmentClass::Public),
            "option" => Some(InvestmentClass::Option),
            "private" => Some(InvestmentClass::Private),
            _ => None,
        }
    }

    /// Option contracts settle per 100 shares of the underlying.
    pub fn contract_multiplier(&self) -> f64 {
        match self {
            InvestmentClass::Option => 100.0,
            _ => 1.0,
        }
    }

    /// Private/illiquid holdings have no market price to mark against.
    pub fn has_market_price(&self) -> bool {
        !matches!(self, InvestmentClass::Private)
    }
}

impl Position {
    /// Unknown class strings degrade to Public rather than poisoning a batch.
    pub fn class(&self) -> InvestmentClass {
        InvestmentClass::parse(&self.investment_class).unwrap_or(InvestmentClass::Public)
    }

    /// Open on a date: entered on or before it, not exited before it, not deleted.
    pub fn is_open_on(&self, date: NaiveDate) -> bool {
        if self.deleted_at.is_some() || self.entry_date > date {
            return false;
        }
        match self.exit_date {
            Some(exit) => exit >= date,
            None => true,
        }
    }

    /// Symbol whose bars drive this position's mark: the underlying for
    /// options, the position symbol otherwise.
    pub fn pricing_symbol(&self) -> &str {
        if self.class() == InvestmentClass::Option {
            self.underlying_symbol.as_deref().unwrap_or(&self.symbol)
        } else {
            &self.symbol
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(entry: NaiveDate, exit: Option<NaiveDate>) -> Position {
        Position {
            id: Uuid::new_v4(),
            portfolio_id: Uuid::new_v4(),
            symbol: "AAPL".to_string(),
            quantity: 10.0,
            entry_price: 150.0,
            entry_date: entry,
            exit_date: exit,
            investment_class: "public".to_string(),
            underlying_symbol: None,
            strike_price: None,
            expiration_date: None,
            sector: None,
            last_price: None,
            market_value: None,
            deleted_at: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_open_before_entry_is_false() {
        let p = position(NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(), None);
        assert!(!p.is_open_on(NaiveDate::from_ymd_opt(2025, 3, 9).unwrap()));
        assert!(p.is_open_on(NaiveDate::from_ymd_opt(2025, 3, 10).unwrap()));
    }

    #[test]
    fn test_exit_date_closes_position_after() {
        let p = position(
            NaiveDate::from_ymd_opt(2025, 1, 2).unwrap(),
            Some(NaiveDate::from_ymd_opt(2025, 2, 1).unwrap()),
        );
        assert!(p.is_open_on(NaiveDate::from_ymd_opt(2025, 2, 1).unwrap()));
        assert!(!p.is_open_on(NaiveDate::from_ymd_opt(2025, 2, 2).unwrap()));
    }

    #[test]
    fn test_option_multiplier() {
        assert_eq!(InvestmentClass::Option.contract_multiplier(), 100.0);
        assert_eq!(InvestmentClass::Public.contract_multiplier(), 1.0);
    }

    #[test]
    fn test_option_prices_off_underlying() {
        let mut p = position(NaiveDate::from_ymd_opt(2025, 1, 2).unwrap(), None);
        p.investment_class = "option".to_string();
        p.symbol = "AAPL250620C00200000".to_string();
        p.underlying_symbol = Some("AAPL".to_string());
        assert_eq!(p.pricing_symbol(), "AAPL");
    }

    #[test]
    fn test_unknown_class_degrades_to_public() {
        let mut p = position(NaiveDate::from_ymd_opt(2025, 1, 2).unwrap(), None);
        p.investment_class = "mystery".to_string();
        assert_eq!(p.class(), InvestmentClass::Public);
    }
}
