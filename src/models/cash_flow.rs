use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// A contribution into or withdrawal out of a portfolio.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CapitalFlow {
    pub id: Uuid,
    pub portfolio_id: Uuid,
    /// "contribution" or "withdrawal"; see FlowType.
    pub flow_type: String,
    pub amount: BigDecimal,
    pub flow_date: NaiveDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowType {
    Contribution,
    Withdrawal,
}

impl FlowType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "contribution" => Some(FlowType::Contribution),
            "withdrawal" => Some(FlowType::Withdrawal),
            _ => None,
        }
    }
}

impl CapitalFlow {
    /// Unknown flow types count as contributions, matching the SQL rollup.
    pub fn kind(&self) -> FlowType {
        FlowType::parse(&self.flow_type).unwrap_or(FlowType::Contribution)
    }

    /// Contributions count positive, withdrawals negative.
    pub fn signed_amount(&self) -> BigDecimal {
        match self.kind() {
            FlowType::Withdrawal => -self.amount.clone(),
            FlowType::Contribution => self.amount.clone(),
        }
    }
}
