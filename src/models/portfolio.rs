use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// One tenant portfolio. Structural fields are owned by the user-facing CRUD
// layer; the pipeline only ever writes equity_balance.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Portfolio {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    /// Equity at inception. Immutable; once snapshots exist the displayed
    /// balance is the rolled-forward equity_balance, never this field.
    pub starting_equity: BigDecimal,
    /// Live equity balance, rolled forward daily by the P&L phase.
    pub equity_balance: BigDecimal,
    pub is_active: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}
