use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

use crate::errors::ErrorClass;

// ============================================================================
// Run state machine
// ============================================================================

/// Lifecycle of one calculation date:
/// PENDING → IN_PROGRESS → { COMPLETE | PARTIAL | FAILED }.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Pending,
    InProgress,
    Complete,
    Partial,
    Failed,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Pending => "pending",
            RunState::InProgress => "in_progress",
            RunState::Complete => "complete",
            RunState::Partial => "partial",
            RunState::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(RunState::Pending),
            "in_progress" => Some(RunState::InProgress),
            "complete" => Some(RunState::Complete),
            "partial" => Some(RunState::Partial),
            "failed" => Some(RunState::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Complete | RunState::Partial | RunState::Failed)
    }
}

// ============================================================================
// Per-phase records
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Success,
    Skipped { reason: String },
    Failed { error: String, class: ErrorClass },
}

impl PhaseStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, PhaseStatus::Success)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, PhaseStatus::Failed { .. })
    }
}

/// One executed unit of work: phase × optional portfolio × date.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub phase: String,
    /// None for global phases (market data, fundamentals, refresh, retag).
    pub portfolio_id: Option<Uuid>,
    pub status: PhaseStatus,
    pub duration_ms: i64,
    pub attempts: u32,
}

// ============================================================================
// Tracking row
// ============================================================================

/// Audit trail and backfill watermark: exactly one row per calculation date,
/// written only by the pipeline.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct BatchRun {
    pub id: Uuid,
    pub calculation_date: NaiveDate,
    pub state: String,
    pub phases: Json<Vec<PhaseRecord>>,
    /// True when every hard-dependency phase succeeded globally; the
    /// watermark only advances past dates where this holds.
    pub hard_deps_succeeded: bool,
    pub error_summary: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl BatchRun {
    pub fn run_state(&self) -> RunState {
        RunState::parse(&self.state).unwrap_or(RunState::Failed)
    }
}
