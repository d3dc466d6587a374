pub mod backfill;
pub mod context;
pub mod orchestrator;
pub mod phases;
pub mod retry;

pub use backfill::{run_with_backfill, BackfillReport};
pub use context::RunContext;
pub use orchestrator::{run_for_date, DateRunResult};
