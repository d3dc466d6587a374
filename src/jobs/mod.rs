//! Background jobs executed by the cron scheduler.
//!
//! Jobs here are idempotent (re-running converges on the same stored state),
//! fault-tolerant (per-date and per-portfolio failures are recorded, not
//! fatal), and observable (every unit of work logs status, duration and
//! error class). The nightly batch job is the production trigger for the
//! whole pipeline; ad hoc runs go through the CLI.

pub mod nightly_batch_job;
