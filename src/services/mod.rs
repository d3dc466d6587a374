pub mod correlation_service;
pub mod factor_service;
pub mod failure_cache;
pub mod job_scheduler_service;
pub mod market_data_service;
pub mod pnl_service;
pub mod rate_limiter;
pub mod risk_service;
pub mod sector_service;
pub mod stress_test_service;
pub mod trading_calendar;
