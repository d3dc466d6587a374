pub mod batch_run_queries;
pub mod cash_flow_queries;
pub mod factor_queries;
pub mod market_data_queries;
pub mod portfolio_queries;
pub mod position_queries;
pub mod profile_queries;
pub mod snapshot_queries;
pub mod stress_test_queries;
pub mod trade_queries;
