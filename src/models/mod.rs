pub mod batch_run;
pub mod cash_flow;
pub mod factor;
pub mod market_data;
pub mod outcome;
pub mod portfolio;
pub mod position;
pub mod snapshot;
pub mod trade;

pub use batch_run::{BatchRun, PhaseRecord, PhaseStatus, RunState};
pub use cash_flow::{CapitalFlow, FlowType};
pub use factor::{FactorType, RegressionMethod};
pub use market_data::{CompanyProfile, MarketDataPoint};
pub use outcome::{Outcome, SkipReason};
pub use portfolio::Portfolio;
pub use position::{InvestmentClass, Position};
pub use snapshot::{CreatePortfolioSnapshot, PortfolioSnapshot};
pub use trade::RealizedTrade;
