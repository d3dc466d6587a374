use std::sync::Arc;

use sqlx::PgPool;

use crate::config::PipelineConfig;
use crate::external::provider_chain::ProviderChain;
use crate::services::correlation_service::CorrelationEngine;
use crate::services::failure_cache::FailureCache;
use crate::services::stress_test_service::StressTestEngine;

/// Everything a date run needs, passed explicitly through the call chain.
/// There is deliberately no process-wide run state: concurrent test runs and
/// re-entrant backfills must not see each other.
#[derive(Clone)]
pub struct RunContext {
    pub pool: Arc<PgPool>,
    pub chain: Arc<ProviderChain>,
    pub failure_cache: Arc<FailureCache>,
    pub config: Arc<PipelineConfig>,
    pub correlation_engine: Arc<dyn CorrelationEngine>,
    pub stress_test_engine: Arc<dyn StressTestEngine>,
}

impl RunContext {
    /// A fresh context for the next calculation date in a backfill. The
    /// shared components are handles (pool, caches); every date still gets
    /// its own short-lived connections out of the pool.
    pub fn fresh(&self) -> RunContext {
        self.clone()
    }
}
