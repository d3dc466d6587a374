mod config;
mod db;
mod errors;
mod external;
mod jobs;
mod logging;
mod models;
mod pipeline;
mod services;

use std::sync::Arc;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::external::alphavantage::AlphaVantageProvider;
use crate::external::market_provider::MarketDataProvider;
use crate::external::provider_chain::ProviderChain;
use crate::external::twelvedata::TwelveDataProvider;
use crate::external::yahoo::YahooProvider;
use crate::logging::LoggingConfig;
use crate::pipeline::{run_for_date, run_with_backfill, RunContext};
use crate::services::correlation_service::DefaultCorrelationEngine;
use crate::services::failure_cache::FailureCache;
use crate::services::job_scheduler_service::JobSchedulerService;
use crate::services::rate_limiter::RateLimiter;
use crate::services::stress_test_service::DefaultStressTestEngine;

#[derive(Parser)]
#[command(
    name = "quantfolio-backend",
    about = "Daily portfolio risk analytics batch pipeline"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the full analytics sequence for one calculation date
    Run {
        #[arg(long)]
        date: NaiveDate,
        /// Restrict to these portfolio ids (comma separated)
        #[arg(long, value_delimiter = ',')]
        portfolios: Option<Vec<Uuid>>,
    },
    /// Detect and process every missing trading day up to the target date
    Backfill {
        /// Defaults to today
        #[arg(long)]
        to: Option<NaiveDate>,
        #[arg(long, value_delimiter = ',')]
        portfolios: Option<Vec<Uuid>>,
    },
    /// Sweep ridge regularization strengths and report mean R² per candidate
    TuneLambda {
        #[arg(long)]
        portfolio: Uuid,
        /// Defaults to today
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long, value_delimiter = ',', default_values_t = vec![0.01, 0.1, 0.5, 1.0, 5.0, 10.0, 50.0])]
        lambdas: Vec<f64>,
    },
    /// Seed mock bar history for symbols (development without provider keys)
    SeedMock {
        #[arg(long, value_delimiter = ',')]
        symbols: Vec<String>,
        #[arg(long, default_value_t = 400)]
        days: i64,
    },
    /// Show the tracking record for one calculation date
    Status {
        #[arg(long)]
        date: NaiveDate,
    },
    /// Run the cron scheduler (nightly batch after market close)
    Schedule,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    logging::init_logging(LoggingConfig::from_env())?;

    let cli = Cli::parse();

    let database_url = std::env::var("DATABASE_URL")?;
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    let config = PipelineConfig::from_env();
    let ctx = build_context(pool, config)?;

    match cli.command {
        Command::Run { date, portfolios } => {
            let result = run_for_date(&ctx, date, portfolios.as_deref()).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::Backfill { to, portfolios } => {
            let report = run_with_backfill(&ctx, to, portfolios.as_deref()).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::TuneLambda {
            portfolio,
            date,
            lambdas,
        } => {
            let calc_date = date.unwrap_or_else(|| chrono::Utc::now().date_naive());
            let Some(portfolio) = db::portfolio_queries::fetch_by_id(&ctx.pool, portfolio).await?
            else {
                return Err(format!("portfolio {portfolio} not found").into());
            };
            let outcome = services::factor_service::tune_lambda(
                &ctx.pool,
                &ctx.config,
                &portfolio,
                calc_date,
                &lambdas,
            )
            .await?;
            match outcome {
                models::Outcome::Completed(candidates) => {
                    println!("{}", serde_json::to_string_pretty(&candidates)?);
                }
                models::Outcome::Skipped(reason) => {
                    println!("{{\"skipped\": \"{}\"}}", reason.code());
                }
            }
        }
        Command::SeedMock { symbols, days } => {
            let today = chrono::Utc::now().date_naive();
            for symbol in symbols {
                let bars = services::market_data_service::generate_mock_bars(
                    &ctx.pool, &symbol, today, days,
                )
                .await?;
                println!("seeded {bars} bars for {symbol}");
            }
        }
        Command::Status { date } => match db::batch_run_queries::fetch_by_date(&ctx.pool, date)
            .await?
        {
            Some(run) => println!("{}", serde_json::to_string_pretty(&run)?),
            None => println!("{{\"status\": \"no run recorded for {date}\"}}"),
        },
        Command::Schedule => {
            let mut scheduler = JobSchedulerService::new(ctx).await?;
            scheduler.start().await?;
            tracing::info!("Scheduler running; press Ctrl-C to stop");
            tokio::signal::ctrl_c().await?;
        }
    }

    Ok(())
}

/// Wire the provider chain and engines from the environment. PRICE_PROVIDER
/// selects the chain shape; "multi" (the default) is
/// Twelve Data → Alpha Vantage → Yahoo.
fn build_context(
    pool: sqlx::PgPool,
    config: PipelineConfig,
) -> Result<RunContext, Box<dyn std::error::Error>> {
    let provider_name =
        std::env::var("PRICE_PROVIDER").unwrap_or_else(|_| "multi".to_string());

    let providers: Vec<Box<dyn MarketDataProvider>> = match provider_name.to_lowercase().as_str() {
        "twelvedata" => {
            tracing::info!("📊 Using price provider: Twelve Data only");
            vec![Box::new(TwelveDataProvider::from_env(Arc::new(
                RateLimiter::new(3, 8),
            ))?)]
        }
        "alphavantage" => {
            tracing::info!("📊 Using price provider: Alpha Vantage only");
            vec![Box::new(AlphaVantageProvider::from_env(Arc::new(
                RateLimiter::new(2, 5),
            ))?)]
        }
        "yahoo" => {
            tracing::info!("📊 Using price provider: Yahoo only");
            vec![Box::new(YahooProvider::new())]
        }
        "multi" => {
            tracing::info!(
                "📊 Using price provider chain: Twelve Data → Alpha Vantage → Yahoo"
            );
            vec![
                Box::new(TwelveDataProvider::from_env(Arc::new(RateLimiter::new(3, 8)))?),
                Box::new(AlphaVantageProvider::from_env(Arc::new(RateLimiter::new(2, 5)))?),
                Box::new(YahooProvider::new()),
            ]
        }
        other => {
            return Err(format!(
                "Invalid PRICE_PROVIDER: {other}. Must be 'twelvedata', 'alphavantage', 'yahoo', or 'multi'"
            )
            .into());
        }
    };

    let config = Arc::new(config);

    Ok(RunContext {
        pool: Arc::new(pool),
        chain: Arc::new(ProviderChain::new(providers)),
        failure_cache: Arc::new(FailureCache::new()),
        correlation_engine: Arc::new(DefaultCorrelationEngine::new(&config)),
        stress_test_engine: Arc::new(DefaultStressTestEngine),
        config,
    })
}
