//! NCAA Basketball Ingestion Service v6.0
//!
//! Daily ratings refresh from Barttorvik, live odds polling from The Odds API,
//! both resolved onto one canonical team table in PostgreSQL.

use anyhow::{Context, Result};
use ncaam_ingestion::config::Config;
use ncaam_ingestion::health;
use ncaam_ingestion::ingest::IngestionWorker;
use ncaam_ingestion::normalize::NormalizationRules;
use ncaam_ingestion::publish::RedisPublisher;
use ncaam_ingestion::resolver::EntityResolver;
use ncaam_ingestion::retry::Retrier;
use ncaam_ingestion::scheduler::{Scheduler, SchedulerConfig};
use ncaam_ingestion::seed::{self, AliasSeed};
use ncaam_ingestion::source::{BarttorvikClient, OddsApiClient};
use ncaam_ingestion::store::{CanonicalStore, PgStore};
use std::sync::Arc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Local development only; deployed containers get env vars and /run/secrets
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("ncaam_ingestion=info".parse()?),
        )
        .init();

    info!("NCAA Basketball Ingestion Service v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env().context("Invalid configuration")?;

    let store = PgStore::connect_with_retry(&config.database_url, 5).await?;
    if config.run_migrations {
        store.migrate().await.context("Failed to apply migrations")?;
    }

    let rules = match &config.normalization_rules_file {
        Some(path) => {
            info!("Loading normalization rules from {}", path);
            NormalizationRules::from_file(path)?
        }
        None => NormalizationRules::default(),
    };
    let resolver = EntityResolver::new(rules);

    if let Some(path) = &config.alias_seed_file {
        let alias_seed = AliasSeed::from_file(path)?;
        seed::apply_seed(&store, &resolver, &alias_seed)
            .await
            .context("Failed to apply alias seed")?;
    }

    let mut worker = IngestionWorker::new(resolver);
    if let Some(url) = &config.redis_url {
        match RedisPublisher::connect_with_retry(url, 5).await {
            Ok(publisher) => worker = worker.with_publisher(Arc::new(publisher)),
            Err(e) => warn!("Snapshot publishing disabled: {:#}", e),
        }
    }

    let ratings = BarttorvikClient::new(config.season)?;
    let odds = OddsApiClient::new(
        config.odds_api_key.clone(),
        config.sport_key.clone(),
        config.odds_requests_per_minute,
    )?;

    let store: Arc<dyn CanonicalStore> = Arc::new(store);
    let scheduler = Scheduler::new(
        store.clone(),
        Arc::new(ratings),
        Arc::new(odds),
        worker,
        Retrier::new(config.retry.clone()),
        SchedulerConfig::from(&config),
    );

    // Check if running in one-shot mode (manual trigger)
    if config.run_once {
        info!("Running in one-shot mode (RUN_ONCE=true)");
        match scheduler.run_once().await {
            Ok((refresh, tick)) => {
                info!(
                    "One-shot run completed: {} ratings, {} events, {} active matchups ({} failed)",
                    refresh.ratings.stored,
                    refresh.board.stored,
                    tick.matchups,
                    tick.failures.len()
                );
            }
            Err(e) => {
                error!("One-shot run failed: {:?}", e);
                return Err(e);
            }
        }
        return Ok(());
    }

    // Start health check server
    let app = health::router(scheduler.health(), scheduler.trigger(), store);
    let health_addr = format!("0.0.0.0:{}", config.health_port);
    info!("Health endpoint listening on {}", health_addr);

    let listener = tokio::net::TcpListener::bind(&health_addr).await?;
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Health server error: {}", e);
        }
    });

    scheduler.start();

    // Handle shutdown gracefully (continuous mode)
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutting down...");
    scheduler.shutdown().await;

    Ok(())
}
