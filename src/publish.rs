//! Fan-out of stored odds snapshots to downstream consumers.

use crate::model::OddsSnapshot;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use redis::AsyncCommands;
use std::time::Duration;
use tracing::{info, warn};

/// Redis stream consumers read live odds from.
pub const ODDS_STREAM: &str = "odds.live";

/// Receives snapshots after they are committed. Best-effort: callers log a
/// failure and move on.
#[async_trait]
pub trait SnapshotPublisher: Send + Sync {
    async fn publish(&self, snapshots: &[OddsSnapshot]) -> Result<()>;
}

#[derive(Clone)]
pub struct RedisPublisher {
    redis: redis::aio::ConnectionManager,
}

impl RedisPublisher {
    pub async fn connect_with_retry(url: &str, max_retries: u32) -> Result<Self> {
        let mut attempt = 0;
        loop {
            let result = match redis::Client::open(url) {
                Ok(client) => redis::aio::ConnectionManager::new(client).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(redis) => {
                    info!("Connected to Redis");
                    return Ok(Self { redis });
                }
                Err(e) => {
                    attempt += 1;
                    if attempt >= max_retries {
                        return Err(anyhow!(
                            "Failed to connect to Redis after {} attempts: {}",
                            max_retries,
                            e
                        ));
                    }
                    warn!("Redis connection attempt {} failed: {}. Retrying...", attempt, e);
                    tokio::time::sleep(Duration::from_secs(2u64.pow(attempt))).await;
                }
            }
        }
    }
}

#[async_trait]
impl SnapshotPublisher for RedisPublisher {
    async fn publish(&self, snapshots: &[OddsSnapshot]) -> Result<()> {
        if snapshots.is_empty() {
            return Ok(());
        }

        let mut conn = self.redis.clone();

        for snapshot in snapshots {
            let payload = serde_json::to_string(snapshot)?;

            let _: String = conn
                .xadd(
                    ODDS_STREAM,
                    "*",
                    &[
                        ("game_id", snapshot.game_id.to_string()),
                        ("bookmaker", snapshot.bookmaker.clone()),
                        ("market_type", snapshot.market_type.clone()),
                        ("period", snapshot.period.clone()),
                        ("data", payload),
                    ],
                )
                .await?;
        }

        info!("Published {} snapshots to Redis", snapshots.len());
        Ok(())
    }
}
