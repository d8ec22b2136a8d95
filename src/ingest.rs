//! Ingestion worker: raw source records in, canonical facts and snapshots out.
//!
//! Ratings from one fetch are written in a single transaction with a savepoint
//! around each record, so a bad record is rolled back on its own while a lost
//! connection aborts the whole batch. Each odds event is its own transaction.

use crate::error::{IngestError, StoreError};
use crate::model::{NewGame, OddsSnapshot, RatingFact, Source};
use crate::publish::SnapshotPublisher;
use crate::resolver::EntityResolver;
use crate::source::{RawOddsEvent, RawRating};
use crate::store::{CanonicalStore, StoreTx};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Counts for one batch of records from a single fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RefreshReport {
    pub fetched: usize,
    pub stored: usize,
    pub skipped: usize,
    /// Odds snapshots written, for odds batches.
    pub snapshots: usize,
}

#[derive(Clone)]
pub struct IngestionWorker {
    resolver: EntityResolver,
    publisher: Option<Arc<dyn SnapshotPublisher>>,
}

impl IngestionWorker {
    pub fn new(resolver: EntityResolver) -> Self {
        Self {
            resolver,
            publisher: None,
        }
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn SnapshotPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Write one day's ratings for every team in `ratings`.
    ///
    /// Per-record failures are logged and skipped. A failure of the batch
    /// transaction itself rolls everything back and is returned.
    pub async fn ingest_ratings(
        &self,
        store: &dyn CanonicalStore,
        ratings: &[RawRating],
        rating_date: NaiveDate,
    ) -> Result<RefreshReport, StoreError> {
        let mut report = RefreshReport {
            fetched: ratings.len(),
            ..RefreshReport::default()
        };

        let mut tx = store.begin().await?;
        for raw in ratings {
            tx.savepoint().await?;
            match self.ingest_rating(tx.as_mut(), raw, rating_date).await {
                Ok(team_id) => {
                    tx.release_savepoint().await?;
                    report.stored += 1;
                    debug!("Stored rating for '{}' ({})", raw.team_name, team_id);
                }
                Err(e) => {
                    tx.rollback_to_savepoint().await?;
                    report.skipped += 1;
                    warn!("Skipping rating for '{}': {}", raw.team_name, e);
                }
            }
        }
        tx.commit().await?;

        info!(
            "Ratings batch for {}: {} fetched, {} stored, {} skipped",
            rating_date, report.fetched, report.stored, report.skipped
        );
        Ok(report)
    }

    async fn ingest_rating(
        &self,
        tx: &mut dyn StoreTx,
        raw: &RawRating,
        rating_date: NaiveDate,
    ) -> Result<Uuid, IngestError> {
        let resolved = self
            .resolver
            .resolve_with_metadata(tx, &raw.team_name, Source::Barttorvik, &raw.metadata)
            .await
            .map_err(|source| IngestError::Resolve {
                name: raw.team_name.clone(),
                source,
            })?;

        if !raw.metadata.is_empty() {
            tx.update_metadata(resolved.team_id, &raw.metadata).await?;
        }

        tx.upsert_rating(&RatingFact {
            team_id: resolved.team_id,
            rating_date,
            values: raw.values.clone(),
        })
        .await?;

        Ok(resolved.team_id)
    }

    /// Upsert the game for `event` and append a snapshot per quote, all in one
    /// transaction. Returns the number of snapshots written.
    pub async fn ingest_event(
        &self,
        store: &dyn CanonicalStore,
        event: &RawOddsEvent,
        captured_at: DateTime<Utc>,
    ) -> Result<usize, IngestError> {
        let commence_time = event.commence_time.ok_or_else(|| IngestError::Incomplete {
            external_id: event.external_id.clone(),
            field: "commence_time",
        })?;

        let mut tx = store.begin().await?;

        let home = self
            .resolve_side(tx.as_mut(), &event.home_team, "home")
            .await?;
        let away = self
            .resolve_side(tx.as_mut(), &event.away_team, "away")
            .await?;

        if home == away {
            return Err(IngestError::SameTeam {
                team_id: home,
                home: event.home_team.clone(),
                away: event.away_team.clone(),
            });
        }

        let game_id = tx
            .upsert_game(&NewGame {
                external_id: event.external_id.clone(),
                home_team_id: home,
                away_team_id: away,
                commence_time,
            })
            .await?;

        let snapshots: Vec<OddsSnapshot> = event
            .quotes
            .iter()
            .map(|q| OddsSnapshot {
                time: captured_at,
                game_id,
                external_id: event.external_id.clone(),
                bookmaker: q.bookmaker.clone(),
                market_type: q.market_type.clone(),
                period: q.period.clone(),
                home_line: q.home_line,
                away_line: q.away_line,
                total_line: q.total_line,
                home_price: q.home_price,
                away_price: q.away_price,
                over_price: q.over_price,
                under_price: q.under_price,
            })
            .collect();

        for snapshot in &snapshots {
            tx.insert_snapshot(snapshot).await?;
        }
        tx.commit().await?;

        if let Some(publisher) = &self.publisher {
            if let Err(e) = publisher.publish(&snapshots).await {
                warn!("Failed to publish snapshots for {}: {}", event.external_id, e);
            }
        }

        Ok(snapshots.len())
    }

    async fn resolve_side(
        &self,
        tx: &mut dyn StoreTx,
        name: &str,
        context: &'static str,
    ) -> Result<Uuid, IngestError> {
        let resolved = self
            .resolver
            .resolve(tx, name, Source::TheOddsApi)
            .await
            .map_err(|source| IngestError::Resolve {
                name: name.to_string(),
                source,
            })?;
        self.resolver
            .audit(tx, name, resolved, Source::TheOddsApi, context)
            .await;
        Ok(resolved.team_id)
    }

    /// Ingest every event from a board sweep. Bad events are skipped; a store
    /// that cannot open a transaction fails the sweep.
    pub async fn ingest_board(
        &self,
        store: &dyn CanonicalStore,
        events: &[RawOddsEvent],
        captured_at: DateTime<Utc>,
    ) -> Result<RefreshReport, StoreError> {
        let mut report = RefreshReport {
            fetched: events.len(),
            ..RefreshReport::default()
        };

        for event in events {
            match self.ingest_event(store, event, captured_at).await {
                Ok(count) => {
                    report.stored += 1;
                    report.snapshots += count;
                }
                Err(IngestError::Store(e)) => return Err(e),
                Err(e) => {
                    report.skipped += 1;
                    warn!("Skipping event {}: {}", event.external_id, e);
                }
            }
        }

        info!(
            "Odds board: {} events, {} stored, {} skipped, {} snapshots",
            report.fetched, report.stored, report.skipped, report.snapshots
        );
        Ok(report)
    }
}
