//! Canonical store contract.
//!
//! Every write goes through a [`StoreTx`]. Writers only ever use
//! insert-or-ignore, replace-on-conflict or plain insert, so concurrent cycles
//! need no application-level locking; the backend's transaction isolation is
//! the only serialization point.

pub mod memory;
pub mod postgres;

use crate::error::StoreError;
use crate::model::{
    Matchup, NameMatch, NewGame, NewTeam, OddsSnapshot, RatingFact, ResolutionAudit, Source,
    TeamMetadata,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Time window that counts as "in progress" for the active-subset poll.
#[derive(Debug, Clone, Copy)]
pub struct ActiveWindow {
    /// Start polling this long before tip-off.
    pub lookahead: Duration,
    /// Keep polling this long after tip-off.
    pub lookback: Duration,
}

impl ActiveWindow {
    pub fn bounds(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        (now - self.lookback, now + self.lookahead)
    }

    pub fn contains(&self, now: DateTime<Utc>, commence_time: DateTime<Utc>) -> bool {
        let (from, to) = self.bounds(now);
        commence_time >= from && commence_time <= to
    }
}

/// Entry point to the store: opens units of work and answers scheduler queries.
#[async_trait]
pub trait CanonicalStore: Send + Sync + 'static {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError>;

    /// Games whose tip-off falls inside `window` and that are not final.
    async fn active_matchups(
        &self,
        window: ActiveWindow,
        now: DateTime<Utc>,
    ) -> Result<Vec<Matchup>, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

/// One transaction against the canonical store. Dropping it without
/// [`StoreTx::commit`] rolls everything back.
#[async_trait]
pub trait StoreTx: Send {
    async fn commit(&mut self) -> Result<(), StoreError>;

    /// Mark a point a single record's writes can be undone to.
    async fn savepoint(&mut self) -> Result<(), StoreError>;
    async fn release_savepoint(&mut self) -> Result<(), StoreError>;
    async fn rollback_to_savepoint(&mut self) -> Result<(), StoreError>;

    // Teams and aliases

    /// Team whose native-name column for `source` holds exactly `name`.
    async fn find_by_native_name(
        &mut self,
        source: Source,
        name: &str,
    ) -> Result<Option<Uuid>, StoreError>;

    /// Teams whose canonical name or any alias equals `name`, ignoring case.
    /// Rated teams come first.
    async fn find_by_name(&mut self, name: &str) -> Result<Vec<NameMatch>, StoreError>;

    async fn canonical_name(&mut self, team_id: Uuid) -> Result<Option<String>, StoreError>;

    async fn has_ratings(&mut self, team_id: Uuid) -> Result<bool, StoreError>;

    /// Whether `(alias, source)` is already recorded verbatim.
    async fn alias_exists(&mut self, alias: &str, source: Source) -> Result<bool, StoreError>;

    /// Record an alias. Returns false if `(alias, source)` already existed.
    async fn insert_alias(
        &mut self,
        team_id: Uuid,
        alias: &str,
        source: Source,
    ) -> Result<bool, StoreError>;

    /// Insert a team, or return the existing id if the canonical name is taken.
    async fn insert_team(&mut self, team: &NewTeam) -> Result<Uuid, StoreError>;

    /// Fill the native-name cache column for `source` if it is still empty.
    async fn cache_native_name(
        &mut self,
        team_id: Uuid,
        source: Source,
        name: &str,
    ) -> Result<(), StoreError>;

    /// Overwrite the metadata fields that are present in `metadata`.
    async fn update_metadata(
        &mut self,
        team_id: Uuid,
        metadata: &TeamMetadata,
    ) -> Result<(), StoreError>;

    async fn record_resolution(&mut self, audit: &ResolutionAudit) -> Result<(), StoreError>;

    // Facts and snapshots

    /// Insert, or replace the existing row for `(team_id, rating_date)`.
    async fn upsert_rating(&mut self, fact: &RatingFact) -> Result<(), StoreError>;

    /// Insert or refresh a game keyed by external id; returns its id.
    async fn upsert_game(&mut self, game: &NewGame) -> Result<Uuid, StoreError>;

    /// Append a snapshot. Never overwrites a prior capture.
    async fn insert_snapshot(&mut self, snapshot: &OddsSnapshot) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_window_is_inclusive() {
        let now = Utc::now();
        let window = ActiveWindow {
            lookahead: Duration::minutes(60),
            lookback: Duration::minutes(180),
        };
        assert!(window.contains(now, now));
        assert!(window.contains(now, now + Duration::minutes(60)));
        assert!(window.contains(now, now - Duration::minutes(180)));
        assert!(!window.contains(now, now + Duration::minutes(61)));
        assert!(!window.contains(now, now - Duration::minutes(181)));
    }
}
