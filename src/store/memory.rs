//! In-memory canonical store with the same uniqueness rules as the Postgres
//! schema. Transactions take the store lock for their whole lifetime, so
//! they are fully serialized.

use super::{ActiveWindow, CanonicalStore, StoreTx};
use crate::error::StoreError;
use crate::model::{
    Matchup, NameMatch, NewGame, NewTeam, OddsSnapshot, RatingFact, ResolutionAudit, Source,
    TeamMetadata,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct TeamRow {
    pub id: Uuid,
    pub canonical_name: String,
    pub barttorvik_name: Option<String>,
    pub odds_api_name: Option<String>,
    pub metadata: TeamMetadata,
}

impl TeamRow {
    fn native_name(&self, source: Source) -> Option<&str> {
        match source {
            Source::Barttorvik => self.barttorvik_name.as_deref(),
            Source::TheOddsApi => self.odds_api_name.as_deref(),
            Source::Manual => None,
        }
    }

    fn native_name_mut(&mut self, source: Source) -> Option<&mut Option<String>> {
        match source {
            Source::Barttorvik => Some(&mut self.barttorvik_name),
            Source::TheOddsApi => Some(&mut self.odds_api_name),
            Source::Manual => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasRow {
    pub team_id: Uuid,
    pub alias: String,
    pub source: Source,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GameRow {
    pub id: Uuid,
    pub external_id: String,
    pub home_team_id: Uuid,
    pub away_team_id: Uuid,
    pub commence_time: DateTime<Utc>,
    pub status: String,
}

/// Full contents of a [`MemoryStore`].
#[derive(Debug, Clone, Default)]
pub struct MemoryState {
    pub teams: Vec<TeamRow>,
    pub aliases: Vec<AliasRow>,
    pub ratings: HashMap<(Uuid, NaiveDate), RatingFact>,
    pub games: Vec<GameRow>,
    pub snapshots: Vec<OddsSnapshot>,
    pub audits: Vec<ResolutionAudit>,
}

impl MemoryState {
    pub fn team(&self, id: Uuid) -> Option<&TeamRow> {
        self.teams.iter().find(|t| t.id == id)
    }

    pub fn team_by_name(&self, canonical_name: &str) -> Option<&TeamRow> {
        self.teams.iter().find(|t| t.canonical_name == canonical_name)
    }

    pub fn aliases_of(&self, team_id: Uuid) -> Vec<&AliasRow> {
        self.aliases.iter().filter(|a| a.team_id == team_id).collect()
    }

    pub fn game(&self, external_id: &str) -> Option<&GameRow> {
        self.games.iter().find(|g| g.external_id == external_id)
    }

    fn has_ratings(&self, team_id: Uuid) -> bool {
        self.ratings.keys().any(|(id, _)| *id == team_id)
    }
}

/// Shared handle; clones see the same data.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<AsyncMutex<MemoryState>>,
    unavailable: Arc<AtomicBool>,
    poisoned: Arc<Mutex<HashSet<String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the committed state.
    pub async fn state(&self) -> MemoryState {
        self.state.lock().await.clone()
    }

    /// Simulate losing the connection: `begin` and `ping` fail while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make every write that touches `name` fail, to exercise per-record skips.
    pub fn poison_name(&self, name: &str) {
        if let Ok(mut names) = self.poisoned.lock() {
            names.insert(name.to_string());
        }
    }

    /// Force a game's status, e.g. to mark it final.
    pub async fn set_game_status(&self, external_id: &str, status: &str) {
        let mut state = self.state.lock().await;
        if let Some(game) = state.games.iter_mut().find(|g| g.external_id == external_id) {
            game.status = status.to_string();
        }
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store marked unavailable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl CanonicalStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        self.check_available()?;
        let guard = self.state.clone().lock_owned().await;
        let work = guard.clone();
        let poisoned = self
            .poisoned
            .lock()
            .map(|names| names.clone())
            .unwrap_or_default();
        Ok(Box::new(MemoryTx {
            guard: Some(guard),
            work,
            savepoints: Vec::new(),
            finished: false,
            unavailable: self.unavailable.clone(),
            poisoned,
        }))
    }

    async fn active_matchups(
        &self,
        window: ActiveWindow,
        now: DateTime<Utc>,
    ) -> Result<Vec<Matchup>, StoreError> {
        self.check_available()?;
        let state = self.state.lock().await;
        let mut out: Vec<Matchup> = state
            .games
            .iter()
            .filter(|g| g.status != "final" && window.contains(now, g.commence_time))
            .map(|g| Matchup {
                game_id: g.id,
                external_id: g.external_id.clone(),
                commence_time: g.commence_time,
            })
            .collect();
        out.sort_by_key(|m| m.commence_time);
        Ok(out)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check_available()
    }
}

struct MemoryTx {
    /// Released on commit so readers are not blocked by a finished transaction.
    guard: Option<OwnedMutexGuard<MemoryState>>,
    work: MemoryState,
    savepoints: Vec<MemoryState>,
    finished: bool,
    unavailable: Arc<AtomicBool>,
    poisoned: HashSet<String>,
}

impl MemoryTx {
    fn live(&self) -> Result<(), StoreError> {
        if self.finished {
            return Err(StoreError::TransactionClosed);
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection lost".into()));
        }
        Ok(())
    }

    fn writable(&self, name: &str) -> Result<(), StoreError> {
        self.live()?;
        if self.poisoned.contains(name) {
            return Err(StoreError::Unavailable(format!("write rejected for '{name}'")));
        }
        Ok(())
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn commit(&mut self) -> Result<(), StoreError> {
        self.live()?;
        let mut guard = self.guard.take().ok_or(StoreError::TransactionClosed)?;
        *guard = std::mem::take(&mut self.work);
        self.finished = true;
        Ok(())
    }

    async fn savepoint(&mut self) -> Result<(), StoreError> {
        self.live()?;
        self.savepoints.push(self.work.clone());
        Ok(())
    }

    async fn release_savepoint(&mut self) -> Result<(), StoreError> {
        self.live()?;
        self.savepoints.pop().map(|_| ()).ok_or(StoreError::NoSavepoint)
    }

    async fn rollback_to_savepoint(&mut self) -> Result<(), StoreError> {
        self.live()?;
        self.work = self.savepoints.pop().ok_or(StoreError::NoSavepoint)?;
        Ok(())
    }

    async fn find_by_native_name(
        &mut self,
        source: Source,
        name: &str,
    ) -> Result<Option<Uuid>, StoreError> {
        self.live()?;
        Ok(self
            .work
            .teams
            .iter()
            .find(|t| t.native_name(source) == Some(name))
            .map(|t| t.id))
    }

    async fn find_by_name(&mut self, name: &str) -> Result<Vec<NameMatch>, StoreError> {
        self.live()?;
        let needle = name.to_lowercase();
        let mut ids: Vec<Uuid> = Vec::new();
        for team in &self.work.teams {
            if team.canonical_name.to_lowercase() == needle {
                ids.push(team.id);
            }
        }
        for alias in &self.work.aliases {
            if alias.alias.to_lowercase() == needle && !ids.contains(&alias.team_id) {
                ids.push(alias.team_id);
            }
        }

        let mut out: Vec<NameMatch> = ids
            .into_iter()
            .filter_map(|id| self.work.team(id))
            .map(|t| NameMatch {
                team_id: t.id,
                canonical_name: t.canonical_name.clone(),
                has_ratings: self.work.has_ratings(t.id),
            })
            .collect();
        out.sort_by(|a, b| {
            b.has_ratings
                .cmp(&a.has_ratings)
                .then_with(|| a.canonical_name.cmp(&b.canonical_name))
        });
        Ok(out)
    }

    async fn canonical_name(&mut self, team_id: Uuid) -> Result<Option<String>, StoreError> {
        self.live()?;
        Ok(self.work.team(team_id).map(|t| t.canonical_name.clone()))
    }

    async fn has_ratings(&mut self, team_id: Uuid) -> Result<bool, StoreError> {
        self.live()?;
        Ok(self.work.has_ratings(team_id))
    }

    async fn alias_exists(&mut self, alias: &str, source: Source) -> Result<bool, StoreError> {
        self.live()?;
        Ok(self
            .work
            .aliases
            .iter()
            .any(|a| a.alias == alias && a.source == source))
    }

    async fn insert_alias(
        &mut self,
        team_id: Uuid,
        alias: &str,
        source: Source,
    ) -> Result<bool, StoreError> {
        self.writable(alias)?;
        if self
            .work
            .aliases
            .iter()
            .any(|a| a.alias == alias && a.source == source)
        {
            return Ok(false);
        }
        self.work.aliases.push(AliasRow {
            team_id,
            alias: alias.to_string(),
            source,
        });
        Ok(true)
    }

    async fn insert_team(&mut self, team: &NewTeam) -> Result<Uuid, StoreError> {
        self.writable(&team.canonical_name)?;
        if let Some(existing) = self.work.team_by_name(&team.canonical_name) {
            return Ok(existing.id);
        }
        let row = TeamRow {
            id: Uuid::new_v4(),
            canonical_name: team.canonical_name.clone(),
            barttorvik_name: None,
            odds_api_name: None,
            metadata: team.metadata.clone(),
        };
        let id = row.id;
        self.work.teams.push(row);
        Ok(id)
    }

    async fn cache_native_name(
        &mut self,
        team_id: Uuid,
        source: Source,
        name: &str,
    ) -> Result<(), StoreError> {
        self.writable(name)?;
        if let Some(team) = self.work.teams.iter_mut().find(|t| t.id == team_id) {
            if let Some(slot) = team.native_name_mut(source) {
                if slot.is_none() {
                    *slot = Some(name.to_string());
                }
            }
        }
        Ok(())
    }

    async fn update_metadata(
        &mut self,
        team_id: Uuid,
        metadata: &TeamMetadata,
    ) -> Result<(), StoreError> {
        self.live()?;
        if let Some(team) = self.work.teams.iter_mut().find(|t| t.id == team_id) {
            if metadata.conference.is_some() {
                team.metadata.conference = metadata.conference.clone();
            }
        }
        Ok(())
    }

    async fn record_resolution(&mut self, audit: &ResolutionAudit) -> Result<(), StoreError> {
        self.live()?;
        self.work.audits.push(audit.clone());
        Ok(())
    }

    async fn upsert_rating(&mut self, fact: &RatingFact) -> Result<(), StoreError> {
        self.live()?;
        if self.work.team(fact.team_id).is_none() {
            return Err(StoreError::Conflict(format!(
                "team_ratings.team_id {} has no team",
                fact.team_id
            )));
        }
        self.work
            .ratings
            .insert((fact.team_id, fact.rating_date), fact.clone());
        Ok(())
    }

    async fn upsert_game(&mut self, game: &NewGame) -> Result<Uuid, StoreError> {
        self.live()?;
        if let Some(row) = self
            .work
            .games
            .iter_mut()
            .find(|g| g.external_id == game.external_id)
        {
            row.home_team_id = game.home_team_id;
            row.away_team_id = game.away_team_id;
            row.commence_time = game.commence_time;
            return Ok(row.id);
        }
        let id = Uuid::new_v4();
        self.work.games.push(GameRow {
            id,
            external_id: game.external_id.clone(),
            home_team_id: game.home_team_id,
            away_team_id: game.away_team_id,
            commence_time: game.commence_time,
            status: "scheduled".to_string(),
        });
        Ok(id)
    }

    async fn insert_snapshot(&mut self, snapshot: &OddsSnapshot) -> Result<(), StoreError> {
        self.live()?;
        let duplicate = self.work.snapshots.iter().any(|s| {
            s.time == snapshot.time
                && s.game_id == snapshot.game_id
                && s.bookmaker == snapshot.bookmaker
                && s.market_type == snapshot.market_type
                && s.period == snapshot.period
        });
        if !duplicate {
            self.work.snapshots.push(snapshot.clone());
        }
        Ok(())
    }
}
