//! Canonical record shapes shared by the resolver, the store and the workers.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A data provider that names teams in its own way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    /// Barttorvik team ratings.
    Barttorvik,
    /// The Odds API.
    TheOddsApi,
    /// Curated alias imports.
    Manual,
}

impl Source {
    /// Value stored in `team_aliases.source`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Barttorvik => "barttorvik",
            Source::TheOddsApi => "the_odds_api",
            Source::Manual => "manual",
        }
    }

    /// Column on `teams` that caches this source's exact spelling, if any.
    pub fn native_name_column(&self) -> Option<&'static str> {
        match self {
            Source::Barttorvik => Some("barttorvik_name"),
            Source::TheOddsApi => Some("odds_api_name"),
            Source::Manual => None,
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which resolution step produced a team id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchedVia {
    NativeName,
    CanonicalOrAlias,
    Normalized,
    Created,
}

impl MatchedVia {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchedVia::NativeName => "native_name",
            MatchedVia::CanonicalOrAlias => "canonical_or_alias",
            MatchedVia::Normalized => "normalized",
            MatchedVia::Created => "created",
        }
    }
}

/// Optional descriptive attributes of a team.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamMetadata {
    pub conference: Option<String>,
}

impl TeamMetadata {
    pub fn is_empty(&self) -> bool {
        self.conference.is_none()
    }
}

/// Fields needed to create a team row.
#[derive(Debug, Clone)]
pub struct NewTeam {
    pub canonical_name: String,
    pub metadata: TeamMetadata,
}

/// A team whose canonical name or alias matched a lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct NameMatch {
    pub team_id: Uuid,
    pub canonical_name: String,
    pub has_ratings: bool,
}

/// Measured rating values, as published by the ratings provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RatingValues {
    pub adj_o: f64,
    pub adj_d: f64,
    pub tempo: f64,
    pub torvik_rank: i32,
    pub wins: i32,
    pub losses: i32,
    pub games_played: i32,
    pub barthag: f64,
    pub wab: f64,
    // Four factors
    pub efg: f64,
    pub efgd: f64,
    pub tor: f64,
    pub tord: f64,
    pub orb: f64,
    pub drb: f64,
    pub ftr: f64,
    pub ftrd: f64,
    // Shooting breakdown
    pub two_pt_pct: f64,
    pub two_pt_pct_d: f64,
    pub three_pt_pct: f64,
    pub three_pt_pct_d: f64,
    pub three_pt_rate: f64,
    pub three_pt_rate_d: f64,
}

impl RatingValues {
    pub fn net_rating(&self) -> f64 {
        self.adj_o - self.adj_d
    }
}

/// One day's ratings for one team. Unique per `(team_id, rating_date)`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RatingFact {
    pub team_id: Uuid,
    pub rating_date: NaiveDate,
    pub values: RatingValues,
}

/// A scheduled game between two canonical teams.
#[derive(Debug, Clone, PartialEq)]
pub struct NewGame {
    pub external_id: String,
    pub home_team_id: Uuid,
    pub away_team_id: Uuid,
    pub commence_time: DateTime<Utc>,
}

/// A game inside the active polling window.
#[derive(Debug, Clone, PartialEq)]
pub struct Matchup {
    pub game_id: Uuid,
    pub external_id: String,
    pub commence_time: DateTime<Utc>,
}

/// Immutable odds observation for one game/bookmaker/market at one capture time.
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct OddsSnapshot {
    pub time: DateTime<Utc>,
    pub game_id: Uuid,
    pub external_id: String,
    pub bookmaker: String,
    pub market_type: String,
    pub period: String,
    pub home_line: Option<f64>,
    pub away_line: Option<f64>,
    pub total_line: Option<f64>,
    pub home_price: Option<i32>,
    pub away_price: Option<i32>,
    pub over_price: Option<i32>,
    pub under_price: Option<i32>,
}

/// Row written to `team_resolution_audit`.
#[derive(Debug, Clone)]
pub struct ResolutionAudit {
    pub input_name: String,
    pub resolved_name: String,
    pub source: Source,
    pub context: &'static str,
    pub matched_via: MatchedVia,
    pub has_ratings: bool,
}
