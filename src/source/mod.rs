//! Source clients.
//!
//! Each provider gets a narrow adapter that turns its wire format into one of
//! the common raw-record shapes below. Adapters make exactly one network call
//! per method; retry and backoff are layered on uniformly by
//! [`crate::retry::Retrier`].

pub mod barttorvik;
pub mod odds_api;

use crate::error::FetchError;
use crate::model::{RatingValues, TeamMetadata};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

pub use barttorvik::BarttorvikClient;
pub use odds_api::OddsApiClient;

/// One team's ratings as published by a ratings provider.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRating {
    /// The provider's own spelling of the team.
    pub team_name: String,
    pub metadata: TeamMetadata,
    pub values: RatingValues,
}

/// One bookmaker's quote for one market of one game, already mapped to the
/// canonical `(market_type, period)` vocabulary.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawQuote {
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

/// One game and its current quotes as published by an odds provider.
#[derive(Debug, Clone, PartialEq)]
pub struct RawOddsEvent {
    pub external_id: String,
    pub home_team: String,
    pub away_team: String,
    pub commence_time: Option<DateTime<Utc>>,
    pub quotes: Vec<RawQuote>,
}

/// Slow-changing dataset: every team's current ratings.
#[async_trait]
pub trait RatingsSource: Send + Sync {
    async fn fetch_ratings(&self) -> Result<Vec<RawRating>, FetchError>;
}

/// Time-sensitive dataset: game odds.
#[async_trait]
pub trait OddsSource: Send + Sync {
    /// Full-game odds for every listed game.
    async fn fetch_board(&self) -> Result<Vec<RawOddsEvent>, FetchError>;

    /// Odds for a single game, including period markets. `None` when the
    /// provider no longer lists the game.
    async fn fetch_event(&self, external_id: &str) -> Result<Option<RawOddsEvent>, FetchError>;
}

/// Parse a `Retry-After` header given in whole seconds.
pub(crate) fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Turn a non-success response into a classified [`FetchError`].
pub(crate) async fn error_for_response(response: reqwest::Response) -> FetchError {
    let status = response.status().as_u16();
    let retry_after = parse_retry_after(response.headers());
    let body = response.text().await.unwrap_or_default();
    let body: String = body.chars().take(200).collect();
    FetchError::from_status(status, body, retry_after)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderMap, HeaderValue, RETRY_AFTER};

    #[test]
    fn retry_after_in_seconds() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_retry_after(&headers), None);
        headers.insert(RETRY_AFTER, HeaderValue::from_static(" 17 "));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(17)));
        headers.insert(RETRY_AFTER, HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"));
        assert_eq!(parse_retry_after(&headers), None);
    }
}
