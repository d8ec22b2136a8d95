//! The Odds API adapter.

use super::{error_for_response, OddsSource, RawOddsEvent, RawQuote};
use crate::error::FetchError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use governor::{Quota, RateLimiter};
use serde::Deserialize;
use std::num::NonZeroU32;
use std::time::Duration;
use tracing::{debug, info};

const BASE_URL: &str = "https://api.the-odds-api.com/v4";

/// Full-game markets swept during the full refresh.
const BOARD_MARKETS: &str = "spreads,totals,h2h";

/// Per-event markets polled while a game is active, including both halves.
const EVENT_MARKETS: &str =
    "spreads,totals,h2h,spreads_h1,totals_h1,h2h_h1,spreads_h2,totals_h2,h2h_h2";

/// The Odds API event structure
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct OddsApiEvent {
    pub id: String,
    pub sport_key: String,
    pub commence_time: Option<DateTime<Utc>>,
    pub home_team: String,
    pub away_team: String,
    pub bookmakers: Vec<Bookmaker>,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Bookmaker {
    pub key: String,
    pub title: String,
    pub last_update: Option<DateTime<Utc>>,
    pub markets: Vec<Market>,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Market {
    pub key: String,
    pub last_update: Option<DateTime<Utc>>,
    pub outcomes: Vec<Outcome>,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Outcome {
    pub name: String,
    pub price: Option<i32>,
    pub point: Option<f64>,
}

type DirectRateLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

pub struct OddsApiClient {
    http_client: reqwest::Client,
    rate_limiter: DirectRateLimiter,
    api_key: String,
    sport_key: String,
    base_url: String,
}

impl OddsApiClient {
    pub fn new(api_key: String, sport_key: String, requests_per_minute: u32) -> Result<Self, FetchError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(5)
            .build()?;

        let per_minute = NonZeroU32::new(requests_per_minute).unwrap_or(NonZeroU32::MIN);

        Ok(Self {
            http_client,
            rate_limiter: RateLimiter::direct(Quota::per_minute(per_minute)),
            api_key,
            sport_key,
            base_url: BASE_URL.to_string(),
        })
    }

    async fn get(&self, url: &str, markets: &str) -> Result<Option<String>, FetchError> {
        // Wait for rate limit
        self.rate_limiter.until_ready().await;

        let response = self
            .http_client
            .get(url)
            .query(&[
                ("apiKey", self.api_key.as_str()),
                ("regions", "us"),
                ("markets", markets),
                ("oddsFormat", "american"),
            ])
            .send()
            .await?;

        if let Some(remaining) = response.headers().get("x-requests-remaining") {
            info!("API requests remaining: {}", remaining.to_str().unwrap_or("?"));
        }

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(error_for_response(response).await);
        }

        Ok(Some(response.text().await?))
    }
}

#[async_trait]
impl OddsSource for OddsApiClient {
    async fn fetch_board(&self) -> Result<Vec<RawOddsEvent>, FetchError> {
        let url = format!("{}/sports/{}/odds", self.base_url, self.sport_key);
        let Some(body) = self.get(&url, BOARD_MARKETS).await? else {
            return Err(FetchError::Client {
                status: 404,
                body: format!("unknown sport {}", self.sport_key),
            });
        };

        let events: Vec<OddsApiEvent> = serde_json::from_str(&body)?;
        info!("Fetched {} events from The Odds API", events.len());
        Ok(events.into_iter().map(to_raw_event).collect())
    }

    async fn fetch_event(&self, external_id: &str) -> Result<Option<RawOddsEvent>, FetchError> {
        let url = format!(
            "{}/sports/{}/events/{}/odds",
            self.base_url, self.sport_key, external_id
        );
        let Some(body) = self.get(&url, EVENT_MARKETS).await? else {
            debug!("Event {} is no longer listed", external_id);
            return Ok(None);
        };

        let event: OddsApiEvent = serde_json::from_str(&body)?;
        Ok(Some(to_raw_event(event)))
    }
}

/// Map a provider event into the common raw shape, dropping unknown markets.
pub fn to_raw_event(event: OddsApiEvent) -> RawOddsEvent {
    let mut quotes = Vec::new();
    for bookmaker in &event.bookmakers {
        for market in &bookmaker.markets {
            if let Some(quote) = to_raw_quote(&bookmaker.key, market, &event.home_team) {
                quotes.push(quote);
            }
        }
    }

    RawOddsEvent {
        external_id: event.id,
        home_team: event.home_team,
        away_team: event.away_team,
        commence_time: event.commence_time,
        quotes,
    }
}

fn to_raw_quote(bookmaker: &str, market: &Market, home_team: &str) -> Option<RawQuote> {
    let (market_type, period) = match market.key.as_str() {
        "spreads" => ("spreads", "full"),
        "totals" => ("totals", "full"),
        "h2h" => ("h2h", "full"),
        "spreads_h1" => ("spreads", "1h"),
        "totals_h1" => ("totals", "1h"),
        "h2h_h1" => ("h2h", "1h"),
        "spreads_h2" => ("spreads", "2h"),
        "totals_h2" => ("totals", "2h"),
        "h2h_h2" => ("h2h", "2h"),
        _ => return None,
    };

    let mut quote = RawQuote {
        bookmaker: bookmaker.to_string(),
        market_type: market_type.to_string(),
        period: period.to_string(),
        ..RawQuote::default()
    };

    for outcome in &market.outcomes {
        match market_type {
            "spreads" => {
                if outcome.name == home_team {
                    quote.home_line = outcome.point;
                    quote.home_price = outcome.price;
                } else {
                    quote.away_line = outcome.point;
                    quote.away_price = outcome.price;
                }
            }
            "totals" => {
                if outcome.name == "Over" {
                    quote.total_line = outcome.point;
                    quote.over_price = outcome.price;
                } else if outcome.name == "Under" {
                    quote.under_price = outcome.price;
                }
            }
            _ => {
                if outcome.name == home_team {
                    quote.home_price = outcome.price;
                } else {
                    quote.away_price = outcome.price;
                }
            }
        }
    }

    Some(quote)
}

#[cfg(test)]
mod tests {
    use super::*;

    const EVENT: &str = r#"{
        "id": "evt-1",
        "sport_key": "basketball_ncaab",
        "commence_time": "2026-01-10T00:00:00Z",
        "home_team": "Duke Blue Devils",
        "away_team": "North Carolina Tar Heels",
        "bookmakers": [{
            "key": "pinnacle",
            "title": "Pinnacle",
            "markets": [
                {"key": "spreads", "outcomes": [
                    {"name": "Duke Blue Devils", "price": -110, "point": -4.5},
                    {"name": "North Carolina Tar Heels", "price": -110, "point": 4.5}
                ]},
                {"key": "totals_h1", "outcomes": [
                    {"name": "Over", "price": -105, "point": 71.5},
                    {"name": "Under", "price": -115, "point": 71.5}
                ]},
                {"key": "player_points", "outcomes": []}
            ]
        }]
    }"#;

    #[test]
    fn maps_markets_to_canonical_vocabulary() {
        let event: OddsApiEvent = serde_json::from_str(EVENT).unwrap();
        let raw = to_raw_event(event);

        assert_eq!(raw.external_id, "evt-1");
        assert_eq!(raw.home_team, "Duke Blue Devils");
        assert_eq!(raw.quotes.len(), 2, "unknown market keys are dropped");

        let spread = &raw.quotes[0];
        assert_eq!((spread.market_type.as_str(), spread.period.as_str()), ("spreads", "full"));
        assert_eq!(spread.home_line, Some(-4.5));
        assert_eq!(spread.away_line, Some(4.5));
        assert_eq!(spread.home_price, Some(-110));

        let total = &raw.quotes[1];
        assert_eq!((total.market_type.as_str(), total.period.as_str()), ("totals", "1h"));
        assert_eq!(total.total_line, Some(71.5));
        assert_eq!(total.over_price, Some(-105));
        assert_eq!(total.under_price, Some(-115));
    }

    #[test]
    fn event_request_covers_both_halves() {
        let requested: Vec<&str> = EVENT_MARKETS.split(',').collect();
        for key in ["spreads_h1", "totals_h1", "h2h_h1", "spreads_h2", "totals_h2", "h2h_h2"] {
            assert!(requested.contains(&key), "{key} not requested");
        }
        assert!(!BOARD_MARKETS.contains("_h"));
    }

    #[test]
    fn second_half_markets_map_to_2h() {
        let market = Market {
            key: "h2h_h2".to_string(),
            last_update: None,
            outcomes: vec![
                Outcome {
                    name: "Duke Blue Devils".to_string(),
                    price: Some(-150),
                    point: None,
                },
                Outcome {
                    name: "North Carolina Tar Heels".to_string(),
                    price: Some(130),
                    point: None,
                },
            ],
        };
        let quote = to_raw_quote("pinnacle", &market, "Duke Blue Devils").unwrap();
        assert_eq!((quote.market_type.as_str(), quote.period.as_str()), ("h2h", "2h"));
        assert_eq!((quote.home_price, quote.away_price), (Some(-150), Some(130)));
    }

    #[test]
    fn tolerates_missing_fields() {
        let event: OddsApiEvent = serde_json::from_str(r#"{"id":"evt-2"}"#).unwrap();
        let raw = to_raw_event(event);
        assert!(raw.quotes.is_empty());
        assert!(raw.commence_time.is_none());
    }
}
