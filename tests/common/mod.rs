#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, NaiveTime, Utc};
use ncaam_ingestion::error::FetchError;
use ncaam_ingestion::model::{RatingValues, TeamMetadata};
use ncaam_ingestion::retry::{RetryPolicy, Retrier, Sleeper};
use ncaam_ingestion::scheduler::SchedulerConfig;
use ncaam_ingestion::source::{OddsSource, RatingsSource, RawOddsEvent, RawQuote, RawRating};
use ncaam_ingestion::store::ActiveWindow;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

/// Poll `check` until it holds, failing the test after five seconds.
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Records requested delays instead of sleeping.
#[derive(Default)]
pub struct RecordingSleeper {
    pub delays: Mutex<Vec<Duration>>,
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, delay: Duration) {
        self.delays.lock().unwrap().push(delay);
    }
}

pub fn instant_retrier() -> (Retrier, Arc<RecordingSleeper>) {
    let sleeper = Arc::new(RecordingSleeper::default());
    let retrier = Retrier::with_sleeper(RetryPolicy::default(), sleeper.clone());
    (retrier, sleeper)
}

pub fn scheduler_config() -> SchedulerConfig {
    SchedulerConfig {
        full_refresh_at: NaiveTime::from_hms_opt(11, 0, 0).unwrap(),
        active_poll_interval: Duration::from_secs(3600),
        active_window: ActiveWindow {
            lookahead: ChronoDuration::minutes(60),
            lookback: ChronoDuration::minutes(180),
        },
        task_timeout: Duration::from_secs(5),
        full_refresh_timeout: Duration::from_secs(5),
    }
}

pub fn rating(name: &str, adj_o: f64) -> RawRating {
    RawRating {
        team_name: name.to_string(),
        metadata: TeamMetadata {
            conference: Some("ACC".to_string()),
        },
        values: RatingValues {
            adj_o,
            adj_d: 95.0,
            tempo: 68.0,
            torvik_rank: 10,
            wins: 10,
            losses: 2,
            games_played: 12,
            ..RatingValues::default()
        },
    }
}

pub fn quote(bookmaker: &str, home_line: f64) -> RawQuote {
    RawQuote {
        bookmaker: bookmaker.to_string(),
        market_type: "spreads".to_string(),
        period: "full".to_string(),
        home_line: Some(home_line),
        away_line: Some(-home_line),
        home_price: Some(-110),
        away_price: Some(-110),
        ..RawQuote::default()
    }
}

pub fn event(id: &str, home: &str, away: &str, commence_time: DateTime<Utc>) -> RawOddsEvent {
    RawOddsEvent {
        external_id: id.to_string(),
        home_team: home.to_string(),
        away_team: away.to_string(),
        commence_time: Some(commence_time),
        quotes: vec![quote("pinnacle", -3.5), quote("draftkings", -4.0)],
    }
}

/// Ratings source backed by fixed rows. The first `failures_left` calls fail,
/// with 429 when `retry_after` is set and 503 otherwise.
#[derive(Default)]
pub struct FakeRatings {
    pub ratings: Mutex<Vec<RawRating>>,
    pub calls: AtomicUsize,
    pub failures_left: AtomicUsize,
    pub retry_after: Option<Duration>,
}

impl FakeRatings {
    pub fn new(ratings: Vec<RawRating>) -> Self {
        Self {
            ratings: Mutex::new(ratings),
            ..Self::default()
        }
    }

    pub fn always_failing() -> Self {
        Self {
            failures_left: AtomicUsize::new(usize::MAX),
            ..Self::default()
        }
    }

    pub fn rate_limited_once(mut self, retry_after: Duration) -> Self {
        self.failures_left = AtomicUsize::new(1);
        self.retry_after = Some(retry_after);
        self
    }
}

#[async_trait]
impl RatingsSource for FakeRatings {
    async fn fetch_ratings(&self) -> Result<Vec<RawRating>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(match self.retry_after {
                Some(delay) => FetchError::RateLimited {
                    retry_after: Some(delay),
                },
                None => FetchError::Server {
                    status: 503,
                    body: "ratings unavailable".to_string(),
                    retry_after: None,
                },
            });
        }
        Ok(self.ratings.lock().unwrap().clone())
    }
}

/// Odds source backed by fixed events. Ids in `failing` always answer 503.
/// Every per-event fetch takes `delay` and signals `event_started` first.
#[derive(Default)]
pub struct FakeOdds {
    pub board: Vec<RawOddsEvent>,
    pub events: HashMap<String, RawOddsEvent>,
    pub failing: HashSet<String>,
    pub event_calls: Mutex<HashMap<String, usize>>,
    pub delay: Duration,
    pub event_started: Notify,
}

impl FakeOdds {
    pub fn new(board: Vec<RawOddsEvent>) -> Self {
        let events = board
            .iter()
            .map(|e| (e.external_id.clone(), e.clone()))
            .collect();
        Self {
            board,
            events,
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing(mut self, external_id: &str) -> Self {
        self.failing.insert(external_id.to_string());
        self
    }

    pub fn calls_for(&self, external_id: &str) -> usize {
        self.event_calls
            .lock()
            .unwrap()
            .get(external_id)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl OddsSource for FakeOdds {
    async fn fetch_board(&self) -> Result<Vec<RawOddsEvent>, FetchError> {
        Ok(self.board.clone())
    }

    async fn fetch_event(&self, external_id: &str) -> Result<Option<RawOddsEvent>, FetchError> {
        *self
            .event_calls
            .lock()
            .unwrap()
            .entry(external_id.to_string())
            .or_insert(0) += 1;
        self.event_started.notify_one();
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if self.failing.contains(external_id) {
            return Err(FetchError::Server {
                status: 503,
                body: "upstream unavailable".to_string(),
                retry_after: None,
            });
        }
        Ok(self.events.get(external_id).cloned())
    }
}
