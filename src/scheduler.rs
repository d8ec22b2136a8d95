//! Refresh scheduling.
//!
//! Two independent loops share one store and one set of source clients:
//! a daily full refresh (ratings batch plus an odds board sweep) and a
//! short-interval ticker that fans out one task per active matchup. Neither
//! loop waits on the other; the store's transactions are the only
//! coordination between them.

use crate::config::Config;
use crate::error::{FetchError, IngestError};
use crate::health::HealthState;
use crate::ingest::{IngestionWorker, RefreshReport};
use crate::model::Matchup;
use crate::retry::Retrier;
use crate::source::{OddsSource, RatingsSource};
use crate::store::{ActiveWindow, CanonicalStore};
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveTime, TimeZone, Utc};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Time of day (UTC) the full refresh fires.
    pub full_refresh_at: NaiveTime,
    pub active_poll_interval: Duration,
    pub active_window: ActiveWindow,
    /// Deadline for one matchup's fetch within a tick.
    pub task_timeout: Duration,
    /// Deadline for the fetches of one full refresh.
    pub full_refresh_timeout: Duration,
}

impl From<&Config> for SchedulerConfig {
    fn from(config: &Config) -> Self {
        Self {
            full_refresh_at: config.full_refresh_at,
            active_poll_interval: config.active_poll_interval,
            active_window: config.active_window,
            task_timeout: config.task_timeout,
            full_refresh_timeout: config.full_refresh_timeout,
        }
    }
}

/// Outcome of one full refresh. Each half runs whatever happened to the other;
/// a half that failed leaves its report empty and is listed in `failures`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FullRefreshReport {
    pub ratings: RefreshReport,
    pub board: RefreshReport,
    pub failures: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchupFailure {
    pub external_id: String,
    pub error: String,
}

/// Outcome of one active-subset tick. Failures are listed per matchup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub matchups: usize,
    pub succeeded: usize,
    pub snapshots: usize,
    pub failures: Vec<MatchupFailure>,
}

/// Owned scheduler state. Cheap to clone; clones drive the same scheduler.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn CanonicalStore>,
    ratings: Arc<dyn RatingsSource>,
    odds: Arc<dyn OddsSource>,
    worker: IngestionWorker,
    retrier: Retrier,
    config: SchedulerConfig,
    health: HealthState,
    trigger: Arc<Notify>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn CanonicalStore>,
        ratings: Arc<dyn RatingsSource>,
        odds: Arc<dyn OddsSource>,
        worker: IngestionWorker,
        retrier: Retrier,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                ratings,
                odds,
                worker,
                retrier,
                config,
                health: HealthState::new(),
                trigger: Arc::new(Notify::new()),
                shutdown: CancellationToken::new(),
                tracker: TaskTracker::new(),
            }),
        }
    }

    pub fn health(&self) -> HealthState {
        self.inner.health.clone()
    }

    /// Notifying this handle requests an immediate full refresh.
    pub fn trigger(&self) -> Arc<Notify> {
        self.inner.trigger.clone()
    }

    /// Arm both loops. The full-refresh loop runs one refresh right away.
    pub fn start(&self) {
        info!(
            "Starting scheduler (full refresh at {} UTC, active poll every {:?})",
            self.inner.config.full_refresh_at, self.inner.config.active_poll_interval
        );
        self.inner.tracker.spawn(self.clone().full_refresh_loop());
        self.inner.tracker.spawn(self.clone().active_loop());
    }

    /// Stop arming new cycles and wait for the ones in flight.
    ///
    /// In-flight fetches finish their current attempt but are not retried.
    /// Store writes are never interrupted.
    pub async fn shutdown(&self) {
        info!("Scheduler shutting down, waiting for in-flight cycles");
        self.inner.shutdown.cancel();
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
        info!("Scheduler stopped");
    }

    /// One full refresh followed by one active tick.
    pub async fn run_once(&self) -> Result<(FullRefreshReport, TickReport)> {
        let refresh = self.full_refresh().await?;
        let tick = self.active_tick().await?;
        Ok((refresh, tick))
    }

    async fn full_refresh_loop(self) {
        self.run_full_refresh().await;

        loop {
            let now = Utc::now();
            let next = next_fire_time(now, self.inner.config.full_refresh_at);
            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
            info!("Next full refresh at {}", next);

            tokio::select! {
                biased;
                _ = self.inner.shutdown.cancelled() => break,
                _ = self.inner.trigger.notified() => info!("Manual full refresh requested"),
                _ = tokio::time::sleep(wait) => {}
            }

            self.run_full_refresh().await;
        }
    }

    async fn active_loop(self) {
        let mut interval = tokio::time::interval(self.inner.config.active_poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = self.inner.shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }

            match self.active_tick().await {
                Ok(report) => self.inner.health.record_tick(report).await,
                Err(e) => {
                    self.inner.health.record_tick_failure().await;
                    error!("Active tick failed: {:#}", e);
                }
            }
        }
    }

    async fn run_full_refresh(&self) {
        let start = std::time::Instant::now();
        match self.full_refresh().await {
            Ok(report) => {
                info!(
                    "Full refresh completed in {:?}: {} ratings stored, {} events stored, {} parts failed",
                    start.elapsed(),
                    report.ratings.stored,
                    report.board.stored,
                    report.failures.len()
                );
                self.inner.health.record_full_refresh(report).await;
            }
            Err(e) => {
                self.inner.health.record_full_refresh_failure().await;
                error!("Full refresh failed: {:#}", e);
            }
        }
    }

    /// Fetch every team's ratings and write them as one batch, then sweep the
    /// odds board so newly listed games enter the active window.
    ///
    /// The board sweep runs even when the ratings half fails. Only a refresh
    /// where both halves fail is an error.
    pub async fn full_refresh(&self) -> Result<FullRefreshReport> {
        let deadline = Instant::now() + self.inner.config.full_refresh_timeout;
        let mut report = FullRefreshReport::default();

        let ratings = self.refresh_ratings(deadline).await;
        let board = self.sweep_board(deadline).await;

        match (ratings, board) {
            (Err(ratings_err), Err(board_err)) => {
                error!("Odds board sweep failed: {:#}", board_err);
                Err(ratings_err.context(format!("odds board sweep also failed: {:#}", board_err)))
            }
            (ratings, board) => {
                match ratings {
                    Ok(r) => report.ratings = r,
                    Err(e) => {
                        warn!("Ratings half of the full refresh failed: {:#}", e);
                        report.failures.push(format!("ratings: {:#}", e));
                    }
                }
                match board {
                    Ok(b) => report.board = b,
                    Err(e) => {
                        warn!("Odds board half of the full refresh failed: {:#}", e);
                        report.failures.push(format!("odds board: {:#}", e));
                    }
                }
                Ok(report)
            }
        }
    }

    async fn refresh_ratings(&self, deadline: Instant) -> Result<RefreshReport> {
        let inner = &self.inner;
        let rating_date = Utc::now().date_naive();

        let ratings = self
            .fetch("ratings", deadline, || inner.ratings.fetch_ratings())
            .await
            .context("Failed to fetch ratings")?;
        let report = inner
            .worker
            .ingest_ratings(inner.store.as_ref(), &ratings, rating_date)
            .await
            .context("Ratings batch rolled back")?;
        Ok(report)
    }

    async fn sweep_board(&self, deadline: Instant) -> Result<RefreshReport> {
        let inner = &self.inner;

        let events = self
            .fetch("odds board", deadline, || inner.odds.fetch_board())
            .await
            .context("Failed to fetch odds board")?;
        let report = inner
            .worker
            .ingest_board(inner.store.as_ref(), &events, Utc::now())
            .await
            .context("Odds board sweep failed")?;
        Ok(report)
    }

    /// Poll every matchup in the active window concurrently. Completes when
    /// every task has finished; one matchup failing never affects another.
    pub async fn active_tick(&self) -> Result<TickReport> {
        let matchups = self
            .inner
            .store
            .active_matchups(self.inner.config.active_window, Utc::now())
            .await
            .context("Failed to query active matchups")?;

        let mut report = TickReport {
            matchups: matchups.len(),
            ..TickReport::default()
        };
        if matchups.is_empty() {
            return Ok(report);
        }

        let mut tasks = JoinSet::new();
        for matchup in matchups {
            let this = self.clone();
            tasks.spawn(async move {
                let result = this.poll_matchup(&matchup).await;
                (matchup, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(count))) => {
                    report.succeeded += 1;
                    report.snapshots += count;
                }
                Ok((matchup, Err(e))) => {
                    warn!("Matchup {} failed: {}", matchup.external_id, e);
                    report.failures.push(MatchupFailure {
                        external_id: matchup.external_id,
                        error: e.to_string(),
                    });
                }
                Err(e) => {
                    error!("Matchup task panicked: {}", e);
                    report.failures.push(MatchupFailure {
                        external_id: String::new(),
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            "Active tick: {} matchups, {} succeeded, {} failed, {} snapshots",
            report.matchups,
            report.succeeded,
            report.failures.len(),
            report.snapshots
        );
        Ok(report)
    }

    async fn poll_matchup(&self, matchup: &Matchup) -> Result<usize, IngestError> {
        let inner = &self.inner;
        let deadline = Instant::now() + inner.config.task_timeout;
        let label = format!("odds for {}", matchup.external_id);

        let event = self
            .fetch(&label, deadline, || inner.odds.fetch_event(&matchup.external_id))
            .await?;

        match event {
            Some(event) => Ok(inner
                .worker
                .ingest_event(inner.store.as_ref(), &event, Utc::now())
                .await?),
            None => {
                info!("Matchup {} no longer listed by the odds source", matchup.external_id);
                Ok(0)
            }
        }
    }

    /// Retry `op` until it succeeds or gives up, abandoning the in-flight
    /// attempt once `deadline` passes.
    async fn fetch<T, F, Fut>(&self, label: &str, deadline: Instant, op: F) -> Result<T, FetchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let started = Instant::now();
        tokio::select! {
            result = self.inner.retrier.run(label, &self.inner.shutdown, op) => result,
            _ = tokio::time::sleep_until(deadline) => {
                warn!("{} timed out", label);
                Err(FetchError::TimedOut(started.elapsed()))
            }
        }
    }
}

/// Next occurrence of `at` (UTC) strictly after `now`.
pub fn next_fire_time(now: DateTime<Utc>, at: NaiveTime) -> DateTime<Utc> {
    let today = Utc.from_utc_datetime(&now.date_naive().and_time(at));
    if today > now {
        today
    } else {
        today + chrono::Duration::days(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn fires_later_today() {
        let now = Utc.with_ymd_and_hms(2026, 1, 10, 8, 30, 0).unwrap();
        assert_eq!(
            next_fire_time(now, at(11, 0)),
            Utc.with_ymd_and_hms(2026, 1, 10, 11, 0, 0).unwrap()
        );
    }

    #[test]
    fn fires_tomorrow_once_passed() {
        let now = Utc.with_ymd_and_hms(2026, 1, 10, 11, 0, 0).unwrap();
        assert_eq!(
            next_fire_time(now, at(11, 0)),
            Utc.with_ymd_and_hms(2026, 1, 11, 11, 0, 0).unwrap()
        );

        let late = Utc.with_ymd_and_hms(2026, 12, 31, 23, 59, 0).unwrap();
        assert_eq!(
            next_fire_time(late, at(11, 0)),
            Utc.with_ymd_and_hms(2027, 1, 1, 11, 0, 0).unwrap()
        );
    }
}
