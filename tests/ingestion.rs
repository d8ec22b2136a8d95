mod common;

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, Utc};
use common::{event, quote, rating};
use ncaam_ingestion::error::IngestError;
use ncaam_ingestion::ingest::IngestionWorker;
use ncaam_ingestion::model::OddsSnapshot;
use ncaam_ingestion::publish::SnapshotPublisher;
use ncaam_ingestion::resolver::EntityResolver;
use ncaam_ingestion::store::MemoryStore;
use std::sync::{Arc, Mutex};
use tokio_test::{assert_err, assert_ok};

fn worker() -> IngestionWorker {
    IngestionWorker::new(EntityResolver::default())
}

fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 2, 1).unwrap()
}

#[tokio::test]
async fn reingesting_a_date_overwrites_the_rating() {
    let store = MemoryStore::new();
    let worker = worker();

    let report = assert_ok!(
        worker
            .ingest_ratings(&store, &[rating("Duke", 120.0), rating("Ohio State", 110.0)], date())
            .await
    );
    assert_eq!((report.fetched, report.stored, report.skipped), (2, 2, 0));

    assert_ok!(worker.ingest_ratings(&store, &[rating("Duke", 125.5)], date()).await);

    let state = store.state().await;
    let duke = state.team_by_name("Duke").unwrap();
    let duke_rows: Vec<_> = state.ratings.values().filter(|r| r.team_id == duke.id).collect();
    assert_eq!(duke_rows.len(), 1);
    assert_eq!(duke_rows[0].values.adj_o, 125.5);
    assert_eq!(state.ratings.len(), 2);
    assert_eq!(duke.metadata.conference.as_deref(), Some("ACC"));
}

#[tokio::test]
async fn a_new_date_adds_a_row() {
    let store = MemoryStore::new();
    let worker = worker();
    let next_day = date().succ_opt().unwrap();

    assert_ok!(worker.ingest_ratings(&store, &[rating("Duke", 120.0)], date()).await);
    assert_ok!(worker.ingest_ratings(&store, &[rating("Duke", 121.0)], next_day).await);

    assert_eq!(store.state().await.ratings.len(), 2);
}

#[tokio::test]
async fn failing_record_is_skipped_without_aborting_batch() {
    let store = MemoryStore::new();
    store.poison_name("Kansas");
    let worker = worker();

    let report = assert_ok!(
        worker
            .ingest_ratings(
                &store,
                &[rating("Duke", 120.0), rating("Kansas", 118.0), rating("Houston", 119.0)],
                date(),
            )
            .await
    );
    assert_eq!((report.stored, report.skipped), (2, 1));

    let state = store.state().await;
    assert!(state.team_by_name("Kansas").is_none());
    assert!(state.team_by_name("Duke").is_some());
    assert!(state.team_by_name("Houston").is_some());
    assert_eq!(state.ratings.len(), 2);
}

#[tokio::test]
async fn unreachable_store_fails_the_batch() {
    let store = MemoryStore::new();
    store.set_unavailable(true);

    assert_err!(worker().ingest_ratings(&store, &[rating("Duke", 120.0)], date()).await);

    store.set_unavailable(false);
    let state = store.state().await;
    assert!(state.teams.is_empty());
    assert!(state.ratings.is_empty());
}

#[tokio::test]
async fn snapshots_accumulate_across_captures() {
    let store = MemoryStore::new();
    let worker = worker();
    let tip = Utc::now() + Duration::minutes(30);
    let mut evt = event("evt-1", "Duke Blue Devils", "North Carolina Tar Heels", tip);

    let first_capture = Utc::now();
    assert_eq!(assert_ok!(worker.ingest_event(&store, &evt, first_capture).await), 2);

    evt.quotes = vec![quote("pinnacle", -5.0), quote("draftkings", -5.5)];
    let second_capture = first_capture + Duration::seconds(30);
    assert_ok!(worker.ingest_event(&store, &evt, second_capture).await);

    let state = store.state().await;
    assert_eq!(state.games.len(), 1);
    assert_eq!(state.snapshots.len(), 4);

    let pinnacle: Vec<&OddsSnapshot> = state
        .snapshots
        .iter()
        .filter(|s| s.bookmaker == "pinnacle")
        .collect();
    assert_eq!(pinnacle.len(), 2);
    assert!(pinnacle
        .iter()
        .any(|s| s.time == first_capture && s.home_line == Some(-3.5)));
    assert!(pinnacle
        .iter()
        .any(|s| s.time == second_capture && s.home_line == Some(-5.0)));

    // Both sides were audited on each capture
    assert_eq!(state.audits.len(), 4);
    assert!(state.audits.iter().any(|a| a.context == "home"));
}

#[tokio::test]
async fn same_capture_time_never_overwrites() {
    let store = MemoryStore::new();
    let worker = worker();
    let captured = Utc::now();
    let mut evt = event("evt-2", "Kansas", "Baylor", captured + Duration::hours(1));

    assert_ok!(worker.ingest_event(&store, &evt, captured).await);
    evt.quotes = vec![quote("pinnacle", 9.0)];
    assert_ok!(worker.ingest_event(&store, &evt, captured).await);

    let state = store.state().await;
    let pinnacle: Vec<_> = state
        .snapshots
        .iter()
        .filter(|s| s.bookmaker == "pinnacle")
        .collect();
    assert_eq!(pinnacle.len(), 1);
    assert_eq!(pinnacle[0].home_line, Some(-3.5));
}

#[tokio::test]
async fn home_and_away_resolving_to_one_team_is_rejected() {
    let store = MemoryStore::new();
    let worker = worker();
    let evt = event("evt-3", "Ohio State", "Ohio St", Utc::now());

    let err = worker.ingest_event(&store, &evt, Utc::now()).await.unwrap_err();
    assert!(matches!(err, IngestError::SameTeam { .. }));

    let state = store.state().await;
    assert!(state.games.is_empty());
    assert!(state.snapshots.is_empty());
}

#[tokio::test]
async fn event_without_tipoff_is_incomplete() {
    let store = MemoryStore::new();
    let mut evt = event("evt-4", "Duke", "Kansas", Utc::now());
    evt.commence_time = None;

    let err = worker().ingest_event(&store, &evt, Utc::now()).await.unwrap_err();
    assert!(matches!(err, IngestError::Incomplete { .. }));
}

#[tokio::test]
async fn board_sweep_skips_bad_events() {
    let store = MemoryStore::new();
    let tip = Utc::now() + Duration::hours(2);
    let events = vec![
        event("evt-a", "Duke", "Kansas", tip),
        event("evt-b", "Ohio State", "Ohio St.", tip),
        event("evt-c", "Houston", "Baylor", tip),
    ];

    let report = assert_ok!(worker().ingest_board(&store, &events, Utc::now()).await);
    assert_eq!((report.fetched, report.stored, report.skipped), (3, 2, 1));
    assert_eq!(report.snapshots, 4);
    assert_eq!(store.state().await.games.len(), 2);
}

#[derive(Default)]
struct RecordingPublisher {
    published: Mutex<Vec<OddsSnapshot>>,
}

#[async_trait]
impl SnapshotPublisher for RecordingPublisher {
    async fn publish(&self, snapshots: &[OddsSnapshot]) -> anyhow::Result<()> {
        self.published.lock().unwrap().extend_from_slice(snapshots);
        Ok(())
    }
}

struct BrokenPublisher;

#[async_trait]
impl SnapshotPublisher for BrokenPublisher {
    async fn publish(&self, _: &[OddsSnapshot]) -> anyhow::Result<()> {
        anyhow::bail!("redis down")
    }
}

#[tokio::test]
async fn committed_snapshots_are_published() {
    let store = MemoryStore::new();
    let publisher = Arc::new(RecordingPublisher::default());
    let worker = worker().with_publisher(publisher.clone());

    let evt = event("evt-5", "Duke", "Kansas", Utc::now());
    assert_ok!(worker.ingest_event(&store, &evt, Utc::now()).await);

    let published = publisher.published.lock().unwrap();
    assert_eq!(published.len(), 2);
    assert_eq!(published[0].external_id, "evt-5");
}

#[tokio::test]
async fn publish_failure_does_not_fail_ingestion() {
    let store = MemoryStore::new();
    let worker = worker().with_publisher(Arc::new(BrokenPublisher));

    let evt = event("evt-6", "Duke", "Kansas", Utc::now());
    assert_eq!(assert_ok!(worker.ingest_event(&store, &evt, Utc::now()).await), 2);
    assert_eq!(store.state().await.snapshots.len(), 2);
}
