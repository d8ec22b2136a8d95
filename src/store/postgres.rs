//! PostgreSQL canonical store.

use super::{ActiveWindow, CanonicalStore, StoreTx};
use crate::error::StoreError;
use crate::model::{
    Matchup, NameMatch, NewGame, NewTeam, OddsSnapshot, RatingFact, ResolutionAudit, Source,
    TeamMetadata,
};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnection, PgPoolOptions};
use sqlx::{PgPool, Postgres, Transaction};
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct PgStore {
    db: PgPool,
}

impl PgStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Connect with exponential retry. Failing here is the only fatal store error.
    pub async fn connect_with_retry(url: &str, max_retries: u32) -> Result<Self> {
        let mut attempt = 0;
        loop {
            match PgPoolOptions::new()
                .max_connections(10)
                .acquire_timeout(Duration::from_secs(10))
                .connect(url)
                .await
            {
                Ok(pool) => {
                    info!("Connected to PostgreSQL");
                    return Ok(Self::new(pool));
                }
                Err(e) => {
                    attempt += 1;
                    if attempt >= max_retries {
                        return Err(anyhow!(
                            "Failed to connect to database after {} attempts: {}",
                            max_retries,
                            e
                        ));
                    }
                    warn!("Database connection attempt {} failed: {}. Retrying...", attempt, e);
                    tokio::time::sleep(Duration::from_secs(2u64.pow(attempt))).await;
                }
            }
        }
    }

    /// Apply the embedded schema migrations.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.db).await?;
        info!("Schema migrations applied");
        Ok(())
    }
}

#[async_trait]
impl CanonicalStore for PgStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        let tx = self.db.begin().await?;
        Ok(Box::new(PgTx {
            tx: Some(tx),
            depth: 0,
        }))
    }

    async fn active_matchups(
        &self,
        window: ActiveWindow,
        now: DateTime<Utc>,
    ) -> Result<Vec<Matchup>, StoreError> {
        let (from, to) = window.bounds(now);
        let rows: Vec<(Uuid, String, DateTime<Utc>)> = sqlx::query_as(
            r#"
            SELECT id, external_id, commence_time
            FROM games
            WHERE status <> 'final'
              AND commence_time BETWEEN $1 AND $2
            ORDER BY commence_time
            "#,
        )
        .bind(from)
        .bind(to)
        .fetch_all(&self.db)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(game_id, external_id, commence_time)| Matchup {
                game_id,
                external_id,
                commence_time,
            })
            .collect())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.db).await?;
        Ok(())
    }
}

struct PgTx {
    tx: Option<Transaction<'static, Postgres>>,
    depth: u32,
}

impl PgTx {
    fn conn(&mut self) -> Result<&mut PgConnection, StoreError> {
        self.tx.as_deref_mut().ok_or(StoreError::TransactionClosed)
    }

    async fn exec_raw(&mut self, sql: &str) -> Result<(), StoreError> {
        let conn = self.conn()?;
        sqlx::query(sql).execute(conn).await?;
        Ok(())
    }
}

#[async_trait]
impl StoreTx for PgTx {
    async fn commit(&mut self) -> Result<(), StoreError> {
        let tx = self.tx.take().ok_or(StoreError::TransactionClosed)?;
        tx.commit().await?;
        Ok(())
    }

    async fn savepoint(&mut self) -> Result<(), StoreError> {
        let name = format!("record_{}", self.depth + 1);
        self.exec_raw(&format!("SAVEPOINT {name}")).await?;
        self.depth += 1;
        Ok(())
    }

    async fn release_savepoint(&mut self) -> Result<(), StoreError> {
        if self.depth == 0 {
            return Err(StoreError::NoSavepoint);
        }
        let name = format!("record_{}", self.depth);
        self.exec_raw(&format!("RELEASE SAVEPOINT {name}")).await?;
        self.depth -= 1;
        Ok(())
    }

    async fn rollback_to_savepoint(&mut self) -> Result<(), StoreError> {
        if self.depth == 0 {
            return Err(StoreError::NoSavepoint);
        }
        let name = format!("record_{}", self.depth);
        self.exec_raw(&format!("ROLLBACK TO SAVEPOINT {name}")).await?;
        self.exec_raw(&format!("RELEASE SAVEPOINT {name}")).await?;
        self.depth -= 1;
        Ok(())
    }

    async fn find_by_native_name(
        &mut self,
        source: Source,
        name: &str,
    ) -> Result<Option<Uuid>, StoreError> {
        let Some(column) = source.native_name_column() else {
            return Ok(None);
        };
        let sql = format!("SELECT id FROM teams WHERE {column} = $1 LIMIT 1");
        let row: Option<(Uuid,)> = sqlx::query_as(&sql)
            .bind(name)
            .fetch_optional(self.conn()?)
            .await?;
        Ok(row.map(|(id,)| id))
    }

    async fn find_by_name(&mut self, name: &str) -> Result<Vec<NameMatch>, StoreError> {
        let rows: Vec<(Uuid, String, bool)> = sqlx::query_as(
            r#"
            SELECT
              t.id,
              t.canonical_name,
              EXISTS(SELECT 1 FROM team_ratings tr WHERE tr.team_id = t.id) AS has_ratings
            FROM teams t
            WHERE lower(t.canonical_name) = lower($1)
               OR EXISTS(
                    SELECT 1 FROM team_aliases ta
                    WHERE ta.team_id = t.id AND lower(ta.alias) = lower($1)
               )
            ORDER BY has_ratings DESC, t.canonical_name
            "#,
        )
        .bind(name)
        .fetch_all(self.conn()?)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(team_id, canonical_name, has_ratings)| NameMatch {
                team_id,
                canonical_name,
                has_ratings,
            })
            .collect())
    }

    async fn canonical_name(&mut self, team_id: Uuid) -> Result<Option<String>, StoreError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT canonical_name FROM teams WHERE id = $1")
            .bind(team_id)
            .fetch_optional(self.conn()?)
            .await?;
        Ok(row.map(|(n,)| n))
    }

    async fn has_ratings(&mut self, team_id: Uuid) -> Result<bool, StoreError> {
        let has: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM team_ratings WHERE team_id = $1)")
                .bind(team_id)
                .fetch_one(self.conn()?)
                .await?;
        Ok(has)
    }

    async fn alias_exists(&mut self, alias: &str, source: Source) -> Result<bool, StoreError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM team_aliases WHERE alias = $1 AND source = $2)",
        )
        .bind(alias)
        .bind(source.as_str())
        .fetch_one(self.conn()?)
        .await?;
        Ok(exists)
    }

    async fn insert_alias(
        &mut self,
        team_id: Uuid,
        alias: &str,
        source: Source,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO team_aliases (team_id, alias, source)
            VALUES ($1, $2, $3)
            ON CONFLICT (alias, source) DO NOTHING
            "#,
        )
        .bind(team_id)
        .bind(alias)
        .bind(source.as_str())
        .execute(self.conn()?)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_team(&mut self, team: &NewTeam) -> Result<Uuid, StoreError> {
        let team_id = Uuid::new_v4();
        // If the insert conflicts, DO NOT return the freshly generated UUID:
        // it would not exist in `teams` and break foreign keys downstream.
        let inserted: Option<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO teams (id, canonical_name, conference)
            VALUES ($1, $2, $3)
            ON CONFLICT (canonical_name) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(team_id)
        .bind(&team.canonical_name)
        .bind(&team.metadata.conference)
        .fetch_optional(self.conn()?)
        .await?;

        if let Some((id,)) = inserted {
            return Ok(id);
        }

        let (id,): (Uuid,) = sqlx::query_as("SELECT id FROM teams WHERE canonical_name = $1")
            .bind(&team.canonical_name)
            .fetch_one(self.conn()?)
            .await?;
        Ok(id)
    }

    async fn cache_native_name(
        &mut self,
        team_id: Uuid,
        source: Source,
        name: &str,
    ) -> Result<(), StoreError> {
        let Some(column) = source.native_name_column() else {
            return Ok(());
        };
        let sql = format!("UPDATE teams SET {column} = $1 WHERE id = $2 AND {column} IS NULL");
        sqlx::query(&sql)
            .bind(name)
            .bind(team_id)
            .execute(self.conn()?)
            .await?;
        Ok(())
    }

    async fn update_metadata(
        &mut self,
        team_id: Uuid,
        metadata: &TeamMetadata,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE teams SET conference = COALESCE($1, conference) WHERE id = $2")
            .bind(&metadata.conference)
            .bind(team_id)
            .execute(self.conn()?)
            .await?;
        Ok(())
    }

    async fn record_resolution(&mut self, audit: &ResolutionAudit) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO team_resolution_audit
                (input_name, resolved_name, source, context, matched_via, has_ratings)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&audit.input_name)
        .bind(&audit.resolved_name)
        .bind(audit.source.as_str())
        .bind(audit.context)
        .bind(audit.matched_via.as_str())
        .bind(audit.has_ratings)
        .execute(self.conn()?)
        .await?;
        Ok(())
    }

    async fn upsert_rating(&mut self, fact: &RatingFact) -> Result<(), StoreError> {
        let values = &fact.values;
        sqlx::query(
            r#"
            INSERT INTO team_ratings (
                team_id, rating_date, adj_o, adj_d, tempo, net_rating,
                torvik_rank, wins, losses, games_played,
                barthag, wab,
                efg, efgd, tor, tord, orb, drb, ftr, ftrd,
                two_pt_pct, two_pt_pct_d, three_pt_pct, three_pt_pct_d,
                three_pt_rate, three_pt_rate_d
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                      $11, $12, $13, $14, $15, $16, $17, $18, $19, $20,
                      $21, $22, $23, $24, $25, $26)
            ON CONFLICT (team_id, rating_date) DO UPDATE SET
                adj_o = EXCLUDED.adj_o,
                adj_d = EXCLUDED.adj_d,
                tempo = EXCLUDED.tempo,
                net_rating = EXCLUDED.net_rating,
                torvik_rank = EXCLUDED.torvik_rank,
                wins = EXCLUDED.wins,
                losses = EXCLUDED.losses,
                games_played = EXCLUDED.games_played,
                barthag = EXCLUDED.barthag,
                wab = EXCLUDED.wab,
                efg = EXCLUDED.efg,
                efgd = EXCLUDED.efgd,
                tor = EXCLUDED.tor,
                tord = EXCLUDED.tord,
                orb = EXCLUDED.orb,
                drb = EXCLUDED.drb,
                ftr = EXCLUDED.ftr,
                ftrd = EXCLUDED.ftrd,
                two_pt_pct = EXCLUDED.two_pt_pct,
                two_pt_pct_d = EXCLUDED.two_pt_pct_d,
                three_pt_pct = EXCLUDED.three_pt_pct,
                three_pt_pct_d = EXCLUDED.three_pt_pct_d,
                three_pt_rate = EXCLUDED.three_pt_rate,
                three_pt_rate_d = EXCLUDED.three_pt_rate_d,
                updated_at = now()
            "#,
        )
        .bind(fact.team_id)
        .bind(fact.rating_date)
        .bind(values.adj_o)
        .bind(values.adj_d)
        .bind(values.tempo)
        .bind(values.net_rating())
        .bind(values.torvik_rank)
        .bind(values.wins)
        .bind(values.losses)
        .bind(values.games_played)
        .bind(values.barthag)
        .bind(values.wab)
        .bind(values.efg)
        .bind(values.efgd)
        .bind(values.tor)
        .bind(values.tord)
        .bind(values.orb)
        .bind(values.drb)
        .bind(values.ftr)
        .bind(values.ftrd)
        .bind(values.two_pt_pct)
        .bind(values.two_pt_pct_d)
        .bind(values.three_pt_pct)
        .bind(values.three_pt_pct_d)
        .bind(values.three_pt_rate)
        .bind(values.three_pt_rate_d)
        .execute(self.conn()?)
        .await?;
        Ok(())
    }

    async fn upsert_game(&mut self, game: &NewGame) -> Result<Uuid, StoreError> {
        // Team ids are refreshed on conflict so fixes to team resolution take
        // effect without manual backfills. Status is left alone.
        let (id,): (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO games (id, external_id, home_team_id, away_team_id, commence_time, status)
            VALUES ($1, $2, $3, $4, $5, 'scheduled')
            ON CONFLICT (external_id) DO UPDATE SET
                home_team_id = EXCLUDED.home_team_id,
                away_team_id = EXCLUDED.away_team_id,
                commence_time = EXCLUDED.commence_time
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&game.external_id)
        .bind(game.home_team_id)
        .bind(game.away_team_id)
        .bind(game.commence_time)
        .fetch_one(self.conn()?)
        .await?;
        Ok(id)
    }

    async fn insert_snapshot(&mut self, snapshot: &OddsSnapshot) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO odds_snapshots (
                time, game_id, bookmaker, market_type, period,
                home_line, away_line, total_line,
                home_price, away_price, over_price, under_price
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (time, game_id, bookmaker, market_type, period) DO NOTHING
            "#,
        )
        .bind(snapshot.time)
        .bind(snapshot.game_id)
        .bind(&snapshot.bookmaker)
        .bind(&snapshot.market_type)
        .bind(&snapshot.period)
        .bind(snapshot.home_line)
        .bind(snapshot.away_line)
        .bind(snapshot.total_line)
        .bind(snapshot.home_price)
        .bind(snapshot.away_price)
        .bind(snapshot.over_price)
        .bind(snapshot.under_price)
        .execute(self.conn()?)
        .await?;
        Ok(())
    }
}
