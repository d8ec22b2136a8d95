//! Barttorvik team ratings adapter.

use super::{error_for_response, RatingsSource, RawRating};
use crate::error::FetchError;
use crate::model::{RatingValues, TeamMetadata};
use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

const BASE_URL: &str = "https://barttorvik.com";

/// Rows shorter than this are incomplete and skipped.
const MIN_ROW_LEN: usize = 46;

pub struct BarttorvikClient {
    http_client: reqwest::Client,
    base_url: String,
    season: i32,
}

impl BarttorvikClient {
    pub fn new(season: i32) -> Result<Self, FetchError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            // Set user agent to avoid blocking
            .user_agent(concat!("NCAAM-Ingestion/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http_client,
            base_url: BASE_URL.to_string(),
            season,
        })
    }

    fn url(&self) -> String {
        format!("{}/{}_team_results.json", self.base_url, self.season)
    }
}

#[async_trait]
impl RatingsSource for BarttorvikClient {
    async fn fetch_ratings(&self) -> Result<Vec<RawRating>, FetchError> {
        let url = self.url();
        info!("Fetching ratings from Barttorvik: {}", url);

        let response = self.http_client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(error_for_response(response).await);
        }

        let body = response.text().await?;
        let ratings = parse_team_results(&body)?;
        info!("Fetched ratings for {} teams", ratings.len());
        Ok(ratings)
    }
}

/// Barttorvik returns array-of-arrays, not array-of-objects:
/// `[0]=Rank, [1]=Team, [2]=Conf, [3]=Record "W-L", [4]=AdjOE, [6]=AdjDE,
/// [8]=Barthag, [10]=EFG%, [11]=EFGD%, [12]=TOR, [13]=TORD, [14]=ORB, [15]=DRB,
/// [16]=FTR, [17]=FTRD, [18]=2P%, [19]=2PD%, [20]=3P%, [21]=3PD%, [22]=3PR,
/// [23]=3PRD, ... [44]=AdjTempo, [45]=WAB`.
pub fn parse_team_results(body: &str) -> Result<Vec<RawRating>, FetchError> {
    let rows: Vec<Vec<Value>> = serde_json::from_str(body)?;
    let mut out = Vec::with_capacity(rows.len());

    for row in rows {
        if row.len() < MIN_ROW_LEN {
            debug!("Skipping incomplete Barttorvik row ({} columns)", row.len());
            continue;
        }
        let team_name = as_string(&row[1]);
        if team_name.trim().is_empty() {
            continue;
        }

        let (wins, losses) = parse_record(&as_string(&row[3]));
        let conference = as_string(&row[2]);

        out.push(RawRating {
            team_name,
            metadata: TeamMetadata {
                conference: (!conference.is_empty()).then_some(conference),
            },
            values: RatingValues {
                torvik_rank: as_i32(&row[0]),
                adj_o: as_f64(&row[4]),
                adj_d: as_f64(&row[6]),
                tempo: as_f64(&row[44]),
                wins,
                losses,
                games_played: wins + losses,
                barthag: as_f64(&row[8]),
                wab: as_f64(&row[45]),
                efg: as_f64(&row[10]),
                efgd: as_f64(&row[11]),
                tor: as_f64(&row[12]),
                tord: as_f64(&row[13]),
                orb: as_f64(&row[14]),
                drb: as_f64(&row[15]),
                ftr: as_f64(&row[16]),
                ftrd: as_f64(&row[17]),
                two_pt_pct: as_f64(&row[18]),
                two_pt_pct_d: as_f64(&row[19]),
                three_pt_pct: as_f64(&row[20]),
                three_pt_pct_d: as_f64(&row[21]),
                three_pt_rate: as_f64(&row[22]),
                three_pt_rate_d: as_f64(&row[23]),
            },
        });
    }

    Ok(out)
}

fn as_f64(v: &Value) -> f64 {
    match v {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

fn as_i32(v: &Value) -> i32 {
    as_f64(v) as i32
}

fn as_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    }
}

fn parse_record(record: &str) -> (i32, i32) {
    match record.split_once('-') {
        Some((w, l)) => (
            w.trim().parse().unwrap_or(0),
            l.trim().parse().unwrap_or(0),
        ),
        None => (0, 0),
    }
}

/// NCAA season label for a date: the season starting in November is named
/// after the following calendar year.
pub fn current_season(today: NaiveDate) -> i32 {
    if today.month() >= 5 {
        today.year() + 1
    } else {
        today.year()
    }
}
