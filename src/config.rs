//! Environment-driven configuration.

use crate::error::ConfigError;
use crate::retry::RetryPolicy;
use crate::source::barttorvik::current_season;
use crate::store::ActiveWindow;
use chrono::{NaiveTime, Utc};
use std::env;
use std::ops::RangeInclusive;
use std::str::FromStr;
use std::time::Duration;

/// Longest active window on either side of tip-off: one week.
const MAX_WINDOW_MINUTES: i64 = 7 * 24 * 60;
/// Longest deadline or poll interval: one day.
const MAX_TIMEOUT_SECS: u64 = 24 * 60 * 60;
const MAX_DELAY_MS: u64 = 60 * 60 * 1000;

/// Configuration
#[derive(Clone)]
pub struct Config {
    pub database_url: String,
    /// Snapshot publishing is off when unset.
    pub redis_url: Option<String>,
    pub odds_api_key: String,
    pub sport_key: String,
    pub season: i32,
    /// Daily full refresh, in UTC. There is no DST handling: the default
    /// 11:00 is 6 AM Eastern in standard time and 7 AM Eastern from March.
    pub full_refresh_at: NaiveTime,
    pub active_poll_interval: Duration,
    pub active_window: ActiveWindow,
    pub retry: RetryPolicy,
    pub task_timeout: Duration,
    pub full_refresh_timeout: Duration,
    pub odds_requests_per_minute: u32,
    pub normalization_rules_file: Option<String>,
    pub alias_seed_file: Option<String>,
    pub health_port: u16,
    /// If true, run one full refresh and one active tick, then exit
    pub run_once: bool,
    pub run_migrations: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        // Secrets/config:
        // - Docker Compose: read from /run/secrets/*
        // - Container platforms without a secrets mount: read from env vars

        // API key
        let odds_api_key = match env::var("THE_ODDS_API_KEY") {
            Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
            Ok(_) => return Err(ConfigError::Empty("THE_ODDS_API_KEY")),
            Err(_) => read_secret_file("/run/secrets/odds_api_key", "odds_api_key")?,
        };
        if is_placeholder_key(&odds_api_key) {
            return Err(ConfigError::Placeholder("THE_ODDS_API_KEY"));
        }

        // Database URL - sport-parameterized for multi-sport deployment
        let database_url = match env::var("DATABASE_URL") {
            Ok(v) if !v.trim().is_empty() => v,
            Ok(_) => return Err(ConfigError::Empty("DATABASE_URL")),
            Err(_) => {
                let sport = env::var("SPORT").unwrap_or_else(|_| "ncaam".to_string());
                let db_user = env::var("DB_USER").unwrap_or_else(|_| sport.clone());
                let db_name = env::var("DB_NAME").unwrap_or_else(|_| sport.clone());
                let db_host = env::var("DB_HOST").unwrap_or_else(|_| "postgres".to_string());
                let db_port = env::var("DB_PORT").unwrap_or_else(|_| "5432".to_string());
                let db_password = read_secret_file("/run/secrets/db_password", "db_password")?;
                format!(
                    "postgresql://{}:{}@{}:{}/{}",
                    db_user, db_password, db_host, db_port, db_name
                )
            }
        };

        let redis_url = match env::var("REDIS_URL") {
            Ok(v) if !v.trim().is_empty() => Some(v),
            Ok(_) => return Err(ConfigError::Empty("REDIS_URL")),
            Err(_) => None,
        };

        let full_refresh_at = match env::var("FULL_REFRESH_AT") {
            Ok(v) => NaiveTime::parse_from_str(v.trim(), "%H:%M").map_err(|_| {
                ConfigError::Invalid {
                    name: "FULL_REFRESH_AT",
                    value: v.clone(),
                }
            })?,
            // 6 AM Eastern (EST); an hour later while daylight time is in effect
            Err(_) => NaiveTime::from_hms_opt(11, 0, 0).unwrap_or_default(),
        };

        let season = match env::var("SEASON") {
            Ok(_) => parse_var("SEASON", 0)?,
            Err(_) => current_season(Utc::now().date_naive()),
        };

        let retry = RetryPolicy {
            max_attempts: parse_in_range("FETCH_MAX_ATTEMPTS", 5u32, 1..=20)?,
            base_delay: Duration::from_millis(parse_in_range(
                "FETCH_BASE_DELAY_MS",
                1000,
                0..=MAX_DELAY_MS,
            )?),
            max_delay: Duration::from_millis(parse_in_range(
                "FETCH_MAX_DELAY_MS",
                30_000,
                0..=MAX_DELAY_MS,
            )?),
            ..RetryPolicy::default()
        };

        Ok(Self {
            database_url,
            redis_url,
            odds_api_key,
            sport_key: env::var("SPORT_KEY").unwrap_or_else(|_| "basketball_ncaab".to_string()),
            season,
            full_refresh_at,
            active_poll_interval: Duration::from_secs(parse_in_range(
                "ACTIVE_POLL_INTERVAL_SECONDS",
                30u64,
                1..=MAX_TIMEOUT_SECS,
            )?),
            active_window: ActiveWindow {
                lookahead: chrono::Duration::minutes(parse_in_range(
                    "ACTIVE_LOOKAHEAD_MINUTES",
                    60,
                    0..=MAX_WINDOW_MINUTES,
                )?),
                lookback: chrono::Duration::minutes(parse_in_range(
                    "ACTIVE_LOOKBACK_MINUTES",
                    180,
                    0..=MAX_WINDOW_MINUTES,
                )?),
            },
            retry,
            task_timeout: Duration::from_secs(parse_in_range(
                "TASK_TIMEOUT_SECONDS",
                45,
                1..=MAX_TIMEOUT_SECS,
            )?),
            full_refresh_timeout: Duration::from_secs(parse_in_range(
                "FULL_REFRESH_TIMEOUT_SECONDS",
                300,
                1..=MAX_TIMEOUT_SECS,
            )?),
            odds_requests_per_minute: parse_var("ODDS_REQUESTS_PER_MINUTE", 45)?,
            normalization_rules_file: optional_var("NORMALIZATION_RULES_FILE"),
            alias_seed_file: optional_var("ALIAS_SEED_FILE"),
            health_port: parse_var("HEALTH_PORT", 8083)?,
            run_once: parse_bool("RUN_ONCE", false),
            run_migrations: parse_bool("RUN_MIGRATIONS", true),
        })
    }
}

/// Read a secret from Docker secret file - REQUIRED, NO fallbacks
fn read_secret_file(file_path: &str, secret_name: &'static str) -> Result<String, ConfigError> {
    std::fs::read_to_string(file_path)
        .map(|s| s.trim().to_string())
        .map_err(|_| ConfigError::MissingSecret {
            path: file_path.to_string(),
            name: secret_name,
        })
}

/// Prevent accidental use of sample/placeholder keys
fn is_placeholder_key(key: &str) -> bool {
    let key_lower = key.trim().to_lowercase();
    key_lower.contains("change_me") || key_lower.contains("your_") || key_lower.starts_with("sample")
}

fn parse_var<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(v) => v.trim().parse().map_err(|_| ConfigError::Invalid { name, value: v }),
        Err(_) => Ok(default),
    }
}

/// Like [`parse_var`], but values outside `range` are rejected.
fn parse_in_range<T>(name: &'static str, default: T, range: RangeInclusive<T>) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + ToString,
{
    let value = parse_var(name, default)?;
    if range.contains(&value) {
        Ok(value)
    } else {
        Err(ConfigError::Invalid {
            name,
            value: value.to_string(),
        })
    }
}

fn parse_bool(name: &str, default: bool) -> bool {
    env::var(name)
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(default)
}

fn optional_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}
