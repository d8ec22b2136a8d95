//! Error taxonomy for the ingestion core.

use std::time::Duration;
use thiserror::Error;

/// Canonical store failures. Any of these during name matching means the
/// store is unreachable or rejected a statement.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("unique constraint violated: {0}")]
    Conflict(String),

    #[error("transaction already finished")]
    TransactionClosed,

    #[error("no savepoint to release or roll back")]
    NoSavepoint,

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Source fetch failures, classified for the retry loop.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("rate limited (status 429)")]
    RateLimited { retry_after: Option<Duration> },

    #[error("server error (status {status}): {body}")]
    Server {
        status: u16,
        body: String,
        retry_after: Option<Duration>,
    },

    #[error("client error (status {status}): {body}")]
    Client { status: u16, body: String },

    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("fetch cancelled")]
    Cancelled,

    #[error("fetch timed out after {0:?}")]
    TimedOut(Duration),

    #[error("giving up after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: Box<FetchError>,
    },
}

impl FetchError {
    /// Transport failures, 429 and 5xx are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FetchError::Transport(_) | FetchError::RateLimited { .. } | FetchError::Server { .. }
        )
    }

    /// Server-supplied "retry after" directive, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            FetchError::RateLimited { retry_after } => *retry_after,
            FetchError::Server { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Classify an HTTP status that was not a success.
    pub fn from_status(status: u16, body: String, retry_after: Option<Duration>) -> Self {
        match status {
            429 => FetchError::RateLimited { retry_after },
            500..=599 => FetchError::Server {
                status,
                body,
                retry_after,
            },
            _ => FetchError::Client { status, body },
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            FetchError::Malformed(e.to_string())
        } else {
            FetchError::Transport(e.to_string())
        }
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(e: serde_json::Error) -> Self {
        FetchError::Malformed(e.to_string())
    }
}

/// Resolution failures. Only store failures can make resolution fail.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("empty team name from {0}")]
    EmptyName(crate::model::Source),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Per-record ingestion failures.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("could not resolve '{name}': {source}")]
    Resolve {
        name: String,
        #[source]
        source: ResolveError,
    },

    #[error("home and away both resolved to team {team_id} (home: '{home}', away: '{away}')")]
    SameTeam {
        team_id: uuid::Uuid,
        home: String,
        away: String,
    },

    #[error("event {external_id} has no {field}")]
    Incomplete {
        external_id: String,
        field: &'static str,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Fetch(#[from] FetchError),
}

/// Invalid configuration values.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is set but empty")]
    Empty(&'static str),

    #[error("{name} has an invalid value '{value}'")]
    Invalid { name: &'static str, value: String },

    #[error("{0} appears to be a placeholder value; replace with your real key")]
    Placeholder(&'static str),

    #[error("CRITICAL: Secret file not found at {path} ({name}). Container must have secrets mounted.")]
    MissingSecret { path: String, name: &'static str },

    #[error("failed to read rule table {path}: {reason}")]
    RuleTable { path: String, reason: String },
}
