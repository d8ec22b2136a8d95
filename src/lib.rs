//! NCAA basketball ingestion core.
//!
//! Resolves every source's spelling of a team to one canonical team, and
//! keeps ratings and odds fresh on two independent schedules.

pub mod config;
pub mod error;
pub mod health;
pub mod ingest;
pub mod model;
pub mod normalize;
pub mod publish;
pub mod resolver;
pub mod retry;
pub mod scheduler;
pub mod seed;
pub mod source;
pub mod store;
