//! Curated alias import.
//!
//! Seed file layout:
//! `{"manual": [{"alias": "UConn", "canonical": "Connecticut"}], "learned": [...]}`

use crate::error::StoreError;
use crate::model::{Source, TeamMetadata};
use crate::resolver::EntityResolver;
use crate::store::CanonicalStore;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct SeedAlias {
    pub alias: String,
    pub canonical: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AliasSeed {
    #[serde(default)]
    pub manual: Vec<SeedAlias>,
    #[serde(default)]
    pub learned: Vec<SeedAlias>,
}

impl AliasSeed {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read alias seed {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse alias seed {}", path.display()))
    }

    pub fn entries(&self) -> impl Iterator<Item = &SeedAlias> {
        self.manual.iter().chain(self.learned.iter())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub aliases_added: usize,
    pub skipped: usize,
}

/// Create any missing canonical teams and record every alias with source
/// `manual`. Runs in one transaction; a bad entry is rolled back on its own.
pub async fn apply_seed(
    store: &dyn CanonicalStore,
    resolver: &EntityResolver,
    seed: &AliasSeed,
) -> Result<SeedReport, StoreError> {
    let mut report = SeedReport::default();
    let mut tx = store.begin().await?;

    for entry in seed.entries() {
        let alias = entry.alias.trim();
        let canonical = entry.canonical.trim();
        if alias.is_empty() || canonical.is_empty() {
            report.skipped += 1;
            continue;
        }

        tx.savepoint().await?;
        let result = async {
            let team_id = resolver
                .create_entity(tx.as_mut(), canonical, Source::Manual, &TeamMetadata::default())
                .await?;
            resolver
                .ensure_alias(tx.as_mut(), team_id, alias, Source::Manual)
                .await
        }
        .await;

        match result {
            Ok(added) => {
                tx.release_savepoint().await?;
                if added {
                    report.aliases_added += 1;
                }
            }
            Err(e) => {
                tx.rollback_to_savepoint().await?;
                report.skipped += 1;
                warn!("Skipping seed alias '{}' -> '{}': {}", alias, canonical, e);
            }
        }
    }

    tx.commit().await?;
    info!(
        "Alias seed applied: {} new aliases, {} skipped",
        report.aliases_added, report.skipped
    );
    Ok(report)
}
