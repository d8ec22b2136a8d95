//! Entity resolution: map a source's spelling of a team to one canonical team.
//!
//! Order, first hit wins:
//! 1. native-name cache column for the source
//! 2. case-insensitive canonical name or alias match
//! 3. the same lookup against the normalized name
//! 4. create a team named after the normalized string
//!
//! Every hit records the raw string as an alias for its source, so step 1 and
//! step 2 get more complete over time. Resolution only touches the store.

use crate::error::ResolveError;
use crate::model::{MatchedVia, NameMatch, NewTeam, ResolutionAudit, Source, TeamMetadata};
use crate::normalize::NormalizationRules;
use crate::store::StoreTx;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Outcome of a successful resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolved {
    pub team_id: Uuid,
    pub matched_via: MatchedVia,
}

#[derive(Clone, Default)]
pub struct EntityResolver {
    rules: Arc<NormalizationRules>,
}

impl EntityResolver {
    pub fn new(rules: NormalizationRules) -> Self {
        Self {
            rules: Arc::new(rules),
        }
    }

    pub async fn resolve(
        &self,
        tx: &mut dyn StoreTx,
        source_name: &str,
        source: Source,
    ) -> Result<Resolved, ResolveError> {
        self.resolve_with_metadata(tx, source_name, source, &TeamMetadata::default())
            .await
    }

    /// Resolve `source_name`, using `metadata` if a new team has to be created.
    pub async fn resolve_with_metadata(
        &self,
        tx: &mut dyn StoreTx,
        source_name: &str,
        source: Source,
        metadata: &TeamMetadata,
    ) -> Result<Resolved, ResolveError> {
        let raw = source_name.trim();
        if raw.is_empty() {
            return Err(ResolveError::EmptyName(source));
        }

        if source.native_name_column().is_some() {
            if let Some(team_id) = tx.find_by_native_name(source, raw).await? {
                self.ensure_alias(tx, team_id, raw, source).await?;
                return Ok(Resolved {
                    team_id,
                    matched_via: MatchedVia::NativeName,
                });
            }
        }

        if let Some(team_id) = self.lookup(tx, raw).await? {
            self.ensure_alias(tx, team_id, raw, source).await?;
            return Ok(Resolved {
                team_id,
                matched_via: MatchedVia::CanonicalOrAlias,
            });
        }

        let normalized = self.rules.normalize(raw);
        let normalized = if normalized.is_empty() {
            raw.to_string()
        } else {
            normalized
        };

        if !normalized.eq_ignore_ascii_case(raw) {
            if let Some(team_id) = self.lookup(tx, &normalized).await? {
                debug!("Resolved '{}' via normalized name '{}'", raw, normalized);
                self.ensure_alias(tx, team_id, raw, source).await?;
                return Ok(Resolved {
                    team_id,
                    matched_via: MatchedVia::Normalized,
                });
            }
        }

        let team_id = self.create_entity(tx, &normalized, source, metadata).await?;
        self.ensure_alias(tx, team_id, raw, source).await?;
        info!(
            "Created team '{}' for {} name '{}'",
            normalized, source, raw
        );
        Ok(Resolved {
            team_id,
            matched_via: MatchedVia::Created,
        })
    }

    /// Record `alias` for `source` unless it is already there verbatim, and
    /// fill the source's native-name cache. Returns true if a new alias row
    /// was written.
    pub async fn ensure_alias(
        &self,
        tx: &mut dyn StoreTx,
        team_id: Uuid,
        alias: &str,
        source: Source,
    ) -> Result<bool, ResolveError> {
        let inserted = if tx.alias_exists(alias, source).await? {
            false
        } else {
            tx.insert_alias(team_id, alias, source).await?
        };

        if source.native_name_column().is_some() {
            tx.cache_native_name(team_id, source, alias).await?;
        }

        Ok(inserted)
    }

    /// Create a team named `normalized_name`, or return the team that already
    /// holds that canonical name.
    pub async fn create_entity(
        &self,
        tx: &mut dyn StoreTx,
        normalized_name: &str,
        seed_source: Source,
        metadata: &TeamMetadata,
    ) -> Result<Uuid, ResolveError> {
        debug!("Creating team '{}' first seen from {}", normalized_name, seed_source);
        let team = NewTeam {
            canonical_name: normalized_name.to_string(),
            metadata: metadata.clone(),
        };
        Ok(tx.insert_team(&team).await?)
    }

    /// Write an audit row for a resolution. Failures are logged and swallowed;
    /// the savepoint keeps a failed insert from aborting the caller's transaction.
    pub async fn audit(
        &self,
        tx: &mut dyn StoreTx,
        input_name: &str,
        resolved: Resolved,
        source: Source,
        context: &'static str,
    ) {
        if let Err(e) = self
            .try_audit(tx, input_name, resolved, source, context)
            .await
        {
            warn!("Failed to record resolution audit for '{}': {}", input_name, e);
        }
    }

    async fn try_audit(
        &self,
        tx: &mut dyn StoreTx,
        input_name: &str,
        resolved: Resolved,
        source: Source,
        context: &'static str,
    ) -> Result<(), ResolveError> {
        tx.savepoint().await?;
        let result = async {
            let resolved_name = tx
                .canonical_name(resolved.team_id)
                .await?
                .unwrap_or_default();
            let has_ratings = tx.has_ratings(resolved.team_id).await?;
            tx.record_resolution(&ResolutionAudit {
                input_name: input_name.to_string(),
                resolved_name,
                source,
                context,
                matched_via: resolved.matched_via,
                has_ratings,
            })
            .await
        }
        .await;

        match result {
            Ok(()) => tx.release_savepoint().await?,
            Err(e) => {
                tx.rollback_to_savepoint().await?;
                return Err(e.into());
            }
        }
        Ok(())
    }

    /// Canonical/alias lookup with the rated-team tie-break.
    async fn lookup(&self, tx: &mut dyn StoreTx, name: &str) -> Result<Option<Uuid>, ResolveError> {
        let matches = tx.find_by_name(name).await?;
        if matches.len() > 1 {
            // Alias uniqueness should make this impossible; seeing it points at bad data.
            warn!(
                "Name '{}' matches {} teams: {}",
                name,
                matches.len(),
                matches
                    .iter()
                    .map(|m| m.canonical_name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }
        Ok(pick_match(&matches).map(|m| m.team_id))
    }
}

/// Prefer a team that already has ratings over a bare placeholder.
fn pick_match(matches: &[NameMatch]) -> Option<&NameMatch> {
    matches
        .iter()
        .find(|m| m.has_ratings)
        .or_else(|| matches.first())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RatingFact, RatingValues};
    use crate::store::{CanonicalStore, MemoryStore};
    use chrono::NaiveDate;

    fn team(name: &str) -> NewTeam {
        NewTeam {
            canonical_name: name.to_string(),
            metadata: TeamMetadata::default(),
        }
    }

    #[tokio::test]
    async fn empty_name_is_rejected() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let err = EntityResolver::default()
            .resolve(tx.as_mut(), "   ", Source::TheOddsApi)
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::EmptyName(Source::TheOddsApi)));
    }

    #[tokio::test]
    async fn tie_break_prefers_rated_team() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let placeholder = tx.insert_team(&team("Miami")).await.unwrap();
        let established = tx.insert_team(&team("Miami FL")).await.unwrap();
        tx.insert_alias(established, "Miami", Source::Manual).await.unwrap();
        tx.upsert_rating(&RatingFact {
            team_id: established,
            rating_date: NaiveDate::from_ymd_opt(2026, 1, 5).unwrap(),
            values: RatingValues::default(),
        })
        .await
        .unwrap();

        let resolved = EntityResolver::default()
            .resolve(tx.as_mut(), "Miami", Source::TheOddsApi)
            .await
            .unwrap();
        assert_ne!(resolved.team_id, placeholder);
        assert_eq!(resolved.team_id, established);
        assert_eq!(resolved.matched_via, MatchedVia::CanonicalOrAlias);
    }

    #[tokio::test]
    async fn second_resolution_hits_native_cache() {
        let store = MemoryStore::new();
        let resolver = EntityResolver::default();
        let mut tx = store.begin().await.unwrap();

        let first = resolver
            .resolve(tx.as_mut(), "Gonzaga", Source::Barttorvik)
            .await
            .unwrap();
        assert_eq!(first.matched_via, MatchedVia::Created);

        let second = resolver
            .resolve(tx.as_mut(), "Gonzaga", Source::Barttorvik)
            .await
            .unwrap();
        assert_eq!(second.team_id, first.team_id);
        assert_eq!(second.matched_via, MatchedVia::NativeName);
    }

    #[tokio::test]
    async fn audit_records_resolution_path() {
        let store = MemoryStore::new();
        let resolver = EntityResolver::default();
        let mut tx = store.begin().await.unwrap();
        let resolved = resolver
            .resolve(tx.as_mut(), "Ohio State", Source::TheOddsApi)
            .await
            .unwrap();
        resolver
            .audit(tx.as_mut(), "Ohio State", resolved, Source::TheOddsApi, "home")
            .await;
        tx.commit().await.unwrap();

        let state = store.state().await;
        assert_eq!(state.audits.len(), 1);
        assert_eq!(state.audits[0].resolved_name, "Ohio St.");
        assert_eq!(state.audits[0].matched_via, MatchedVia::Created);
        assert!(!state.audits[0].has_ratings);
    }
}
