use chrono::Utc;
use std::sync::Arc;

use crate::{
    error::AppResult,
    models::{ActorKey, Profile, RecommendationRecord},
    services::profiles::ProfileStore,
};

/// Output store the storefront reads recommendations from.
///
/// Records are replaced or deleted whole; there is no partial field update.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait RecommendationStore: Send + Sync {
    async fn put(&self, record: &RecommendationRecord) -> AppResult<()>;

    async fn delete(&self, actor_key: &ActorKey) -> AppResult<()>;

    async fn get(&self, actor_key: &ActorKey) -> AppResult<Option<RecommendationRecord>>;
}

/// Something that can recompute an actor's recommendations on demand
#[async_trait::async_trait]
pub trait Materialize: Send + Sync {
    async fn materialize(&self, actor_key: &ActorKey) -> AppResult<MaterializeOutcome>;
}

/// Cut-offs applied after sorting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RankingLimits {
    pub max_candidates: usize,
    pub top_n: usize,
}

impl Default for RankingLimits {
    fn default() -> Self {
        Self {
            max_candidates: 100,
            top_n: 25,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MaterializeOutcome {
    /// A fresh record replaced whatever was stored
    Written(RecommendationRecord),
    /// The actor had no item signal; any stored record was removed
    Suppressed,
}

/// Orders a profile's items by score, highest first.
///
/// The sort is stable over the profile's item-id order, so equal scores always come
/// out in the same order. Negative scores stay in the ranking; items whose score
/// cancelled out to zero are left out.
pub fn rank_items(profile: &Profile, limits: RankingLimits) -> Vec<String> {
    let mut entries: Vec<(&String, f64)> = profile
        .scores
        .iter()
        .map(|(item_id, score)| (item_id, *score))
        .filter(|(_, score)| *score != 0.0)
        .collect();

    entries.sort_by(|a, b| b.1.total_cmp(&a.1));

    entries
        .into_iter()
        .take(limits.max_candidates)
        .take(limits.top_n)
        .map(|(item_id, _)| item_id.clone())
        .collect()
}

/// Turns profiles into stored recommendation records
pub struct Materializer {
    profiles: Arc<dyn ProfileStore>,
    output: Arc<dyn RecommendationStore>,
    limits: RankingLimits,
}

impl Materializer {
    pub fn new(
        profiles: Arc<dyn ProfileStore>,
        output: Arc<dyn RecommendationStore>,
        limits: RankingLimits,
    ) -> Self {
        Self {
            profiles,
            output,
            limits,
        }
    }

    /// Folds a session's history into the signed-in user's profile and recomputes
    /// the user's list right away.
    ///
    /// The session's stored list is removed along with its profile. Returns `None`
    /// when the session had nothing to merge.
    pub async fn merge_into(
        &self,
        session: &ActorKey,
        user: &ActorKey,
    ) -> AppResult<Option<MaterializeOutcome>> {
        if !self.profiles.merge_into(session, user).await? {
            return Ok(None);
        }

        self.output.delete(session).await?;
        self.materialize(user).await.map(Some)
    }
}

#[async_trait::async_trait]
impl Materialize for Materializer {
    async fn materialize(&self, actor_key: &ActorKey) -> AppResult<MaterializeOutcome> {
        let profile = self.profiles.get(actor_key).await?;

        let profile = match profile {
            Some(profile) if !profile.is_cold() => profile,
            _ => {
                // Cold actors must never be left with a stale list.
                self.output.delete(actor_key).await?;
                tracing::debug!(actor_key = %actor_key, "Cold start, recommendations suppressed");
                return Ok(MaterializeOutcome::Suppressed);
            }
        };

        let item_ids = rank_items(&profile, self.limits);
        let record = RecommendationRecord::new(actor_key.clone(), item_ids, Utc::now());

        self.output.put(&record).await?;

        tracing::info!(
            actor_key = %actor_key,
            items = ?record.item_ids,
            "Recommendations updated"
        );

        Ok(MaterializeOutcome::Written(record))
    }
}
