use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ActorKey;

/// Ranked output the storefront reads for one actor.
///
/// Always written as a whole; a stored record never mixes two rankings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationRecord {
    pub actor_key: ActorKey,
    pub item_ids: Vec<String>,
    // Always empty until items can be cross-referenced with the catalog store.
    pub category_ids: Vec<String>,
    pub generated_at: DateTime<Utc>,
}

impl RecommendationRecord {
    pub fn new(actor_key: ActorKey, item_ids: Vec<String>, generated_at: DateTime<Utc>) -> Self {
        Self {
            actor_key,
            item_ids,
            category_ids: Vec::new(),
            generated_at,
        }
    }

    /// Compares the ranked content, ignoring when it was generated
    pub fn same_ranking(&self, other: &RecommendationRecord) -> bool {
        self.actor_key == other.actor_key
            && self.item_ids == other.item_ids
            && self.category_ids == other.category_ids
    }
}
