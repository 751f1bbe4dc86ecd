use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Display;

use super::ActorKey;

/// Interaction counters kept on every profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MetricName {
    #[serde(rename = "clicks")]
    Clicks,
    #[serde(rename = "searches")]
    Searches,
    #[serde(rename = "cartAdds")]
    CartAdds,
    #[serde(rename = "cartUpdates")]
    CartUpdates,
    #[serde(rename = "cartRemoves")]
    CartRemoves,
    #[serde(rename = "orders")]
    Orders,
}

impl MetricName {
    /// Counter name as persisted
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::Clicks => "clicks",
            MetricName::Searches => "searches",
            MetricName::CartAdds => "cartAdds",
            MetricName::CartUpdates => "cartUpdates",
            MetricName::CartRemoves => "cartRemoves",
            MetricName::Orders => "orders",
        }
    }
}

impl Display for MetricName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Accumulated interest of one actor.
///
/// `scores` is ordered by item id, which keeps ranking ties deterministic. An actor
/// stays cold until at least one item has a non-zero score; entries that cancelled
/// out to exactly zero do not count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub actor_key: ActorKey,
    pub scores: BTreeMap<String, f64>,
    pub metrics: BTreeMap<String, i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    pub fn new(actor_key: ActorKey, now: DateTime<Utc>) -> Self {
        Self {
            actor_key,
            scores: BTreeMap::new(),
            metrics: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_cold(&self) -> bool {
        self.scores.values().all(|score| *score == 0.0)
    }

    pub fn metric(&self, name: MetricName) -> i64 {
        self.metrics.get(name.as_str()).copied().unwrap_or(0)
    }

    pub fn score(&self, item_id: &str) -> Option<f64> {
        self.scores.get(item_id).copied()
    }
}
