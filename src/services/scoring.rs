use std::collections::BTreeMap;

use crate::models::{CartAction, MetricName, SourceCollection, TrackedEvent};

/// Fixed weights applied per interaction kind
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoringWeights {
    pub view: f64,
    pub dwell_per_sec: f64,
    pub add_to_cart: f64,
    pub update: f64,
    pub remove: f64,
    pub order: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            view: 1.0,
            dwell_per_sec: 0.02,
            add_to_cart: 3.0,
            update: 0.5,
            remove: -1.0,
            order: 10.0,
        }
    }
}

/// What a single event contributes to its actor's profile
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ScoreIncrement {
    pub item_id: Option<String>,
    pub score_delta: f64,
    pub metric_deltas: BTreeMap<MetricName, i64>,
}

impl ScoreIncrement {
    fn counted(item_id: Option<String>, score_delta: f64, metric: MetricName) -> Self {
        let mut metric_deltas = BTreeMap::new();
        metric_deltas.insert(metric, 1);
        Self {
            item_id,
            score_delta,
            metric_deltas,
        }
    }

    /// True when the increment would create or move an item score
    pub fn touches_score(&self) -> bool {
        self.item_id.is_some() && self.score_delta != 0.0
    }
}

/// Maps feed events to profile increments.
///
/// Pure and total: malformed fields degrade to zero effect instead of failing.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScoringPolicy {
    weights: ScoringWeights,
}

impl ScoringPolicy {
    pub fn new(weights: ScoringWeights) -> Self {
        Self { weights }
    }

    /// Returns `None` for events that carry no meaning for profiles (non-inserts).
    pub fn increment(&self, event: &TrackedEvent) -> Option<ScoreIncrement> {
        if !event.operation.is_insert() {
            return None;
        }

        let item_id = event.item_id.clone();
        let increment = match event.source {
            SourceCollection::ProductViews => {
                let dwell = sanitize_dwell(event.dwell_seconds);
                ScoreIncrement::counted(
                    item_id,
                    self.weights.view + self.weights.dwell_per_sec * dwell,
                    MetricName::Clicks,
                )
            }
            SourceCollection::Searches => {
                ScoreIncrement::counted(None, 0.0, MetricName::Searches)
            }
            SourceCollection::CartMutations => match &event.action {
                Some(CartAction::Add) => {
                    ScoreIncrement::counted(item_id, self.weights.add_to_cart, MetricName::CartAdds)
                }
                Some(CartAction::Update) => {
                    ScoreIncrement::counted(item_id, self.weights.update, MetricName::CartUpdates)
                }
                Some(CartAction::Remove) => {
                    ScoreIncrement::counted(item_id, self.weights.remove, MetricName::CartRemoves)
                }
                Some(CartAction::Other(_)) | None => ScoreIncrement {
                    item_id,
                    ..ScoreIncrement::default()
                },
            },
            SourceCollection::Orders => {
                ScoreIncrement::counted(item_id, self.weights.order, MetricName::Orders)
            }
        };

        Some(increment)
    }
}

fn sanitize_dwell(dwell_seconds: Option<f64>) -> f64 {
    match dwell_seconds {
        Some(seconds) if seconds.is_finite() && seconds > 0.0 => seconds,
        _ => 0.0,
    }
}
