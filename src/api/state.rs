use std::sync::Arc;

use crate::services::recommendations::{Materializer, RecommendationStore};

/// Shared state for the read API
#[derive(Clone)]
pub struct AppState {
    pub recommendations: Arc<dyn RecommendationStore>,
    /// Used when a session signs in and its history moves to the user
    pub materializer: Arc<Materializer>,
}

impl AppState {
    pub fn new(
        recommendations: Arc<dyn RecommendationStore>,
        materializer: Arc<Materializer>,
    ) -> Self {
        Self {
            recommendations,
            materializer,
        }
    }
}
