use std::sync::Arc;

use crate::{
    models::TrackedEvent,
    services::{debounce::DebounceScheduler, profiles::ProfileStore, scoring::ScoringPolicy},
};

/// What happened to a single feed event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// Profile updated and recomputation (re)scheduled
    Applied,
    /// Event carried no meaning for profiles
    Ignored,
    /// Storage failed; the event was dropped
    Failed,
}

/// Scoring policy → profile store → debounce scheduler, for one event at a time
#[derive(Clone)]
pub struct Pipeline {
    policy: ScoringPolicy,
    profiles: Arc<dyn ProfileStore>,
    scheduler: DebounceScheduler,
}

impl Pipeline {
    pub fn new(
        policy: ScoringPolicy,
        profiles: Arc<dyn ProfileStore>,
        scheduler: DebounceScheduler,
    ) -> Self {
        Self {
            policy,
            profiles,
            scheduler,
        }
    }

    pub fn scheduler(&self) -> &DebounceScheduler {
        &self.scheduler
    }

    /// Applies one event. Never fails: storage errors are logged and the event dropped
    /// so the feed keeps moving.
    pub async fn handle(&self, event: &TrackedEvent) -> EventOutcome {
        let Some(increment) = self.policy.increment(event) else {
            tracing::debug!(
                source = %event.source,
                operation = ?event.operation,
                "Ignoring non-insert event"
            );
            return EventOutcome::Ignored;
        };

        if let Err(e) = self
            .profiles
            .apply_increment(&event.actor_key, &increment)
            .await
        {
            if e.is_transient() {
                tracing::warn!(
                    actor_key = %event.actor_key,
                    source = %event.source,
                    error = %e,
                    "Failed to update profile, dropping event"
                );
            } else {
                tracing::error!(
                    actor_key = %event.actor_key,
                    source = %event.source,
                    error = %e,
                    "Profile update rejected, dropping event"
                );
            }
            return EventOutcome::Failed;
        }

        self.scheduler.arm(&event.actor_key);
        EventOutcome::Applied
    }
}
