//! In-process stores with the same semantics as the Postgres and Redis backends.
//!
//! Used by the test suites and for running the pipeline without external services.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;

use crate::{
    error::{AppError, AppResult},
    models::{
        ActorKey, FeedEntry, FeedPosition, Profile, RecommendationRecord, SourceCollection,
        TrackedEvent,
    },
    services::{
        feed::{EventFeed, FeedSubscription},
        profiles::ProfileStore,
        recommendations::RecommendationStore,
        scoring::ScoreIncrement,
    },
};

fn lock<T>(mutex: &Mutex<T>) -> AppResult<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| AppError::Internal("memory store lock poisoned".to_string()))
}

/// Profiles kept in a map; each increment is applied under one lock acquisition
#[derive(Default)]
pub struct MemoryProfileStore {
    profiles: Mutex<HashMap<ActorKey, Profile>>,
}

impl MemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn apply_increment(
        &self,
        actor_key: &ActorKey,
        increment: &ScoreIncrement,
    ) -> AppResult<()> {
        let now = Utc::now();
        let mut profiles = lock(&self.profiles)?;

        let profile = profiles
            .entry(actor_key.clone())
            .or_insert_with(|| Profile::new(actor_key.clone(), now));
        profile.updated_at = now;

        if let Some(item_id) = increment.item_id.as_ref().filter(|_| increment.touches_score()) {
            *profile.scores.entry(item_id.clone()).or_insert(0.0) += increment.score_delta;
        }

        for (name, delta) in &increment.metric_deltas {
            *profile.metrics.entry(name.as_str().to_string()).or_insert(0) += delta;
        }

        Ok(())
    }

    async fn get(&self, actor_key: &ActorKey) -> AppResult<Option<Profile>> {
        Ok(lock(&self.profiles)?.get(actor_key).cloned())
    }

    async fn merge_into(&self, from: &ActorKey, to: &ActorKey) -> AppResult<bool> {
        if from == to {
            return Ok(false);
        }

        let now = Utc::now();
        let mut profiles = lock(&self.profiles)?;
        let Some(source) = profiles.remove(from) else {
            return Ok(false);
        };

        let target = profiles
            .entry(to.clone())
            .or_insert_with(|| Profile::new(to.clone(), now));
        target.updated_at = now;

        for (item_id, score) in source.scores {
            *target.scores.entry(item_id).or_insert(0.0) += score;
        }
        for (name, value) in source.metrics {
            *target.metrics.entry(name).or_insert(0) += value;
        }

        Ok(true)
    }
}

/// Recommendation records kept in a map
#[derive(Default)]
pub struct MemoryRecommendationStore {
    records: Mutex<HashMap<ActorKey, RecommendationRecord>>,
}

impl MemoryRecommendationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|records| records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait::async_trait]
impl RecommendationStore for MemoryRecommendationStore {
    async fn put(&self, record: &RecommendationRecord) -> AppResult<()> {
        lock(&self.records)?.insert(record.actor_key.clone(), record.clone());
        Ok(())
    }

    async fn delete(&self, actor_key: &ActorKey) -> AppResult<()> {
        lock(&self.records)?.remove(actor_key);
        Ok(())
    }

    async fn get(&self, actor_key: &ActorKey) -> AppResult<Option<RecommendationRecord>> {
        Ok(lock(&self.records)?.get(actor_key).cloned())
    }
}

/// Append-only logs per source with durable-looking cursors.
///
/// Every push is its own committed writer, so entries are visible immediately and
/// the transaction part of each position is the entry's sequence number.
#[derive(Default)]
pub struct MemoryEventFeed {
    logs: Mutex<HashMap<SourceCollection, Vec<FeedEntry>>>,
    positions: Mutex<HashMap<SourceCollection, FeedPosition>>,
    wakeups: Mutex<HashMap<SourceCollection, Arc<Notify>>>,
}

impl MemoryEventFeed {
    pub fn new() -> Self {
        Self::default()
    }

    fn wakeup(&self, source: SourceCollection) -> Arc<Notify> {
        let mut wakeups = self.wakeups.lock().unwrap_or_else(|e| e.into_inner());
        wakeups.entry(source).or_default().clone()
    }

    /// Appends an event to its source log and returns its position
    pub fn push(&self, event: TrackedEvent) -> FeedPosition {
        let source = event.source;
        let position = {
            let mut logs = self.logs.lock().unwrap_or_else(|e| e.into_inner());
            let log = logs.entry(source).or_default();
            let sequence = log.len() as i64 + 1;
            let position = FeedPosition::new(sequence, sequence);
            log.push(FeedEntry { position, event });
            position
        };

        self.wakeup(source).notify_one();
        position
    }

    /// Currently committed position for a source
    pub fn committed(&self, source: SourceCollection) -> FeedPosition {
        self.positions
            .lock()
            .map(|positions| positions.get(&source).copied().unwrap_or_default())
            .unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl EventFeed for MemoryEventFeed {
    async fn subscribe(&self, source: SourceCollection) -> AppResult<Box<dyn FeedSubscription>> {
        Ok(Box::new(MemorySubscription {
            notify: self.wakeup(source),
        }))
    }

    async fn load_position(&self, source: SourceCollection) -> AppResult<FeedPosition> {
        Ok(lock(&self.positions)?.get(&source).copied().unwrap_or_default())
    }

    async fn commit_position(
        &self,
        source: SourceCollection,
        position: FeedPosition,
    ) -> AppResult<()> {
        let mut positions = lock(&self.positions)?;
        let current = positions.entry(source).or_default();
        *current = (*current).max(position);
        Ok(())
    }

    async fn fetch_after(
        &self,
        source: SourceCollection,
        position: FeedPosition,
        limit: i64,
    ) -> AppResult<Vec<FeedEntry>> {
        let logs = lock(&self.logs)?;
        let entries: Vec<FeedEntry> = logs
            .get(&source)
            .map(|log| {
                log.iter()
                    .filter(|entry| entry.position > position)
                    .take(limit.max(0) as usize)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(entries)
    }
}

struct MemorySubscription {
    notify: Arc<Notify>,
}

#[async_trait::async_trait]
impl FeedSubscription for MemorySubscription {
    async fn wait(&mut self, timeout: Duration) -> AppResult<()> {
        let _ = tokio::time::timeout(timeout, self.notify.notified()).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MetricName, OperationType};

    fn view(item: Option<&str>, delta: f64) -> ScoreIncrement {
        let mut increment = ScoreIncrement {
            item_id: item.map(str::to_string),
            score_delta: delta,
            ..ScoreIncrement::default()
        };
        increment.metric_deltas.insert(MetricName::Clicks, 1);
        increment
    }

    #[tokio::test]
    async fn test_increment_creates_profile() {
        let store = MemoryProfileStore::new();
        let actor = ActorKey::from("s1");

        store.apply_increment(&actor, &view(Some("X"), 1.6)).await.unwrap();

        let profile = store.get(&actor).await.unwrap().unwrap();
        assert!((profile.score("X").unwrap() - 1.6).abs() < 1e-9);
        assert_eq!(profile.metric(MetricName::Clicks), 1);
    }

    #[test]
    fn test_missing_profile_reads_as_none() {
        let store = MemoryProfileStore::new();
        let profile = tokio_test::block_on(store.get(&ActorKey::from("nobody")));
        assert_eq!(tokio_test::assert_ok!(profile), None);
    }

    #[tokio::test]
    async fn test_zero_delta_never_creates_score_entry() {
        let store = MemoryProfileStore::new();
        let actor = ActorKey::from("s1");

        store.apply_increment(&actor, &view(Some("X"), 0.0)).await.unwrap();
        store.apply_increment(&actor, &view(None, 2.0)).await.unwrap();

        let profile = store.get(&actor).await.unwrap().unwrap();
        assert!(profile.is_cold());
        assert_eq!(profile.metric(MetricName::Clicks), 2);
    }

    #[tokio::test]
    async fn test_created_at_is_kept_on_update() {
        let store = MemoryProfileStore::new();
        let actor = ActorKey::from("s1");

        store.apply_increment(&actor, &view(Some("X"), 1.0)).await.unwrap();
        let created = store.get(&actor).await.unwrap().unwrap().created_at;
        store.apply_increment(&actor, &view(Some("X"), 1.0)).await.unwrap();

        let profile = store.get(&actor).await.unwrap().unwrap();
        assert_eq!(profile.created_at, created);
        assert!(profile.updated_at >= created);
    }

    #[tokio::test]
    async fn test_merge_adds_scores_and_removes_source() {
        let store = MemoryProfileStore::new();
        let session = ActorKey::from("s1");
        let user = ActorKey::resolve(None, Some("7"));

        store.apply_increment(&session, &view(Some("X"), 1.6)).await.unwrap();
        store.apply_increment(&session, &view(Some("Z"), 3.0)).await.unwrap();
        store.apply_increment(&user, &view(Some("X"), 1.0)).await.unwrap();

        assert!(store.merge_into(&session, &user).await.unwrap());

        let merged = store.get(&user).await.unwrap().unwrap();
        assert!((merged.score("X").unwrap() - 2.6).abs() < 1e-9);
        assert_eq!(merged.score("Z"), Some(3.0));
        assert_eq!(merged.metric(MetricName::Clicks), 3);
        assert_eq!(store.get(&session).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_merge_without_source_changes_nothing() {
        let store = MemoryProfileStore::new();
        let user = ActorKey::resolve(None, Some("7"));
        store.apply_increment(&user, &view(Some("X"), 1.0)).await.unwrap();

        assert!(!store.merge_into(&ActorKey::from("s1"), &user).await.unwrap());
        assert!(!store.merge_into(&user, &user).await.unwrap());

        let profile = store.get(&user).await.unwrap().unwrap();
        assert_eq!(profile.score("X"), Some(1.0));
    }

    #[tokio::test]
    async fn test_feed_fetch_respects_position_and_limit() {
        let feed = MemoryEventFeed::new();
        for _ in 0..5 {
            feed.push(TrackedEvent {
                source: SourceCollection::Searches,
                operation: OperationType::Insert,
                actor_key: ActorKey::from("s1"),
                item_id: None,
                action: None,
                dwell_seconds: None,
                observed_at: Utc::now(),
            });
        }

        let entries = feed
            .fetch_after(SourceCollection::Searches, FeedPosition::new(2, 2), 2)
            .await
            .unwrap();
        let rows: Vec<i64> = entries.iter().map(|e| e.position.row_id).collect();
        assert_eq!(rows, vec![3, 4]);

        let other = feed
            .fetch_after(SourceCollection::CartMutations, FeedPosition::default(), 10)
            .await
            .unwrap();
        assert!(other.is_empty());
    }

    #[tokio::test]
    async fn test_commit_never_moves_backwards() {
        let feed = MemoryEventFeed::new();

        let later = FeedPosition::new(9, 9);
        tokio_test::assert_ok!(feed.commit_position(SourceCollection::Orders, later).await);
        tokio_test::assert_ok!(
            feed.commit_position(SourceCollection::Orders, FeedPosition::new(4, 4))
                .await
        );

        assert_eq!(
            feed.load_position(SourceCollection::Orders).await.unwrap(),
            later
        );
    }
}
