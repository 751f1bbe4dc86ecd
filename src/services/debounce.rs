//! Per-actor debounce of recommendation recomputation.
//!
//! Every armed actor owns one sleeping tokio task. Re-arming aborts that task and
//! spawns a fresh one, so a steady trickle of events keeps pushing the deadline out
//! and recomputation only happens after a quiet gap.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::models::ActorKey;
use crate::services::recommendations::{Materialize, MaterializeOutcome};

/// Pending timer for one actor
struct ArmedTimer {
    generation: u64,
    deadline: Instant,
    handle: JoinHandle<()>,
}

/// Coalesces bursts of events into one recomputation per quiet period
#[derive(Clone)]
pub struct DebounceScheduler {
    delay: Duration,
    materializer: Arc<dyn Materialize>,
    timers: Arc<DashMap<ActorKey, ArmedTimer>>,
    generations: Arc<AtomicU64>,
}

impl DebounceScheduler {
    pub fn new(delay: Duration, materializer: Arc<dyn Materialize>) -> Self {
        Self {
            delay,
            materializer,
            timers: Arc::new(DashMap::new()),
            generations: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Arms (or re-arms) the actor's timer at `now + delay`.
    ///
    /// A pending timer is aborted. A timer that has already fired is not affected;
    /// its recomputation finishes and this call starts a new period.
    pub fn arm(&self, actor_key: &ActorKey) {
        let generation = self.generations.fetch_add(1, Ordering::Relaxed) + 1;
        let deadline = Instant::now() + self.delay;

        // Holding the entry guard keeps the fire path below from observing a
        // half-replaced timer for this actor.
        let entry = self.timers.entry(actor_key.clone());
        let handle = self.spawn_timer(actor_key.clone(), generation, deadline);
        let timer = ArmedTimer {
            generation,
            deadline,
            handle,
        };

        match entry {
            Entry::Occupied(mut occupied) => {
                let previous = occupied.insert(timer);
                previous.handle.abort();
                tracing::trace!(actor_key = %actor_key, "Debounce re-armed");
            }
            Entry::Vacant(vacant) => {
                vacant.insert(timer);
                tracing::trace!(actor_key = %actor_key, "Debounce armed");
            }
        }
    }

    fn spawn_timer(&self, actor_key: ActorKey, generation: u64, deadline: Instant) -> JoinHandle<()> {
        let timers = self.timers.clone();
        let materializer = self.materializer.clone();

        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;

            // Only the timer that is still current may fire; going Idle happens here,
            // before recomputation, so later events arm a fresh timer.
            let fired = timers
                .remove_if(&actor_key, |_, timer| timer.generation == generation)
                .is_some();
            if !fired {
                return;
            }

            match materializer.materialize(&actor_key).await {
                Ok(MaterializeOutcome::Written(record)) => {
                    tracing::debug!(
                        actor_key = %actor_key,
                        items = record.item_ids.len(),
                        "Debounced recomputation finished"
                    );
                }
                Ok(MaterializeOutcome::Suppressed) => {
                    tracing::debug!(actor_key = %actor_key, "Debounced recomputation suppressed");
                }
                Err(e) => {
                    tracing::warn!(
                        actor_key = %actor_key,
                        error = %e,
                        "Recomputation failed, waiting for the next event"
                    );
                }
            }
        })
    }

    pub fn is_armed(&self, actor_key: &ActorKey) -> bool {
        self.timers.contains_key(actor_key)
    }

    /// Deadline of the actor's pending timer, if armed
    pub fn deadline(&self, actor_key: &ActorKey) -> Option<Instant> {
        self.timers.get(actor_key).map(|timer| timer.deadline)
    }

    pub fn armed_count(&self) -> usize {
        self.timers.len()
    }

    /// Aborts every pending timer. Recomputations already running are left to finish.
    pub fn shutdown(&self) {
        let pending = self.timers.len();
        self.timers.retain(|_, timer| {
            timer.handle.abort();
            false
        });
        tracing::info!(pending = pending, "Debounce scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AppError, AppResult};
    use crate::models::RecommendationRecord;
    use chrono::Utc;
    use std::sync::Mutex;

    const DELAY: Duration = Duration::from_millis(1200);

    /// Records every materialize call with the (paused) clock time it happened at
    #[derive(Default)]
    struct RecordingMaterializer {
        calls: Mutex<Vec<(ActorKey, Instant)>>,
        fail: bool,
    }

    impl RecordingMaterializer {
        fn calls_for(&self, actor: &str) -> Vec<Instant> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|(key, _)| key.as_str() == actor)
                .map(|(_, at)| *at)
                .collect()
        }
    }

    #[async_trait::async_trait]
    impl Materialize for RecordingMaterializer {
        async fn materialize(&self, actor_key: &ActorKey) -> AppResult<MaterializeOutcome> {
            self.calls
                .lock()
                .unwrap()
                .push((actor_key.clone(), Instant::now()));
            if self.fail {
                return Err(AppError::Internal("store down".to_string()));
            }
            Ok(MaterializeOutcome::Written(RecommendationRecord::new(
                actor_key.clone(),
                vec![],
                Utc::now(),
            )))
        }
    }

    fn scheduler() -> (DebounceScheduler, Arc<RecordingMaterializer>) {
        let recorder = Arc::new(RecordingMaterializer::default());
        (DebounceScheduler::new(DELAY, recorder.clone()), recorder)
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_event_fires_after_delay() {
        let (scheduler, recorder) = scheduler();
        let actor = ActorKey::from("s1");
        let armed_at = Instant::now();

        scheduler.arm(&actor);
        assert!(scheduler.is_armed(&actor));

        tokio::time::sleep(DELAY + Duration::from_millis(10)).await;

        let calls = recorder.calls_for("s1");
        assert_eq!(calls.len(), 1);
        assert!(calls[0] - armed_at >= DELAY);
        assert!(!scheduler.is_armed(&actor));
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_coalesces_into_one_call() {
        let (scheduler, recorder) = scheduler();
        let actor = ActorKey::from("s1");

        for _ in 0..10 {
            scheduler.arm(&actor);
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        let last_event = Instant::now() - Duration::from_millis(500);
        assert!(recorder.calls_for("s1").is_empty());

        tokio::time::sleep(DELAY).await;

        let calls = recorder.calls_for("s1");
        assert_eq!(calls.len(), 1);
        assert!(calls[0] - last_event <= DELAY + Duration::from_millis(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_pushes_deadline_out() {
        let (scheduler, _recorder) = scheduler();
        let actor = ActorKey::from("s1");

        scheduler.arm(&actor);
        let first = scheduler.deadline(&actor).unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        scheduler.arm(&actor);
        let second = scheduler.deadline(&actor).unwrap();

        assert_eq!(second - first, Duration::from_millis(300));
        assert_eq!(scheduler.armed_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_separate_quiet_periods_fire_separately() {
        let (scheduler, recorder) = scheduler();
        let actor = ActorKey::from("s1");

        scheduler.arm(&actor);
        tokio::time::sleep(DELAY * 2).await;
        scheduler.arm(&actor);
        tokio::time::sleep(DELAY * 2).await;

        assert_eq!(recorder.calls_for("s1").len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_actors_are_independent() {
        let (scheduler, recorder) = scheduler();
        let a = ActorKey::from("a");
        let b = ActorKey::from("b");

        scheduler.arm(&a);
        tokio::time::sleep(Duration::from_millis(600)).await;
        scheduler.arm(&b);
        tokio::time::sleep(Duration::from_millis(700)).await;

        // a fired at 1200ms; b is still waiting until 1800ms
        assert_eq!(recorder.calls_for("a").len(), 1);
        assert!(recorder.calls_for("b").is_empty());

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(recorder.calls_for("b").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_is_not_retried() {
        let recorder = Arc::new(RecordingMaterializer {
            fail: true,
            ..Default::default()
        });
        let scheduler = DebounceScheduler::new(DELAY, recorder.clone());
        let actor = ActorKey::from("s1");

        scheduler.arm(&actor);
        tokio::time::sleep(DELAY * 5).await;

        assert_eq!(recorder.calls_for("s1").len(), 1);
        assert!(!scheduler.is_armed(&actor));

        // the next event retries naturally
        scheduler.arm(&actor);
        tokio::time::sleep(DELAY * 2).await;
        assert_eq!(recorder.calls_for("s1").len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_pending_timers() {
        let (scheduler, recorder) = scheduler();

        scheduler.arm(&ActorKey::from("a"));
        scheduler.arm(&ActorKey::from("b"));
        assert_eq!(scheduler.armed_count(), 2);

        scheduler.shutdown();
        tokio::time::sleep(DELAY * 2).await;

        assert_eq!(scheduler.armed_count(), 0);
        assert!(recorder.calls.lock().unwrap().is_empty());
    }
}
