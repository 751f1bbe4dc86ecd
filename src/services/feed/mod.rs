//! Change feed over the interaction-tracking sources
//!
//! A feed exposes each source as a log addressed by [`FeedPosition`]. Entries only
//! become visible once nothing can be committed behind them, so a durable cursor per
//! source lets a restarted listener resume where it left off (at-least-once
//! delivery).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::{
    error::{AppError, AppResult},
    models::{FeedEntry, FeedPosition, SourceCollection},
    services::{debounce::DebounceScheduler, pipeline::Pipeline},
};

pub mod postgres;

pub use postgres::PgEventFeed;

/// Trait for change feeds the listener can follow
#[async_trait::async_trait]
pub trait EventFeed: Send + Sync {
    /// Opens a change-notification subscription for one source
    async fn subscribe(&self, source: SourceCollection) -> AppResult<Box<dyn FeedSubscription>>;

    /// Last position durably committed for a source, the default if none
    async fn load_position(&self, source: SourceCollection) -> AppResult<FeedPosition>;

    /// Records that everything up to `position` has been processed
    async fn commit_position(
        &self,
        source: SourceCollection,
        position: FeedPosition,
    ) -> AppResult<()>;

    /// Entries strictly after `position`, in position order. Never returns an entry
    /// that a still-running writer could later be ordered before.
    async fn fetch_after(
        &self,
        source: SourceCollection,
        position: FeedPosition,
        limit: i64,
    ) -> AppResult<Vec<FeedEntry>>;
}

/// Wakeup channel for one source
#[async_trait::async_trait]
pub trait FeedSubscription: Send {
    /// Resolves when the source may have new entries or `timeout` elapses.
    ///
    /// An error means the notification channel dropped and must be re-opened.
    async fn wait(&mut self, timeout: Duration) -> AppResult<()>;
}

/// Listener tuning
#[derive(Debug, Clone)]
pub struct FeedSettings {
    pub batch_size: i64,
    /// Fallback poll when no notification arrives
    pub poll_interval: Duration,
    pub retry_base: Duration,
    pub retry_max: Duration,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            batch_size: 256,
            poll_interval: Duration::from_secs(5),
            retry_base: Duration::from_millis(500),
            retry_max: Duration::from_secs(30),
        }
    }
}

/// Exponential backoff for feed reconnects
#[derive(Debug, Clone)]
struct Backoff {
    base: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            current: base,
        }
    }

    fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    fn reset(&mut self) {
        self.current = self.base;
    }
}

/// Drives the pipeline from the change feed, one task per source
pub struct FeedListener {
    feed: Arc<dyn EventFeed>,
    pipeline: Pipeline,
    sources: Vec<SourceCollection>,
    settings: FeedSettings,
}

impl FeedListener {
    pub fn new(
        feed: Arc<dyn EventFeed>,
        pipeline: Pipeline,
        sources: Vec<SourceCollection>,
        settings: FeedSettings,
    ) -> Self {
        Self {
            feed,
            pipeline,
            sources,
            settings,
        }
    }

    /// Subscribes every source, then spawns the per-source workers.
    ///
    /// Subscription failures here are fatal: the service cannot run without its feed.
    pub async fn start(self, shutdown: watch::Receiver<bool>) -> AppResult<Vec<JoinHandle<()>>> {
        let mut subscriptions = Vec::with_capacity(self.sources.len());
        for source in &self.sources {
            let subscription = self.feed.subscribe(*source).await.map_err(|e| {
                AppError::Feed(format!("cannot subscribe to {}: {}", source, e))
            })?;
            subscriptions.push((*source, subscription));
        }

        let handles = subscriptions
            .into_iter()
            .map(|(source, subscription)| {
                let worker = SourceWorker {
                    source,
                    feed: self.feed.clone(),
                    pipeline: self.pipeline.clone(),
                    settings: self.settings.clone(),
                    subscription,
                    shutdown: shutdown.clone(),
                };
                tokio::spawn(worker.run())
            })
            .collect();

        tracing::info!(sources = ?self.sources, "Feed listener started");

        Ok(handles)
    }
}

/// Waits for the workers to finish their in-flight batches, then stops the scheduler.
///
/// Call after the shutdown signal has been sent. A batch still being handled can arm
/// timers, so the scheduler must only be stopped once every worker has returned.
pub async fn drain(workers: Vec<JoinHandle<()>>, scheduler: &DebounceScheduler) {
    for worker in workers {
        if let Err(e) = worker.await {
            tracing::warn!(error = %e, "Feed worker ended abnormally");
        }
    }
    scheduler.shutdown();
}

/// Sequential consumer of one source
struct SourceWorker {
    source: SourceCollection,
    feed: Arc<dyn EventFeed>,
    pipeline: Pipeline,
    settings: FeedSettings,
    subscription: Box<dyn FeedSubscription>,
    shutdown: watch::Receiver<bool>,
}

impl SourceWorker {
    async fn run(mut self) {
        let mut backoff = Backoff::new(self.settings.retry_base, self.settings.retry_max);

        let Some(mut position) = self.resume_position(&mut backoff).await else {
            tracing::info!(source = %self.source, "Feed worker stopped before resuming");
            return;
        };
        tracing::info!(source = %self.source, position = %position, "Resuming feed");

        while !self.stopping() {
            let fetched = self
                .feed
                .fetch_after(self.source, position, self.settings.batch_size)
                .await;

            match fetched {
                Ok(entries) if entries.is_empty() => {
                    backoff.reset();
                    let waited = tokio::select! {
                        _ = self.shutdown.changed() => break,
                        waited = self.subscription.wait(self.settings.poll_interval) => waited,
                    };
                    if let Err(e) = waited {
                        tracing::warn!(source = %self.source, error = %e, "Feed subscription dropped");
                        if !self.reconnect(&mut backoff).await {
                            break;
                        }
                    }
                }
                Ok(entries) => {
                    backoff.reset();
                    let count = entries.len();
                    for entry in entries {
                        self.pipeline.handle(&entry.event).await;
                        position = entry.position;
                    }

                    // A failed commit only widens the replay window after a restart.
                    if let Err(e) = self.feed.commit_position(self.source, position).await {
                        tracing::warn!(
                            source = %self.source,
                            position = %position,
                            error = %e,
                            "Failed to commit feed position"
                        );
                    }

                    tracing::debug!(
                        source = %self.source,
                        count = count,
                        position = %position,
                        "Feed batch processed"
                    );
                }
                Err(e) => {
                    let delay = backoff.next_delay();
                    tracing::warn!(
                        source = %self.source,
                        error = %e,
                        retry_in_ms = delay.as_millis() as u64,
                        "Feed fetch failed"
                    );
                    if !self.pause(delay).await {
                        break;
                    }
                }
            }
        }

        tracing::info!(source = %self.source, position = %position, "Feed worker stopped");
    }

    /// Loads the durable cursor, retrying until it succeeds or shutdown is requested
    async fn resume_position(&mut self, backoff: &mut Backoff) -> Option<FeedPosition> {
        loop {
            match self.feed.load_position(self.source).await {
                Ok(position) => return Some(position),
                Err(e) => {
                    let delay = backoff.next_delay();
                    tracing::warn!(source = %self.source, error = %e, "Failed to load feed position");
                    if !self.pause(delay).await {
                        return None;
                    }
                }
            }
        }
    }

    /// Re-opens the subscription with backoff. No events are fetched meanwhile.
    async fn reconnect(&mut self, backoff: &mut Backoff) -> bool {
        loop {
            if !self.pause(backoff.next_delay()).await {
                return false;
            }
            match self.feed.subscribe(self.source).await {
                Ok(subscription) => {
                    self.subscription = subscription;
                    backoff.reset();
                    tracing::info!(source = %self.source, "Feed subscription restored");
                    return true;
                }
                Err(e) => {
                    tracing::warn!(source = %self.source, error = %e, "Feed reconnect failed");
                }
            }
        }
    }

    fn stopping(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Sleeps for `delay`; false if shutdown was requested meanwhile
    async fn pause(&mut self, delay: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = self.shutdown.changed() => false,
        }
    }
}
