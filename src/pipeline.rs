//! Per-event pipeline: classify → enrich → compose → dispatch
//!
//! Events come off the bounded feed queue and are handed to a fixed pool of
//! workers. When every worker is busy the reader stops pulling from the queue,
//! so a burst fills the queue and then pushes back on the feed instead of
//! fanning out into unbounded concurrent lookups.

use crate::cache::ReferenceCache;
use crate::classifier::Classifier;
use crate::composer::{Composer, Notification};
use crate::dispatcher::Dispatcher;
use crate::enricher::Enricher;
use crate::types::{Classification, RawEvent};
use futures::{Stream, StreamExt};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;

/// Status code logged for a system that just saw a chain kill
pub const SYSTEM_STATUS_ACTIVE: u8 = 4;

/// Message posted to the info channel while events keep flowing
pub const HEARTBEAT_MESSAGE: &str = "Chainkills checker running.";

/// What happened to one event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Classified as irrelevant
    Ignored,
    /// Relevant and delivered
    Dispatched(Classification),
    /// Relevant but enrichment or delivery failed
    Dropped(Classification),
}

/// Posts a heartbeat at most once per interval
struct Heartbeat {
    interval: Duration,
    last: Mutex<Instant>,
}

impl Heartbeat {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: Mutex::new(Instant::now()),
        }
    }

    fn due(&self) -> bool {
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        if last.elapsed() > self.interval {
            *last = Instant::now();
            true
        } else {
            false
        }
    }
}

/// Shared per-event processing state
pub struct Pipeline {
    cache: Arc<ReferenceCache>,
    classifier: Classifier,
    enricher: Enricher,
    composer: Composer,
    dispatcher: Dispatcher,
    heartbeat: Heartbeat,
    workers: usize,
}

impl Pipeline {
    pub fn new(
        cache: Arc<ReferenceCache>,
        classifier: Classifier,
        enricher: Enricher,
        composer: Composer,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            cache,
            classifier,
            enricher,
            composer,
            dispatcher,
            heartbeat: Heartbeat::new(Duration::from_secs(60 * 60)),
            workers: 8,
        }
    }

    /// Interval between heartbeat messages on the info channel
    pub fn with_status_interval(mut self, interval: Duration) -> Self {
        self.heartbeat = Heartbeat::new(interval);
        self
    }

    /// Maximum number of events processed at once
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn cache(&self) -> &Arc<ReferenceCache> {
        &self.cache
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Process one event to completion
    pub async fn handle(&self, event: RawEvent) -> Outcome {
        if self.heartbeat.due() {
            self.dispatcher.info(HEARTBEAT_MESSAGE).await;
        }

        if let Err(e) = self.cache.refresh_if_stale().await {
            self.dispatcher
                .info(format!("Error refreshing reference data: {}", e))
                .await;
        }

        let snapshot = self.cache.snapshot();
        tracing::debug!(
            killmail_id = event.id,
            system_id = event.location_id,
            generation = snapshot.generation,
            "Handling event"
        );

        let classification = self.classifier.classify(&event, &snapshot);
        match &classification {
            Classification::None => Outcome::Ignored,
            Classification::SystemMatch { system } => {
                tracing::info!(
                    killmail_id = event.id,
                    system_id = system.system_id,
                    alias = %system.alias,
                    attackers = event.attackers.len(),
                    status = SYSTEM_STATUS_ACTIVE,
                    "Chain kill; system marked active"
                );
                let notification = self.composer.compose_chain_alert(&event, system);
                self.finish(classification.clone(), &notification).await
            }
            Classification::Loss { matched } | Classification::Kill { matched } => {
                tracing::info!(
                    killmail_id = event.id,
                    matched = *matched,
                    kind = if classification.is_kill() { "kill" } else { "loss" },
                    "Tracked killmail"
                );
                let record = match self.enricher.enrich(&event).await {
                    Ok(record) => record,
                    Err(e) => {
                        tracing::warn!(killmail_id = event.id, error = %e, "Enrichment failed; dropping event");
                        return Outcome::Dropped(classification.clone());
                    }
                };
                let notification = self.composer.compose(&record, &classification);
                self.finish(classification.clone(), &notification).await
            }
        }
    }

    async fn finish(
        &self,
        classification: Classification,
        notification: &Notification,
    ) -> Outcome {
        if self.dispatcher.deliver(notification).await {
            Outcome::Dispatched(classification)
        } else {
            Outcome::Dropped(classification)
        }
    }

    /// Drive `events` through the worker pool until the stream ends
    ///
    /// Waits for in-flight events before returning. Returns the number of
    /// events taken off the stream.
    pub async fn run<S>(self: Arc<Self>, events: S) -> u64
    where
        S: Stream<Item = RawEvent> + Send,
    {
        let permits = Arc::new(Semaphore::new(self.workers));
        let mut events = std::pin::pin!(events);
        let mut received = 0u64;

        tracing::info!(workers = self.workers, "Pipeline started");
        while let Some(event) = events.next().await {
            let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                break;
            };
            received += 1;

            let pipeline = Arc::clone(&self);
            tokio::spawn(async move {
                let _permit = permit;
                let id = event.id;
                let outcome = pipeline.handle(event).await;
                tracing::debug!(killmail_id = id, outcome = ?outcome, "Event finished");
            });
        }

        // every permit back means every spawned event has finished
        if permits.acquire_many(self.workers as u32).await.is_err() {
            tracing::warn!("Worker pool closed before draining");
        }
        tracing::info!(events = received, "Pipeline drained");
        received
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{NotificationSettings, WebhookSettings, WebhookTarget};
    use crate::composer::Embed;
    use crate::provider::memory::{MemoryDetailProvider, MemorySink};
    use crate::provider::NotificationSink;
    use crate::types::{Attacker, MonitoredSystem, Victim};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const CHAIN_SYSTEM: i64 = 31000142;

    fn webhooks() -> WebhookSettings {
        let target = |id: &str| Some(WebhookTarget { id: id.into(), token: "t".into() });
        WebhookSettings {
            killmail: target("kills"),
            chain: target("chain"),
            info: target("info"),
        }
    }

    fn pipeline(provider: Arc<MemoryDetailProvider>, sink: Arc<MemorySink>, refresh: Duration) -> Pipeline {
        let timeout = Duration::from_secs(10);
        let cache = Arc::new(ReferenceCache::new(provider.clone(), "home", [99000001], refresh, timeout));
        Pipeline::new(
            cache,
            Classifier::new(Vec::new()),
            Enricher::new(provider, timeout),
            Composer::new(&NotificationSettings::default()),
            Dispatcher::new(sink, webhooks(), timeout),
        )
    }

    fn chain_event(id: i64) -> RawEvent {
        RawEvent {
            id,
            location_id: CHAIN_SYSTEM,
            killmail_time: None,
            victim: Victim::default(),
            attackers: vec![Attacker { character_id: Some(1), ..Default::default() }; 3],
            value: Default::default(),
            verification_hash: format!("h{}", id),
        }
    }

    fn chain_provider() -> Arc<MemoryDetailProvider> {
        Arc::new(MemoryDetailProvider::new().with_systems(vec![MonitoredSystem {
            system_id: CHAIN_SYSTEM,
            alias: "3".into(),
        }]))
    }

    #[tokio::test]
    async fn test_chain_alert_dispatched() {
        let sink = Arc::new(MemorySink::new());
        let pipeline = pipeline(chain_provider(), sink.clone(), Duration::ZERO);

        let outcome = pipeline.handle(chain_event(42)).await;
        assert!(matches!(outcome, Outcome::Dispatched(Classification::SystemMatch { .. })));

        let sent = sink.sent_to("chain");
        assert_eq!(sent.len(), 1);
        assert_eq!(
            sent[0].text,
            "@here A ship just died in 3 to 3 people, zkill link: https://zkillboard.com/kill/42/"
        );
    }

    #[tokio::test]
    async fn test_loss_without_detail_is_dropped() {
        let sink = Arc::new(MemorySink::new());
        let pipeline = pipeline(chain_provider(), sink.clone(), Duration::ZERO);
        let mut event = chain_event(7);
        event.victim.corporation_id = Some(99000001);

        let outcome = pipeline.handle(event).await;
        assert_eq!(outcome, Outcome::Dropped(Classification::Loss { matched: 99000001 }));
        assert!(sink.sent_to("kills").is_empty());
    }

    #[tokio::test]
    async fn test_refresh_failure_reported_to_info() {
        let provider = chain_provider();
        provider.set_fail_reference(true);
        let sink = Arc::new(MemorySink::new());
        let pipeline = pipeline(provider, sink.clone(), Duration::ZERO);

        assert_eq!(pipeline.handle(chain_event(1)).await, Outcome::Ignored);
        let info = sink.sent_to("info");
        assert_eq!(info.len(), 1);
        assert!(info[0].text.starts_with("Error refreshing reference data: "));
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_after_interval() {
        let sink = Arc::new(MemorySink::new());
        let pipeline = pipeline(Arc::new(MemoryDetailProvider::new()), sink.clone(), Duration::from_secs(3600))
            .with_status_interval(Duration::from_secs(60));

        pipeline.handle(chain_event(1)).await;
        assert!(sink.sent_to("info").is_empty());

        tokio::time::advance(Duration::from_secs(61)).await;
        pipeline.handle(chain_event(2)).await;
        pipeline.handle(chain_event(3)).await;

        let info = sink.sent_to("info");
        assert_eq!(info.len(), 1);
        assert_eq!(info[0].text, HEARTBEAT_MESSAGE);
    }

    /// Sink that takes a second per send and tracks how many run at once
    #[derive(Default)]
    struct SlowSink {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        sent: AtomicUsize,
    }

    #[async_trait]
    impl NotificationSink for SlowSink {
        async fn send(&self, _target: &WebhookTarget, _text: &str, _embed: Option<&Embed>) -> crate::Result<()> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(1)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.sent.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn name(&self) -> &str {
            "slow"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_caps_events_in_flight() {
        let provider = chain_provider();
        let sink = Arc::new(SlowSink::default());
        let timeout = Duration::from_secs(10);
        let cache = Arc::new(ReferenceCache::new(provider.clone(), "home", [99000001], Duration::from_secs(3600), timeout));
        cache.refresh().await.unwrap();
        let pipeline = Arc::new(
            Pipeline::new(
                cache,
                Classifier::new(Vec::new()),
                Enricher::new(provider, timeout),
                Composer::new(&NotificationSettings::default()),
                Dispatcher::new(sink.clone(), webhooks(), timeout),
            )
            .with_workers(2),
        );

        let started = Instant::now();
        let events = futures::stream::iter((1..=6).map(chain_event));
        assert_eq!(pipeline.run(events).await, 6);

        assert_eq!(sink.sent.load(Ordering::SeqCst), 6);
        assert_eq!(sink.peak.load(Ordering::SeqCst), 2);
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_run_drains_all_events() {
        let sink = Arc::new(MemorySink::new());
        let pipeline = Arc::new(pipeline(chain_provider(), sink.clone(), Duration::from_secs(3600)).with_workers(2));
        pipeline.cache().refresh().await.unwrap();

        let events = futures::stream::iter((1..=10).map(chain_event));
        assert_eq!(pipeline.run(events).await, 10);
        assert_eq!(sink.sent_to("chain").len(), 10);
    }
}
