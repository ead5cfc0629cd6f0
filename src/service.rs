//! Service wiring
//!
//! `KillfeedService` builds the cache, classifier, enricher, composer and
//! dispatcher from [`Settings`], then runs the feed into the pipeline until
//! its cancellation token fires.

use crate::cache::ReferenceCache;
use crate::classifier::Classifier;
use crate::composer::Composer;
use crate::config::Settings;
use crate::dispatcher::Dispatcher;
use crate::enricher::Enricher;
use crate::error::{KillfeedError, Result};
use crate::feed::{FeedConnector, FeedStatus, FeedSubscriber};
use crate::pipeline::Pipeline;
use crate::provider::{DetailProvider, NotificationSink};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Posted to the info channel every time the feed starts streaming
pub const FEED_OPENED_MESSAGE: &str = "zkill socket opened.";

/// The assembled killfeed
pub struct KillfeedService {
    settings: Settings,
    pipeline: Arc<Pipeline>,
    connector: Arc<dyn FeedConnector>,
    cancel: CancellationToken,
}

impl KillfeedService {
    pub fn new(
        settings: Settings,
        provider: Arc<dyn DetailProvider>,
        sink: Arc<dyn NotificationSink>,
        connector: Arc<dyn FeedConnector>,
    ) -> Self {
        let timeout = settings.request_timeout();
        let cache = Arc::new(ReferenceCache::new(
            Arc::clone(&provider),
            settings.map_api.slug.clone(),
            settings.tracked_ids.iter().copied(),
            settings.refresh_interval(),
            timeout,
        ));
        let classifier = Classifier::new(settings.ignore_system_ids.iter().copied())
            .with_locals_count_as_kills(settings.locals_count_as_kills);
        let pipeline = Pipeline::new(
            cache,
            classifier,
            Enricher::new(provider, timeout),
            Composer::new(&settings.notifications),
            Dispatcher::new(sink, settings.webhooks.clone(), timeout),
        )
        .with_status_interval(settings.status_interval())
        .with_workers(settings.pipeline.workers);

        tracing::info!(
            tracked_ids = ?settings.tracked_ids,
            ignore_system_ids = ?settings.ignore_system_ids,
            workers = settings.pipeline.workers,
            queue_capacity = settings.pipeline.queue_capacity,
            "Killfeed service initialized"
        );

        Self {
            settings,
            pipeline: Arc::new(pipeline),
            connector,
            cancel: CancellationToken::new(),
        }
    }

    /// Token that stops the service when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    /// Run until cancelled or until the feed gives up
    ///
    /// Loads reference data first; a failed startup load is logged and the
    /// service starts with an empty cache. On cancellation the feed stops,
    /// the queue closes, and in-flight events finish before this returns.
    pub async fn run(self) -> Result<()> {
        if let Err(e) = self.pipeline.cache().refresh().await {
            tracing::warn!(error = %e, "Startup reference load failed; continuing with empty cache");
        }

        let subscriber = FeedSubscriber::new(Arc::clone(&self.connector), self.settings.feed.clone())
            .with_cancellation(self.cancel.child_token());
        let announcer = tokio::spawn(announce_connections(
            subscriber.handle().watch_status(),
            self.pipeline.dispatcher().clone(),
        ));

        let (events, feed) = subscriber.connect(self.settings.pipeline.queue_capacity);
        tracing::info!("Killfeed service running");

        let processed = Arc::clone(&self.pipeline).run(events).await;
        let result = feed
            .await
            .map_err(|e| KillfeedError::Connection(format!("feed task failed: {}", e)))?;

        if announcer.await.is_err() {
            tracing::warn!("Feed state announcer ended abnormally");
        }
        tracing::info!(events = processed, "Killfeed service stopped");
        result
    }
}

/// Post to the info channel once per session that reached `Streaming`
async fn announce_connections(mut status: watch::Receiver<FeedStatus>, dispatcher: Dispatcher) {
    let mut announced = 0;
    while status.changed().await.is_ok() {
        let streams = status.borrow_and_update().streams;
        while announced < streams {
            dispatcher.info(FEED_OPENED_MESSAGE).await;
            announced += 1;
        }
    }
}
