//! Feed subscriber
//!
//! Holds one persistent connection to the kill feed and turns its frames into
//! typed [`RawEvent`]s on a bounded queue. The connection is driven through a
//! small state machine:
//!
//! ```text
//! Disconnected → Connecting → Subscribed → Streaming
//!       ↑                                      │
//!       └──────── dial/read failure ───────────┘
//! ```
//!
//! After a transport failure the subscriber waits the configured delay (plus
//! optional jitter) and dials again. Closing the [`FeedHandle`] tears down the active
//! connection and stops further attempts.

use crate::config::FeedSettings;
use crate::error::{timed, KillfeedError, Result};
use crate::types::RawEvent;
use async_trait::async_trait;
use bytes::Bytes;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

pub mod memory;
pub mod ws;

/// Connection state published by the subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedState {
    Disconnected,
    Connecting,
    Subscribed,
    Streaming,
}

impl FeedState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Subscribed => "subscribed",
            Self::Streaming => "streaming",
        }
    }
}

/// State plus a running count of sessions that reached `Streaming`
///
/// The count lets observers notice every new session even when the watch
/// channel coalesces a short-lived one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedStatus {
    pub state: FeedState,
    pub streams: u64,
}

/// Dials the feed
#[async_trait]
pub trait FeedConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn FeedConnection>>;

    /// Connector name for logging
    fn name(&self) -> &str;
}

/// One live feed connection
#[async_trait]
pub trait FeedConnection: Send {
    /// Ask the server to start sending events for `channel`
    async fn subscribe(&mut self, channel: &str) -> Result<()>;

    /// Next payload frame; `Ok(None)` when the server closed the connection
    async fn next_frame(&mut self) -> Result<Option<Bytes>>;
}

/// Control handle for a running subscriber
///
/// Cloneable; closing from any clone stops the subscriber.
#[derive(Debug, Clone)]
pub struct FeedHandle {
    cancel: CancellationToken,
    status: watch::Receiver<FeedStatus>,
}

impl FeedHandle {
    /// Stop reconnecting and tear down the active connection (idempotent)
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Current connection state
    pub fn state(&self) -> FeedState {
        self.status.borrow().state
    }

    pub fn status(&self) -> FeedStatus {
        *self.status.borrow()
    }

    /// Receiver notified on every state transition
    pub fn watch_status(&self) -> watch::Receiver<FeedStatus> {
        self.status.clone()
    }
}

/// How one connection attempt ended
enum Disconnect {
    /// Never reached `Streaming`
    Failed(KillfeedError),
    /// Was streaming, then the server closed or a read failed
    Lost(Option<KillfeedError>),
    /// Nobody is consuming events any more
    ReceiverGone,
}

/// Maintains the feed connection and forwards parsed events
pub struct FeedSubscriber {
    connector: Arc<dyn FeedConnector>,
    settings: FeedSettings,
    cancel: CancellationToken,
    status: watch::Sender<FeedStatus>,
}

impl FeedSubscriber {
    pub fn new(connector: Arc<dyn FeedConnector>, settings: FeedSettings) -> Self {
        let (status, _) = watch::channel(FeedStatus {
            state: FeedState::Disconnected,
            streams: 0,
        });
        Self {
            connector,
            settings,
            cancel: CancellationToken::new(),
            status,
        }
    }

    /// Tie the subscriber to an outer cancellation token
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn handle(&self) -> FeedHandle {
        FeedHandle {
            cancel: self.cancel.clone(),
            status: self.status.subscribe(),
        }
    }

    /// Spawn the read loop and return the event stream
    ///
    /// The stream ends once the subscriber stops. The join handle carries the
    /// reason it stopped.
    pub fn connect(self, capacity: usize) -> (ReceiverStream<RawEvent>, JoinHandle<Result<()>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let task = tokio::spawn(self.run(tx));
        (ReceiverStream::new(rx), task)
    }

    /// Run until closed, the receiver goes away, or the attempt cap is hit
    ///
    /// Returns `Ok(())` on close and `Err(Connection)` when
    /// `max_reconnect_attempts` consecutive attempts failed. A dial error that
    /// is not retryable (a bad URL, say) is returned at once.
    pub async fn run(self, tx: mpsc::Sender<RawEvent>) -> Result<()> {
        let mut failures: u32 = 0;

        tracing::info!(
            connector = self.connector.name(),
            url = %self.settings.url,
            channel = %self.settings.channel,
            "Feed subscriber starting"
        );

        while !self.cancel.is_cancelled() {
            let ended = tokio::select! {
                _ = self.cancel.cancelled() => break,
                ended = self.session(&tx) => ended,
            };
            self.set_state(FeedState::Disconnected);

            match ended {
                Disconnect::ReceiverGone => {
                    tracing::info!("Event receiver dropped; feed subscriber stopping");
                    return Ok(());
                }
                Disconnect::Lost(error) => {
                    failures = 0;
                    match error {
                        Some(e) => tracing::warn!(error = %e, "Feed connection lost"),
                        None => tracing::warn!("Feed connection closed by server"),
                    }
                }
                Disconnect::Failed(e) if !e.is_retryable() => {
                    tracing::error!(error = %e, "Feed connection cannot succeed; not retrying");
                    return Err(e);
                }
                Disconnect::Failed(e) => {
                    failures += 1;
                    tracing::warn!(attempt = failures, error = %e, "Feed connection attempt failed");
                    if let Some(max) = self.settings.max_reconnect_attempts {
                        if failures >= max {
                            tracing::error!(attempts = failures, "Giving up on feed connection");
                            return Err(KillfeedError::Connection(format!(
                                "gave up after {} failed attempts: {}",
                                failures, e
                            )));
                        }
                    }
                }
            }

            let delay = self.backoff();
            tracing::info!(delay_ms = delay.as_millis() as u64, "Reconnecting to feed");
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.set_state(FeedState::Disconnected);
        tracing::info!("Feed subscriber closed");
        Ok(())
    }

    async fn session(&self, tx: &mpsc::Sender<RawEvent>) -> Disconnect {
        self.set_state(FeedState::Connecting);
        let timeout = self.settings.dial_timeout();

        let mut conn = match timed(timeout, "feed dial", self.connector.connect()).await {
            Ok(conn) => conn,
            Err(e) => return Disconnect::Failed(e),
        };
        if let Err(e) = timed(timeout, "feed subscribe", conn.subscribe(&self.settings.channel)).await {
            return Disconnect::Failed(e);
        }
        self.set_state(FeedState::Subscribed);
        tracing::info!(channel = %self.settings.channel, "Subscribed to feed");

        self.set_state(FeedState::Streaming);
        loop {
            let frame = match conn.next_frame().await {
                Ok(Some(frame)) => frame,
                Ok(None) => return Disconnect::Lost(None),
                Err(e) => return Disconnect::Lost(Some(e)),
            };

            let event = match RawEvent::from_frame(&frame) {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!(error = %e, bytes = frame.len(), "Dropping malformed frame");
                    continue;
                }
            };

            tracing::debug!(killmail_id = event.id, system_id = event.location_id, "Event received");
            if tx.send(event).await.is_err() {
                return Disconnect::ReceiverGone;
            }
        }
    }

    fn backoff(&self) -> Duration {
        let delay = self.settings.reconnect_delay();
        let jitter = self.settings.reconnect_jitter();
        if jitter.is_zero() {
            return delay;
        }
        let extra = rand::thread_rng().gen_range(0..=jitter.as_millis() as u64);
        delay + Duration::from_millis(extra)
    }

    fn set_state(&self, state: FeedState) {
        self.status.send_if_modified(|current| {
            if current.state == state {
                return false;
            }
            tracing::debug!(from = current.state.as_str(), to = state.as_str(), "Feed state changed");
            current.state = state;
            if state == FeedState::Streaming {
                current.streams += 1;
            }
            true
        });
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryConnector;
    use super::*;
    use tokio::time::Instant;
    use tokio_stream::StreamExt;

    const FRAME: &str = r#"{"killmail_id":7,"solar_system_id":31000142,"victim":{"corporation_id":1},"attackers":[],"zkb":{"hash":"h7","totalValue":1.0}}"#;

    fn settings() -> FeedSettings {
        FeedSettings {
            url: "memory://feed".into(),
            reconnect_delay_secs: 10,
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_after_exact_delay() {
        let connector = Arc::new(
            MemoryConnector::new()
                .refuse("connection refused")
                .accept_and_hold(vec![Bytes::from_static(FRAME.as_bytes())]),
        );
        let subscriber = FeedSubscriber::new(connector.clone(), settings());
        let handle = subscriber.handle();
        let (mut events, task) = subscriber.connect(8);

        let event = events.next().await.unwrap();
        assert_eq!(event.id, 7);

        let dials = connector.dials();
        assert_eq!(dials.len(), 2);
        assert_eq!(dials[1] - dials[0], Duration::from_secs(10));
        assert_eq!(connector.subscriptions(), vec!["killstream".to_string()]);
        assert_eq!(handle.state(), FeedState::Streaming);
        assert_eq!(handle.status().streams, 1);

        handle.close();
        assert!(task.await.unwrap().is_ok());
        assert_eq!(handle.state(), FeedState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_frame_dropped() {
        let connector = Arc::new(MemoryConnector::new().accept_and_hold(vec![
            Bytes::from_static(b"not json"),
            Bytes::from_static(FRAME.as_bytes()),
        ]));
        let subscriber = FeedSubscriber::new(connector.clone(), settings());
        let handle = subscriber.handle();
        let (mut events, task) = subscriber.connect(8);

        assert_eq!(events.next().await.unwrap().id, 7);
        assert_eq!(connector.dials().len(), 1);

        handle.close();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_close_reconnects() {
        let connector = Arc::new(
            MemoryConnector::new()
                .accept(vec![Bytes::from_static(FRAME.as_bytes())])
                .accept_and_hold(vec![Bytes::from_static(FRAME.as_bytes())]),
        );
        let subscriber = FeedSubscriber::new(connector.clone(), settings());
        let handle = subscriber.handle();
        let (mut events, task) = subscriber.connect(8);

        events.next().await.unwrap();
        events.next().await.unwrap();
        assert_eq!(connector.dials().len(), 2);
        assert_eq!(handle.status().streams, 2);
        assert_eq!(connector.subscriptions().len(), 2);

        handle.close();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_error_reconnects_and_resets_failures() {
        let connector = Arc::new(
            MemoryConnector::new()
                .refuse("a")
                .refuse("b")
                .accept_then_fail(vec![Bytes::from_static(FRAME.as_bytes())], "connection reset")
                .refuse("c")
                .accept_and_hold(vec![Bytes::from_static(FRAME.as_bytes())]),
        );
        let mut settings = settings();
        settings.max_reconnect_attempts = Some(3);
        let subscriber = FeedSubscriber::new(connector.clone(), settings);
        let handle = subscriber.handle();
        let (mut events, task) = subscriber.connect(8);

        events.next().await.unwrap();
        events.next().await.unwrap();

        let dials = connector.dials();
        assert_eq!(dials.len(), 5);
        assert_eq!(dials[3] - dials[2], Duration::from_secs(10));
        assert_eq!(dials[4] - dials[3], Duration::from_secs(10));
        assert_eq!(handle.status().streams, 2);
        assert!(!task.is_finished());

        handle.close();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_dial_error_is_not_retried() {
        let connector = Arc::new(
            MemoryConnector::new()
                .fail(KillfeedError::Config("unsupported url scheme".into()))
                .accept_and_hold(Vec::new()),
        );
        let subscriber = FeedSubscriber::new(connector.clone(), settings());
        let (tx, _rx) = mpsc::channel(1);

        let started = Instant::now();
        let err = tokio_test::assert_err!(subscriber.run(tx).await);
        assert!(matches!(err, KillfeedError::Config(_)));
        assert_eq!(connector.dials().len(), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_queue_stops_reading() {
        let frames = vec![Bytes::from_static(FRAME.as_bytes()); 6];
        let connector = Arc::new(MemoryConnector::new().accept_and_hold(frames));
        let subscriber = FeedSubscriber::new(connector.clone(), settings());
        let handle = subscriber.handle();
        let (mut events, task) = subscriber.connect(2);

        // two queued, the third held by the blocked send
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(connector.frames_read(), 3);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.frames_read(), 3);

        events.next().await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(connector.frames_read(), 4);

        for _ in 0..5 {
            events.next().await.unwrap();
        }
        assert_eq!(connector.frames_read(), 6);
        assert_eq!(connector.dials().len(), 1);

        handle.close();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_cap_returns_connection_error() {
        let connector = Arc::new(MemoryConnector::new().refuse("a").refuse("b").refuse("c"));
        let mut settings = settings();
        settings.max_reconnect_attempts = Some(3);
        let subscriber = FeedSubscriber::new(connector.clone(), settings);
        let (tx, _rx) = mpsc::channel(1);

        let started = Instant::now();
        let err = subscriber.run(tx).await.unwrap_err();
        assert!(matches!(err, KillfeedError::Connection(_)));
        assert_eq!(connector.dials().len(), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_is_idempotent_and_stops_retries() {
        let connector = Arc::new(MemoryConnector::new());
        let subscriber = FeedSubscriber::new(connector.clone(), settings());
        let handle = subscriber.handle();
        let (_events, task) = subscriber.connect(8);

        tokio::time::sleep(Duration::from_secs(25)).await;
        let dialed = connector.dials().len();
        assert_eq!(dialed, 3);

        handle.close();
        handle.close();
        assert!(handle.is_closed());
        task.await.unwrap().unwrap();

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.dials().len(), dialed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dial_timeout_counts_as_failure() {
        let connector = Arc::new(MemoryConnector::new().hang());
        let mut settings = settings();
        settings.max_reconnect_attempts = Some(1);
        settings.dial_timeout_secs = 5;
        let subscriber = FeedSubscriber::new(connector, settings);
        let (tx, _rx) = mpsc::channel(1);

        let err = subscriber.run(tx).await.unwrap_err();
        assert!(err.to_string().contains("feed dial"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_receiver_stops_subscriber() {
        let connector = Arc::new(
            MemoryConnector::new().accept_and_hold(vec![Bytes::from_static(FRAME.as_bytes())]),
        );
        let subscriber = FeedSubscriber::new(connector, settings());
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        assert!(subscriber.run(tx).await.is_ok());
    }

    #[test]
    fn test_backoff_jitter_bounds() {
        let mut settings = settings();
        settings.reconnect_jitter_secs = 2;
        let subscriber = FeedSubscriber::new(Arc::new(MemoryConnector::new()), settings);
        for _ in 0..50 {
            let delay = subscriber.backoff();
            assert!(delay >= Duration::from_secs(10));
            assert!(delay <= Duration::from_secs(12));
        }
    }
}
