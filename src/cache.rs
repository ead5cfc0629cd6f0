//! Reference cache: watchlist, monitored systems, and local characters
//!
//! The whole cache is one immutable [`ReferenceSnapshot`] published through a
//! `watch` channel. A refresh builds a fresh snapshot and swaps it in with a
//! single `send_replace`, so a classification decision always sees one
//! consistent generation and readers never wait on a refresh.

use crate::error::{timed, Result};
use crate::provider::DetailProvider;
use crate::types::{LocalCharacter, MonitoredSystem};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;

/// One consistent generation of reference data
#[derive(Debug, Clone, Default)]
pub struct ReferenceSnapshot {
    /// Tracked corporation/alliance/character ids
    pub watchlist: Arc<HashSet<i64>>,

    /// Monitored systems keyed by system id
    pub systems: HashMap<i64, MonitoredSystem>,

    /// Character ids known to be home
    pub local_characters: HashSet<i64>,

    /// Generation counter, bumped on every successful refresh
    pub generation: u64,

    /// When this generation was loaded (None before the first refresh)
    pub refreshed_at: Option<DateTime<Utc>>,
}

impl ReferenceSnapshot {
    pub fn new(watchlist: impl IntoIterator<Item = i64>) -> Self {
        Self {
            watchlist: Arc::new(watchlist.into_iter().collect()),
            ..Default::default()
        }
    }

    pub fn is_tracked(&self, id: Option<i64>) -> bool {
        id.is_some_and(|id| self.watchlist.contains(&id))
    }

    pub fn is_local(&self, character_id: Option<i64>) -> bool {
        character_id.is_some_and(|id| self.local_characters.contains(&id))
    }

    pub fn system(&self, system_id: i64) -> Option<&MonitoredSystem> {
        self.systems.get(&system_id)
    }

    /// Build the next generation from freshly loaded lists
    ///
    /// Systems whose alias ends in a letter are dropped.
    fn next(&self, systems: Vec<MonitoredSystem>, characters: Vec<LocalCharacter>) -> Self {
        let systems = systems
            .into_iter()
            .filter(|s| MonitoredSystem::is_chain_alias(&s.alias))
            .map(|s| (s.system_id, s))
            .collect();

        Self {
            watchlist: Arc::clone(&self.watchlist),
            systems,
            local_characters: characters.into_iter().map(|c| c.character_id).collect(),
            generation: self.generation + 1,
            refreshed_at: Some(Utc::now()),
        }
    }
}

/// Holds the current snapshot and refreshes it from a `DetailProvider`
pub struct ReferenceCache {
    provider: Arc<dyn DetailProvider>,
    source: String,
    refresh_interval: Duration,
    timeout: Duration,
    snapshot: watch::Sender<Arc<ReferenceSnapshot>>,

    /// Last successful refresh; also serializes refreshes
    last_refresh: Mutex<Option<Instant>>,
}

impl ReferenceCache {
    /// Create an empty cache
    ///
    /// `refresh_interval` of zero means every stale check refreshes.
    pub fn new(
        provider: Arc<dyn DetailProvider>,
        source: impl Into<String>,
        watchlist: impl IntoIterator<Item = i64>,
        refresh_interval: Duration,
        timeout: Duration,
    ) -> Self {
        let (snapshot, _) = watch::channel(Arc::new(ReferenceSnapshot::new(watchlist)));
        Self {
            provider,
            source: source.into(),
            refresh_interval,
            timeout,
            snapshot,
            last_refresh: Mutex::new(None),
        }
    }

    /// Current snapshot; cheap and never blocks on a refresh
    pub fn snapshot(&self) -> Arc<ReferenceSnapshot> {
        Arc::clone(&self.snapshot.borrow())
    }

    /// Receiver notified on every swap
    pub fn subscribe(&self) -> watch::Receiver<Arc<ReferenceSnapshot>> {
        self.snapshot.subscribe()
    }

    /// Reload both reference lists and swap them in
    ///
    /// All-or-nothing: if either list fails, the previous snapshot stays.
    pub async fn refresh(&self) -> Result<()> {
        let mut last_refresh = self.last_refresh.lock().await;
        self.load_and_swap().await?;
        *last_refresh = Some(Instant::now());
        Ok(())
    }

    /// Refresh when more than the interval has passed since the last success
    ///
    /// Returns `Ok(false)` without waiting if the cache is fresh or another
    /// refresh is already running. A failed load leaves the cache stale, so
    /// the next check tries again.
    pub async fn refresh_if_stale(&self) -> Result<bool> {
        let Ok(mut last_refresh) = self.last_refresh.try_lock() else {
            return Ok(false);
        };

        let stale = match *last_refresh {
            Some(_) if self.refresh_interval.is_zero() => true,
            Some(at) => at.elapsed() > self.refresh_interval,
            None => true,
        };
        if !stale {
            return Ok(false);
        }

        self.load_and_swap().await?;
        *last_refresh = Some(Instant::now());
        Ok(true)
    }

    async fn load_and_swap(&self) -> Result<()> {
        tracing::debug!(source = %self.source, "Refreshing reference data");

        let (systems, characters) = tokio::join!(
            timed(
                self.timeout,
                "monitored systems",
                self.provider.list_monitored_systems(&self.source)
            ),
            timed(
                self.timeout,
                "local characters",
                self.provider.list_local_characters(&self.source)
            ),
        );

        let (systems, characters) = match (systems, characters) {
            (Ok(s), Ok(c)) => (s, c),
            (Err(e), _) | (_, Err(e)) => {
                tracing::warn!(error = %e, "Reference refresh failed; keeping previous snapshot");
                return Err(e);
            }
        };

        let fetched = systems.len();
        let next = self.snapshot().next(systems, characters);
        tracing::info!(
            generation = next.generation,
            systems = next.systems.len(),
            filtered = fetched - next.systems.len(),
            local_characters = next.local_characters.len(),
            "Reference data refreshed"
        );
        self.snapshot.send_replace(Arc::new(next));
        Ok(())
    }
}
