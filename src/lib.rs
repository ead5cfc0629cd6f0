//! # a3s-killfeed
//!
//! Real-time killmail filtering, enrichment, and notification for the A3S ecosystem.
//!
//! ## Overview
//!
//! `a3s-killfeed` subscribes to a live kill feed, decides which events matter
//! to a tracked set of corporations and alliances, enriches the relevant ones
//! with names from a detail API, and posts formatted notifications to chat
//! webhooks. Feed, lookups, and delivery sit behind traits, so tests run the
//! whole pipeline against in-memory backends.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use a3s_killfeed::{KillfeedService, Settings};
//! use a3s_killfeed::feed::ws::WsConnector;
//! use a3s_killfeed::provider::discord::DiscordSink;
//! use a3s_killfeed::provider::http::HttpDetailProvider;
//!
//! # async fn example() -> a3s_killfeed::Result<()> {
//! let settings = Settings::load("config.json")?;
//! let provider = Arc::new(HttpDetailProvider::from_settings(&settings)?);
//! let sink = Arc::new(DiscordSink::new(settings.request_timeout())?);
//! let connector = Arc::new(WsConnector::new(settings.feed.url.clone()));
//!
//! let service = KillfeedService::new(settings, provider, sink, connector);
//! let cancel = service.cancellation_token();
//! tokio::spawn(async move {
//!     let _ = tokio::signal::ctrl_c().await;
//!     cancel.cancel();
//! });
//! service.run().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **FeedSubscriber**: persistent feed connection with reconnect
//! - **ReferenceCache**: atomically swapped snapshot of watchlist and reference lists
//! - **Classifier**: Loss > Kill > SystemMatch > None
//! - **Enricher**: required detail fetch plus best-effort name lookups
//! - **Composer / Dispatcher**: notification formatting and delivery
//! - **Pipeline**: bounded worker pool tying the stages together
//!
//! ## Providers
//!
//! - **http**: ESI detail lookups and the map reference API
//! - **discord**: Discord webhook delivery
//! - **memory**: scripted backends for tests
//! - **log**: log-only sink for dry runs

pub mod cache;
pub mod classifier;
pub mod composer;
pub mod config;
pub mod dispatcher;
pub mod enricher;
pub mod error;
pub mod feed;
pub mod pipeline;
pub mod provider;
pub mod service;
pub mod types;

// Re-export core types
pub use cache::{ReferenceCache, ReferenceSnapshot};
pub use classifier::Classifier;
pub use composer::{Channel, Composer, Embed, Notification};
pub use config::Settings;
pub use dispatcher::Dispatcher;
pub use enricher::Enricher;
pub use error::{KillfeedError, Result};
pub use feed::{FeedConnection, FeedConnector, FeedHandle, FeedState, FeedStatus, FeedSubscriber};
pub use pipeline::{Outcome, Pipeline};
pub use provider::{DetailProvider, NameKind, NotificationSink};
pub use service::KillfeedService;
pub use types::{
    Attacker, CanonicalRecord, Classification, LocalCharacter, MatchReason, MonitoredSystem,
    Party, RawEvent, ValueBlock, Victim,
};
