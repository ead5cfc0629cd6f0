//! Capability traits the pipeline depends on
//!
//! The core never talks to a transport directly. Detail lookups go through
//! `DetailProvider`, outbound notifications through `NotificationSink`.
//! Concrete backends live in the submodules.

use crate::composer::Embed;
use crate::config::WebhookTarget;
use crate::error::Result;
use crate::types::{KillmailDetail, LocalCharacter, MonitoredSystem};
use async_trait::async_trait;

pub mod discord;
pub mod http;
pub mod log;
pub mod memory;

/// Kinds of id whose display name can be resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NameKind {
    Character,
    Corporation,
    Alliance,
    System,
    Type,
}

impl NameKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Character => "character",
            Self::Corporation => "corporation",
            Self::Alliance => "alliance",
            Self::System => "system",
            Self::Type => "type",
        }
    }
}

/// Authoritative detail and reference lookups
///
/// Every call is independent and may fail on its own; callers decide
/// which failures are fatal for an event.
#[async_trait]
pub trait DetailProvider: Send + Sync {
    /// Fetch the authoritative killmail keyed by id and verification hash
    async fn fetch_killmail(&self, id: i64, hash: &str) -> Result<KillmailDetail>;

    async fn resolve_character_name(&self, id: i64) -> Result<String>;

    async fn resolve_corporation_name(&self, id: i64) -> Result<String>;

    async fn resolve_alliance_name(&self, id: i64) -> Result<String>;

    async fn resolve_system_name(&self, id: i64) -> Result<String>;

    async fn resolve_type_name(&self, id: i64) -> Result<String>;

    /// List monitored systems for a reference source, unfiltered
    async fn list_monitored_systems(&self, source: &str) -> Result<Vec<MonitoredSystem>>;

    /// List characters known to be home for a reference source
    async fn list_local_characters(&self, source: &str) -> Result<Vec<LocalCharacter>>;

    /// Resolve a name by kind
    ///
    /// Default implementation routes to the per-kind methods.
    async fn resolve_name(&self, kind: NameKind, id: i64) -> Result<String> {
        match kind {
            NameKind::Character => self.resolve_character_name(id).await,
            NameKind::Corporation => self.resolve_corporation_name(id).await,
            NameKind::Alliance => self.resolve_alliance_name(id).await,
            NameKind::System => self.resolve_system_name(id).await,
            NameKind::Type => self.resolve_type_name(id).await,
        }
    }
}

/// Outbound notification transport
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Send plain text and/or a rich embed to one destination
    async fn send(&self, target: &WebhookTarget, text: &str, embed: Option<&Embed>) -> Result<()>;

    /// Sink name (e.g., "discord", "memory")
    fn name(&self) -> &str;
}
