//! In-memory detail provider and notification sink
//!
//! Scripted backends for tests and dry runs. Nothing leaves the process.

use super::{DetailProvider, NameKind, NotificationSink};
use crate::composer::Embed;
use crate::config::WebhookTarget;
use crate::error::{KillfeedError, Result};
use crate::types::{KillmailDetail, LocalCharacter, MonitoredSystem};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;

#[derive(Default)]
struct ProviderState {
    killmails: HashMap<(i64, String), KillmailDetail>,
    names: HashMap<(NameKind, i64), String>,
    failing_names: HashSet<(NameKind, i64)>,
    systems: Vec<MonitoredSystem>,
    characters: Vec<LocalCharacter>,
}

/// Scripted `DetailProvider`
///
/// Unknown killmails and names fail with `KillfeedError::Lookup`, as a
/// real backend would answer 404.
#[derive(Default)]
pub struct MemoryDetailProvider {
    state: RwLock<ProviderState>,
    fail_reference: AtomicBool,
    killmail_calls: AtomicUsize,
    name_calls: AtomicUsize,
    reference_calls: AtomicUsize,
}

impl MemoryDetailProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_killmail(self, hash: impl Into<String>, detail: KillmailDetail) -> Self {
        self.insert_killmail(hash, detail);
        self
    }

    pub fn with_name(self, kind: NameKind, id: i64, name: impl Into<String>) -> Self {
        self.write().names.insert((kind, id), name.into());
        self
    }

    /// Make one name lookup fail even if a name is registered
    pub fn with_failing_name(self, kind: NameKind, id: i64) -> Self {
        self.write().failing_names.insert((kind, id));
        self
    }

    pub fn with_systems(self, systems: Vec<MonitoredSystem>) -> Self {
        self.set_systems(systems);
        self
    }

    pub fn with_characters(self, characters: Vec<LocalCharacter>) -> Self {
        self.set_characters(characters);
        self
    }

    pub fn insert_killmail(&self, hash: impl Into<String>, detail: KillmailDetail) {
        self.write()
            .killmails
            .insert((detail.killmail_id, hash.into()), detail);
    }

    pub fn set_systems(&self, systems: Vec<MonitoredSystem>) {
        self.write().systems = systems;
    }

    pub fn set_characters(&self, characters: Vec<LocalCharacter>) {
        self.write().characters = characters;
    }

    /// Toggle failure of both reference endpoints
    pub fn set_fail_reference(&self, fail: bool) {
        self.fail_reference.store(fail, Ordering::SeqCst);
    }

    pub fn killmail_calls(&self) -> usize {
        self.killmail_calls.load(Ordering::SeqCst)
    }

    pub fn name_calls(&self) -> usize {
        self.name_calls.load(Ordering::SeqCst)
    }

    pub fn reference_calls(&self) -> usize {
        self.reference_calls.load(Ordering::SeqCst)
    }

    /// Total calls of any kind
    pub fn total_calls(&self) -> usize {
        self.killmail_calls() + self.name_calls() + self.reference_calls()
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, ProviderState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, ProviderState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn name(&self, kind: NameKind, id: i64) -> Result<String> {
        self.name_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.read();
        let what = format!("{} {}", kind.as_str(), id);
        if state.failing_names.contains(&(kind, id)) {
            return Err(KillfeedError::lookup(what, "injected failure"));
        }
        state
            .names
            .get(&(kind, id))
            .cloned()
            .ok_or_else(|| KillfeedError::lookup(what, "not found"))
    }

    fn reference_guard(&self, what: &str) -> Result<()> {
        self.reference_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_reference.load(Ordering::SeqCst) {
            return Err(KillfeedError::lookup(what, "injected failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl DetailProvider for MemoryDetailProvider {
    async fn fetch_killmail(&self, id: i64, hash: &str) -> Result<KillmailDetail> {
        self.killmail_calls.fetch_add(1, Ordering::SeqCst);
        self.read()
            .killmails
            .get(&(id, hash.to_string()))
            .cloned()
            .ok_or_else(|| KillfeedError::lookup(format!("killmail {}", id), "not found"))
    }

    async fn resolve_character_name(&self, id: i64) -> Result<String> {
        self.name(NameKind::Character, id)
    }

    async fn resolve_corporation_name(&self, id: i64) -> Result<String> {
        self.name(NameKind::Corporation, id)
    }

    async fn resolve_alliance_name(&self, id: i64) -> Result<String> {
        self.name(NameKind::Alliance, id)
    }

    async fn resolve_system_name(&self, id: i64) -> Result<String> {
        self.name(NameKind::System, id)
    }

    async fn resolve_type_name(&self, id: i64) -> Result<String> {
        self.name(NameKind::Type, id)
    }

    async fn list_monitored_systems(&self, _source: &str) -> Result<Vec<MonitoredSystem>> {
        self.reference_guard("monitored systems")?;
        Ok(self.read().systems.clone())
    }

    async fn list_local_characters(&self, _source: &str) -> Result<Vec<LocalCharacter>> {
        self.reference_guard("local characters")?;
        Ok(self.read().characters.clone())
    }
}

/// A send captured by `MemorySink`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub target: WebhookTarget,
    pub text: String,
    pub embed: Option<Embed>,
}

/// Recording `NotificationSink`
#[derive(Default)]
pub struct MemorySink {
    sent: RwLock<Vec<SentMessage>>,
    fail: AtomicBool,
    attempts: AtomicUsize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every send while set
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Successful sends, oldest first
    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Successful sends to one webhook id
    pub fn sent_to(&self, webhook_id: &str) -> Vec<SentMessage> {
        self.sent()
            .into_iter()
            .filter(|m| m.target.id == webhook_id)
            .collect()
    }

    /// Every send attempt, including rejected ones
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NotificationSink for MemorySink {
    async fn send(&self, target: &WebhookTarget, text: &str, embed: Option<&Embed>) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(KillfeedError::Dispatch {
                channel: target.id.clone(),
                reason: "injected failure".into(),
            });
        }
        self.sent
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(SentMessage {
                target: target.clone(),
                text: text.to_string(),
                embed: embed.cloned(),
            });
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Victim;
    use chrono::Utc;

    fn detail(id: i64) -> KillmailDetail {
        KillmailDetail {
            killmail_id: id,
            killmail_time: Utc::now(),
            solar_system_id: 30000142,
            victim: Victim::default(),
            attackers: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_killmail_keyed_by_hash() {
        let provider = MemoryDetailProvider::new().with_killmail("h1", detail(1));
        assert!(provider.fetch_killmail(1, "h1").await.is_ok());
        assert!(provider.fetch_killmail(1, "other").await.is_err());
        assert_eq!(provider.killmail_calls(), 2);
    }

    #[tokio::test]
    async fn test_names_and_failures() {
        let provider = MemoryDetailProvider::new()
            .with_name(NameKind::Type, 587, "Rifter")
            .with_name(NameKind::Corporation, 7, "Corp")
            .with_failing_name(NameKind::Corporation, 7);

        assert_eq!(provider.resolve_type_name(587).await.unwrap(), "Rifter");
        assert_eq!(
            provider.resolve_name(NameKind::Type, 587).await.unwrap(),
            "Rifter"
        );
        assert!(provider.resolve_corporation_name(7).await.is_err());
        assert!(provider.resolve_alliance_name(1).await.is_err());
        assert_eq!(provider.name_calls(), 4);
    }

    #[tokio::test]
    async fn test_reference_failure_toggle() {
        let provider = MemoryDetailProvider::new().with_systems(vec![MonitoredSystem {
            system_id: 1,
            alias: "1".into(),
        }]);
        assert_eq!(provider.list_monitored_systems("slug").await.unwrap().len(), 1);

        provider.set_fail_reference(true);
        assert!(provider.list_monitored_systems("slug").await.is_err());
        assert!(provider.list_local_characters("slug").await.is_err());
        assert_eq!(provider.reference_calls(), 3);
    }

    #[tokio::test]
    async fn test_memory_sink_records() {
        let sink = MemorySink::new();
        let target = WebhookTarget { id: "a".into(), token: "t".into() };
        sink.send(&target, "hello", None).await.unwrap();

        sink.set_fail(true);
        assert!(sink.send(&target, "dropped", None).await.is_err());

        assert_eq!(sink.attempts(), 2);
        assert_eq!(sink.sent().len(), 1);
        assert_eq!(sink.sent_to("a")[0].text, "hello");
        assert!(sink.sent_to("b").is_empty());
    }
}
