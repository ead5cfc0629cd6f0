//! Enrichment: merge a raw event with authoritative detail
//!
//! The killmail detail fetch is required; if it fails the event is dropped.
//! Every name lookup after it is independent and best-effort, so a missing
//! name only blanks its own field.

use crate::error::{timed, KillfeedError, Result};
use crate::provider::{DetailProvider, NameKind};
use crate::types::{final_attacker, Attacker, CanonicalRecord, Party, RawEvent};
use std::sync::Arc;
use std::time::Duration;

/// Builds canonical records using a `DetailProvider`
#[derive(Clone)]
pub struct Enricher {
    provider: Arc<dyn DetailProvider>,
    timeout: Duration,
}

impl Enricher {
    pub fn new(provider: Arc<dyn DetailProvider>, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    /// Build the canonical record for one event
    pub async fn enrich(&self, event: &RawEvent) -> Result<CanonicalRecord> {
        if event.verification_hash.is_empty() {
            return Err(KillfeedError::lookup(
                format!("killmail {}", event.id),
                "event carries no verification hash",
            ));
        }

        let detail = timed(
            self.timeout,
            "killmail detail",
            self.provider
                .fetch_killmail(event.id, &event.verification_hash),
        )
        .await?;

        let attackers = if detail.attackers.is_empty() {
            &event.attackers
        } else {
            &detail.attackers
        };
        let finisher = final_attacker(attackers).cloned().unwrap_or_default();
        let victim = &detail.victim;

        let (
            system_name,
            victim_ship,
            attacker_ship,
            victim_name,
            victim_corp,
            victim_alliance,
            attacker_name,
            attacker_corp,
            attacker_alliance,
        ) = tokio::join!(
            self.resolve(NameKind::System, Some(detail.solar_system_id)),
            self.resolve(NameKind::Type, victim.ship_type_id),
            self.resolve(NameKind::Type, finisher.ship_type_id),
            self.resolve(NameKind::Character, victim.character_id),
            self.resolve(NameKind::Corporation, victim.corporation_id),
            self.resolve(NameKind::Alliance, victim.alliance_id),
            self.resolve(NameKind::Character, finisher.character_id),
            self.resolve(NameKind::Corporation, finisher.corporation_id),
            self.resolve(NameKind::Alliance, finisher.alliance_id),
        );

        let record = CanonicalRecord {
            killmail_id: detail.killmail_id,
            hash: event.verification_hash.clone(),
            killmail_time: detail.killmail_time,
            solar_system_id: detail.solar_system_id,
            system_name,
            victim: Party {
                character_id: victim.character_id,
                corporation_id: victim.corporation_id,
                alliance_id: victim.alliance_id,
                ship_type_id: victim.ship_type_id,
                character_name: victim_name,
                corporation_name: victim_corp,
                alliance_name: victim_alliance,
                ship_name: victim_ship,
            },
            final_attacker: attacker_party(&finisher, attacker_name, attacker_corp, attacker_alliance, attacker_ship),
            attacker_count: attackers.len(),
            value: event.value.clone(),
        };

        tracing::debug!(
            killmail_id = record.killmail_id,
            victim = ?record.victim.character_name,
            final_attacker = ?record.final_attacker.character_name,
            "Killmail enriched"
        );
        Ok(record)
    }

    async fn resolve(&self, kind: NameKind, id: Option<i64>) -> Option<String> {
        let id = id?;
        let what = format!("{} name", kind.as_str());
        match timed(self.timeout, &what, self.provider.resolve_name(kind, id)).await {
            Ok(name) => Some(name),
            Err(e) => {
                tracing::warn!(kind = kind.as_str(), id, error = %e, "Name lookup failed");
                None
            }
        }
    }
}

fn attacker_party(
    attacker: &Attacker,
    character_name: Option<String>,
    corporation_name: Option<String>,
    alliance_name: Option<String>,
    ship_name: Option<String>,
) -> Party {
    Party {
        character_id: attacker.character_id,
        corporation_id: attacker.corporation_id,
        alliance_id: attacker.alliance_id,
        ship_type_id: attacker.ship_type_id,
        character_name,
        corporation_name,
        alliance_name,
        ship_name,
    }
}
