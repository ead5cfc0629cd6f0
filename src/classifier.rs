//! Relevance classification
//!
//! Precedence, first match wins:
//! 1. victim corporation/alliance on the watchlist → `Loss`
//! 2. any attacker corporation/alliance/character on the watchlist → `Kill`
//! 3. monitored, non-ignored system with no local attacker → `SystemMatch`
//! 4. otherwise → `None`

use crate::cache::ReferenceSnapshot;
use crate::types::{Classification, RawEvent};
use std::collections::HashSet;

/// Stateless classifier over a reference snapshot
#[derive(Debug, Clone, Default)]
pub struct Classifier {
    ignore_system_ids: HashSet<i64>,
    locals_count_as_kills: bool,
}

impl Classifier {
    pub fn new(ignore_system_ids: impl IntoIterator<Item = i64>) -> Self {
        Self {
            ignore_system_ids: ignore_system_ids.into_iter().collect(),
            locals_count_as_kills: false,
        }
    }

    /// Treat attackers who are known local characters as tracked
    pub fn with_locals_count_as_kills(mut self, enabled: bool) -> Self {
        self.locals_count_as_kills = enabled;
        self
    }

    pub fn classify(&self, event: &RawEvent, snapshot: &ReferenceSnapshot) -> Classification {
        let victim = &event.victim;
        for id in [victim.corporation_id, victim.alliance_id] {
            if snapshot.is_tracked(id) {
                tracing::debug!(killmail_id = event.id, matched = ?id, "Victim match");
                return Classification::Loss { matched: id.unwrap_or_default() };
            }
        }

        for attacker in &event.attackers {
            for id in [attacker.corporation_id, attacker.alliance_id, attacker.character_id] {
                if snapshot.is_tracked(id) {
                    tracing::debug!(killmail_id = event.id, matched = ?id, "Attacker match");
                    return Classification::Kill { matched: id.unwrap_or_default() };
                }
            }
            if self.locals_count_as_kills && snapshot.is_local(attacker.character_id) {
                tracing::debug!(
                    killmail_id = event.id,
                    character_id = ?attacker.character_id,
                    "Attacker local match"
                );
                return Classification::Kill {
                    matched: attacker.character_id.unwrap_or_default(),
                };
            }
        }

        let Some(system) = snapshot.system(event.location_id) else {
            return Classification::None;
        };
        if self.ignore_system_ids.contains(&system.system_id) {
            tracing::debug!(killmail_id = event.id, system_id = system.system_id, "System ignored");
            return Classification::None;
        }

        if event
            .attackers
            .iter()
            .any(|a| snapshot.is_local(a.character_id))
        {
            tracing::debug!(
                killmail_id = event.id,
                system_id = system.system_id,
                "Local attacker present; suppressing chain alert"
            );
            return Classification::None;
        }

        Classification::SystemMatch { system: system.clone() }
    }
}
