//! Core killmail types for the a3s-killfeed pipeline
//!
//! Inbound frames are decoded exactly once, at ingestion, into [`RawEvent`].
//! Nothing downstream of the feed ever sees raw bytes.

use crate::error::{KillfeedError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Victim block, shared by the killstream frame and the authoritative detail
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Victim {
    #[serde(default)]
    pub alliance_id: Option<i64>,
    #[serde(default)]
    pub corporation_id: Option<i64>,
    #[serde(default)]
    pub character_id: Option<i64>,
    #[serde(default)]
    pub ship_type_id: Option<i64>,
    #[serde(default)]
    pub damage_taken: i64,
}

/// One attacker on a killmail
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attacker {
    #[serde(default)]
    pub alliance_id: Option<i64>,
    #[serde(default)]
    pub corporation_id: Option<i64>,
    #[serde(default)]
    pub character_id: Option<i64>,
    #[serde(default)]
    pub ship_type_id: Option<i64>,
    #[serde(default)]
    pub weapon_type_id: Option<i64>,
    #[serde(default)]
    pub final_blow: bool,
    #[serde(default)]
    pub damage_done: i64,
}

/// Economic and participation block carried verbatim from the feed
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueBlock {
    #[serde(default)]
    pub total_value: f64,
    #[serde(default)]
    pub destroyed_value: f64,
    #[serde(default)]
    pub dropped_value: f64,
    #[serde(default)]
    pub fitted_value: f64,
    #[serde(default)]
    pub points: i64,
    #[serde(default)]
    pub npc: bool,
    #[serde(default)]
    pub solo: bool,
    #[serde(default)]
    pub awox: bool,
}

/// `zkb` block as it appears on the wire
#[derive(Debug, Deserialize)]
struct ZkbBlock {
    #[serde(default)]
    hash: String,
    #[serde(flatten)]
    value: ValueBlock,
}

/// Killstream frame as it appears on the wire
#[derive(Debug, Deserialize)]
struct KillstreamFrame {
    killmail_id: i64,
    solar_system_id: i64,
    #[serde(default)]
    killmail_time: Option<DateTime<Utc>>,
    #[serde(default)]
    victim: Victim,
    #[serde(default)]
    attackers: Vec<Attacker>,
    zkb: Option<ZkbBlock>,
}

/// A killmail received from the feed
///
/// Immutable once parsed; dropped after classification and dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEvent {
    /// Killmail identifier
    pub id: i64,

    /// Solar system the kill happened in
    pub location_id: i64,

    /// Occurrence time, when the feed carries it
    pub killmail_time: Option<DateTime<Utc>>,

    pub victim: Victim,

    /// Attackers in feed order
    pub attackers: Vec<Attacker>,

    pub value: ValueBlock,

    /// Opaque hash required by the detail lookup
    pub verification_hash: String,
}

impl RawEvent {
    /// Decode one feed frame
    pub fn from_frame(frame: &[u8]) -> Result<Self> {
        let wire: KillstreamFrame = serde_json::from_slice(frame)
            .map_err(|e| KillfeedError::Parse(format!("killstream frame: {}", e)))?;

        let (verification_hash, value) = match wire.zkb {
            Some(zkb) => (zkb.hash, zkb.value),
            None => (String::new(), ValueBlock::default()),
        };

        Ok(Self {
            id: wire.killmail_id,
            location_id: wire.solar_system_id,
            killmail_time: wire.killmail_time,
            victim: wire.victim,
            attackers: wire.attackers,
            value,
            verification_hash,
        })
    }

    /// Public killboard link for this kill
    pub fn kill_url(&self) -> String {
        kill_url(self.id)
    }
}

/// Authoritative killmail detail returned by the detail provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KillmailDetail {
    pub killmail_id: i64,
    pub killmail_time: DateTime<Utc>,
    pub solar_system_id: i64,
    pub victim: Victim,
    #[serde(default)]
    pub attackers: Vec<Attacker>,
}

/// Select the attacker credited with the kill
///
/// The first attacker flagged `final_blow`, otherwise the first attacker.
pub fn final_attacker(attackers: &[Attacker]) -> Option<&Attacker> {
    attackers
        .iter()
        .find(|a| a.final_blow)
        .or_else(|| attackers.first())
}

/// A combatant with resolved display names
///
/// Name fields are `None` when the lookup failed or the id was absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Party {
    pub character_id: Option<i64>,
    pub corporation_id: Option<i64>,
    pub alliance_id: Option<i64>,
    pub ship_type_id: Option<i64>,
    pub character_name: Option<String>,
    pub corporation_name: Option<String>,
    pub alliance_name: Option<String>,
    pub ship_name: Option<String>,
}

/// Fully merged, name-resolved killmail ready for composition
///
/// Built once per event by the enricher and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CanonicalRecord {
    pub killmail_id: i64,
    pub hash: String,
    pub killmail_time: DateTime<Utc>,
    pub solar_system_id: i64,
    pub system_name: Option<String>,
    pub victim: Party,
    pub final_attacker: Party,
    pub attacker_count: usize,
    pub value: ValueBlock,
}

impl CanonicalRecord {
    pub fn kill_url(&self) -> String {
        kill_url(self.killmail_id)
    }
}

fn kill_url(id: i64) -> String {
    format!("https://zkillboard.com/kill/{}/", id)
}

/// A monitored solar system and its short chain alias
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitoredSystem {
    pub system_id: i64,
    pub alias: String,
}

impl MonitoredSystem {
    /// Aliases ending in an ASCII letter label non-chain systems
    pub fn is_chain_alias(alias: &str) -> bool {
        match alias.chars().last() {
            Some(last) => !last.is_ascii_alphabetic(),
            None => false,
        }
    }
}

/// A character known to be at home in the chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalCharacter {
    pub character_id: i64,
    pub corporation_id: Option<i64>,
    pub alliance_id: Option<i64>,
}

/// Why an event was considered relevant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MatchReason {
    VictimMatch,
    AttackerMatch,
    SystemMatch,
}

/// Relevance verdict for one event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// Not relevant; dropped
    None,
    /// A tracked entity lost a ship; `matched` is the watchlist id hit
    Loss { matched: i64 },
    /// A tracked entity scored a kill
    Kill { matched: i64 },
    /// Informational chain alert for a monitored system
    SystemMatch { system: MonitoredSystem },
}

impl Classification {
    pub fn reason(&self) -> Option<MatchReason> {
        match self {
            Self::None => None,
            Self::Loss { .. } => Some(MatchReason::VictimMatch),
            Self::Kill { .. } => Some(MatchReason::AttackerMatch),
            Self::SystemMatch { .. } => Some(MatchReason::SystemMatch),
        }
    }

    /// Kill and loss verdicts need identity resolution
    pub fn needs_enrichment(&self) -> bool {
        matches!(self, Self::Loss { .. } | Self::Kill { .. })
    }

    pub fn is_kill(&self) -> bool {
        matches!(self, Self::Kill { .. })
    }
}
