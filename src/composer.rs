//! Notification composition
//!
//! Renders canonical records and chain alerts into sink-ready payloads.
//! Composition never fails: unresolved names become placeholder labels.

use crate::config::{NotificationSettings, ValueFormat};
use crate::types::{CanonicalRecord, Classification, MonitoredSystem, Party, RawEvent};
use serde::Serialize;

pub const UNKNOWN_VICTIM: &str = "UnknownVictim";
pub const UNKNOWN_ATTACKER: &str = "UnknownAttacker";
pub const UNKNOWN_SHIP: &str = "UnknownShip";
pub const UNKNOWN_GROUP: &str = "UnknownGroup";

/// Label used in place of Kill/Loss for friendly-fire kills
pub const COWARDLY_LABEL: &str = "Cowardly Awox";

const WHITE: u32 = 0xFF_FF_FF;
const ONE_MILLION: f64 = 1_000_000.0;

/// Destination channel for a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Channel {
    /// Kill and loss embeds
    Killmail,
    /// Chain alerts
    Chain,
    /// Status and operational messages
    Info,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Killmail => "killmail",
            Self::Chain => "chain",
            Self::Info => "info",
        }
    }
}

/// Embed author block
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmbedAuthor {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
}

/// Rich notification payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Embed {
    pub title: String,
    pub description: String,
    pub url: String,
    pub color: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<EmbedAuthor>,
    pub footer: String,
    /// RFC 3339 occurrence time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

/// A composed notification bound for one channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub channel: Channel,
    pub text: String,
    pub embed: Option<Embed>,
}

impl Notification {
    /// Plain-text status message for the info channel
    pub fn info(text: impl Into<String>) -> Self {
        Self {
            channel: Channel::Info,
            text: text.into(),
            embed: None,
        }
    }
}

/// Parse `#RRGGBB` into a packed RGB integer
pub fn parse_hex_color(hex: &str) -> Option<u32> {
    let digits = hex.strip_prefix('#')?;
    if digits.len() != 6 {
        return None;
    }
    u32::from_str_radix(digits, 16).ok()
}

/// Render an ISK amount for display
///
/// Non-finite amounts render as zero.
pub fn format_value(value: f64, format: ValueFormat) -> String {
    let value = if value.is_finite() { value } else { 0.0 };
    match format {
        ValueFormat::Abbreviated => {
            if value < ONE_MILLION {
                "<1m".to_string()
            } else {
                format!("{:.2}m", value / ONE_MILLION)
            }
        }
        ValueFormat::Full => format!("{} ISK", group_thousands(value.round().max(0.0) as u64)),
    }
}

fn group_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

fn ship_render_url(type_id: i64) -> String {
    format!("https://images.evetech.net/types/{}/render?size=64", type_id)
}

fn portrait_url(character_id: i64) -> String {
    format!(
        "https://images.evetech.net/characters/{}/portrait?size=64",
        character_id
    )
}

fn character_page_url(character_id: i64) -> String {
    format!("https://zkillboard.com/character/{}/", character_id)
}

fn or_placeholder<'a>(name: &'a Option<String>, placeholder: &'a str) -> &'a str {
    name.as_deref().filter(|n| !n.is_empty()).unwrap_or(placeholder)
}

fn group_label(party: &Party) -> String {
    let corp = or_placeholder(&party.corporation_name, UNKNOWN_GROUP);
    match party.alliance_id {
        Some(_) => format!(
            "{} / {}",
            corp,
            or_placeholder(&party.alliance_name, UNKNOWN_GROUP)
        ),
        None => corp.to_string(),
    }
}

/// Turns records into notifications using the configured presentation
#[derive(Debug, Clone)]
pub struct Composer {
    kill_color: u32,
    loss_color: u32,
    value_format: ValueFormat,
    mention: String,
}

impl Composer {
    pub fn new(settings: &NotificationSettings) -> Self {
        Self {
            kill_color: parse_hex_color(&settings.kill_color).unwrap_or(WHITE),
            loss_color: parse_hex_color(&settings.loss_color).unwrap_or(WHITE),
            value_format: settings.value_format,
            mention: settings.mention.clone(),
        }
    }

    pub fn format_value(&self, value: f64) -> String {
        format_value(value, self.value_format)
    }

    /// Compose a kill/loss embed for the killmail channel
    pub fn compose(&self, record: &CanonicalRecord, classification: &Classification) -> Notification {
        let is_kill = classification.is_kill();
        let victim = &record.victim;
        let attacker = &record.final_attacker;

        let label = if record.value.awox {
            COWARDLY_LABEL
        } else if is_kill {
            "Kill"
        } else {
            "Loss"
        };

        let victim_name = or_placeholder(&victim.character_name, UNKNOWN_VICTIM);
        let victim_ship = or_placeholder(&victim.ship_name, UNKNOWN_SHIP);
        let attacker_name = or_placeholder(&attacker.character_name, UNKNOWN_ATTACKER);
        let attacker_ship = or_placeholder(&attacker.ship_name, UNKNOWN_SHIP);
        let system = record
            .system_name
            .clone()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| record.solar_system_id.to_string());
        let value = self.format_value(record.value.total_value);

        let mut description = format!(
            "{} ({}) lost their {} in {} to {} ({}) flying a {}.\n{} attacker{}, {} points",
            victim_name,
            group_label(victim),
            victim_ship,
            system,
            attacker_name,
            group_label(attacker),
            attacker_ship,
            record.attacker_count,
            if record.attacker_count == 1 { "" } else { "s" },
            record.value.points,
        );
        if record.value.solo {
            description.push_str(", solo");
        }
        if record.value.npc {
            description.push_str(", NPC");
        }

        let featured = if is_kill { attacker } else { victim };
        let author = featured.character_id.map(|id| EmbedAuthor {
            name: if is_kill {
                attacker_name.to_string()
            } else {
                victim_name.to_string()
            },
            url: Some(character_page_url(id)),
            icon_url: Some(portrait_url(id)),
        });

        let embed = Embed {
            title: format!("{}: {} worth {}", label, victim_ship, value),
            description,
            url: record.kill_url(),
            color: if is_kill { self.kill_color } else { self.loss_color },
            thumbnail: victim.ship_type_id.map(ship_render_url),
            author,
            footer: format!("{} \u{2022} {} points", system, record.value.points),
            timestamp: Some(record.killmail_time.to_rfc3339()),
        };

        Notification {
            channel: Channel::Killmail,
            text: String::new(),
            embed: Some(embed),
        }
    }

    /// Compose a plain-text chain alert
    pub fn compose_chain_alert(&self, event: &RawEvent, system: &MonitoredSystem) -> Notification {
        let text = format!(
            "{} A ship just died in {} to {} people, zkill link: {}",
            self.mention,
            system.alias,
            event.attackers.len(),
            event.kill_url()
        );
        Notification {
            channel: Channel::Chain,
            text: text.trim_start().to_string(),
            embed: None,
        }
    }
}
