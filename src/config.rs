//! Killfeed settings
//!
//! Loaded once at startup from a JSON file. Every field has a default so a
//! partial file is valid; `validate()` catches values the pipeline cannot run with.

use crate::error::{KillfeedError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level settings consumed by the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default)]
    pub feed: FeedSettings,

    /// Watchlist of tracked corporation/alliance/character ids
    #[serde(default)]
    pub tracked_ids: Vec<i64>,

    /// Monitored systems that never raise chain alerts
    #[serde(default)]
    pub ignore_system_ids: Vec<i64>,

    #[serde(default)]
    pub map_api: MapApiSettings,

    #[serde(default = "default_esi_base_url")]
    pub esi_base_url: String,

    /// Minutes between opportunistic reference refreshes (0 = every event)
    #[serde(default)]
    pub refresh_minutes: u64,

    /// Minutes between "still running" heartbeats on the info channel
    #[serde(default = "default_status_report_mins")]
    pub status_report_mins: u64,

    /// Timeout for every outbound call
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub webhooks: WebhookSettings,

    #[serde(default)]
    pub notifications: NotificationSettings,

    #[serde(default)]
    pub pipeline: PipelineSettings,

    /// Count an attacker who is a known local character as a tracked kill
    #[serde(default)]
    pub locals_count_as_kills: bool,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Feed connection and reconnection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedSettings {
    #[serde(default = "default_feed_url")]
    pub url: String,

    /// Channel named in the subscription request
    #[serde(default = "default_feed_channel")]
    pub channel: String,

    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,

    /// Upper bound of uniform random jitter added to each delay
    #[serde(default)]
    pub reconnect_jitter_secs: u64,

    /// Give up after this many consecutive failed attempts (unset = never)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_reconnect_attempts: Option<u32>,

    #[serde(default = "default_request_timeout_secs")]
    pub dial_timeout_secs: u64,
}

impl FeedSettings {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub fn reconnect_jitter(&self) -> Duration {
        Duration::from_secs(self.reconnect_jitter_secs)
    }

    pub fn dial_timeout(&self) -> Duration {
        Duration::from_secs(self.dial_timeout_secs)
    }
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            url: default_feed_url(),
            channel: default_feed_channel(),
            reconnect_delay_secs: default_reconnect_delay_secs(),
            reconnect_jitter_secs: 0,
            max_reconnect_attempts: None,
            dial_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Reference-list API (monitored systems and local characters)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapApiSettings {
    #[serde(default)]
    pub base_url: String,

    /// Source descriptor passed to the reference endpoints
    #[serde(default)]
    pub slug: String,

    #[serde(default)]
    pub token: String,
}

/// A webhook destination
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookTarget {
    pub id: String,
    pub token: String,
}

impl WebhookTarget {
    pub fn is_configured(&self) -> bool {
        !self.id.is_empty() && !self.token.is_empty()
    }
}

/// Destinations per notification channel
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookSettings {
    /// Kill and loss embeds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub killmail: Option<WebhookTarget>,

    /// Chain alerts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain: Option<WebhookTarget>,

    /// Status and operational messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<WebhookTarget>,
}

/// How monetary values are rendered
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ValueFormat {
    /// `<1m` below one million, otherwise millions with two decimals
    #[default]
    Abbreviated,
    /// Thousands-separated whole amount
    Full,
}

/// Presentation settings for composed notifications
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationSettings {
    #[serde(default = "default_kill_color")]
    pub kill_color: String,

    #[serde(default = "default_loss_color")]
    pub loss_color: String,

    #[serde(default)]
    pub value_format: ValueFormat,

    /// Prefix for chain alerts
    #[serde(default = "default_mention")]
    pub mention: String,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            kill_color: default_kill_color(),
            loss_color: default_loss_color(),
            value_format: ValueFormat::default(),
            mention: default_mention(),
        }
    }
}

/// Worker pool sizing between ingestion and processing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineSettings {
    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

fn default_feed_url() -> String {
    "wss://zkillboard.com/websocket/".to_string()
}

fn default_feed_channel() -> String {
    "killstream".to_string()
}

fn default_reconnect_delay_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_esi_base_url() -> String {
    "https://esi.evetech.net/latest".to_string()
}

fn default_status_report_mins() -> u64 {
    60
}

fn default_kill_color() -> String {
    "#00FF00".to_string()
}

fn default_loss_color() -> String {
    "#FF0000".to_string()
}

fn default_mention() -> String {
    "@here".to_string()
}

fn default_workers() -> usize {
    8
}

fn default_queue_capacity() -> usize {
    256
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            feed: FeedSettings::default(),
            tracked_ids: Vec::new(),
            ignore_system_ids: Vec::new(),
            map_api: MapApiSettings::default(),
            esi_base_url: default_esi_base_url(),
            refresh_minutes: 0,
            status_report_mins: default_status_report_mins(),
            request_timeout_secs: default_request_timeout_secs(),
            webhooks: WebhookSettings::default(),
            notifications: NotificationSettings::default(),
            pipeline: PipelineSettings::default(),
            locals_count_as_kills: false,
            log_level: default_log_level(),
        }
    }
}

impl Settings {
    /// Load and validate settings from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            KillfeedError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        let settings: Settings = serde_json::from_str(&content).map_err(|e| {
            KillfeedError::Config(format!(
                "Failed to parse config file {}: {}",
                path.display(),
                e
            ))
        })?;

        settings.validate()?;
        Ok(settings)
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.feed.url.trim().is_empty() {
            return Err(KillfeedError::Config("feed.url must not be empty".into()));
        }
        if self.pipeline.workers == 0 {
            return Err(KillfeedError::Config("pipeline.workers must be at least 1".into()));
        }
        if self.pipeline.queue_capacity == 0 {
            return Err(KillfeedError::Config(
                "pipeline.queueCapacity must be at least 1".into(),
            ));
        }
        for (name, color) in [
            ("killColor", &self.notifications.kill_color),
            ("lossColor", &self.notifications.loss_color),
        ] {
            if crate::composer::parse_hex_color(color).is_none() {
                return Err(KillfeedError::Config(format!(
                    "notifications.{} must be #RRGGBB, got '{}'",
                    name, color
                )));
            }
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_minutes * 60)
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_secs(self.status_report_mins * 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.feed.url, "wss://zkillboard.com/websocket/");
        assert_eq!(settings.feed.channel, "killstream");
        assert_eq!(settings.feed.reconnect_delay(), Duration::from_secs(10));
        assert_eq!(settings.feed.reconnect_jitter(), Duration::ZERO);
        assert!(settings.feed.max_reconnect_attempts.is_none());
        assert_eq!(settings.request_timeout(), Duration::from_secs(10));
        assert_eq!(settings.refresh_interval(), Duration::ZERO);
        assert_eq!(settings.notifications.value_format, ValueFormat::Abbreviated);
        assert!(!settings.locals_count_as_kills);
        settings.validate().unwrap();
    }

    #[test]
    fn test_deserialize_partial() {
        let json = r##"{
            "trackedIds": [99000001, 1354830081],
            "ignoreSystemIds": [31000005],
            "refreshMinutes": 5,
            "feed": {"reconnectDelaySecs": 3, "maxReconnectAttempts": 4},
            "webhooks": {"killmail": {"id": "123", "token": "abc"}},
            "notifications": {"killColor": "#112233", "valueFormat": "full"},
            "mapApi": {"baseUrl": "https://map.example/api", "slug": "home", "token": "t"}
        }"##;

        let settings: Settings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.tracked_ids, vec![99000001, 1354830081]);
        assert_eq!(settings.ignore_system_ids, vec![31000005]);
        assert_eq!(settings.refresh_interval(), Duration::from_secs(300));
        assert_eq!(settings.feed.reconnect_delay_secs, 3);
        assert_eq!(settings.feed.max_reconnect_attempts, Some(4));
        assert_eq!(settings.feed.channel, "killstream");
        assert!(settings.webhooks.killmail.as_ref().unwrap().is_configured());
        assert!(settings.webhooks.chain.is_none());
        assert_eq!(settings.notifications.kill_color, "#112233");
        assert_eq!(settings.notifications.loss_color, "#FF0000");
        assert_eq!(settings.notifications.value_format, ValueFormat::Full);
        assert_eq!(settings.map_api.slug, "home");
        assert_eq!(settings.pipeline.workers, 8);
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let mut settings = Settings::default();
        settings.pipeline.workers = 0;
        assert!(matches!(settings.validate(), Err(KillfeedError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_zero_queue() {
        let mut settings = Settings::default();
        settings.pipeline.queue_capacity = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_color() {
        let mut settings = Settings::default();
        settings.notifications.loss_color = "red".into();
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("lossColor"));
    }

    #[test]
    fn test_webhook_target_configured() {
        assert!(!WebhookTarget::default().is_configured());
        let target = WebhookTarget { id: "1".into(), token: String::new() };
        assert!(!target.is_configured());
    }

    #[test]
    fn test_load_from_file() {
        let dir = std::env::temp_dir().join(format!(
            "a3s-killfeed-test-{}-{}",
            std::process::id(),
            chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.json");
        std::fs::write(&path, r#"{"trackedIds": [1], "logLevel": "debug"}"#).unwrap();

        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.tracked_ids, vec![1]);
        assert_eq!(settings.log_level, "debug");

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_load_missing_file() {
        let err = Settings::load("/tmp/nonexistent-a3s-killfeed.json").unwrap_err();
        assert!(matches!(err, KillfeedError::Config(_)));
    }

    #[test]
    fn test_load_invalid_json() {
        let dir = std::env::temp_dir().join(format!("a3s-killfeed-bad-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = Settings::load(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
