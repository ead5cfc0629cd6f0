//! Discord webhook sink

use super::NotificationSink;
use crate::composer::Embed;
use crate::config::WebhookTarget;
use crate::error::{KillfeedError, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

const DISCORD_WEBHOOK_BASE: &str = "https://discord.com/api/webhooks";

#[derive(Debug, Serialize)]
struct WebhookBody<'a> {
    #[serde(skip_serializing_if = "str::is_empty")]
    content: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    embeds: Vec<DiscordEmbed<'a>>,
}

#[derive(Debug, Serialize)]
struct UrlField<'a> {
    url: &'a str,
}

#[derive(Debug, Serialize)]
struct TextField<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct DiscordEmbed<'a> {
    title: &'a str,
    description: &'a str,
    url: &'a str,
    color: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    thumbnail: Option<UrlField<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    author: Option<&'a crate::composer::EmbedAuthor>,
    footer: TextField<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp: Option<&'a str>,
}

impl<'a> From<&'a Embed> for DiscordEmbed<'a> {
    fn from(embed: &'a Embed) -> Self {
        Self {
            title: &embed.title,
            description: &embed.description,
            url: &embed.url,
            color: embed.color,
            thumbnail: embed.thumbnail.as_deref().map(|url| UrlField { url }),
            author: embed.author.as_ref(),
            footer: TextField { text: &embed.footer },
            timestamp: embed.timestamp.as_deref(),
        }
    }
}

/// Posts notifications to Discord webhooks
pub struct DiscordSink {
    client: reqwest::Client,
    base_url: String,
}

impl DiscordSink {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| KillfeedError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: DISCORD_WEBHOOK_BASE.to_string(),
        })
    }

    /// Override the webhook base URL (for proxies and local testing)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn webhook_url(&self, target: &WebhookTarget) -> String {
        format!("{}/{}/{}", self.base_url, target.id, target.token)
    }
}

fn webhook_body<'a>(text: &'a str, embed: Option<&'a Embed>) -> WebhookBody<'a> {
    WebhookBody {
        content: text,
        embeds: embed.map(DiscordEmbed::from).into_iter().collect(),
    }
}

#[async_trait]
impl NotificationSink for DiscordSink {
    async fn send(&self, target: &WebhookTarget, text: &str, embed: Option<&Embed>) -> Result<()> {
        if !target.is_configured() {
            return Err(KillfeedError::Config(
                "discord webhook not configured (id/token missing)".into(),
            ));
        }

        let body = webhook_body(text, embed);
        let response = self
            .client
            .post(self.webhook_url(target))
            .json(&body)
            .send()
            .await
            .map_err(|e| KillfeedError::Dispatch {
                channel: target.id.clone(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(KillfeedError::Dispatch {
                channel: target.id.clone(),
                reason: format!("discord webhook returned {}", response.status()),
            });
        }

        tracing::debug!(webhook = %target.id, has_embed = embed.is_some(), "Webhook delivered");
        Ok(())
    }

    fn name(&self) -> &str {
        "discord"
    }
}
