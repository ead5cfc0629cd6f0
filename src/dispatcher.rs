//! Notification dispatch
//!
//! Routes composed notifications to the webhook configured for their
//! channel. Delivery is at-most-once: a failed send is reported to the
//! caller and never retried.

use crate::composer::{Channel, Notification};
use crate::config::{WebhookSettings, WebhookTarget};
use crate::error::{timed, KillfeedError, Result};
use crate::provider::NotificationSink;
use std::sync::Arc;
use std::time::Duration;

/// Sends notifications through a `NotificationSink`
#[derive(Clone)]
pub struct Dispatcher {
    sink: Arc<dyn NotificationSink>,
    webhooks: WebhookSettings,
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(sink: Arc<dyn NotificationSink>, webhooks: WebhookSettings, timeout: Duration) -> Self {
        Self { sink, webhooks, timeout }
    }

    /// Destination for a channel, if configured
    pub fn target(&self, channel: Channel) -> Option<&WebhookTarget> {
        let target = match channel {
            Channel::Killmail => self.webhooks.killmail.as_ref(),
            Channel::Chain => self.webhooks.chain.as_ref(),
            Channel::Info => self.webhooks.info.as_ref(),
        };
        target.filter(|t| t.is_configured())
    }

    /// Send one notification
    ///
    /// Fails with `Config` when the channel has no destination, or with the
    /// sink's error when delivery fails.
    pub async fn dispatch(&self, notification: &Notification) -> Result<()> {
        let channel = notification.channel;
        let target = self.target(channel).ok_or_else(|| {
            KillfeedError::Config(format!("no webhook configured for {} channel", channel.as_str()))
        })?;

        timed(
            self.timeout,
            "notification dispatch",
            self.sink
                .send(target, &notification.text, notification.embed.as_ref()),
        )
        .await?;

        tracing::debug!(channel = channel.as_str(), sink = self.sink.name(), "Notification dispatched");
        Ok(())
    }

    /// Send and log the outcome; returns whether delivery succeeded
    pub async fn deliver(&self, notification: &Notification) -> bool {
        match self.dispatch(notification).await {
            Ok(()) => true,
            Err(e @ KillfeedError::Config(_)) => {
                tracing::warn!(channel = notification.channel.as_str(), error = %e, "Dispatch skipped");
                false
            }
            Err(e) => {
                tracing::error!(channel = notification.channel.as_str(), error = %e, "Dispatch failed");
                false
            }
        }
    }

    /// Post a plain status message to the info channel
    pub async fn info(&self, text: impl Into<String>) -> bool {
        let notification = Notification::info(text);
        tracing::info!(text = %notification.text, "Sending info message");
        self.deliver(&notification).await
    }
}
