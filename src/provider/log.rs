//! Log-only notification sink for dry runs
//!
//! Every notification is written to the tracing log and then forgotten, so a
//! long-running dry run holds no delivery history.

use crate::composer::Embed;
use crate::config::WebhookTarget;
use crate::error::Result;
use crate::provider::NotificationSink;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct LogSink {
    sent: AtomicU64,
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Notifications logged so far
    pub fn count(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl NotificationSink for LogSink {
    async fn send(&self, target: &WebhookTarget, text: &str, embed: Option<&Embed>) -> Result<()> {
        let seq = self.sent.fetch_add(1, Ordering::Relaxed) + 1;
        match embed {
            Some(embed) => tracing::info!(
                seq,
                webhook = %target.id,
                text,
                title = %embed.title,
                url = %embed.url,
                footer = %embed.footer,
                "Dry run notification"
            ),
            None => tracing::info!(seq, webhook = %target.id, text, "Dry run notification"),
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_log_sink_counts_without_storing() {
        let sink = LogSink::new();
        let target = WebhookTarget { id: "info".into(), token: "t".into() };

        for _ in 0..3 {
            sink.send(&target, "zkill socket opened.", None).await.unwrap();
        }
        assert_eq!(sink.count(), 3);
        assert_eq!(sink.name(), "log");
    }
}
