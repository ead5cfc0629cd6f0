//! Error types for a3s-killfeed

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur in the killfeed pipeline
#[derive(Debug, Error)]
pub enum KillfeedError {
    /// Feed transport failure (dial, subscribe, or read)
    #[error("Connection error: {0}")]
    Connection(String),

    /// Malformed inbound frame
    #[error("Parse error: {0}")]
    Parse(String),

    /// A single detail-provider call failed
    #[error("Lookup of {what} failed: {reason}")]
    Lookup {
        what: String,
        reason: String,
    },

    /// Invalid configuration or missing destination credentials
    #[error("Configuration error: {0}")]
    Config(String),

    /// A notification sink rejected a send
    #[error("Failed to dispatch to channel '{channel}': {reason}")]
    Dispatch {
        channel: String,
        reason: String,
    },

    /// Outbound call exceeded its deadline
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl KillfeedError {
    /// Build a lookup error from anything displayable
    pub fn lookup(what: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Lookup {
            what: what.into(),
            reason: reason.to_string(),
        }
    }

    /// Transport-level failures the feed subscriber retries after a delay
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Timeout(_))
    }
}

/// Result type alias for killfeed operations
pub type Result<T> = std::result::Result<T, KillfeedError>;

/// Bound an outbound call by `timeout`
pub(crate) async fn timed<T>(
    timeout: Duration,
    what: &str,
    fut: impl std::future::Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| KillfeedError::Timeout(format!("{} after {:?}", what, timeout)))?
}
