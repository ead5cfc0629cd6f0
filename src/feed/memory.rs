//! Scripted feed connector
//!
//! Each call to `connect` consumes the next scripted attempt. Once the script
//! runs out every dial is refused.

use super::{FeedConnection, FeedConnector};
use crate::error::{KillfeedError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::Instant;

enum Attempt {
    Fail(KillfeedError),
    Hang,
    Accept { frames: Vec<Bytes>, end: End },
}

/// What an accepted connection does after its scripted frames
enum End {
    Close,
    Hold,
    Error(String),
}

/// In-memory `FeedConnector` for tests and dry runs
#[derive(Default)]
pub struct MemoryConnector {
    script: Mutex<VecDeque<Attempt>>,
    dials: Mutex<Vec<Instant>>,
    subscriptions: Arc<Mutex<Vec<String>>>,
    frames_read: Arc<AtomicUsize>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next dial fails with a connection error
    pub fn refuse(self, reason: impl Into<String>) -> Self {
        self.push(Attempt::Fail(KillfeedError::Connection(reason.into())));
        self
    }

    /// Next dial fails with `error`
    pub fn fail(self, error: KillfeedError) -> Self {
        self.push(Attempt::Fail(error));
        self
    }

    /// Next dial never completes
    pub fn hang(self) -> Self {
        self.push(Attempt::Hang);
        self
    }

    /// Next dial succeeds, yields `frames`, then the server closes
    pub fn accept(self, frames: Vec<Bytes>) -> Self {
        self.push(Attempt::Accept { frames, end: End::Close });
        self
    }

    /// Next dial succeeds, yields `frames`, then the read fails
    pub fn accept_then_fail(self, frames: Vec<Bytes>, reason: impl Into<String>) -> Self {
        self.push(Attempt::Accept { frames, end: End::Error(reason.into()) });
        self
    }

    /// Next dial succeeds, yields `frames`, then stays open and idle
    pub fn accept_and_hold(self, frames: Vec<Bytes>) -> Self {
        self.push(Attempt::Accept { frames, end: End::Hold });
        self
    }

    /// When each dial happened, oldest first
    pub fn dials(&self) -> Vec<Instant> {
        self.dials.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Frames handed to the subscriber, across all connections
    pub fn frames_read(&self) -> usize {
        self.frames_read.load(Ordering::SeqCst)
    }

    /// Channels subscribed to, across all connections
    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn push(&self, attempt: Attempt) {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(attempt);
    }
}

#[async_trait]
impl FeedConnector for MemoryConnector {
    async fn connect(&self) -> Result<Box<dyn FeedConnection>> {
        self.dials
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Instant::now());

        let attempt = self
            .script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();

        match attempt {
            Some(Attempt::Accept { frames, end }) => Ok(Box::new(MemoryConnection {
                frames: frames.into(),
                end,
                subscriptions: Arc::clone(&self.subscriptions),
                frames_read: Arc::clone(&self.frames_read),
            })),
            Some(Attempt::Hang) => std::future::pending().await,
            Some(Attempt::Fail(error)) => Err(error),
            None => Err(KillfeedError::Connection("no scripted connection left".into())),
        }
    }

    fn name(&self) -> &str {
        "memory"
    }
}

struct MemoryConnection {
    frames: VecDeque<Bytes>,
    end: End,
    subscriptions: Arc<Mutex<Vec<String>>>,
    frames_read: Arc<AtomicUsize>,
}

#[async_trait]
impl FeedConnection for MemoryConnection {
    async fn subscribe(&mut self, channel: &str) -> Result<()> {
        self.subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(channel.to_string());
        Ok(())
    }

    async fn next_frame(&mut self) -> Result<Option<Bytes>> {
        if let Some(frame) = self.frames.pop_front() {
            self.frames_read.fetch_add(1, Ordering::SeqCst);
            return Ok(Some(frame));
        }
        match &self.end {
            End::Close => Ok(None),
            End::Hold => std::future::pending().await,
            End::Error(reason) => Err(KillfeedError::Connection(reason.clone())),
        }
    }
}
