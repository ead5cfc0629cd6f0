//! WebSocket feed connector (zKillboard killstream)

use super::{FeedConnection, FeedConnector};
use crate::error::{KillfeedError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// Dials a WebSocket killstream
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl FeedConnector for WsConnector {
    async fn connect(&self) -> Result<Box<dyn FeedConnection>> {
        let (socket, response) = connect_async(self.url.as_str()).await.map_err(|e| match e {
            WsError::Url(e) => KillfeedError::Config(format!("feed url {}: {}", self.url, e)),
            e => KillfeedError::Connection(format!("dial {}: {}", self.url, e)),
        })?;

        tracing::info!(url = %self.url, status = %response.status(), "Connected to feed");
        Ok(Box::new(WsConnection { socket }))
    }

    fn name(&self) -> &str {
        "websocket"
    }
}

#[derive(Serialize)]
struct SubscribeRequest<'a> {
    action: &'a str,
    channel: &'a str,
}

struct WsConnection {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl FeedConnection for WsConnection {
    async fn subscribe(&mut self, channel: &str) -> Result<()> {
        let request = serde_json::to_string(&SubscribeRequest { action: "sub", channel })?;
        self.socket
            .send(Message::Text(request))
            .await
            .map_err(|e| KillfeedError::Connection(format!("subscribe to {}: {}", channel, e)))
    }

    async fn next_frame(&mut self) -> Result<Option<Bytes>> {
        while let Some(message) = self.socket.next().await {
            match message {
                Ok(Message::Text(text)) => return Ok(Some(Bytes::from(text))),
                Ok(Message::Binary(data)) => return Ok(Some(Bytes::from(data))),
                Ok(Message::Close(frame)) => {
                    tracing::debug!(frame = ?frame, "Feed sent close frame");
                    return Ok(None);
                }
                Ok(_) => continue,
                Err(e) => return Err(KillfeedError::Connection(format!("read: {}", e))),
            }
        }
        Ok(None)
    }
}
