/// WebSocket connection implementation for TerminalConnection trait
use std::fmt::Debug;

use axum::extract::ws::Message::{Binary, Close, Ping, Pong, Text};
use axum::extract::ws::WebSocket;
use futures_util::StreamExt;
use tracing::{debug, warn};

use crate::protocol::{ConnectionError, ConnectionResult, TerminalConnection, TerminalMessage};

/// WebSocket connection implementation that implements TerminalConnection trait
pub struct WebSocketConnection {
    socket: WebSocket,
    id: String,
    closed: bool,
}

impl WebSocketConnection {
    pub fn new(socket: WebSocket, id: impl Into<String>) -> Self {
        Self {
            socket,
            id: id.into(),
            closed: false,
        }
    }
}

impl Debug for WebSocketConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketConnection")
            .field("id", &self.id)
            .field("closed", &self.closed)
            .finish()
    }
}

#[async_trait::async_trait]
impl TerminalConnection for WebSocketConnection {
    async fn send_text(&mut self, message: &str) -> ConnectionResult<()> {
        if self.closed {
            return Err(ConnectionError::ConnectionClosed);
        }
        self.socket
            .send(Text(message.to_string()))
            .await
            .map_err(|e| ConnectionError::WebSocket(e.to_string()))
    }

    async fn send_binary(&mut self, data: &[u8]) -> ConnectionResult<()> {
        if self.closed {
            return Err(ConnectionError::ConnectionClosed);
        }
        self.socket
            .send(Binary(data.to_vec()))
            .await
            .map_err(|e| ConnectionError::WebSocket(e.to_string()))
    }

    async fn receive(&mut self) -> Option<ConnectionResult<TerminalMessage>> {
        match self.socket.next().await {
            Some(Ok(Text(text))) => Some(Ok(TerminalMessage::Text(text))),
            Some(Ok(Binary(bin))) => {
                debug!("WebSocket {} received {} binary bytes", self.id, bin.len());
                Some(Ok(TerminalMessage::Binary(bin)))
            }
            Some(Ok(Ping(ping))) => Some(Ok(TerminalMessage::Ping(ping))),
            Some(Ok(Pong(_))) => Some(Ok(TerminalMessage::Pong)),
            Some(Ok(Close(_))) => {
                debug!("WebSocket {} received close message", self.id);
                self.closed = true;
                Some(Ok(TerminalMessage::Close))
            }
            Some(Err(e)) => {
                warn!("WebSocket {} receive error: {}", self.id, e);
                Some(Err(ConnectionError::WebSocket(e.to_string())))
            }
            None => {
                self.closed = true;
                None
            }
        }
    }

    async fn close(&mut self) -> ConnectionResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.socket
            .send(Close(None))
            .await
            .map_err(|e| ConnectionError::WebSocket(e.to_string()))
    }

    fn id(&self) -> &str {
        &self.id
    }
}
