/// Terminal connection trait for abstracting the transport
use std::fmt::Debug;

use thiserror::Error;

/// 连接错误类型
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// WebSocket 错误
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// 连接已关闭
    #[error("Connection closed")]
    ConnectionClosed,
}

/// 连接结果类型
pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// Message-based, bidirectional connection of one terminal viewer
#[async_trait::async_trait]
pub trait TerminalConnection: Send + Debug {
    /// Send a text message over the connection
    async fn send_text(&mut self, message: &str) -> ConnectionResult<()>;

    /// Send a binary message over the connection
    async fn send_binary(&mut self, data: &[u8]) -> ConnectionResult<()>;

    /// Receive a message from the connection
    /// Returns None when the connection is closed
    async fn receive(&mut self) -> Option<ConnectionResult<TerminalMessage>>;

    /// Close the connection
    async fn close(&mut self) -> ConnectionResult<()>;

    /// Transport-level identifier, for logging
    fn id(&self) -> &str;
}

/// Terminal message types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalMessage {
    /// Text message
    Text(String),
    /// Binary message
    Binary(Vec<u8>),
    /// Ping message
    Ping(Vec<u8>),
    /// Pong message
    Pong,
    /// Close message
    Close,
}
