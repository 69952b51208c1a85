/// Message handler for processing terminal messages
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::protocol::{
    ClientMessage, ConnectionResult, TerminalConnection, TerminalMessage, output_frame,
};
use crate::service::TerminalManager;

/// Translates viewer messages into terminal operations for one connection
pub struct MessageHandler {
    manager: Arc<TerminalManager>,
    terminal_id: String,
}

impl MessageHandler {
    pub fn new(manager: Arc<TerminalManager>, terminal_id: impl Into<String>) -> Self {
        Self {
            manager,
            terminal_id: terminal_id.into(),
        }
    }

    /// Handle a terminal message. Returns true when the connection should close.
    pub async fn handle_message(&self, message: TerminalMessage) -> bool {
        match message {
            TerminalMessage::Text(text) => {
                if let Some(message) = ClientMessage::from_text(&text) {
                    self.handle_client_message(message).await;
                }
                false
            }
            TerminalMessage::Binary(bin) => {
                self.manager.route_input(&self.terminal_id, &bin).await;
                false
            }
            TerminalMessage::Ping(_) | TerminalMessage::Pong => {
                // the websocket layer answers pings itself
                false
            }
            TerminalMessage::Close => {
                info!(
                    "Viewer of terminal {} sent a close message",
                    self.terminal_id
                );
                true
            }
        }
    }

    async fn handle_client_message(&self, message: ClientMessage) {
        match message {
            ClientMessage::Input { data } => {
                self.manager
                    .route_input(&self.terminal_id, data.as_bytes())
                    .await;
            }
            ClientMessage::Resize { cols, rows } => {
                debug!(
                    "Resizing terminal {} to {}x{}",
                    self.terminal_id, cols, rows
                );
                if let Err(e) = self.manager.resize(&self.terminal_id, rows, cols).await {
                    warn!("Failed to resize terminal {}: {}", self.terminal_id, e);
                }
            }
        }
    }

    /// Forward one chunk of process output to the viewer
    pub async fn handle_pty_output(
        &self,
        data: &[u8],
        connection: &mut impl TerminalConnection,
    ) -> ConnectionResult<()> {
        match output_frame(data) {
            TerminalMessage::Text(text) => connection.send_text(&text).await,
            _ => connection.send_binary(data).await,
        }
    }
}
