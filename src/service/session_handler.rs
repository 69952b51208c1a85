/// Terminal session handler for processing terminal connections
use std::sync::Arc;

use tokio::select;
use tracing::{debug, error, info, warn};

use crate::protocol::{TerminalConnection, error_notice};
use crate::service::{Attachment, MessageHandler, TerminalManager};

/// Serve one viewer of `terminal_id` until either side closes
pub async fn handle_terminal_session(
    mut connection: impl TerminalConnection,
    terminal_id: String,
    manager: Arc<TerminalManager>,
) {
    info!(
        "New terminal connection {} for terminal {}",
        connection.id(),
        terminal_id
    );

    let Attachment {
        connection: handle,
        mut outbound,
        persistent,
    } = match manager.on_transport_connect(&terminal_id).await {
        Ok(attachment) => attachment,
        Err(e) => {
            error!("Failed to open terminal {}: {}", terminal_id, e);
            let _ = connection.send_text(&error_notice(&e.to_string())).await;
            let _ = connection.close().await;
            return;
        }
    };
    debug!(
        "Connection {} registered as {} (persistent: {})",
        connection.id(),
        handle.id(),
        persistent
    );

    let closed = handle.closed().clone();
    let handler = MessageHandler::new(manager.clone(), terminal_id.clone());

    loop {
        select! {
            biased;

            _ = closed.cancelled() => {
                // deliver what was queued before the close, e.g. the exit notice
                let mut pending = Vec::new();
                while let Ok(chunk) = outbound.try_recv() {
                    pending.push(chunk);
                }
                pending.extend(handle.take_farewell());
                for chunk in pending {
                    if handler.handle_pty_output(&chunk, &mut connection).await.is_err() {
                        break;
                    }
                }
                info!("Terminal {} closed connection {}", terminal_id, handle.id());
                break;
            }

            chunk = outbound.recv() => {
                let Some(chunk) = chunk else {
                    break;
                };
                if let Err(e) = handler.handle_pty_output(&chunk, &mut connection).await {
                    warn!("Failed to send output to connection {}: {}", handle.id(), e);
                    break;
                }
            }

            message = connection.receive() => {
                match message {
                    Some(Ok(message)) => {
                        if handler.handle_message(message).await {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        warn!("Connection {} failed: {}", handle.id(), e);
                        break;
                    }
                    None => {
                        info!("Connection {} closed by client", handle.id());
                        break;
                    }
                }
            }
        }
    }

    manager
        .on_transport_disconnect(&terminal_id, handle.id())
        .await;
    if let Err(e) = connection.close().await {
        debug!("Failed to close connection {}: {}", handle.id(), e);
    }
}
