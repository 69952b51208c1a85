use axum::{
    extract::Path,
    extract::State,
    extract::ws::{WebSocket, WebSocketUpgrade},
    response::IntoResponse,
};
use uuid::Uuid;

use crate::{
    api::ApiError, app_state::AppState, protocol::WebSocketConnection,
    service::handle_terminal_session, service::validate_terminal_id,
};

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    Path(terminal_id): Path<String>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    // reject bad ids before upgrading
    validate_terminal_id(&terminal_id)?;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, terminal_id, state)))
}

pub async fn handle_socket(socket: WebSocket, terminal_id: String, state: AppState) {
    let connection = WebSocketConnection::new(socket, format!("ws-{}", Uuid::new_v4()));
    handle_terminal_session(connection, terminal_id, state.manager.clone()).await;
}
