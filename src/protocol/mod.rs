/// Transport abstraction for terminal viewers
mod connection;
mod messages;
mod websocket_connection;

pub use connection::{ConnectionError, ConnectionResult, TerminalConnection, TerminalMessage};
pub use messages::{ClientMessage, error_notice, output_frame};
pub use websocket_connection::WebSocketConnection;
