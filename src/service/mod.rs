/// Service layer for terminal session management
/// The terminal manager owns lifecycles, the hub fans output out to viewers
/// and the session handler serves one viewer connection
mod error;
mod hub;
mod message_handler;
mod session_handler;
mod terminal_manager;
mod workdir;

// Re-export public types and functions
pub use error::ServiceError;
pub use message_handler::MessageHandler;
pub use session_handler::handle_terminal_session;
pub use terminal_manager::{
    Attachment, CreateTerminal, CreatedTerminal, TerminalDetail, TerminalManager, TerminalState,
    validate_terminal_id,
};
pub use workdir::WorkdirPolicy;
