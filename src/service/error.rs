/// Error types for the service layer
use thiserror::Error;

use crate::pty::PtyError;
use crate::registry::RegistryError;

/// Service layer error type
#[derive(Error, Debug)]
pub enum ServiceError {
    /// Id is empty, too long or uses characters outside `[A-Za-z0-9_-]`
    #[error("Invalid terminal id: {0:?}")]
    InvalidTerminalId(String),

    /// Display name is empty after trimming
    #[error("Terminal name must not be empty")]
    InvalidName,

    /// Neither a record, a backend session nor a live process exists
    #[error("Unknown terminal: {0}")]
    UnknownTerminal(String),

    /// Registry document could not be written
    #[error(transparent)]
    Persistence(#[from] RegistryError),

    /// No process could be started for the terminal
    #[error("Failed to start terminal process: {0}")]
    Spawn(#[from] PtyError),
}
