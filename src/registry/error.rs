/// Error types for the session registry
use std::path::PathBuf;

use thiserror::Error;

/// Registry error type. Every variant is a persistence failure of the backing document.
#[derive(Error, Debug)]
pub enum RegistryError {
    /// Document could not be read
    #[error("Failed to read terminal registry {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Document could not be written
    #[error("Failed to write terminal registry {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Document content is not a valid registry
    #[error("Corrupt terminal registry {path:?}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
