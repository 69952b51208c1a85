/// Session registry: durable terminal id -> metadata mapping
mod error;
mod registry;

pub use error::RegistryError;
pub use registry::{SessionRegistry, TerminalRecord};
