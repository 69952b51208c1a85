/// PTY (Pseudo Terminal) handling for webfiles terminals
/// This module provides a trait abstraction over pty processes, the persistent
/// session backend and the host adapter that chooses between them
mod backend;
mod host;
#[cfg(test)]
pub(crate) mod mock_pty;
mod portable_pty_impl;
mod pty_trait;

// Export all public types and traits
pub use backend::{SessionBackend, TmuxBackend};
pub use host::{HostKind, ProcessHandle, ProcessHost};
pub use portable_pty_impl::PortablePtyFactory;
pub use pty_trait::*;
