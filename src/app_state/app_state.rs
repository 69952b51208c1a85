use std::sync::Arc;

use crate::config::ServerConfig;
use crate::service::TerminalManager;

/// Application state containing shared data across handlers
#[derive(Clone)]
pub struct AppState {
    /// Owner of every terminal's lifecycle
    pub manager: Arc<TerminalManager>,
    /// Application configuration
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(manager: Arc<TerminalManager>, config: ServerConfig) -> Self {
        Self {
            manager,
            config: Arc::new(config),
        }
    }

    /// Token every /api and /ws request must present, if configured
    pub fn auth_token(&self) -> Option<&str> {
        self.config
            .auth
            .token
            .as_deref()
            .filter(|token| !token.is_empty())
    }
}
