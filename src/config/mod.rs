/// Configuration module for webfiles_terminal
mod config;
mod config_loader;
mod error;
mod logging;

pub use self::config::*;
pub use config_loader::{ConfigLoader, ENV_PREFIX};
pub use error::ConfigError;
pub use logging::init_logging;
