/// Configuration file loader for webfiles_terminal
use std::path::{Path, PathBuf};

use config::{Config, Environment, File, Map};
use tracing::{debug, info};

use crate::config::{ConfigError, ServerConfig};

/// Prefix of environment variables that override file settings
pub const ENV_PREFIX: &str = "WEBFILES";

/// Configuration loader responsible for layering defaults, file and environment
pub struct ConfigLoader {
    env_source: Option<Map<String, String>>,
    overrides: Map<String, String>,
}

impl ConfigLoader {
    /// Create a new configuration loader reading the process environment
    pub fn new() -> Self {
        Self {
            env_source: None,
            overrides: Map::new(),
        }
    }

    /// Use a fixed set of variables instead of the process environment
    #[cfg(test)]
    pub fn with_env(env: Map<String, String>) -> Self {
        Self {
            env_source: Some(env),
            overrides: Map::new(),
        }
    }

    /// Set `key` above every other source, e.g. from a command line flag
    pub fn with_override(mut self, key: &str, value: impl Into<String>) -> Self {
        self.overrides.insert(key.to_string(), value.into());
        self
    }

    /// Load configuration. An explicit path must exist; the default path is optional.
    pub fn load_config(&self, config_path: Option<&Path>) -> Result<ServerConfig, ConfigError> {
        let (path, required) = match config_path {
            Some(path) => (path.to_path_buf(), true),
            None => (default_config_path(), false),
        };

        if required && !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }
        if path.exists() {
            info!("Loading configuration from file: {:?}", path);
        } else {
            debug!("No configuration file at {:?}, using defaults", path);
        }

        let mut builder = Config::builder()
            .add_source(File::from(path.as_path()).required(required))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .source(self.env_source.clone()),
            );
        for (key, value) in &self.overrides {
            builder = builder.set_override(key.as_str(), value.as_str())?;
        }
        let settings = builder.build()?;

        let config: ServerConfig = settings.try_deserialize()?;
        validate(config)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn validate(mut config: ServerConfig) -> Result<ServerConfig, ConfigError> {
    if !config.home.is_absolute() {
        return Err(ConfigError::InvalidStructure(format!(
            "home must be an absolute path, got {:?}",
            config.home
        )));
    }
    // Symlinked homes are compared against canonical candidate paths later on
    config.home = std::fs::canonicalize(&config.home).map_err(|e| {
        ConfigError::InvalidStructure(format!("home {:?} is not accessible: {}", config.home, e))
    })?;

    if config.backend.probe_timeout_ms == 0 {
        return Err(ConfigError::InvalidStructure(
            "backend.probe_timeout_ms must be greater than zero".to_string(),
        ));
    }
    if config.transport.outbound_queue == 0 {
        return Err(ConfigError::InvalidStructure(
            "transport.outbound_queue must be greater than zero".to_string(),
        ));
    }
    if config.shell.size.columns == 0 || config.shell.size.rows == 0 {
        return Err(ConfigError::InvalidStructure(
            "shell.size must be at least 1x1".to_string(),
        ));
    }

    Ok(config)
}

/// Default configuration path: config.toml in the working directory
pub fn default_config_path() -> PathBuf {
    std::env::current_dir()
        .map(|dir| dir.join("config.toml"))
        .unwrap_or_else(|_| PathBuf::from("config.toml"))
}
