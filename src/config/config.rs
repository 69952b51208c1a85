/// Configuration data structures for webfiles_terminal
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Server configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the HTTP server binds to
    pub host: String,

    /// HTTP port (WEBFILES_PORT)
    pub port: u16,

    /// Permitted root for terminal working directories (WEBFILES_HOME)
    pub home: PathBuf,

    /// JSON document holding terminal metadata
    pub registry_file: PathBuf,

    pub auth: AuthConfig,

    pub backend: BackendConfig,

    pub shell: ShellConfig,

    pub transport: TransportConfig,

    pub log: LogConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8765,
            home: dirs::home_dir().unwrap_or_else(|| PathBuf::from("/")),
            registry_file: PathBuf::from("terminals.json"),
            auth: AuthConfig::default(),
            backend: BackendConfig::default(),
            shell: ShellConfig::default(),
            transport: TransportConfig::default(),
            log: LogConfig::default(),
        }
    }
}

/// Authentication gate configuration
#[derive(Debug, Default, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct AuthConfig {
    /// Shared secret required on every /api and /ws request. None leaves the gate open.
    pub token: Option<String>,
}

/// Persistent-session backend (tmux) configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct BackendConfig {
    /// Probe for and use the backend at all
    pub enabled: bool,

    /// Backend executable
    pub program: String,

    /// Prefix prepended to terminal ids to form backend session names
    pub session_prefix: String,

    /// Upper bound for a single backend invocation, in milliseconds
    pub probe_timeout_ms: u64,
}

impl BackendConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            program: "tmux".to_string(),
            session_prefix: "webfiles-".to_string(),
            probe_timeout_ms: 2000,
        }
    }
}

/// Terminal size configuration
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
pub struct TerminalSize {
    /// Number of columns
    pub columns: u16,

    /// Number of rows
    pub rows: u16,
}

impl Default for TerminalSize {
    fn default() -> Self {
        Self {
            columns: 80,
            rows: 24,
        }
    }
}

/// Shell used for ephemeral terminals
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ShellConfig {
    /// Command and arguments
    pub command: Vec<String>,

    /// Initial terminal size
    pub size: TerminalSize,

    /// Extra environment variables
    pub environment: HashMap<String, String>,
}

impl ShellConfig {
    /// Split the command into program and arguments
    pub fn program_and_args(&self) -> (String, Vec<String>) {
        match self.command.split_first() {
            Some((program, args)) => (program.clone(), args.to_vec()),
            None => (default_shell(), Vec::new()),
        }
    }
}

impl Default for ShellConfig {
    fn default() -> Self {
        let mut environment = HashMap::new();
        environment.insert("TERM".to_string(), "xterm-256color".to_string());
        environment.insert("COLORTERM".to_string(), "truecolor".to_string());

        Self {
            command: vec![default_shell()],
            size: TerminalSize::default(),
            environment,
        }
    }
}

fn default_shell() -> String {
    std::env::var("SHELL")
        .ok()
        .filter(|shell| !shell.is_empty())
        .unwrap_or_else(|| "bash".to_string())
}

/// Transport tuning
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct TransportConfig {
    /// Outbound chunks buffered per connection before output is dropped for that viewer
    pub outbound_queue: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            outbound_queue: 256,
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter directive, overridden by RUST_LOG
    pub level: String,

    /// Emit JSON lines instead of human readable output
    pub json: bool,

    /// Also write a daily rolling log file into this directory
    pub directory: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            directory: None,
        }
    }
}
