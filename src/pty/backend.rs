/// Persistent-session backend: an external multiplexer that keeps shells alive
/// between viewers. The production implementation drives tmux as a subprocess.
use std::collections::HashSet;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::{BackendConfig, TerminalSize};

#[derive(Debug, Error)]
pub enum BackendError {
    /// The backend tool cannot be invoked at all
    #[error("Session backend unavailable: {0}")]
    Unavailable(String),

    /// The backend did not answer within the probe timeout
    #[error("Session backend timed out after {0:?}")]
    Timeout(Duration),

    /// The backend ran but reported a failure
    #[error("Session backend command failed: {0}")]
    CommandFailed(String),
}

/// Program and arguments that attach a pty to an existing backend session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachCommand {
    pub program: String,
    pub args: Vec<String>,
}

#[async_trait]
pub trait SessionBackend: Send + Sync {
    /// Names of every live backend session
    async fn list_sessions(&self) -> Result<HashSet<String>, BackendError>;

    async fn has_session(&self, name: &str) -> Result<bool, BackendError>;

    /// Create `name` rooted at `cwd` unless it already exists
    async fn ensure_session(
        &self,
        name: &str,
        cwd: &Path,
        size: TerminalSize,
    ) -> Result<(), BackendError>;

    async fn kill_session(&self, name: &str) -> Result<(), BackendError>;

    fn attach_command(&self, name: &str) -> AttachCommand;

    fn name(&self) -> &'static str;
}

/// tmux driven through its command line interface
#[derive(Debug, Clone)]
pub struct TmuxBackend {
    program: String,
    timeout: Duration,
}

struct CommandOutput {
    success: bool,
    stdout: String,
    stderr: String,
}

impl TmuxBackend {
    pub fn new(config: &BackendConfig) -> Self {
        Self {
            program: config.program.clone(),
            timeout: config.probe_timeout(),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<CommandOutput, BackendError> {
        debug!("Running backend command: {} {:?}", self.program, args);

        let child = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BackendError::Unavailable(format!("{}: {}", self.program, e)))?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| BackendError::Timeout(self.timeout))?
            .map_err(|e| BackendError::Unavailable(e.to_string()))?;

        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

/// `=name` makes tmux match the session name exactly instead of by prefix
fn exact_target(name: &str) -> String {
    format!("={}", name)
}

/// tmux exits non-zero from list/has when no server is running
fn is_no_server(stderr: &str) -> bool {
    stderr.contains("no server running")
        || stderr.contains("error connecting to")
        || stderr.contains("No such file or directory")
}

fn parse_session_list(stdout: &str) -> HashSet<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl SessionBackend for TmuxBackend {
    async fn list_sessions(&self) -> Result<HashSet<String>, BackendError> {
        let output = self
            .run(&["list-sessions", "-F", "#{session_name}"])
            .await?;

        if output.success {
            Ok(parse_session_list(&output.stdout))
        } else if is_no_server(&output.stderr) {
            Ok(HashSet::new())
        } else {
            Err(BackendError::CommandFailed(output.stderr))
        }
    }

    async fn has_session(&self, name: &str) -> Result<bool, BackendError> {
        let target = exact_target(name);
        let output = self.run(&["has-session", "-t", target.as_str()]).await?;

        if output.success {
            Ok(true)
        } else if is_no_server(&output.stderr)
            || output.stderr.contains("can't find session")
            || output.stderr.is_empty()
        {
            Ok(false)
        } else {
            Err(BackendError::CommandFailed(output.stderr))
        }
    }

    async fn ensure_session(
        &self,
        name: &str,
        cwd: &Path,
        size: TerminalSize,
    ) -> Result<(), BackendError> {
        if self.has_session(name).await? {
            debug!("Backend session {} already exists", name);
            return Ok(());
        }

        let cwd = cwd.to_string_lossy().into_owned();
        let cols = size.columns.to_string();
        let rows = size.rows.to_string();
        let output = self
            .run(&[
                "new-session",
                "-d",
                "-s",
                name,
                "-c",
                cwd.as_str(),
                "-x",
                cols.as_str(),
                "-y",
                rows.as_str(),
            ])
            .await?;

        if output.success {
            info!("Created backend session {} in {}", name, cwd);
            Ok(())
        } else if output.stderr.contains("duplicate session") {
            // lost a race with a concurrent create
            Ok(())
        } else {
            Err(BackendError::CommandFailed(output.stderr))
        }
    }

    async fn kill_session(&self, name: &str) -> Result<(), BackendError> {
        let target = exact_target(name);
        let output = self
            .run(&["kill-session", "-t", target.as_str()])
            .await?;

        if output.success {
            info!("Killed backend session {}", name);
            Ok(())
        } else if is_no_server(&output.stderr) || output.stderr.contains("can't find session") {
            debug!("Backend session {} was already gone", name);
            Ok(())
        } else {
            warn!("Failed to kill backend session {}: {}", name, output.stderr);
            Err(BackendError::CommandFailed(output.stderr))
        }
    }

    fn attach_command(&self, name: &str) -> AttachCommand {
        AttachCommand {
            program: self.program.clone(),
            args: vec![
                "attach-session".to_string(),
                "-t".to_string(),
                exact_target(name),
            ],
        }
    }

    fn name(&self) -> &'static str {
        "tmux"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(program: &str) -> TmuxBackend {
        TmuxBackend::new(&BackendConfig {
            enabled: true,
            program: program.to_string(),
            session_prefix: "webfiles-".to_string(),
            probe_timeout_ms: 500,
        })
    }

    #[test]
    fn session_list_ignores_blank_lines() {
        let sessions = parse_session_list("webfiles-a\n\n  webfiles-b  \nother\n");
        assert_eq!(sessions.len(), 3);
        assert!(sessions.contains("webfiles-b"));
    }

    #[test]
    fn attach_targets_the_exact_session() {
        let attach = backend("tmux").attach_command("webfiles-x");
        assert_eq!(attach.program, "tmux");
        assert_eq!(attach.args, vec!["attach-session", "-t", "=webfiles-x"]);
    }

    #[tokio::test]
    async fn missing_binary_is_unavailable() {
        let backend = backend("webfiles-no-such-multiplexer");

        assert!(matches!(
            backend.list_sessions().await,
            Err(BackendError::Unavailable(_))
        ));
        assert!(matches!(
            backend
                .ensure_session("webfiles-x", Path::new("/"), TerminalSize::default())
                .await,
            Err(BackendError::Unavailable(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn hanging_backend_times_out() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("hang.sh");
        std::fs::write(&script, "#!/bin/sh\nsleep 5\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let backend = backend(script.to_str().unwrap());
        assert!(matches!(
            backend.list_sessions().await,
            Err(BackendError::Timeout(_))
        ));
    }
}
