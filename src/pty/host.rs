/// Process host adapter: attaches to a persistent backend session when one
/// exists, otherwise spawns an ephemeral shell.
use std::collections::HashSet;
use std::future::Future;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::{BackendConfig, ShellConfig, TerminalSize};
use crate::pty::backend::{BackendError, SessionBackend};
use crate::pty::pty_trait::{
    AsyncPty, PtyConfig, PtyError, PtyFactory, PtyOutput, SpawnedPty,
};

/// How a process is hosted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostKind {
    /// A client attached to a backend session that outlives it
    Persistent { session: String },
    /// A plain shell that dies with its last viewer
    Ephemeral,
}

/// A live pty process backing one terminal
pub struct ProcessHandle {
    terminal_id: String,
    kind: HostKind,
    pty: Box<dyn AsyncPty>,
    size: Mutex<TerminalSize>,
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("terminal_id", &self.terminal_id)
            .field("kind", &self.kind)
            .field("pid", &self.pty.pid())
            .finish()
    }
}

impl ProcessHandle {
    pub fn new(
        terminal_id: impl Into<String>,
        kind: HostKind,
        pty: Box<dyn AsyncPty>,
        size: TerminalSize,
    ) -> Self {
        Self {
            terminal_id: terminal_id.into(),
            kind,
            pty,
            size: Mutex::new(size),
        }
    }

    pub fn kind(&self) -> &HostKind {
        &self.kind
    }

    pub fn is_persistent(&self) -> bool {
        matches!(self.kind, HostKind::Persistent { .. })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pty.pid()
    }

    pub fn is_alive(&self) -> bool {
        self.pty.is_alive()
    }

    pub fn size(&self) -> TerminalSize {
        *self.size.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub async fn write(&self, data: &[u8]) -> Result<(), PtyError> {
        self.pty.write(data).await
    }

    /// Best effort: the process may already be gone
    pub async fn resize(&self, rows: u16, cols: u16) {
        if rows == 0 || cols == 0 {
            debug!(
                "Ignoring resize of terminal {} to {}x{}",
                self.terminal_id, cols, rows
            );
            return;
        }
        match self.pty.resize(cols, rows).await {
            Ok(()) => {
                *self.size.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) =
                    TerminalSize { columns: cols, rows };
            }
            Err(e) => warn!("Failed to resize terminal {}: {}", self.terminal_id, e),
        }
    }

    /// Best effort: the process may already be gone
    pub async fn kill(&self) {
        if let Err(e) = self.pty.kill().await {
            warn!(
                "Failed to kill process of terminal {}: {}",
                self.terminal_id, e
            );
        }
    }
}

/// Spawns and attaches processes for terminals
pub struct ProcessHost {
    factory: Arc<dyn PtyFactory>,
    backend: Option<Arc<dyn SessionBackend>>,
    session_prefix: String,
    probe_timeout: Duration,
    shell: ShellConfig,
}

impl ProcessHost {
    /// `backend` is None when persistent sessions are disabled
    pub fn new(
        factory: Arc<dyn PtyFactory>,
        backend: Option<Arc<dyn SessionBackend>>,
        backend_config: &BackendConfig,
        shell: ShellConfig,
    ) -> Self {
        info!(
            "Process host using {} ptys, persistent backend: {}",
            factory.name(),
            backend.as_ref().map(|b| b.name()).unwrap_or("disabled")
        );
        Self {
            factory,
            backend,
            session_prefix: backend_config.session_prefix.clone(),
            probe_timeout: backend_config.probe_timeout(),
            shell,
        }
    }

    /// Backend session name for a terminal id
    pub fn session_name(&self, terminal_id: &str) -> String {
        format!("{}{}", self.session_prefix, terminal_id)
    }

    /// Terminal id of a backend session, None for sessions we did not name
    pub fn terminal_id_of<'a>(&self, session: &'a str) -> Option<&'a str> {
        session
            .strip_prefix(self.session_prefix.as_str())
            .filter(|id| !id.is_empty())
    }

    /// Every live backend session; empty when the backend is unavailable
    pub async fn list_persistent_sessions(&self) -> HashSet<String> {
        let Some(backend) = &self.backend else {
            return HashSet::new();
        };
        match self.bounded(backend.list_sessions()).await {
            Ok(sessions) => sessions,
            Err(e) => {
                debug!("Treating backend as empty: {}", e);
                HashSet::new()
            }
        }
    }

    /// Idempotently create the backend session `name` rooted at `cwd`
    pub async fn ensure_persistent_session(
        &self,
        name: &str,
        cwd: &Path,
    ) -> Result<(), BackendError> {
        let backend = self.backend.as_ref().ok_or_else(|| {
            BackendError::Unavailable("persistent sessions disabled".to_string())
        })?;
        self.bounded(backend.ensure_session(name, cwd, self.shell.size))
            .await
    }

    /// Best effort removal of a backend session
    pub async fn kill_persistent_session(&self, name: &str) {
        let Some(backend) = &self.backend else {
            return;
        };
        if let Err(e) = self.bounded(backend.kill_session(name)).await {
            warn!("Failed to kill backend session {}: {}", name, e);
        }
    }

    /// Attach to the terminal's backend session if it exists, else spawn a shell in `cwd`.
    ///
    /// Only a failure to start the fallback shell is an error. A backend session
    /// that exists but cannot be attached is treated as absent.
    pub async fn attach_or_spawn(
        &self,
        terminal_id: &str,
        cwd: &Path,
    ) -> Result<(Arc<ProcessHandle>, PtyOutput), PtyError> {
        if let Some(backend) = &self.backend {
            let session = self.session_name(terminal_id);
            match self.bounded(backend.has_session(&session)).await {
                Ok(true) => {
                    let attach = backend.attach_command(&session);
                    let mut config = self.pty_config(attach.program, attach.args, cwd);
                    // tmux refuses to attach from inside another tmux client
                    config.env_remove.push("TMUX".to_string());
                    match self.factory.create(&config).await {
                        Ok(spawned) => {
                            info!(
                                "Attached terminal {} to backend session {}",
                                terminal_id, session
                            );
                            return Ok(self.into_handle(
                                terminal_id,
                                HostKind::Persistent { session },
                                spawned,
                            ));
                        }
                        Err(e) => warn!(
                            "Failed to attach to backend session {}, using a plain shell: {}",
                            session, e
                        ),
                    }
                }
                Ok(false) => debug!("No backend session for terminal {}", terminal_id),
                Err(e) => debug!("Backend probe failed for terminal {}: {}", terminal_id, e),
            }
        }

        let (program, args) = self.shell.program_and_args();
        let config = self.pty_config(program, args, cwd);
        let spawned = self.factory.create(&config).await.map_err(|e| match e {
            e @ PtyError::SpawnFailed(_) => e,
            other => PtyError::SpawnFailed(other.to_string()),
        })?;
        info!(
            "Spawned ephemeral shell {:?} for terminal {} in {:?}",
            config.command, terminal_id, cwd
        );
        Ok(self.into_handle(terminal_id, HostKind::Ephemeral, spawned))
    }

    fn pty_config(&self, command: String, args: Vec<String>, cwd: &Path) -> PtyConfig {
        let mut env: Vec<(String, String)> = self
            .shell
            .environment
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        env.sort();

        PtyConfig {
            command,
            args,
            cols: self.shell.size.columns,
            rows: self.shell.size.rows,
            env,
            env_remove: Vec::new(),
            cwd: Some(cwd.to_path_buf()),
        }
    }

    fn into_handle(
        &self,
        terminal_id: &str,
        kind: HostKind,
        spawned: SpawnedPty,
    ) -> (Arc<ProcessHandle>, PtyOutput) {
        let handle = ProcessHandle::new(terminal_id, kind, spawned.pty, self.shell.size);
        (Arc::new(handle), spawned.output)
    }

    /// A backend call that hangs counts as unavailable
    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, BackendError>>,
    ) -> Result<T, BackendError> {
        tokio::time::timeout(self.probe_timeout, call)
            .await
            .map_err(|_| BackendError::Timeout(self.probe_timeout))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pty::mock_pty::MockWorld;

    fn host(world: &MockWorld, with_backend: bool) -> ProcessHost {
        let backend: Option<Arc<dyn SessionBackend>> = if with_backend {
            Some(world.backend())
        } else {
            None
        };
        ProcessHost::new(
            world.factory(),
            backend,
            &BackendConfig::default(),
            ShellConfig {
                command: vec!["mock-shell".to_string()],
                ..ShellConfig::default()
            },
        )
    }

    #[tokio::test]
    async fn attaches_when_backend_session_exists() {
        let world = MockWorld::new();
        let host = host(&world, true);
        let name = host.session_name("t1");
        host.ensure_persistent_session(&name, Path::new("/"))
            .await
            .unwrap();

        let (handle, _output) = host.attach_or_spawn("t1", Path::new("/")).await.unwrap();
        assert_eq!(handle.kind(), &HostKind::Persistent { session: name });
        assert_eq!(world.last_spawn().unwrap().env_remove, vec!["TMUX".to_string()]);
        assert!(host.list_persistent_sessions().await.contains("webfiles-t1"));
    }

    #[tokio::test]
    async fn spawns_shell_without_backend_session() {
        let world = MockWorld::new();
        let host = host(&world, true);

        let (handle, _output) = host.attach_or_spawn("t2", Path::new("/tmp")).await.unwrap();
        assert_eq!(handle.kind(), &HostKind::Ephemeral);
        let spawn = world.last_spawn().unwrap();
        assert_eq!(spawn.cwd.as_deref(), Some(Path::new("/tmp")));
        assert!(spawn.env_remove.is_empty());
    }

    #[tokio::test]
    async fn unavailable_backend_falls_back_silently() {
        let world = MockWorld::new();
        world.set_backend_available(false);
        let host = host(&world, true);

        assert!(host.list_persistent_sessions().await.is_empty());
        assert!(matches!(
            host.ensure_persistent_session("webfiles-x", Path::new("/")).await,
            Err(BackendError::Unavailable(_))
        ));
        let (handle, _output) = host.attach_or_spawn("x", Path::new("/")).await.unwrap();
        assert!(!handle.is_persistent());
    }

    #[tokio::test]
    async fn disabled_backend_reports_unavailable() {
        let world = MockWorld::new();
        let host = host(&world, false);

        assert!(host
            .ensure_persistent_session("webfiles-x", Path::new("/"))
            .await
            .is_err());
        host.kill_persistent_session("webfiles-x").await;
    }

    #[tokio::test]
    async fn shell_spawn_failure_is_an_error() {
        let world = MockWorld::new();
        world.set_spawn_failure(true);
        let host = host(&world, true);

        assert!(matches!(
            host.attach_or_spawn("y", Path::new("/")).await,
            Err(PtyError::SpawnFailed(_))
        ));
    }

    #[test]
    fn session_names_round_trip_through_prefix() {
        let world = MockWorld::new();
        let host = host(&world, true);

        assert_eq!(host.terminal_id_of(&host.session_name("abc")), Some("abc"));
        assert_eq!(host.terminal_id_of("someone-else"), None);
        assert_eq!(host.terminal_id_of("webfiles-"), None);
    }
}
