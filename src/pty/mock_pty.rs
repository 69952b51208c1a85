/// Mock PTY and backend implementations for testing purposes.
///
/// Shells answer a tiny command language so tests can observe shell identity
/// and state:
///   `set K=V`  stores a variable
///   `get K`    prints it
///   `exit N`   terminates with code N
///   anything else is echoed back prefixed with the shell id.
/// Backend sessions own a shell state that survives the attach processes.
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::config::TerminalSize;
use crate::pty::backend::{AttachCommand, BackendError, SessionBackend};
use crate::pty::pty_trait::{
    AsyncPty, ExitCode, PtyConfig, PtyError, PtyFactory, PtyOutput, SpawnedPty,
};

pub const ATTACH_PROGRAM: &str = "mock-attach";
/// Exit code reported for killed mock processes
pub const KILLED_EXIT_CODE: u32 = 137;

#[derive(Debug)]
struct ShellState {
    id: usize,
    vars: HashMap<String, String>,
}

#[derive(Default)]
struct WorldInner {
    next_shell: AtomicUsize,
    sessions: Mutex<HashMap<String, Arc<Mutex<ShellState>>>>,
    backend_unavailable: AtomicBool,
    spawn_failure: AtomicBool,
    spawns: Mutex<Vec<PtyConfig>>,
    writes: Mutex<Vec<Vec<u8>>>,
}

impl WorldInner {
    fn new_shell(&self) -> Arc<Mutex<ShellState>> {
        Arc::new(Mutex::new(ShellState {
            id: self.next_shell.fetch_add(1, Ordering::SeqCst) + 1,
            vars: HashMap::new(),
        }))
    }
}

/// Shared state behind the mock factory and backend
#[derive(Clone, Default)]
pub struct MockWorld {
    inner: Arc<WorldInner>,
}

impl MockWorld {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn factory(&self) -> Arc<dyn PtyFactory> {
        Arc::new(MockPtyFactory {
            world: self.inner.clone(),
        })
    }

    pub fn backend(&self) -> Arc<dyn SessionBackend> {
        Arc::new(MockBackend {
            world: self.inner.clone(),
        })
    }

    pub fn set_backend_available(&self, available: bool) {
        self.inner
            .backend_unavailable
            .store(!available, Ordering::SeqCst);
    }

    pub fn set_spawn_failure(&self, fail: bool) {
        self.inner.spawn_failure.store(fail, Ordering::SeqCst);
    }

    pub fn spawn_count(&self) -> usize {
        self.inner.spawns.lock().unwrap().len()
    }

    pub fn last_spawn(&self) -> Option<PtyConfig> {
        self.inner.spawns.lock().unwrap().last().cloned()
    }

    /// Every chunk written to any mock process, in arrival order
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.inner.writes.lock().unwrap().clone()
    }

    pub fn has_backend_session(&self, name: &str) -> bool {
        self.inner.sessions.lock().unwrap().contains_key(name)
    }
}

/// Mock PTY that interprets the command language above
pub struct MockPty {
    world: Arc<WorldInner>,
    shell: Arc<Mutex<ShellState>>,
    output: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
    exit: Mutex<Option<oneshot::Sender<ExitCode>>>,
    alive: AtomicBool,
    pid: u32,
}

impl MockPty {
    fn sender(&self) -> Option<mpsc::Sender<Vec<u8>>> {
        self.output.lock().unwrap().clone()
    }

    fn terminate(&self, code: ExitCode) {
        if !self.alive.swap(false, Ordering::SeqCst) {
            return;
        }
        self.output.lock().unwrap().take();
        if let Some(exit) = self.exit.lock().unwrap().take() {
            let _ = exit.send(code);
        }
    }

    fn respond(&self, line: &str) -> (String, Option<u32>) {
        let mut shell = self.shell.lock().unwrap();
        let id = shell.id;

        if let Some(assignment) = line.strip_prefix("set ") {
            if let Some((key, value)) = assignment.split_once('=') {
                shell.vars.insert(key.to_string(), value.to_string());
            }
            (format!("[{}] ok", id), None)
        } else if let Some(key) = line.strip_prefix("get ") {
            let value = shell.vars.get(key).cloned().unwrap_or_default();
            (format!("[{}] {}={}", id, key, value), None)
        } else if let Some(code) = line.strip_prefix("exit ") {
            (format!("[{}] bye", id), Some(code.parse().unwrap_or(0)))
        } else {
            (format!("[{}] {}", id, line), None)
        }
    }
}

#[async_trait]
impl AsyncPty for MockPty {
    async fn write(&self, data: &[u8]) -> Result<(), PtyError> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(PtyError::ProcessTerminated);
        }
        self.world.writes.lock().unwrap().push(data.to_vec());

        let text = String::from_utf8_lossy(data).into_owned();
        let (reply, exit) = self.respond(text.trim_end());
        if let Some(tx) = self.sender() {
            let _ = tx.send(reply.into_bytes()).await;
        }
        if let Some(code) = exit {
            self.terminate(Some(code));
        }
        Ok(())
    }

    async fn resize(&self, _cols: u16, _rows: u16) -> Result<(), PtyError> {
        if self.alive.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(PtyError::ProcessTerminated)
        }
    }

    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn kill(&self) -> Result<(), PtyError> {
        self.terminate(Some(KILLED_EXIT_CODE));
        Ok(())
    }
}

struct MockPtyFactory {
    world: Arc<WorldInner>,
}

#[async_trait]
impl PtyFactory for MockPtyFactory {
    async fn create(&self, config: &PtyConfig) -> Result<SpawnedPty, PtyError> {
        if self.world.spawn_failure.load(Ordering::SeqCst) {
            return Err(PtyError::SpawnFailed("mock spawn failure".to_string()));
        }
        self.world.spawns.lock().unwrap().push(config.clone());

        let shell = if config.command == ATTACH_PROGRAM {
            let name = config.args.first().cloned().unwrap_or_default();
            self.world
                .sessions
                .lock()
                .unwrap()
                .get(&name)
                .cloned()
                .ok_or_else(|| PtyError::SpawnFailed(format!("no session {}", name)))?
        } else {
            self.world.new_shell()
        };

        let (tx, rx) = mpsc::channel(1024);
        let (exit_tx, exit_rx) = oneshot::channel();
        let pid = 1000 + self.world.spawns.lock().unwrap().len() as u32;
        let pty = MockPty {
            world: self.world.clone(),
            shell,
            output: Mutex::new(Some(tx)),
            exit: Mutex::new(Some(exit_tx)),
            alive: AtomicBool::new(true),
            pid,
        };

        Ok(SpawnedPty {
            pty: Box::new(pty),
            output: PtyOutput {
                chunks: rx,
                exit: exit_rx,
            },
        })
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

struct MockBackend {
    world: Arc<WorldInner>,
}

impl MockBackend {
    fn check(&self) -> Result<(), BackendError> {
        if self.world.backend_unavailable.load(Ordering::SeqCst) {
            Err(BackendError::Unavailable("mock backend offline".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl SessionBackend for MockBackend {
    async fn list_sessions(&self) -> Result<HashSet<String>, BackendError> {
        self.check()?;
        Ok(self.world.sessions.lock().unwrap().keys().cloned().collect())
    }

    async fn has_session(&self, name: &str) -> Result<bool, BackendError> {
        self.check()?;
        Ok(self.world.sessions.lock().unwrap().contains_key(name))
    }

    async fn ensure_session(
        &self,
        name: &str,
        _cwd: &Path,
        _size: TerminalSize,
    ) -> Result<(), BackendError> {
        self.check()?;
        let mut sessions = self.world.sessions.lock().unwrap();
        if !sessions.contains_key(name) {
            let shell = self.world.new_shell();
            sessions.insert(name.to_string(), shell);
        }
        Ok(())
    }

    async fn kill_session(&self, name: &str) -> Result<(), BackendError> {
        self.check()?;
        self.world.sessions.lock().unwrap().remove(name);
        Ok(())
    }

    fn attach_command(&self, name: &str) -> AttachCommand {
        AttachCommand {
            program: ATTACH_PROGRAM.to_string(),
            args: vec![name.to_string()],
        }
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
