use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use portable_pty::{ChildKiller, CommandBuilder, MasterPty, PtySize};
use tokio::sync::{mpsc, oneshot};
use tokio::task::spawn_blocking;
use tracing::{debug, error, info, trace};

use crate::pty::pty_trait::{AsyncPty, PtyConfig, PtyError, PtyFactory, PtyOutput, SpawnedPty};

/// 有界输出通道容量
const OUTPUT_CHANNEL_CAPACITY: usize = 1024;
const READ_BUFFER_SIZE: usize = 4096;

/// 基于 portable-pty 库的异步 PTY 实现
///
/// A blocking reader task pushes output into a bounded channel until EOF, then
/// reaps the child and reports its exit code.
pub struct PortablePty {
    master: Arc<Mutex<Box<dyn MasterPty + Send>>>,
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
    killer: Arc<Mutex<Box<dyn ChildKiller + Send + Sync>>>,
    pid: Option<u32>,
    child_exited: Arc<AtomicBool>,
}

impl PortablePty {
    /// Open a pty pair and spawn `config.command` on its slave side.
    /// Blocking; call from a blocking context.
    pub fn spawn(config: &PtyConfig) -> Result<SpawnedPty, PtyError> {
        info!(
            "PortablePty: Creating PTY with command: {:?}, args: {:?}, cwd: {:?}",
            config.command, config.args, config.cwd
        );

        let pty_system = portable_pty::native_pty_system();
        let pair = pty_system.openpty(PtySize {
            rows: config.rows,
            cols: config.cols,
            pixel_width: 0,
            pixel_height: 0,
        })?;

        let mut cmd = CommandBuilder::new(&config.command);
        cmd.args(&config.args);
        for (key, value) in &config.env {
            cmd.env(key, value);
        }
        for key in &config.env_remove {
            cmd.env_remove(key);
        }
        if let Some(cwd) = &config.cwd {
            cmd.cwd(cwd);
        }

        let mut child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| PtyError::SpawnFailed(format!("{}: {}", config.command, e)))?;
        // EOF on the master only arrives once every slave handle is closed
        drop(pair.slave);

        let pid = child.process_id();
        let killer = child.clone_killer();
        let writer = pair.master.take_writer()?;
        let reader = pair.master.try_clone_reader()?;

        let (data_tx, data_rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
        let (exit_tx, exit_rx) = oneshot::channel();
        let child_exited = Arc::new(AtomicBool::new(false));
        let child_exited_clone = child_exited.clone();

        spawn_blocking(move || {
            let mut reader = reader;
            let mut buffer = vec![0u8; READ_BUFFER_SIZE];

            loop {
                match reader.read(&mut buffer) {
                    Ok(0) => {
                        debug!("PTY EOF reached, stopping background reader");
                        break;
                    }
                    Ok(n) => {
                        trace!("PTY background reader: read {} bytes", n);
                        if data_tx.blocking_send(buffer[..n].to_vec()).is_err() {
                            debug!("PTY background reader: receiver dropped, stopping");
                            break;
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        // Linux reports EIO once the slave side is gone
                        debug!("PTY background reader stopped: {}", e);
                        break;
                    }
                }
            }
            drop(data_tx);

            let code = match child.wait() {
                Ok(status) => Some(status.exit_code()),
                Err(e) => {
                    error!("Failed to reap PTY child: {}", e);
                    None
                }
            };
            child_exited_clone.store(true, Ordering::Release);
            let _ = exit_tx.send(code);
        });

        let pty = PortablePty {
            master: Arc::new(Mutex::new(pair.master)),
            writer: Arc::new(Mutex::new(writer)),
            killer: Arc::new(Mutex::new(killer)),
            pid,
            child_exited,
        };

        Ok(SpawnedPty {
            pty: Box::new(pty),
            output: PtyOutput {
                chunks: data_rx,
                exit: exit_rx,
            },
        })
    }
}

#[async_trait]
impl AsyncPty for PortablePty {
    async fn write(&self, data: &[u8]) -> Result<(), PtyError> {
        if !self.is_alive() {
            return Err(PtyError::ProcessTerminated);
        }

        let writer = self.writer.clone();
        let data = data.to_vec();
        spawn_blocking(move || {
            let mut writer = writer
                .lock()
                .map_err(|e| PtyError::LockAcquisition(e.to_string()))?;
            writer.write_all(&data)?;
            writer.flush()?;
            Ok(())
        })
        .await
        .map_err(|e| PtyError::BackgroundTask(e.to_string()))?
    }

    async fn resize(&self, cols: u16, rows: u16) -> Result<(), PtyError> {
        debug!("PortablePty: Resizing PTY to {}x{}", cols, rows);

        let master = self.master.clone();
        spawn_blocking(move || {
            let master = master
                .lock()
                .map_err(|e| PtyError::LockAcquisition(e.to_string()))?;
            master
                .resize(PtySize {
                    rows,
                    cols,
                    pixel_width: 0,
                    pixel_height: 0,
                })
                .map_err(|e| PtyError::ResizeFailed(e.to_string()))
        })
        .await
        .map_err(|e| PtyError::BackgroundTask(e.to_string()))?
    }

    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn is_alive(&self) -> bool {
        !self.child_exited.load(Ordering::Acquire)
    }

    async fn kill(&self) -> Result<(), PtyError> {
        if !self.is_alive() {
            return Ok(());
        }
        info!("PortablePty: Killing child process {:?}", self.pid);

        let killer = self.killer.clone();
        spawn_blocking(move || {
            let mut killer = killer
                .lock()
                .map_err(|e| PtyError::LockAcquisition(e.to_string()))?;
            killer.kill().map_err(PtyError::from)
        })
        .await
        .map_err(|e| PtyError::BackgroundTask(e.to_string()))?
    }
}

// ================ 工厂实现 ================

/// 基于 portable-pty 的 PTY 工厂
#[derive(Debug, Default)]
pub struct PortablePtyFactory;

#[async_trait]
impl PtyFactory for PortablePtyFactory {
    async fn create(&self, config: &PtyConfig) -> Result<SpawnedPty, PtyError> {
        // openpty and spawn block; keep them off the async workers
        let config = config.clone();
        spawn_blocking(move || PortablePty::spawn(&config))
            .await
            .map_err(|e| PtyError::BackgroundTask(e.to_string()))?
    }

    fn name(&self) -> &'static str {
        "portable-pty"
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sh(script: &str) -> PtyConfig {
        PtyConfig {
            command: "/bin/sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            cols: 80,
            rows: 24,
            env: vec![("TERM".to_string(), "dumb".to_string())],
            env_remove: vec![],
            cwd: None,
        }
    }

    #[tokio::test]
    async fn relays_output_then_reports_exit_code() {
        let SpawnedPty { pty, mut output } = PortablePtyFactory
            .create(&sh("printf ready; exit 3"))
            .await
            .unwrap();

        let mut collected = Vec::new();
        while let Some(chunk) = tokio::time::timeout(Duration::from_secs(10), output.chunks.recv())
            .await
            .unwrap()
        {
            collected.extend_from_slice(&chunk);
        }
        let code = tokio::time::timeout(Duration::from_secs(10), output.exit)
            .await
            .unwrap()
            .unwrap();

        assert!(String::from_utf8_lossy(&collected).contains("ready"));
        assert_eq!(code, Some(3));
        assert!(!pty.is_alive());
        // killing an exited process is a no-op
        pty.kill().await.unwrap();
    }

    #[tokio::test]
    async fn missing_program_fails_to_spawn() {
        let mut config = sh("true");
        config.command = "/definitely/not/a/shell".to_string();

        assert!(PortablePtyFactory.create(&config).await.is_err());
    }
}
