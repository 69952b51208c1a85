use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

// ================ 配置与错误类型 ================

#[derive(Debug, Clone)]
pub struct PtyConfig {
    pub command: String,
    pub args: Vec<String>,
    pub cols: u16,
    pub rows: u16,
    pub env: Vec<(String, String)>,
    /// Variables the child must not inherit
    pub env_remove: Vec<String>,
    pub cwd: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum PtyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Process spawn failed: {0}")]
    SpawnFailed(String),
    #[error("Process already terminated")]
    ProcessTerminated,
    #[error("Resize failed: {0}")]
    ResizeFailed(String),
    #[error("Lock acquisition error: {0}")]
    LockAcquisition(String),
    #[error("Background task error: {0}")]
    BackgroundTask(String),
    #[error("Other error: {0}")]
    Other(String),
}

// portable-pty reports errors as anyhow::Error
impl From<anyhow::Error> for PtyError {
    fn from(error: anyhow::Error) -> Self {
        PtyError::Other(error.to_string())
    }
}

/// Exit code of a finished process, None when it could not be determined
pub type ExitCode = Option<u32>;

// ================ 核心Trait定义 ================

/// 异步PTY Trait
///
/// All methods take `&self` so one process can be shared by every connection
/// attached to its terminal. Each `write` call reaches the process as one
/// contiguous chunk.
#[async_trait]
pub trait AsyncPty: Send + Sync {
    /// 写入输入数据
    async fn write(&self, data: &[u8]) -> Result<(), PtyError>;

    /// 调整终端大小
    async fn resize(&self, cols: u16, rows: u16) -> Result<(), PtyError>;

    /// 获取进程ID（如果可用）
    fn pid(&self) -> Option<u32>;

    /// 检查进程是否存活
    fn is_alive(&self) -> bool;

    /// 立即终止进程
    async fn kill(&self) -> Result<(), PtyError>;
}

/// Push-style output of a spawned process.
///
/// `chunks` yields output in emission order and closes at EOF; `exit` then
/// resolves with the exit code.
pub struct PtyOutput {
    pub chunks: mpsc::Receiver<Vec<u8>>,
    pub exit: oneshot::Receiver<ExitCode>,
}

/// A freshly spawned process and its output streams
pub struct SpawnedPty {
    pub pty: Box<dyn AsyncPty>,
    pub output: PtyOutput,
}

/// PTY工厂Trait
#[async_trait]
pub trait PtyFactory: Send + Sync {
    /// 创建新的PTY实例
    async fn create(&self, config: &PtyConfig) -> Result<SpawnedPty, PtyError>;

    /// 工厂名称
    fn name(&self) -> &'static str;
}
