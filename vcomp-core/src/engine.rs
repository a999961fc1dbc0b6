use std::io;
use std::path::{Path, PathBuf};
use std::process::Output;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::composition::EncodePlan;
use crate::config::EngineSection;

const VERSION_TIMEOUT: Duration = Duration::from_secs(10);

#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn run(&self, command: &mut Command) -> io::Result<Output>;
}

#[derive(Debug, Default)]
pub struct SystemCommandExecutor;

#[async_trait]
impl CommandExecutor for SystemCommandExecutor {
    async fn run(&self, command: &mut Command) -> io::Result<Output> {
        command.output().await
    }
}

pub type EncodeResult<T> = Result<T, EncodeError>;

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("engine exited with status {status:?}: {diagnostic}")]
    Failed {
        status: Option<i32>,
        diagnostic: String,
    },
    #[error("encoding exceeded {0:?}")]
    Timeout(Duration),
    #[error("engine reported success but wrote no output at {path}")]
    MissingOutput { path: PathBuf },
}

impl EncodeError {
    /// Raw engine text kept for operational logs.
    pub fn diagnostic(&self) -> Option<&str> {
        match self {
            EncodeError::Failed { diagnostic, .. } => Some(diagnostic),
            _ => None,
        }
    }
}

/// External engine that executes an [`EncodePlan`] into an output file.
#[async_trait]
pub trait EncodingEngine: Send + Sync {
    async fn execute(&self, plan: &EncodePlan, output: &Path) -> EncodeResult<()>;

    /// First line of the engine's version banner.
    async fn version(&self) -> EncodeResult<String>;
}

pub struct FfmpegEngine {
    program: String,
    log_level: String,
    timeout: Duration,
    executor: Arc<dyn CommandExecutor>,
}

impl std::fmt::Debug for FfmpegEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FfmpegEngine")
            .field("program", &self.program)
            .field("log_level", &self.log_level)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl FfmpegEngine {
    pub fn new(settings: &EngineSection) -> Self {
        Self::with_executor(settings, Arc::new(SystemCommandExecutor))
    }

    pub fn with_executor(settings: &EngineSection, executor: Arc<dyn CommandExecutor>) -> Self {
        Self {
            program: settings.ffmpeg.clone(),
            log_level: settings.log_level.clone(),
            timeout: settings.timeout(),
            executor,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn command_args(&self, plan: &EncodePlan, output: &Path) -> Vec<String> {
        let mut args = vec![
            "-hide_banner".to_string(),
            "-nostdin".to_string(),
            "-loglevel".to_string(),
            self.log_level.clone(),
            "-y".to_string(),
        ];
        args.extend(plan.render_args(output));
        args
    }

    fn spawn_error(&self, source: io::Error) -> EncodeError {
        EncodeError::Spawn {
            program: self.program.clone(),
            source,
        }
    }
}

#[async_trait]
impl EncodingEngine for FfmpegEngine {
    async fn execute(&self, plan: &EncodePlan, output: &Path) -> EncodeResult<()> {
        let args = self.command_args(plan, output);
        debug!(program = %self.program, args = ?args, "invoking engine");
        let mut command = Command::new(&self.program);
        command.kill_on_drop(true).args(&args);
        let result = match timeout(self.timeout, self.executor.run(&mut command)).await {
            Ok(result) => result.map_err(|source| self.spawn_error(source))?,
            Err(_) => return Err(EncodeError::Timeout(self.timeout)),
        };
        if !result.status.success() {
            return Err(EncodeError::Failed {
                status: result.status.code(),
                diagnostic: String::from_utf8_lossy(&result.stderr).trim().to_string(),
            });
        }
        if tokio::fs::metadata(output).await.is_err() {
            return Err(EncodeError::MissingOutput {
                path: output.to_path_buf(),
            });
        }
        info!(output = %output.display(), "engine finished");
        Ok(())
    }

    async fn version(&self) -> EncodeResult<String> {
        let mut command = Command::new(&self.program);
        command.kill_on_drop(true).arg("-version");
        let result = match timeout(VERSION_TIMEOUT, self.executor.run(&mut command)).await {
            Ok(result) => result.map_err(|source| self.spawn_error(source))?,
            Err(_) => return Err(EncodeError::Timeout(VERSION_TIMEOUT)),
        };
        if !result.status.success() {
            return Err(EncodeError::Failed {
                status: result.status.code(),
                diagnostic: String::from_utf8_lossy(&result.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&result.stdout)
            .lines()
            .next()
            .unwrap_or_default()
            .trim()
            .to_string())
    }
}
