use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::config::EngineSection;
use crate::engine::{CommandExecutor, SystemCommandExecutor};
use crate::media::MediaAsset;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("cannot read media file {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{path} is not a valid media container: {diagnostic}")]
    InvalidContainer { path: PathBuf, diagnostic: String },
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("invalid ffprobe payload: {0}")]
    Parse(String),
    #[error("probe tool {program} is unavailable: {source}")]
    EngineUnavailable {
        program: String,
        #[source]
        source: io::Error,
    },
}

impl From<serde_json::Error> for ProbeError {
    fn from(source: serde_json::Error) -> Self {
        ProbeError::Parse(source.to_string())
    }
}

/// Container facts the planner needs. Recomputed for every job.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Default)]
pub struct ProbeResult {
    pub has_audio_stream: bool,
    pub audio_streams: usize,
    pub video_streams: usize,
    pub duration_seconds: Option<f64>,
}

impl ProbeResult {
    pub fn with_audio(has_audio_stream: bool) -> Self {
        Self {
            has_audio_stream,
            audio_streams: usize::from(has_audio_stream),
            video_streams: 1,
            duration_seconds: None,
        }
    }
}

#[async_trait]
pub trait StreamProber: Send + Sync {
    /// Reads container metadata without decoding payload. A video with no
    /// audio stream is a normal result.
    async fn probe(&self, asset: &MediaAsset) -> Result<ProbeResult, ProbeError>;
}

pub struct FfprobeProber {
    program: String,
    timeout: Duration,
    executor: Arc<dyn CommandExecutor>,
}

impl std::fmt::Debug for FfprobeProber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FfprobeProber")
            .field("program", &self.program)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl FfprobeProber {
    pub fn new(settings: &EngineSection) -> Self {
        Self::with_executor(settings, Arc::new(SystemCommandExecutor))
    }

    pub fn with_executor(settings: &EngineSection, executor: Arc<dyn CommandExecutor>) -> Self {
        Self {
            program: settings.ffprobe.clone(),
            timeout: settings.probe_timeout(),
            executor,
        }
    }
}

#[async_trait]
impl StreamProber for FfprobeProber {
    async fn probe(&self, asset: &MediaAsset) -> Result<ProbeResult, ProbeError> {
        let path = asset.path();
        tokio::fs::metadata(path)
            .await
            .map_err(|source| ProbeError::Unreadable {
                path: path.to_path_buf(),
                source,
            })?;

        let mut command = Command::new(&self.program);
        command
            .kill_on_drop(true)
            .arg("-v")
            .arg("error")
            .arg("-print_format")
            .arg("json")
            .arg("-show_streams")
            .arg("-show_format")
            .arg(path);
        let output = match timeout(self.timeout, self.executor.run(&mut command)).await {
            Ok(Ok(output)) => output,
            Ok(Err(source)) => {
                return Err(ProbeError::EngineUnavailable {
                    program: self.program.clone(),
                    source,
                })
            }
            Err(_) => return Err(ProbeError::Timeout(self.timeout)),
        };
        if !output.status.success() {
            return Err(ProbeError::InvalidContainer {
                path: path.to_path_buf(),
                diagnostic: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        let result = parse_ffprobe_output(&output.stdout)?;
        if result.video_streams == 0 {
            warn!(file = %path.display(), "probed file carries no video stream");
        }
        debug!(
            file = %path.display(),
            audio_streams = result.audio_streams,
            video_streams = result.video_streams,
            "probe complete"
        );
        Ok(result)
    }
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
    #[serde(default)]
    format: FfprobeFormat,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    #[serde(default)]
    codec_type: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct FfprobeFormat {
    #[serde(default)]
    duration: Option<String>,
}

pub fn parse_ffprobe_output(bytes: &[u8]) -> Result<ProbeResult, ProbeError> {
    let data: FfprobeOutput = serde_json::from_slice(bytes)?;
    let count = |kind: &str| {
        data.streams
            .iter()
            .filter(|stream| stream.codec_type.as_deref() == Some(kind))
            .count()
    };
    let audio_streams = count("audio");
    Ok(ProbeResult {
        has_audio_stream: audio_streams > 0,
        audio_streams,
        video_streams: count("video"),
        duration_seconds: data
            .format
            .duration
            .as_deref()
            .and_then(|value| value.parse::<f64>().ok()),
    })
}
