//! Job lifecycle: request types, state machine, per-job workspace and the
//! orchestrator that drives one request from acquisition to cleanup.

pub mod orchestrator;
pub mod state;
pub mod workspace;

use std::io;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;

use crate::acquisition::AcquisitionError;
use crate::composition::{validate_captions, validate_styles, Caption, PlanError, PlanResult, StyleTable};
use crate::engine::EncodeError;
use crate::media::{MediaRole, OutputFormat};
use crate::probe::ProbeError;

pub use orchestrator::{Artifact, JobOrchestrator, JobReport};
pub use state::{FailureKind, JobId, JobLifecycle, JobState, Transition, TransitionError};
pub use workspace::JobWorkspace;

pub type JobResult<T> = Result<T, JobError>;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("failed to acquire {role} input: {source}")]
    Acquisition {
        role: MediaRole,
        #[source]
        source: AcquisitionError,
    },
    #[error("probe failed: {0}")]
    Probe(#[from] ProbeError),
    #[error("invalid composition: {0}")]
    Plan(#[from] PlanError),
    #[error("encoding failed: {0}")]
    Encode(#[from] EncodeError),
    #[error("job cancelled")]
    Cancelled,
    #[error("workspace error at {path}: {source}")]
    Workspace {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Transition(#[from] TransitionError),
}

impl JobError {
    pub fn kind(&self) -> FailureKind {
        match self {
            JobError::Acquisition { .. } => FailureKind::Acquisition,
            JobError::Probe(_) => FailureKind::Probe,
            JobError::Plan(_) => FailureKind::Plan,
            JobError::Encode(_) => FailureKind::Encode,
            JobError::Cancelled => FailureKind::Cancelled,
            JobError::Workspace { .. } => FailureKind::Workspace,
            JobError::Transition(_) => FailureKind::Internal,
        }
    }

    pub fn is_input_level(&self) -> bool {
        self.kind().is_input_level()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombineRequest {
    pub video_url: String,
    pub audio_url: String,
    #[serde(default)]
    pub format: OutputFormat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StillImageRequest {
    pub image_url: String,
    pub audio_url: String,
    #[serde(default)]
    pub format: OutputFormat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComposeRequest {
    pub video_url: String,
    #[serde(default)]
    pub narration_url: Option<String>,
    #[serde(default)]
    pub music_url: Option<String>,
    #[serde(default)]
    pub captions: Vec<Caption>,
    #[serde(default)]
    pub styles: StyleTable,
    #[serde(default)]
    pub format: OutputFormat,
}

/// One request type per composition mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum CompositionRequest {
    /// Video plus one audio track, mixed under native audio when present.
    Combine(CombineRequest),
    StillImage(StillImageRequest),
    Compose(ComposeRequest),
}

impl CompositionRequest {
    pub fn mode(&self) -> &'static str {
        match self {
            CompositionRequest::Combine(_) => "combine",
            CompositionRequest::StillImage(_) => "still_image",
            CompositionRequest::Compose(_) => "compose",
        }
    }

    pub fn format(&self) -> OutputFormat {
        match self {
            CompositionRequest::Combine(request) => request.format,
            CompositionRequest::StillImage(request) => request.format,
            CompositionRequest::Compose(request) => request.format,
        }
    }

    /// Remote assets to acquire, in input order. Blank optional URLs count
    /// as absent.
    pub fn assets(&self) -> Vec<(MediaRole, &str)> {
        match self {
            CompositionRequest::Combine(request) => vec![
                (MediaRole::Video, request.video_url.as_str()),
                (MediaRole::Music, request.audio_url.as_str()),
            ],
            CompositionRequest::StillImage(request) => vec![
                (MediaRole::Image, request.image_url.as_str()),
                (MediaRole::Music, request.audio_url.as_str()),
            ],
            CompositionRequest::Compose(request) => {
                let mut assets = vec![(MediaRole::Video, request.video_url.as_str())];
                let optional = [
                    (MediaRole::Narration, request.narration_url.as_deref()),
                    (MediaRole::Music, request.music_url.as_deref()),
                ];
                for (role, url) in optional {
                    if let Some(url) = url.map(str::trim).filter(|url| !url.is_empty()) {
                        assets.push((role, url));
                    }
                }
                assets
            }
        }
    }

    /// Checks that need no I/O, run before anything is downloaded.
    pub fn preflight(&self) -> PlanResult<()> {
        match self {
            CompositionRequest::Compose(request) => {
                validate_captions(&request.captions)?;
                validate_styles(&request.styles)
            }
            CompositionRequest::Combine(_) | CompositionRequest::StillImage(_) => Ok(()),
        }
    }

    /// Whether the primary asset is a video container worth probing.
    pub fn needs_probe(&self) -> bool {
        !matches!(self, CompositionRequest::StillImage(_))
    }
}

/// Cancels an in-flight job. Cloneable; cancelling twice is harmless.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    sender: std::sync::Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }
}

#[derive(Debug, Clone)]
pub struct CancelSignal {
    receiver: watch::Receiver<bool>,
}

impl CancelSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        let (_, receiver) = watch::channel(false);
        Self { receiver }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once cancellation is requested; pends forever if the handle
    /// is dropped first.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.receiver.borrow_and_update() {
                return;
            }
            if self.receiver.changed().await.is_err() {
                futures::future::pending::<()>().await;
            }
        }
    }
}

pub fn cancellation() -> (CancelHandle, CancelSignal) {
    let (sender, receiver) = watch::channel(false);
    (
        CancelHandle {
            sender: std::sync::Arc::new(sender),
        },
        CancelSignal { receiver },
    )
}
