//! Request-level facade: submits jobs, shapes caller-facing receipts and
//! serves, releases and expires published artifacts.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::fs;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::acquisition::{AcquisitionError, HttpAcquirer};
use crate::composition::{CompositionPlanner, DirectoryFontResolver, FontResolver};
use crate::config::VcompConfig;
use crate::engine::FfmpegEngine;
use crate::job::orchestrator::artifact_file_name;
use crate::job::{
    cancellation, Artifact, CancelHandle, CancelSignal, CompositionRequest, FailureKind, JobError,
    JobId, JobOrchestrator, JobReport, JobState,
};
use crate::media::OutputFormat;
use crate::probe::FfprobeProber;

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("artifact {0} not found")]
    NotFound(String),
    #[error("artifact {0} not found (expired)")]
    Expired(String),
    #[error("invalid artifact reference {0:?}")]
    InvalidReference(String),
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl RetrievalError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RetrievalError::NotFound(_) | RetrievalError::Expired(_))
    }
}

/// Caller-facing outcome of one job.
#[derive(Debug, Clone, Serialize)]
pub struct JobReceipt {
    pub success: bool,
    pub job_id: String,
    pub message: String,
    pub output_url: Option<String>,
    pub state: JobState,
    pub failure: Option<FailureKind>,
    pub artifact: Option<Artifact>,
}

impl JobReceipt {
    fn from_report(
        request: &CompositionRequest,
        report: &JobReport,
        download_prefix: &str,
    ) -> Self {
        let (message, output_url) = match &report.outcome {
            Ok(artifact) => (
                success_message(request).to_string(),
                Some(format!(
                    "{}/{}",
                    download_prefix.trim_end_matches('/'),
                    artifact.file_name
                )),
            ),
            Err(err) => (failure_message(err), None),
        };
        Self {
            success: report.is_success(),
            job_id: report.job_id.to_string(),
            message,
            output_url,
            state: report.state(),
            failure: report.error().map(JobError::kind),
            artifact: report.artifact().cloned(),
        }
    }
}

fn success_message(request: &CompositionRequest) -> &'static str {
    match request {
        CompositionRequest::Combine(_) => "Video combined successfully",
        CompositionRequest::StillImage(_) => "Video created successfully",
        CompositionRequest::Compose(_) => "Video composed successfully",
    }
}

/// Input-level errors carry their detail; server-side failures stay generic
/// and their detail goes to the logs.
fn failure_message(err: &JobError) -> String {
    match err.kind() {
        kind if kind.is_input_level() => err.to_string(),
        FailureKind::Encode => "Video processing failed on the server".to_string(),
        FailureKind::Cancelled => "Job cancelled".to_string(),
        _ => "Internal error while processing the job".to_string(),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RetrievedArtifact {
    pub path: PathBuf,
    pub file_name: String,
    pub size_bytes: u64,
    pub content_type: &'static str,
    pub modified: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct PurgeReport {
    pub removed: Vec<String>,
    pub kept: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub service: String,
    pub engine_available: bool,
    pub engine: String,
}

/// Handle to a job running in the background.
#[derive(Debug)]
pub struct SpawnedJob {
    pub job_id: JobId,
    pub cancel: CancelHandle,
    pub handle: JoinHandle<JobReceipt>,
}

#[derive(Debug, Clone)]
pub struct CompositionService {
    name: String,
    download_prefix: String,
    retention: Option<Duration>,
    orchestrator: Arc<JobOrchestrator>,
}

impl CompositionService {
    pub fn new(config: &VcompConfig, orchestrator: JobOrchestrator) -> Self {
        let hours = u64::from(config.retention.artifact_retention_hours);
        Self {
            name: config.service.name.clone(),
            download_prefix: config.service.download_prefix.clone(),
            retention: (hours > 0).then(|| Duration::from_secs(hours * 3600)),
            orchestrator: Arc::new(orchestrator),
        }
    }

    /// Wires the production collaborators: HTTP acquisition, ffprobe,
    /// ffmpeg and directory font lookup.
    pub fn from_config(config: &VcompConfig) -> Result<Self, AcquisitionError> {
        let fonts: Arc<dyn FontResolver> =
            Arc::new(DirectoryFontResolver::new(config.font_dirs()));
        let orchestrator = JobOrchestrator::new(
            config,
            Arc::new(HttpAcquirer::new(&config.acquisition)?),
            Arc::new(FfprobeProber::new(&config.engine)),
            CompositionPlanner::from_config(config, fonts),
            Arc::new(FfmpegEngine::new(&config.engine)),
        );
        Ok(Self::new(config, orchestrator))
    }

    pub fn orchestrator(&self) -> &JobOrchestrator {
        &self.orchestrator
    }

    /// Runs a job to completion on the current task.
    pub async fn submit(&self, request: CompositionRequest) -> JobReceipt {
        let job_id = JobId::generate();
        let report = self
            .orchestrator
            .run(job_id, &request, CancelSignal::never())
            .await;
        JobReceipt::from_report(&request, &report, &self.download_prefix)
    }

    /// Runs a job as an independent task. Jobs share nothing but the
    /// orchestrator, so any number may be in flight.
    pub fn spawn(&self, request: CompositionRequest) -> SpawnedJob {
        let job_id = JobId::generate();
        let (cancel, signal) = cancellation();
        let orchestrator = Arc::clone(&self.orchestrator);
        let prefix = self.download_prefix.clone();
        let id = job_id.clone();
        let handle = tokio::spawn(async move {
            let report = orchestrator.run(id, &request, signal).await;
            JobReceipt::from_report(&request, &report, &prefix)
        });
        SpawnedJob {
            job_id,
            cancel,
            handle,
        }
    }

    /// Looks an artifact up by job id or file name. Expired artifacts are
    /// removed and reported as not found.
    pub async fn retrieve(&self, reference: &str) -> Result<RetrievedArtifact, RetrievalError> {
        let path = self.locate(reference).await?;
        let metadata = fs::metadata(&path)
            .await
            .map_err(|source| not_found_or_io(reference, &path, source))?;
        let modified = metadata.modified().unwrap_or_else(|_| SystemTime::now());
        if self.is_expired(modified) {
            remove_artifact(&path).await;
            return Err(RetrievalError::Expired(reference.to_string()));
        }
        let file_name = file_name_of(&path);
        let format = file_name
            .rsplit('.')
            .next()
            .and_then(|ext| ext.parse::<OutputFormat>().ok())
            .unwrap_or_default();
        Ok(RetrievedArtifact {
            size_bytes: metadata.len(),
            content_type: format.content_type(),
            modified: DateTime::<Utc>::from(modified),
            file_name,
            path,
        })
    }

    /// Deletes an artifact once the caller has it.
    pub async fn release(&self, reference: &str) -> Result<(), RetrievalError> {
        let path = self.locate(reference).await?;
        fs::remove_file(&path)
            .await
            .map_err(|source| not_found_or_io(reference, &path, source))?;
        info!(file = %path.display(), "artifact released");
        Ok(())
    }

    /// Removes every artifact older than the retention window.
    pub async fn purge_expired(&self) -> Result<PurgeReport, RetrievalError> {
        let dir = self.orchestrator.output_dir();
        let mut report = PurgeReport::default();
        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(report),
            Err(source) => {
                return Err(RetrievalError::Io {
                    path: dir.to_path_buf(),
                    source,
                })
            }
        };
        let io_error = |source| RetrievalError::Io {
            path: dir.to_path_buf(),
            source,
        };
        while let Some(entry) = entries.next_entry().await.map_err(io_error)? {
            let path = entry.path();
            let name = file_name_of(&path);
            if !is_artifact_name(&name) {
                continue;
            }
            let modified = entry
                .metadata()
                .await
                .and_then(|metadata| metadata.modified())
                .map_err(io_error)?;
            if self.is_expired(modified) {
                remove_artifact(&path).await;
                report.removed.push(name);
            } else {
                report.kept += 1;
            }
        }
        info!(removed = report.removed.len(), kept = report.kept, "expired artifacts purged");
        Ok(report)
    }

    pub async fn health(&self) -> HealthReport {
        match self.orchestrator.engine().version().await {
            Ok(version) => HealthReport {
                service: self.name.clone(),
                engine_available: true,
                engine: version,
            },
            Err(err) => {
                warn!(error = %err, "encoding engine unavailable");
                HealthReport {
                    service: self.name.clone(),
                    engine_available: false,
                    engine: "not found".to_string(),
                }
            }
        }
    }

    async fn locate(&self, reference: &str) -> Result<PathBuf, RetrievalError> {
        let reference = reference.trim();
        let dir = self.orchestrator.output_dir();
        if reference.contains('.') {
            if !is_artifact_name(reference) {
                return Err(RetrievalError::InvalidReference(reference.to_string()));
            }
            return Ok(dir.join(reference));
        }
        let job_id: JobId = reference
            .parse()
            .map_err(|_| RetrievalError::InvalidReference(reference.to_string()))?;
        for format in OutputFormat::all() {
            let candidate = dir.join(artifact_file_name(&job_id, format));
            if fs::metadata(&candidate).await.is_ok() {
                return Ok(candidate);
            }
        }
        Err(RetrievalError::NotFound(reference.to_string()))
    }

    fn is_expired(&self, modified: SystemTime) -> bool {
        let Some(retention) = self.retention else {
            return false;
        };
        SystemTime::now()
            .duration_since(modified)
            .map(|age| age > retention)
            .unwrap_or(false)
    }
}

/// `<job id>_output.<ext>` with a safe id and a known extension.
fn is_artifact_name(name: &str) -> bool {
    let Some((stem, ext)) = name.rsplit_once('.') else {
        return false;
    };
    let Some(id) = stem.strip_suffix("_output") else {
        return false;
    };
    id.parse::<JobId>().is_ok()
        && ext == ext.to_ascii_lowercase()
        && ext.parse::<OutputFormat>().is_ok()
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn not_found_or_io(reference: &str, path: &Path, source: io::Error) -> RetrievalError {
    if source.kind() == io::ErrorKind::NotFound {
        RetrievalError::NotFound(reference.to_string())
    } else {
        RetrievalError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

async fn remove_artifact(path: &Path) {
    if let Err(err) = fs::remove_file(path).await {
        if err.kind() != io::ErrorKind::NotFound {
            warn!(file = %path.display(), error = %err, "failed to remove expired artifact");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_names_are_strict() {
        assert!(is_artifact_name("1a2b3c4d_output.mp4"));
        assert!(is_artifact_name("job-7_output.mkv"));
        assert!(!is_artifact_name("../1a2b3c4d_output.mp4"));
        assert!(!is_artifact_name("1a2b3c4d_output.avi"));
        assert!(!is_artifact_name("1a2b3c4d.mp4"));
        assert!(!is_artifact_name("notes.txt"));
    }

    #[test]
    fn server_failures_get_generic_messages() {
        let err = JobError::Encode(crate::engine::EncodeError::Failed {
            status: Some(1),
            diagnostic: "Error initializing filter 'drawtext'".into(),
        });
        let message = failure_message(&err);
        assert!(!message.contains("drawtext"));

        let err = JobError::Plan(crate::composition::PlanError::InvalidCaptionTiming {
            index: 2,
            start: 5.0,
            end: 1.0,
        });
        assert!(failure_message(&err).contains("caption 2"));
    }
}
