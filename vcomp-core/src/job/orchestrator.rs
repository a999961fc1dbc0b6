use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::future::try_join_all;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncReadExt;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::state::{FailureKind, JobId, JobLifecycle, JobState};
use super::workspace::JobWorkspace;
use super::{CancelSignal, CompositionRequest, JobError, JobResult};
use crate::acquisition::Acquirer;
use crate::composition::{
    CompositionInputs, CompositionPlanner, EncodePlan, PlanError, StyleTable,
};
use crate::config::VcompConfig;
use crate::engine::{EncodeError, EncodingEngine};
use crate::media::{MediaAsset, MediaRole, OutputFormat};
use crate::probe::{ProbeResult, StreamProber};

/// Published output of a successful job.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Artifact {
    pub path: PathBuf,
    pub file_name: String,
    pub format: OutputFormat,
    pub size_bytes: u64,
    pub sha256: String,
}

/// Everything known about a finished job.
#[derive(Debug)]
pub struct JobReport {
    pub job_id: JobId,
    pub lifecycle: JobLifecycle,
    pub plan: Option<EncodePlan>,
    pub outcome: JobResult<Artifact>,
}

impl JobReport {
    pub fn state(&self) -> JobState {
        self.lifecycle.state()
    }

    pub fn artifact(&self) -> Option<&Artifact> {
        self.outcome.as_ref().ok()
    }

    pub fn error(&self) -> Option<&JobError> {
        self.outcome.as_ref().err()
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

pub fn artifact_file_name(job_id: &JobId, format: OutputFormat) -> String {
    format!("{}_output.{}", job_id, format.extension())
}

/// Assets acquired for one job, indexed by role.
#[derive(Debug, Default)]
struct AcquiredAssets {
    assets: Vec<MediaAsset>,
}

impl AcquiredAssets {
    fn get(&self, role: MediaRole) -> Option<&MediaAsset> {
        self.assets.iter().find(|asset| asset.role == role)
    }
}

pub struct JobOrchestrator {
    acquirer: Arc<dyn Acquirer>,
    prober: Arc<dyn StreamProber>,
    planner: CompositionPlanner,
    engine: Arc<dyn EncodingEngine>,
    work_dir: PathBuf,
    output_dir: PathBuf,
    wall_clock_ceiling: Duration,
}

impl std::fmt::Debug for JobOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobOrchestrator")
            .field("planner", &self.planner)
            .field("work_dir", &self.work_dir)
            .field("output_dir", &self.output_dir)
            .field("wall_clock_ceiling", &self.wall_clock_ceiling)
            .finish()
    }
}

impl JobOrchestrator {
    pub fn new(
        config: &VcompConfig,
        acquirer: Arc<dyn Acquirer>,
        prober: Arc<dyn StreamProber>,
        planner: CompositionPlanner,
        engine: Arc<dyn EncodingEngine>,
    ) -> Self {
        Self {
            acquirer,
            prober,
            planner,
            engine,
            work_dir: config.work_dir(),
            output_dir: config.output_dir(),
            wall_clock_ceiling: config.engine.wall_clock_ceiling(),
        }
    }

    pub fn planner(&self) -> &CompositionPlanner {
        &self.planner
    }

    pub fn engine(&self) -> &Arc<dyn EncodingEngine> {
        &self.engine
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Drives one job to a terminal state. Never panics on job failure and
    /// always removes the job workspace before returning.
    pub async fn run(
        &self,
        job_id: JobId,
        request: &CompositionRequest,
        mut cancel: CancelSignal,
    ) -> JobReport {
        let mut lifecycle = JobLifecycle::new();
        let mut plan = None;
        info!(job_id = %job_id, mode = request.mode(), "job created");

        let mut workspace = None;
        let outcome = match request.preflight() {
            Err(err) => Err(JobError::from(err)),
            Ok(()) => match JobWorkspace::create(&self.work_dir, &job_id).await {
                Err(source) => Err(JobError::Workspace {
                    path: self.work_dir.join(job_id.as_str()),
                    source,
                }),
                Ok(created) => {
                    let result = self
                        .drive(
                            &job_id,
                            request,
                            &created,
                            &mut lifecycle,
                            &mut plan,
                            &mut cancel,
                        )
                        .await;
                    workspace = Some(created);
                    result
                }
            },
        };

        let failure = match &outcome {
            Ok(artifact) => {
                info!(
                    job_id = %job_id,
                    file = %artifact.file_name,
                    size_bytes = artifact.size_bytes,
                    sha256 = %artifact.sha256,
                    "artifact published"
                );
                None
            }
            Err(err) => {
                log_failure(&job_id, &lifecycle, err);
                let kind = err.kind();
                if let Err(transition) = lifecycle.advance(JobState::Failed(kind)) {
                    error!(job_id = %job_id, error = %transition, "cannot record failure");
                }
                Some(kind)
            }
        };

        if let Some(workspace) = workspace {
            workspace.cleanup().await;
        }
        if let Err(transition) = lifecycle.advance(JobState::Cleaned(failure)) {
            error!(job_id = %job_id, error = %transition, "cannot record cleanup");
        }
        debug!(job_id = %job_id, state = %lifecycle.state(), "job finished");

        JobReport {
            job_id,
            lifecycle,
            plan,
            outcome,
        }
    }

    async fn drive(
        &self,
        job_id: &JobId,
        request: &CompositionRequest,
        workspace: &JobWorkspace,
        lifecycle: &mut JobLifecycle,
        plan_slot: &mut Option<EncodePlan>,
        cancel: &mut CancelSignal,
    ) -> JobResult<Artifact> {
        enter(job_id, lifecycle, JobState::Acquiring)?;
        let acquired = guarded(cancel, self.acquire(request, workspace)).await?;

        enter(job_id, lifecycle, JobState::Probing)?;
        let probe = if request.needs_probe() {
            let video = acquired
                .get(MediaRole::Video)
                .ok_or(PlanError::MissingInput {
                    role: MediaRole::Video,
                })?;
            guarded(cancel, async {
                self.prober.probe(video).await.map_err(JobError::from)
            })
            .await?
        } else {
            ProbeResult::default()
        };

        enter(job_id, lifecycle, JobState::Planning)?;
        let plan = self.plan(request, &acquired, probe)?;
        info!(job_id = %job_id, plan = %plan.summary(), "plan ready");
        let plan = plan_slot.insert(plan);

        enter(job_id, lifecycle, JobState::Encoding)?;
        let staged = workspace.staged_output(request.format());
        let ceiling = self.wall_clock_ceiling;
        guarded(cancel, async {
            match timeout(ceiling, self.engine.execute(plan, &staged)).await {
                Ok(result) => result.map_err(JobError::from),
                Err(_) => Err(JobError::Encode(EncodeError::Timeout(ceiling))),
            }
        })
        .await?;

        let artifact = self.publish(&staged, job_id, request.format()).await?;
        enter(job_id, lifecycle, JobState::Ready)?;
        Ok(artifact)
    }

    /// All declared assets download concurrently; the first failure wins and
    /// the rest are dropped.
    async fn acquire(
        &self,
        request: &CompositionRequest,
        workspace: &JobWorkspace,
    ) -> JobResult<AcquiredAssets> {
        let fetches = request.assets().into_iter().map(|(role, url)| {
            let dest = workspace.input_path(role);
            async move {
                self.acquirer
                    .fetch(url, role, &dest)
                    .await
                    .map_err(|source| JobError::Acquisition { role, source })
            }
        });
        let assets = try_join_all(fetches).await?;
        Ok(AcquiredAssets { assets })
    }

    fn plan(
        &self,
        request: &CompositionRequest,
        acquired: &AcquiredAssets,
        probe: ProbeResult,
    ) -> JobResult<EncodePlan> {
        let plan = match request {
            CompositionRequest::Combine(combine) => {
                let styles = StyleTable::new();
                self.planner.plan(CompositionInputs {
                    video: acquired.get(MediaRole::Video),
                    narration: None,
                    music: acquired.get(MediaRole::Music),
                    captions: &[],
                    styles: &styles,
                    probe,
                    format: combine.format,
                })?
            }
            CompositionRequest::Compose(compose) => self.planner.plan(CompositionInputs {
                video: acquired.get(MediaRole::Video),
                narration: acquired.get(MediaRole::Narration),
                music: acquired.get(MediaRole::Music),
                captions: &compose.captions,
                styles: &compose.styles,
                probe,
                format: compose.format,
            })?,
            CompositionRequest::StillImage(still) => self.planner.plan_still_image(
                acquired.get(MediaRole::Image),
                acquired.get(MediaRole::Music),
                still.format,
            )?,
        };
        Ok(plan)
    }

    /// Moves the staged output into the output directory and fingerprints it.
    async fn publish(
        &self,
        staged: &Path,
        job_id: &JobId,
        format: OutputFormat,
    ) -> JobResult<Artifact> {
        let workspace_error = |path: &Path| {
            let path = path.to_path_buf();
            move |source: io::Error| JobError::Workspace { path, source }
        };
        fs::create_dir_all(&self.output_dir)
            .await
            .map_err(workspace_error(self.output_dir.as_path()))?;
        let file_name = artifact_file_name(job_id, format);
        let destination = self.output_dir.join(&file_name);
        if let Err(err) = fs::rename(staged, &destination).await {
            debug!(error = %err, "rename across filesystems failed, copying");
            if let Err(source) = fs::copy(staged, &destination).await {
                let _ = fs::remove_file(&destination).await;
                return Err(JobError::Workspace {
                    path: destination,
                    source,
                });
            }
        }
        let digest = digest_file(&destination).await;
        let (size_bytes, sha256) = discard_on_error(&destination, digest)
            .await
            .map_err(workspace_error(destination.as_path()))?;
        Ok(Artifact {
            path: destination,
            file_name,
            format,
            size_bytes,
            sha256,
        })
    }
}

fn enter(job_id: &JobId, lifecycle: &mut JobLifecycle, next: JobState) -> JobResult<()> {
    lifecycle.advance(next)?;
    info!(job_id = %job_id, state = %next, "job state changed");
    Ok(())
}

/// Races a stage against cancellation.
async fn guarded<T, F>(cancel: &mut CancelSignal, stage: F) -> JobResult<T>
where
    F: Future<Output = JobResult<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(JobError::Cancelled),
        result = stage => result,
    }
}

fn log_failure(job_id: &JobId, lifecycle: &JobLifecycle, err: &JobError) {
    let stage = lifecycle.state().name();
    match err {
        JobError::Encode(encode) => error!(
            job_id = %job_id,
            stage,
            error = %encode,
            diagnostic = encode.diagnostic().unwrap_or(""),
            "encoding failed"
        ),
        JobError::Cancelled => warn!(job_id = %job_id, stage, "job cancelled"),
        err if err.kind() == FailureKind::Internal || err.kind() == FailureKind::Workspace => {
            error!(job_id = %job_id, stage, error = %err, "job failed")
        }
        err => warn!(job_id = %job_id, stage, error = %err, "job rejected"),
    }
}

async fn digest_file(path: &Path) -> io::Result<(u64, String)> {
    let mut file = fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 64 * 1024];
    let mut size = 0u64;
    loop {
        let read = file.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        size += read as u64;
        hasher.update(&buffer[..read]);
    }
    Ok((size, hex::encode(hasher.finalize())))
}

/// Removes `path` when `result` is an error; the error passes through.
async fn discard_on_error<T>(path: &Path, result: io::Result<T>) -> io::Result<T> {
    if result.is_err() {
        if let Err(err) = fs::remove_file(path).await {
            if err.kind() != io::ErrorKind::NotFound {
                warn!(path = %path.display(), error = %err, "failed to discard unpublished artifact");
            }
        }
    }
    result
}
