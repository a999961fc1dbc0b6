pub mod acquisition;
pub mod composition;
pub mod config;
pub mod engine;
pub mod error;
pub mod job;
pub mod media;
pub mod probe;
pub mod service;

pub use acquisition::{Acquirer, AcquisitionError, AcquisitionResult, HttpAcquirer};
pub use composition::{
    AudioMixBuilder, AudioPresence, Caption, CaptionOverlayBuilder, CaptionPosition, CaptionStyle,
    CompositionInputs, CompositionPlanner, DirectoryFontResolver, EncodePlan, FontResolver,
    FontWeight, PlanError, PlanResult, StyleTable,
};
pub use config::{load_vcomp_config, VcompConfig};
pub use engine::{
    CommandExecutor, EncodeError, EncodeResult, EncodingEngine, FfmpegEngine,
    SystemCommandExecutor,
};
pub use error::{ConfigError, Result};
pub use job::{
    cancellation, Artifact, CancelHandle, CancelSignal, CombineRequest, ComposeRequest,
    CompositionRequest, FailureKind, JobError, JobId, JobOrchestrator, JobReport, JobResult,
    JobState, StillImageRequest,
};
pub use media::{MediaAsset, MediaRole, OutputFormat};
pub use probe::{FfprobeProber, ProbeError, ProbeResult, StreamProber};
pub use service::{
    CompositionService, HealthReport, JobReceipt, PurgeReport, RetrievalError, RetrievedArtifact,
    SpawnedJob,
};
