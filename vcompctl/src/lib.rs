use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use vcomp_core::composition::{Caption, CompositionInputs, StyleTable};
use vcomp_core::job::{CombineRequest, ComposeRequest, CompositionRequest, StillImageRequest};
use vcomp_core::media::{MediaAsset, MediaRole, OutputFormat as Container};
use vcomp_core::service::{HealthReport, JobReceipt, PurgeReport, RetrievedArtifact, SpawnedJob};
use vcomp_core::{
    load_vcomp_config, AcquisitionError, CompositionPlanner, CompositionService,
    DirectoryFontResolver, FfmpegEngine, FfprobeProber, PlanError, ProbeError, ProbeResult,
    RetrievalError, StreamProber, VcompConfig,
};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] vcomp_core::ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("setup error: {0}")]
    Setup(#[from] AcquisitionError),
    #[error("invalid composition: {0}")]
    Plan(#[from] PlanError),
    #[error("probe error: {0}")]
    Probe(#[from] ProbeError),
    #[error("{0}")]
    Retrieval(#[from] RetrievalError),
    #[error("job task aborted: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("job {job_id} failed: {message}")]
    JobFailed { job_id: String, message: String },
    #[error("encoding engine not available")]
    EngineUnavailable,
    #[error("required resource missing: {0}")]
    MissingResource(String),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Video composition command-line interface", long_about = None)]
pub struct Cli {
    /// Path to the main vcomp.toml
    #[arg(long, default_value = "configs/vcomp.toml")]
    pub config: PathBuf,
    /// Overrides paths.work_dir
    #[arg(long)]
    pub work_dir: Option<PathBuf>,
    /// Overrides paths.output_dir
    #[arg(long)]
    pub output_dir: Option<PathBuf>,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Combines a video with one audio track
    Combine(CombineArgs),
    /// Turns a still image and an audio track into a video
    ImageToVideo(ImageToVideoArgs),
    /// Composes a video with narration, music and captions
    Compose(ComposeArgs),
    /// Prints the engine invocation for local files without running it
    Plan(PlanArgs),
    /// Retrieves a published artifact by job id or file name
    Fetch(FetchArgs),
    /// Removes artifacts older than the retention window
    Purge,
    /// Checks that the encoding engine is reachable
    Health,
}

#[derive(Args, Debug)]
pub struct CombineArgs {
    pub video_url: String,
    pub audio_url: String,
    /// Output container (mp4, mkv, mov); defaults to service.default_output_format
    #[arg(long)]
    pub container: Option<Container>,
}

#[derive(Args, Debug)]
pub struct ImageToVideoArgs {
    pub image_url: String,
    pub audio_url: String,
    #[arg(long)]
    pub container: Option<Container>,
}

#[derive(Args, Debug)]
pub struct ComposeArgs {
    pub video_url: String,
    #[arg(long)]
    pub narration: Option<String>,
    #[arg(long)]
    pub music: Option<String>,
    /// JSON file with a caption list or a {captions, styles} document
    #[arg(long)]
    pub captions: Option<PathBuf>,
    #[arg(long)]
    pub container: Option<Container>,
}

#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Local video file
    pub video: PathBuf,
    #[arg(long)]
    pub narration: Option<PathBuf>,
    #[arg(long)]
    pub music: Option<PathBuf>,
    #[arg(long)]
    pub captions: Option<PathBuf>,
    /// Treat the video as carrying an audio stream
    #[arg(long, default_value_t = false, conflicts_with = "probe")]
    pub has_audio: bool,
    /// Run ffprobe on the video instead of trusting --has-audio
    #[arg(long, default_value_t = false)]
    pub probe: bool,
    #[arg(long)]
    pub container: Option<Container>,
    #[arg(long, default_value = "output.mp4")]
    pub output: PathBuf,
}

#[derive(Args, Debug)]
pub struct FetchArgs {
    /// Job id or artifact file name
    pub reference: String,
    /// Copies the artifact here
    #[arg(long)]
    pub dest: Option<PathBuf>,
    /// Deletes the published artifact after copying
    #[arg(long, default_value_t = false, requires = "dest")]
    pub release: bool,
}

pub async fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;

    match &cli.command {
        Commands::Combine(args) => {
            let request = CompositionRequest::Combine(CombineRequest {
                video_url: args.video_url.clone(),
                audio_url: args.audio_url.clone(),
                format: args.container.unwrap_or_else(|| config.default_format()),
            });
            submit(&config, request, cli.format).await?;
        }
        Commands::ImageToVideo(args) => {
            let request = CompositionRequest::StillImage(StillImageRequest {
                image_url: args.image_url.clone(),
                audio_url: args.audio_url.clone(),
                format: args.container.unwrap_or_else(|| config.default_format()),
            });
            submit(&config, request, cli.format).await?;
        }
        Commands::Compose(args) => {
            let (captions, styles) = match &args.captions {
                Some(path) => read_captions(path)?.into_parts(),
                None => (Vec::new(), StyleTable::new()),
            };
            let request = CompositionRequest::Compose(ComposeRequest {
                video_url: args.video_url.clone(),
                narration_url: args.narration.clone(),
                music_url: args.music.clone(),
                captions,
                styles,
                format: args.container.unwrap_or_else(|| config.default_format()),
            });
            submit(&config, request, cli.format).await?;
        }
        Commands::Plan(args) => {
            let preview = preview_plan(&config, args).await?;
            render(&preview, cli.format)?;
        }
        Commands::Fetch(args) => {
            let service = CompositionService::from_config(&config)?;
            let artifact = service.retrieve(&args.reference).await?;
            let mut fetched = FetchResult {
                artifact,
                copied_to: None,
                released: false,
            };
            if let Some(dest) = &args.dest {
                fs::copy(&fetched.artifact.path, dest)?;
                fetched.copied_to = Some(dest.clone());
                if args.release {
                    service.release(&fetched.artifact.file_name).await?;
                    fetched.released = true;
                }
            }
            render(&fetched, cli.format)?;
        }
        Commands::Purge => {
            let service = CompositionService::from_config(&config)?;
            let report = service.purge_expired().await?;
            render(&report, cli.format)?;
        }
        Commands::Health => {
            let service = CompositionService::from_config(&config)?;
            let report = HealthCheck {
                engine: service.health().await,
                directories: vec![
                    check_directory("work_dir", &config.work_dir()),
                    check_directory("output_dir", &config.output_dir()),
                ],
            };
            render(&report, cli.format)?;
            if !report.engine.engine_available {
                return Err(AppError::EngineUnavailable);
            }
            if report
                .directories
                .iter()
                .any(|entry| matches!(entry.status, CheckStatus::Error))
            {
                return Err(AppError::MissingResource(
                    "one or more directory checks failed".to_string(),
                ));
            }
        }
    }

    Ok(())
}

fn load_config(cli: &Cli) -> Result<VcompConfig> {
    let mut config = load_vcomp_config(&cli.config)?;
    if let Some(dir) = &cli.work_dir {
        config.paths.work_dir = dir.to_string_lossy().to_string();
    }
    if let Some(dir) = &cli.output_dir {
        config.paths.output_dir = dir.to_string_lossy().to_string();
    }
    // Local operators compose from files on their own disk.
    config.acquisition.allow_file_urls = true;
    Ok(config)
}

async fn submit(config: &VcompConfig, request: CompositionRequest, format: OutputFormat) -> Result<()> {
    let service = CompositionService::from_config(config)?;
    let receipt = await_job(service.spawn(request)).await?;
    render(&receipt, format)?;
    if receipt.success {
        Ok(())
    } else {
        Err(AppError::JobFailed {
            job_id: receipt.job_id,
            message: receipt.message,
        })
    }
}

/// Waits for a job, cancelling it on Ctrl-C.
async fn await_job(job: SpawnedJob) -> Result<JobReceipt> {
    let SpawnedJob {
        cancel, mut handle, ..
    } = job;
    tokio::select! {
        receipt = &mut handle => Ok(receipt?),
        _ = tokio::signal::ctrl_c() => {
            cancel.cancel();
            Ok(handle.await?)
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CaptionsFile {
    List(Vec<Caption>),
    Document {
        captions: Vec<Caption>,
        #[serde(default)]
        styles: StyleTable,
    },
}

impl CaptionsFile {
    fn into_parts(self) -> (Vec<Caption>, StyleTable) {
        match self {
            CaptionsFile::List(captions) => (captions, StyleTable::new()),
            CaptionsFile::Document { captions, styles } => (captions, styles),
        }
    }
}

fn read_captions(path: &Path) -> Result<CaptionsFile> {
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

async fn preview_plan(config: &VcompConfig, args: &PlanArgs) -> Result<PlanPreview> {
    let video = MediaAsset::new(MediaRole::Video, &args.video);
    let narration = args
        .narration
        .as_ref()
        .map(|path| MediaAsset::new(MediaRole::Narration, path));
    let music = args
        .music
        .as_ref()
        .map(|path| MediaAsset::new(MediaRole::Music, path));
    let (captions, styles) = match &args.captions {
        Some(path) => read_captions(path)?.into_parts(),
        None => (Vec::new(), StyleTable::new()),
    };
    let probe = if args.probe {
        FfprobeProber::new(&config.engine).probe(&video).await?
    } else {
        ProbeResult::with_audio(args.has_audio)
    };

    let fonts = Arc::new(DirectoryFontResolver::new(config.font_dirs()));
    let planner = CompositionPlanner::from_config(config, fonts);
    let plan = planner.plan(CompositionInputs {
        video: Some(&video),
        narration: narration.as_ref(),
        music: music.as_ref(),
        captions: &captions,
        styles: &styles,
        probe,
        format: args.container.unwrap_or_else(|| config.default_format()),
    })?;
    let engine = FfmpegEngine::new(&config.engine);
    Ok(PlanPreview {
        summary: plan.summary(),
        program: engine.program().to_string(),
        args: engine.command_args(&plan, &args.output),
    })
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

impl DisplayFallback for JobReceipt {
    fn display(&self) -> String {
        let mut lines = vec![
            format!("Job: {}", self.job_id),
            format!("State: {}", self.state),
            format!("Message: {}", self.message),
        ];
        if let Some(url) = &self.output_url {
            lines.push(format!("Output: {url}"));
        }
        if let Some(artifact) = &self.artifact {
            lines.push(format!(
                "Artifact: {} ({} bytes, sha256 {})",
                artifact.path.display(),
                artifact.size_bytes,
                artifact.sha256
            ));
        }
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct PlanPreview {
    pub summary: String,
    pub program: String,
    pub args: Vec<String>,
}

impl DisplayFallback for PlanPreview {
    fn display(&self) -> String {
        let quoted: Vec<String> = self.args.iter().map(|arg| shell_quote(arg)).collect();
        format!("# {}\n{} {}", self.summary, self.program, quoted.join(" "))
    }
}

fn shell_quote(arg: &str) -> String {
    let plain = arg
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "-_./:+=,".contains(c));
    if plain && !arg.is_empty() {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

#[derive(Debug, Serialize)]
pub struct FetchResult {
    pub artifact: RetrievedArtifact,
    pub copied_to: Option<PathBuf>,
    pub released: bool,
}

impl DisplayFallback for FetchResult {
    fn display(&self) -> String {
        let mut lines = vec![
            format!("File: {}", self.artifact.file_name),
            format!("Path: {}", self.artifact.path.display()),
            format!("Size: {} bytes", self.artifact.size_bytes),
            format!("Content-Type: {}", self.artifact.content_type),
            format!("Modified: {}", self.artifact.modified.to_rfc3339()),
        ];
        if let Some(dest) = &self.copied_to {
            lines.push(format!("Copied to: {}", dest.display()));
        }
        if self.released {
            lines.push("Released: yes".to_string());
        }
        lines.join("\n")
    }
}

impl DisplayFallback for PurgeReport {
    fn display(&self) -> String {
        if self.removed.is_empty() {
            return format!("Nothing expired ({} kept)", self.kept);
        }
        let mut lines = vec![format!(
            "Removed {} artifact(s), kept {}",
            self.removed.len(),
            self.kept
        )];
        lines.extend(self.removed.iter().map(|name| format!("- {name}")));
        lines.join("\n")
    }
}

fn check_directory(name: &str, path: &Path) -> HealthEntry {
    match fs::metadata(path) {
        Ok(meta) if meta.is_dir() => HealthEntry::ok(name, path.display().to_string()),
        Ok(_) => HealthEntry::error(name, format!("{} is not a directory", path.display())),
        Err(_) => HealthEntry::warn(
            name,
            format!("{} missing (created on first job)", path.display()),
        ),
    }
}

#[derive(Debug, Serialize)]
pub struct HealthCheck {
    pub engine: HealthReport,
    pub directories: Vec<HealthEntry>,
}

impl DisplayFallback for HealthCheck {
    fn display(&self) -> String {
        let status = if self.engine.engine_available {
            CheckStatus::Ok
        } else {
            CheckStatus::Error
        };
        let mut lines = vec![format!(
            "[{status}] {} engine: {}",
            self.engine.service, self.engine.engine
        )];
        lines.extend(self.directories.iter().map(HealthEntry::display));
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct HealthEntry {
    pub name: String,
    pub status: CheckStatus,
    pub detail: String,
}

#[derive(Debug, Serialize)]
pub enum CheckStatus {
    #[serde(rename = "ok")]
    Ok,
    #[serde(rename = "warn")]
    Warn,
    #[serde(rename = "error")]
    Error,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CheckStatus::Ok => "OK",
            CheckStatus::Warn => "WARN",
            CheckStatus::Error => "ERROR",
        };
        write!(f, "{}", label)
    }
}

impl HealthEntry {
    fn ok(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(name, CheckStatus::Ok, detail)
    }

    fn warn(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(name, CheckStatus::Warn, detail)
    }

    fn error(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(name, CheckStatus::Error, detail)
    }

    fn new(name: impl Into<String>, status: CheckStatus, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status,
            detail: detail.into(),
        }
    }
}

impl DisplayFallback for HealthEntry {
    fn display(&self) -> String {
        format!("[{}] {}: {}", self.status, self.name, self.detail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    fn config_in(temp: &TempDir) -> VcompConfig {
        let mut config = load_vcomp_config("../configs/vcomp.toml").unwrap();
        config.paths.work_dir = temp.path().join("work").to_string_lossy().to_string();
        config.paths.output_dir = temp.path().join("output").to_string_lossy().to_string();
        config.paths.font_dirs = Vec::new();
        config
    }

    fn plan_args(video: PathBuf) -> PlanArgs {
        PlanArgs {
            video,
            narration: None,
            music: None,
            captions: None,
            has_audio: false,
            probe: false,
            container: None,
            output: PathBuf::from("out.mp4"),
        }
    }

    #[test]
    fn parses_compose_command() {
        let cli = Cli::try_parse_from([
            "vcompctl",
            "--format",
            "json",
            "compose",
            "https://cdn.example.com/v.mp4",
            "--music",
            "https://cdn.example.com/m.mp3",
            "--container",
            "mkv",
        ])
        .unwrap();
        assert!(matches!(cli.format, OutputFormat::Json));
        match cli.command {
            Commands::Compose(args) => {
                assert_eq!(args.container, Some(Container::Mkv));
                assert_eq!(args.music.as_deref(), Some("https://cdn.example.com/m.mp3"));
                assert!(args.narration.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_container_and_release_without_dest() {
        assert!(Cli::try_parse_from(["vcompctl", "combine", "a", "b", "--container", "avi"]).is_err());
        assert!(Cli::try_parse_from(["vcompctl", "fetch", "abc123", "--release"]).is_err());
    }

    #[test]
    fn captions_file_accepts_list_or_document() {
        let temp = TempDir::new().unwrap();
        let list = write(
            temp.path(),
            "list.json",
            r#"[{"text": "Hi", "start": 0, "end": 1.5}]"#,
        );
        let (captions, styles) = read_captions(&list).unwrap().into_parts();
        assert_eq!(captions.len(), 1);
        assert_eq!(styles.len(), 1);
        assert!(styles.get("default").is_some());

        let document = write(
            temp.path(),
            "doc.json",
            r#"{"captions": [{"text": "Hi", "start": 0, "end": 1.5, "style": "big"}],
                "styles": {"big": {"size": 96}}}"#,
        );
        let (captions, styles) = read_captions(&document).unwrap().into_parts();
        assert_eq!(captions[0].style, "big");
        assert!(styles.get("big").is_some());
    }

    #[tokio::test]
    async fn plan_preview_mixes_native_audio_with_music() {
        let temp = TempDir::new().unwrap();
        let config = config_in(&temp);
        let mut args = plan_args(PathBuf::from("/media/clip.mp4"));
        args.music = Some(PathBuf::from("/media/bed.mp3"));
        args.has_audio = true;

        let preview = preview_plan(&config, &args).await.unwrap();
        assert_eq!(preview.program, "ffmpeg");
        assert!(preview.summary.contains("audio=encode"));
        let graph = preview
            .args
            .iter()
            .skip_while(|arg| *arg != "-filter_complex")
            .nth(1)
            .unwrap();
        assert!(graph.contains("amix=inputs=2"));
        assert_eq!(preview.args.last().unwrap(), "out.mp4");
    }

    #[tokio::test]
    async fn plan_preview_rejects_bad_caption_timing() {
        let temp = TempDir::new().unwrap();
        let config = config_in(&temp);
        let captions = write(
            temp.path(),
            "captions.json",
            r#"[{"text": "late", "start": 5, "end": 2}]"#,
        );
        let mut args = plan_args(PathBuf::from("/media/clip.mp4"));
        args.captions = Some(captions);

        let err = preview_plan(&config, &args).await.unwrap_err();
        assert!(matches!(err, AppError::Plan(PlanError::InvalidCaptionTiming { .. })));
    }

    #[test]
    fn directory_checks_flag_files_and_missing_dirs() {
        let temp = TempDir::new().unwrap();
        let file = write(temp.path(), "not-a-dir", "x");
        assert!(matches!(check_directory("work_dir", temp.path()).status, CheckStatus::Ok));
        assert!(matches!(check_directory("work_dir", &file).status, CheckStatus::Error));
        assert!(matches!(
            check_directory("output_dir", &temp.path().join("absent")).status,
            CheckStatus::Warn
        ));
    }

    #[test]
    fn preview_text_quotes_filter_graph() {
        let preview = PlanPreview {
            summary: "inputs=1".into(),
            program: "ffmpeg".into(),
            args: vec!["-i".into(), "/in.mp4".into(), "-filter_complex".into(), "[0:v]null[vout]".into()],
        };
        assert_eq!(
            preview.display(),
            "# inputs=1\nffmpeg -i /in.mp4 -filter_complex '[0:v]null[vout]'"
        );
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }
}
