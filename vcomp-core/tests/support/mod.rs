//! Shared fixtures for the integration tests: a scripted ffprobe/ffmpeg
//! stand-in and a temp-dir backed configuration.
#![allow(dead_code)]

use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Output};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::process::Command;

use vcomp_core::composition::{Caption, NoFontResolver, StyleTable};
use vcomp_core::config::VcompConfig;
use vcomp_core::engine::{CommandExecutor, FfmpegEngine};
use vcomp_core::job::{ComposeRequest, CompositionRequest, JobId, JobOrchestrator};
use vcomp_core::media::OutputFormat;
use vcomp_core::probe::FfprobeProber;
use vcomp_core::{CompositionPlanner, HttpAcquirer};

pub const PROBE_WITH_AUDIO: &str =
    r#"{"streams":[{"codec_type":"video"},{"codec_type":"audio"}],"format":{"duration":"8.0"}}"#;
pub const PROBE_SILENT: &str = r#"{"streams":[{"codec_type":"video"}],"format":{"duration":"8.0"}}"#;
pub const ENGINE_BANNER: &str = "ffmpeg version 6.1.1 Copyright (c) 2000-2023";

#[derive(Clone, Copy)]
pub enum EngineBehaviour {
    Succeed,
    Fail(&'static str),
    Hang,
}

/// Stands in for both ffprobe and ffmpeg, keyed on the program name.
pub struct FakeToolchain {
    probe_json: &'static str,
    engine: EngineBehaviour,
    pub calls: Mutex<Vec<(String, Vec<String>)>>,
}

impl FakeToolchain {
    pub fn new(probe_json: &'static str, engine: EngineBehaviour) -> Arc<Self> {
        Arc::new(Self {
            probe_json,
            engine,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls_to(&self, program: &str) -> Vec<Vec<String>> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| name == program)
            .map(|(_, args)| args.clone())
            .collect()
    }

    pub fn engine_args(&self) -> Vec<String> {
        self.calls_to("ffmpeg").pop().expect("engine was invoked")
    }
}

fn ok_output(stdout: &[u8]) -> Output {
    Output {
        status: ExitStatus::from_raw(0),
        stdout: stdout.to_vec(),
        stderr: Vec::new(),
    }
}

#[async_trait]
impl CommandExecutor for FakeToolchain {
    async fn run(&self, command: &mut Command) -> std::io::Result<Output> {
        let std_command = command.as_std();
        let program = std_command.get_program().to_string_lossy().to_string();
        let args: Vec<String> = std_command
            .get_args()
            .map(|arg| arg.to_string_lossy().to_string())
            .collect();
        self.calls
            .lock()
            .unwrap()
            .push((program.clone(), args.clone()));
        if program == "ffprobe" {
            return Ok(ok_output(self.probe_json.as_bytes()));
        }
        if args == ["-version"] {
            return Ok(ok_output(format!("{ENGINE_BANNER}\nbuilt with gcc\n").as_bytes()));
        }
        match self.engine {
            EngineBehaviour::Succeed => {
                std::fs::write(args.last().unwrap(), b"encoded-output")?;
                Ok(ok_output(b""))
            }
            EngineBehaviour::Fail(diagnostic) => {
                // Partial output the orchestrator must discard.
                std::fs::write(args.last().unwrap(), b"partial")?;
                Ok(Output {
                    status: ExitStatus::from_raw(1 << 8),
                    stdout: Vec::new(),
                    stderr: diagnostic.as_bytes().to_vec(),
                })
            }
            EngineBehaviour::Hang => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(ok_output(b""))
            }
        }
    }
}

pub struct Harness {
    _base: TempDir,
    pub fixtures: PathBuf,
    pub config: VcompConfig,
}

impl Harness {
    pub fn new() -> Self {
        let base = TempDir::new().unwrap();
        let fixtures = base.path().join("fixtures");
        std::fs::create_dir_all(&fixtures).unwrap();
        for name in ["clip.mp4", "voice.mp3", "bed.mp3", "cover.png"] {
            std::fs::write(fixtures.join(name), format!("fixture {name}")).unwrap();
        }
        let mut config = VcompConfig::default();
        config.paths.work_dir = base.path().join("work").to_string_lossy().to_string();
        config.paths.output_dir = base.path().join("output").to_string_lossy().to_string();
        config.paths.font_dirs = Vec::new();
        config.acquisition.allow_file_urls = true;
        Self {
            _base: base,
            fixtures,
            config,
        }
    }

    pub fn url(&self, name: &str) -> String {
        format!("file://{}", self.fixtures.join(name).display())
    }

    pub fn orchestrator(&self, toolchain: &Arc<FakeToolchain>) -> JobOrchestrator {
        JobOrchestrator::new(
            &self.config,
            Arc::new(HttpAcquirer::new(&self.config.acquisition).unwrap()),
            Arc::new(FfprobeProber::with_executor(
                &self.config.engine,
                toolchain.clone(),
            )),
            CompositionPlanner::from_config(&self.config, Arc::new(NoFontResolver)),
            Arc::new(FfmpegEngine::with_executor(
                &self.config.engine,
                toolchain.clone(),
            )),
        )
    }

    pub fn work_dir(&self) -> PathBuf {
        self.config.work_dir()
    }

    pub fn output_dir(&self) -> PathBuf {
        self.config.output_dir()
    }

    pub fn output_files(&self) -> Vec<String> {
        list(&self.output_dir())
    }

    pub fn compose(
        &self,
        narration: Option<&str>,
        music: Option<&str>,
        captions: Vec<Caption>,
    ) -> CompositionRequest {
        CompositionRequest::Compose(ComposeRequest {
            video_url: self.url("clip.mp4"),
            narration_url: narration.map(|name| self.url(name)),
            music_url: music.map(|name| self.url(name)),
            captions,
            styles: StyleTable::new(),
            format: OutputFormat::Mp4,
        })
    }
}

pub fn list(dir: &Path) -> Vec<String> {
    match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
            .collect(),
        Err(_) => Vec::new(),
    }
}

pub fn job_id(value: &str) -> JobId {
    value.parse().unwrap()
}
