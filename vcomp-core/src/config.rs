use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ConfigError, Result};
use crate::media::OutputFormat;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct VcompConfig {
    #[serde(default)]
    pub service: ServiceSection,
    #[serde(default)]
    pub paths: PathsSection,
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub acquisition: AcquisitionSection,
    #[serde(default)]
    pub mix: MixSection,
    #[serde(default)]
    pub encode: EncodeSection,
    #[serde(default)]
    pub captions: CaptionsSection,
    #[serde(default)]
    pub retention: RetentionSection,
}

impl VcompConfig {
    pub fn work_dir(&self) -> PathBuf {
        PathBuf::from(&self.paths.work_dir)
    }

    pub fn output_dir(&self) -> PathBuf {
        PathBuf::from(&self.paths.output_dir)
    }

    pub fn font_dirs(&self) -> Vec<PathBuf> {
        self.paths.font_dirs.iter().map(PathBuf::from).collect()
    }

    /// Container used when a caller does not name one.
    pub fn default_format(&self) -> OutputFormat {
        self.service
            .default_output_format
            .parse()
            .unwrap_or_default()
    }

    /// Rejects values that would make every job fail or hang.
    pub fn validate(&self) -> Result<()> {
        if let Err(reason) = self.service.default_output_format.parse::<OutputFormat>() {
            return Err(ConfigError::Invalid {
                field: "service.default_output_format",
                reason,
            });
        }
        if self.engine.wall_clock_ceiling_seconds == 0 {
            return Err(ConfigError::Invalid {
                field: "engine.wall_clock_ceiling_seconds",
                reason: "must be greater than zero".into(),
            });
        }
        if self.engine.probe_timeout_seconds == 0 {
            return Err(ConfigError::Invalid {
                field: "engine.probe_timeout_seconds",
                reason: "must be greater than zero".into(),
            });
        }
        if self.acquisition.timeout_seconds == 0 {
            return Err(ConfigError::Invalid {
                field: "acquisition.timeout_seconds",
                reason: "must be greater than zero".into(),
            });
        }
        if !(0.0..=1.0).contains(&self.mix.background_gain) {
            return Err(ConfigError::Invalid {
                field: "mix.background_gain",
                reason: format!("{} is outside 0.0..=1.0", self.mix.background_gain),
            });
        }
        if self.mix.foreground_gain <= 0.0 {
            return Err(ConfigError::Invalid {
                field: "mix.foreground_gain",
                reason: format!("{} must be positive", self.mix.foreground_gain),
            });
        }
        if self.mix.sample_rate == 0 {
            return Err(ConfigError::Invalid {
                field: "mix.sample_rate",
                reason: "must be greater than zero".into(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceSection {
    pub name: String,
    /// Prefix of the retrieval reference handed back to callers.
    pub download_prefix: String,
    pub default_output_format: String,
}

impl Default for ServiceSection {
    fn default() -> Self {
        Self {
            name: "vcomp".into(),
            download_prefix: "/download".into(),
            default_output_format: "mp4".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsSection {
    pub work_dir: String,
    pub output_dir: String,
    pub font_dirs: Vec<String>,
}

impl Default for PathsSection {
    fn default() -> Self {
        let base = std::env::temp_dir().join("vcomp");
        Self {
            work_dir: base.join("work").to_string_lossy().to_string(),
            output_dir: base.join("output").to_string_lossy().to_string(),
            font_dirs: vec![
                "/usr/share/fonts".into(),
                "/usr/local/share/fonts".into(),
                "/Library/Fonts".into(),
            ],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    pub ffmpeg: String,
    pub ffprobe: String,
    pub log_level: String,
    pub probe_timeout_seconds: u64,
    /// Deadline the engine wrapper applies to its own child process.
    pub timeout_seconds: u64,
    /// Ceiling the orchestrator enforces around the whole encoding stage.
    pub wall_clock_ceiling_seconds: u64,
}

impl EngineSection {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_seconds)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn wall_clock_ceiling(&self) -> Duration {
        Duration::from_secs(self.wall_clock_ceiling_seconds)
    }
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            ffmpeg: "ffmpeg".into(),
            ffprobe: "ffprobe".into(),
            log_level: "error".into(),
            probe_timeout_seconds: 30,
            timeout_seconds: 300,
            wall_clock_ceiling_seconds: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AcquisitionSection {
    pub timeout_seconds: u64,
    pub max_redirects: usize,
    pub user_agent: String,
    /// Lets requests read `file://` sources from the host filesystem.
    pub allow_file_urls: bool,
}

impl AcquisitionSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl Default for AcquisitionSection {
    fn default() -> Self {
        Self {
            timeout_seconds: 120,
            max_redirects: 10,
            user_agent: "vcomp/0.1".into(),
            allow_file_urls: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MixSection {
    pub sample_format: String,
    pub sample_rate: u32,
    pub channel_layout: String,
    pub foreground_gain: f64,
    pub background_gain: f64,
    pub dropout_transition_seconds: u32,
}

impl Default for MixSection {
    fn default() -> Self {
        Self {
            sample_format: "fltp".into(),
            sample_rate: 44_100,
            channel_layout: "stereo".into(),
            foreground_gain: 1.0,
            background_gain: 0.25,
            dropout_transition_seconds: 2,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EncodeSection {
    pub video_codec: String,
    pub video_preset: String,
    pub pix_fmt: String,
    pub still_image_tune: String,
    pub audio_codec: String,
    pub audio_bitrate: String,
    pub faststart: bool,
}

impl Default for EncodeSection {
    fn default() -> Self {
        Self {
            video_codec: "libx264".into(),
            video_preset: "veryfast".into(),
            pix_fmt: "yuv420p".into(),
            still_image_tune: "stillimage".into(),
            audio_codec: "aac".into(),
            audio_bitrate: "192k".into(),
            faststart: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CaptionsSection {
    pub top_margin: u32,
    pub bottom_margin: u32,
    pub fallback_font_family: String,
}

impl Default for CaptionsSection {
    fn default() -> Self {
        Self {
            top_margin: 50,
            bottom_margin: 50,
            fallback_font_family: "Sans".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetentionSection {
    pub artifact_retention_hours: u32,
}

impl Default for RetentionSection {
    fn default() -> Self {
        Self {
            artifact_retention_hours: 24,
        }
    }
}

pub fn load_vcomp_config<P: AsRef<Path>>(path: P) -> Result<VcompConfig> {
    let config: VcompConfig = load_toml(path)?;
    config.validate()?;
    Ok(config)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}
