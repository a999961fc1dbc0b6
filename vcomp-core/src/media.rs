use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MediaRole {
    Video,
    Narration,
    Music,
    Image,
}

impl MediaRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaRole::Video => "video",
            MediaRole::Narration => "narration",
            MediaRole::Music => "music",
            MediaRole::Image => "image",
        }
    }

    /// Extension used for the staged copy; the engine sniffs the real container.
    pub fn staging_extension(&self) -> &'static str {
        match self {
            MediaRole::Video => "mp4",
            MediaRole::Narration | MediaRole::Music => "mp3",
            MediaRole::Image => "png",
        }
    }

    pub fn staging_file_name(&self) -> String {
        format!("{}.{}", self.as_str(), self.staging_extension())
    }
}

impl fmt::Display for MediaRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A media file materialised on local disk for the duration of one job.
///
/// Absence of an optional input is modelled as `Option<MediaAsset>` rather
/// than a flag on the asset itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaAsset {
    pub role: MediaRole,
    pub path: PathBuf,
}

impl MediaAsset {
    pub fn new(role: MediaRole, path: impl Into<PathBuf>) -> Self {
        Self {
            role,
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    #[default]
    Mp4,
    Mkv,
    Mov,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Mp4 => "mp4",
            OutputFormat::Mkv => "mkv",
            OutputFormat::Mov => "mov",
        }
    }

    /// `+faststart` only applies to the ISO-BMFF family.
    pub fn supports_faststart(&self) -> bool {
        matches!(self, OutputFormat::Mp4 | OutputFormat::Mov)
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            OutputFormat::Mp4 => "video/mp4",
            OutputFormat::Mkv => "video/x-matroska",
            OutputFormat::Mov => "video/quicktime",
        }
    }

    pub fn all() -> [OutputFormat; 3] {
        [OutputFormat::Mp4, OutputFormat::Mkv, OutputFormat::Mov]
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mp4" => Ok(OutputFormat::Mp4),
            "mkv" => Ok(OutputFormat::Mkv),
            "mov" => Ok(OutputFormat::Mov),
            other => Err(format!("unsupported output format: {other}")),
        }
    }
}
