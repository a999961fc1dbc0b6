//! Declarative encode plan handed to the encoding engine.
//!
//! A plan is an ordered input list, an optional filter graph made of named
//! fragments connected through labelled pads, the output mapping and one
//! codec directive per mapped stream. [`EncodePlan::new`] refuses plans that
//! reference pads no fragment produces.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

use super::error::{PlanError, PlanResult};
use crate::media::MediaRole;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    Video,
    Audio,
}

impl StreamKind {
    fn specifier(&self) -> char {
        match self {
            StreamKind::Video => 'v',
            StreamKind::Audio => 'a',
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PadLabel(String);

impl PadLabel {
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PadLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.0)
    }
}

/// Either a raw stream of an input file or a pad produced inside the graph.
#[derive(Debug, Clone, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum StreamRef {
    Input { index: usize, kind: StreamKind },
    Pad { label: PadLabel },
}

impl StreamRef {
    pub fn input(index: usize, kind: StreamKind) -> Self {
        StreamRef::Input { index, kind }
    }

    pub fn pad(label: impl Into<String>) -> Self {
        StreamRef::Pad {
            label: PadLabel::new(label),
        }
    }

    pub fn is_raw_input(&self) -> bool {
        matches!(self, StreamRef::Input { .. })
    }

    /// Form used as a fragment input: `[0:v]` or `[label]`.
    pub fn as_filter_input(&self) -> String {
        match self {
            StreamRef::Input { index, kind } => format!("[{index}:{}]", kind.specifier()),
            StreamRef::Pad { label } => label.to_string(),
        }
    }

    /// Form used with `-map`: `0:v` or `[label]`.
    pub fn as_map_target(&self) -> String {
        match self {
            StreamRef::Input { index, kind } => format!("{index}:{}", kind.specifier()),
            StreamRef::Pad { label } => label.to_string(),
        }
    }
}

/// One named unit of the processing graph: a filter chain between pads.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FilterFragment {
    pub name: String,
    pub inputs: Vec<StreamRef>,
    pub filters: Vec<String>,
    pub outputs: Vec<PadLabel>,
}

impl FilterFragment {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inputs: Vec::new(),
            filters: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn input(mut self, stream: StreamRef) -> Self {
        self.inputs.push(stream);
        self
    }

    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.filters.push(filter.into());
        self
    }

    pub fn output(mut self, label: impl Into<String>) -> Self {
        self.outputs.push(PadLabel::new(label));
        self
    }

    pub fn render(&self) -> String {
        let mut rendered = String::new();
        for input in &self.inputs {
            rendered.push_str(&input.as_filter_input());
        }
        rendered.push_str(&self.filters.join(","));
        for output in &self.outputs {
            rendered.push_str(&output.to_string());
        }
        rendered
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Default)]
pub struct FilterGraph {
    pub fragments: Vec<FilterFragment>,
}

impl FilterGraph {
    pub fn new(fragments: Vec<FilterFragment>) -> Self {
        Self { fragments }
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    pub fn fragment(&self, name: &str) -> Option<&FilterFragment> {
        self.fragments.iter().find(|fragment| fragment.name == name)
    }

    pub fn render(&self) -> String {
        self.fragments
            .iter()
            .map(FilterFragment::render)
            .collect::<Vec<_>>()
            .join(";")
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PlanInput {
    pub index: usize,
    pub role: MediaRole,
    pub path: PathBuf,
    /// Options placed before `-i`, e.g. `-loop 1` for still images.
    pub options: Vec<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum VideoCodec {
    Copy,
    Encode {
        codec: String,
        preset: Option<String>,
        tune: Option<String>,
        pix_fmt: String,
    },
}

impl VideoCodec {
    pub fn is_copy(&self) -> bool {
        matches!(self, VideoCodec::Copy)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum AudioCodec {
    Copy,
    Encode { codec: String, bitrate: String },
}

impl AudioCodec {
    pub fn is_copy(&self) -> bool {
        matches!(self, AudioCodec::Copy)
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DurationDirective {
    /// Container length of the single contributing input.
    Natural,
    /// Stop at the end of the shortest mapped stream.
    Shortest,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StreamMapping {
    pub video: StreamRef,
    pub audio: Option<StreamRef>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EncodePlan {
    inputs: Vec<PlanInput>,
    graph: Option<FilterGraph>,
    mapping: StreamMapping,
    video_codec: VideoCodec,
    audio_codec: Option<AudioCodec>,
    duration: DurationDirective,
    faststart: bool,
}

impl EncodePlan {
    pub fn new(
        inputs: Vec<PlanInput>,
        graph: Option<FilterGraph>,
        mapping: StreamMapping,
        video_codec: VideoCodec,
        audio_codec: Option<AudioCodec>,
        duration: DurationDirective,
        faststart: bool,
    ) -> PlanResult<Self> {
        let plan = Self {
            inputs,
            graph: graph.filter(|graph| !graph.is_empty()),
            mapping,
            video_codec,
            audio_codec,
            duration,
            faststart,
        };
        plan.validate()?;
        Ok(plan)
    }

    pub fn inputs(&self) -> &[PlanInput] {
        &self.inputs
    }

    pub fn input_for(&self, role: MediaRole) -> Option<&PlanInput> {
        self.inputs.iter().find(|input| input.role == role)
    }

    pub fn graph(&self) -> Option<&FilterGraph> {
        self.graph.as_ref()
    }

    pub fn mapping(&self) -> &StreamMapping {
        &self.mapping
    }

    pub fn video_codec(&self) -> &VideoCodec {
        &self.video_codec
    }

    pub fn audio_codec(&self) -> Option<&AudioCodec> {
        self.audio_codec.as_ref()
    }

    pub fn duration(&self) -> DurationDirective {
        self.duration
    }

    /// Every pad consumed by a fragment or the mapping must be produced by an
    /// earlier fragment; every raw reference must name an existing input.
    pub fn validate(&self) -> PlanResult<()> {
        let mut produced: HashSet<&PadLabel> = HashSet::new();
        if let Some(graph) = &self.graph {
            for fragment in &graph.fragments {
                for input in &fragment.inputs {
                    self.check_reference(input, &produced)?;
                }
                for output in &fragment.outputs {
                    if !produced.insert(output) {
                        return Err(PlanError::DuplicatePad {
                            label: output.as_str().to_string(),
                        });
                    }
                }
            }
        }
        self.check_reference(&self.mapping.video, &produced)?;
        if let Some(audio) = &self.mapping.audio {
            self.check_reference(audio, &produced)?;
        }
        Ok(())
    }

    fn check_reference(&self, stream: &StreamRef, produced: &HashSet<&PadLabel>) -> PlanResult<()> {
        match stream {
            StreamRef::Input { index, .. } if *index >= self.inputs.len() => {
                Err(PlanError::InputOutOfRange {
                    index: *index,
                    inputs: self.inputs.len(),
                })
            }
            StreamRef::Input { .. } => Ok(()),
            StreamRef::Pad { label } if produced.contains(label) => Ok(()),
            StreamRef::Pad { label } => Err(PlanError::DanglingPad {
                label: label.as_str().to_string(),
            }),
        }
    }

    /// Engine arguments after the global flags, ending with the output path.
    pub fn render_args(&self, output: &Path) -> Vec<String> {
        let mut args = Vec::new();
        for input in &self.inputs {
            args.extend(input.options.iter().cloned());
            args.push("-i".to_string());
            args.push(input.path.to_string_lossy().to_string());
        }
        if let Some(graph) = &self.graph {
            args.push("-filter_complex".to_string());
            args.push(graph.render());
        }
        args.push("-map".to_string());
        args.push(self.mapping.video.as_map_target());
        if let Some(audio) = &self.mapping.audio {
            args.push("-map".to_string());
            args.push(audio.as_map_target());
        }
        match &self.video_codec {
            VideoCodec::Copy => {
                args.push("-c:v".to_string());
                args.push("copy".to_string());
            }
            VideoCodec::Encode {
                codec,
                preset,
                tune,
                pix_fmt,
            } => {
                args.push("-c:v".to_string());
                args.push(codec.clone());
                if let Some(preset) = preset {
                    args.push("-preset".to_string());
                    args.push(preset.clone());
                }
                if let Some(tune) = tune {
                    args.push("-tune".to_string());
                    args.push(tune.clone());
                }
                args.push("-pix_fmt".to_string());
                args.push(pix_fmt.clone());
            }
        }
        match &self.audio_codec {
            Some(AudioCodec::Copy) => {
                args.push("-c:a".to_string());
                args.push("copy".to_string());
            }
            Some(AudioCodec::Encode { codec, bitrate }) => {
                args.push("-c:a".to_string());
                args.push(codec.clone());
                args.push("-b:a".to_string());
                args.push(bitrate.clone());
            }
            None => args.push("-an".to_string()),
        }
        if self.duration == DurationDirective::Shortest {
            args.push("-shortest".to_string());
        }
        if self.faststart {
            args.push("-movflags".to_string());
            args.push("+faststart".to_string());
        }
        args.push(output.to_string_lossy().to_string());
        args
    }

    /// One-line description for logs.
    pub fn summary(&self) -> String {
        let fragments = self
            .graph
            .as_ref()
            .map(|graph| {
                graph
                    .fragments
                    .iter()
                    .map(|fragment| fragment.name.as_str())
                    .collect::<Vec<_>>()
                    .join("+")
            })
            .filter(|names| !names.is_empty())
            .unwrap_or_else(|| "none".to_string());
        let video = if self.video_codec.is_copy() { "copy" } else { "encode" };
        let audio = match &self.audio_codec {
            Some(AudioCodec::Copy) => "copy",
            Some(AudioCodec::Encode { .. }) => "encode",
            None => "none",
        };
        format!(
            "inputs={} fragments={fragments} video={video} audio={audio}",
            self.inputs.len()
        )
    }
}
