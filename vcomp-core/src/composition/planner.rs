use std::sync::Arc;

use tracing::debug;

use super::audio::{AudioMixBuilder, AudioPresence, VIDEO_INPUT};
use super::error::{PlanError, PlanResult};
use super::fonts::FontResolver;
use super::graph::{
    AudioCodec, DurationDirective, EncodePlan, FilterGraph, PlanInput, StreamKind, StreamMapping,
    StreamRef, VideoCodec,
};
use super::models::{validate_captions, validate_styles, Caption, StyleTable};
use super::overlay::CaptionOverlayBuilder;
use crate::config::{EncodeSection, VcompConfig};
use crate::media::{MediaAsset, MediaRole, OutputFormat};
use crate::probe::ProbeResult;

/// Everything the planner looks at for one full composition.
#[derive(Debug, Clone, Copy)]
pub struct CompositionInputs<'a> {
    pub video: Option<&'a MediaAsset>,
    pub narration: Option<&'a MediaAsset>,
    pub music: Option<&'a MediaAsset>,
    pub captions: &'a [Caption],
    pub styles: &'a StyleTable,
    pub probe: ProbeResult,
    pub format: OutputFormat,
}

#[derive(Debug, Clone)]
pub struct CompositionPlanner {
    audio: AudioMixBuilder,
    overlay: CaptionOverlayBuilder,
    encode: EncodeSection,
}

impl CompositionPlanner {
    pub fn new(
        audio: AudioMixBuilder,
        overlay: CaptionOverlayBuilder,
        encode: EncodeSection,
    ) -> Self {
        Self {
            audio,
            overlay,
            encode,
        }
    }

    pub fn from_config(config: &VcompConfig, fonts: Arc<dyn FontResolver>) -> Self {
        Self::new(
            AudioMixBuilder::new(config.mix.clone()),
            CaptionOverlayBuilder::new(fonts, config.captions.clone()),
            config.encode.clone(),
        )
    }

    /// Builds the encode plan for a video with optional narration, music and
    /// captions. Identical inputs always produce identical plans.
    pub fn plan(&self, inputs: CompositionInputs<'_>) -> PlanResult<EncodePlan> {
        validate_captions(inputs.captions)?;
        validate_styles(inputs.styles)?;
        let video = inputs.video.ok_or(PlanError::MissingInput {
            role: MediaRole::Video,
        })?;

        let mut plan_inputs = vec![plan_input(VIDEO_INPUT, video)];
        let narration = inputs.narration.map(|asset| push_input(&mut plan_inputs, asset));
        let music = inputs.music.map(|asset| push_input(&mut plan_inputs, asset));

        let mut fragments = Vec::new();

        let overlay = self.overlay.build_overlay(
            StreamRef::input(VIDEO_INPUT, StreamKind::Video),
            inputs.captions,
            inputs.styles,
        );
        let video_codec = if overlay.is_identity() {
            VideoCodec::Copy
        } else {
            self.video_encode(None)
        };
        let video_out = overlay.output.clone();
        fragments.extend(overlay.fragment);

        let audio = self
            .audio
            .build(inputs.probe.has_audio_stream, narration, music);
        let audio_codec = if audio.processed {
            self.audio_encode()
        } else {
            AudioCodec::Copy
        };
        fragments.extend(audio.fragments);

        let duration = if plan_inputs.len() == 1 && audio.presence != AudioPresence::Silent {
            DurationDirective::Natural
        } else {
            DurationDirective::Shortest
        };

        let plan = EncodePlan::new(
            plan_inputs,
            Some(FilterGraph::new(fragments)),
            StreamMapping {
                video: video_out,
                audio: Some(audio.output),
            },
            video_codec,
            Some(audio_codec),
            duration,
            self.faststart(inputs.format),
        )?;
        debug!(
            audio = audio.presence.as_str(),
            captions = inputs.captions.len(),
            plan = %plan.summary(),
            "composition planned"
        );
        Ok(plan)
    }

    /// Loops a still image for the length of an audio track.
    pub fn plan_still_image(
        &self,
        image: Option<&MediaAsset>,
        audio: Option<&MediaAsset>,
        format: OutputFormat,
    ) -> PlanResult<EncodePlan> {
        let image = image.ok_or(PlanError::MissingInput {
            role: MediaRole::Image,
        })?;
        let audio = audio.ok_or(PlanError::MissingInput {
            role: MediaRole::Music,
        })?;
        let mut looped = plan_input(0, image);
        looped.options = vec!["-loop".to_string(), "1".to_string()];
        let plan = EncodePlan::new(
            vec![looped, plan_input(1, audio)],
            None,
            StreamMapping {
                video: StreamRef::input(0, StreamKind::Video),
                audio: Some(StreamRef::input(1, StreamKind::Audio)),
            },
            self.video_encode(Some(self.encode.still_image_tune.clone())),
            Some(self.audio_encode()),
            DurationDirective::Shortest,
            self.faststart(format),
        )?;
        debug!(plan = %plan.summary(), "still image planned");
        Ok(plan)
    }

    fn video_encode(&self, tune: Option<String>) -> VideoCodec {
        // Still images keep the encoder's default preset.
        let preset = if tune.is_some() {
            None
        } else {
            Some(self.encode.video_preset.clone())
        };
        VideoCodec::Encode {
            codec: self.encode.video_codec.clone(),
            preset,
            tune,
            pix_fmt: self.encode.pix_fmt.clone(),
        }
    }

    fn audio_encode(&self) -> AudioCodec {
        AudioCodec::Encode {
            codec: self.encode.audio_codec.clone(),
            bitrate: self.encode.audio_bitrate.clone(),
        }
    }

    fn faststart(&self, format: OutputFormat) -> bool {
        self.encode.faststart && format.supports_faststart()
    }
}

impl Default for CompositionPlanner {
    fn default() -> Self {
        Self::new(
            AudioMixBuilder::default(),
            CaptionOverlayBuilder::default(),
            EncodeSection::default(),
        )
    }
}

fn plan_input(index: usize, asset: &MediaAsset) -> PlanInput {
    PlanInput {
        index,
        role: asset.role,
        path: asset.path.clone(),
        options: Vec::new(),
    }
}

fn push_input(inputs: &mut Vec<PlanInput>, asset: &MediaAsset) -> usize {
    let index = inputs.len();
    inputs.push(plan_input(index, asset));
    index
}
