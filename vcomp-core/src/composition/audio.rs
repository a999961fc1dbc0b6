//! Audio branch selection.
//!
//! The presence of native audio, narration and music collapses into one of
//! six [`AudioPresence`] cases. Each case builds its own typed fragment and
//! every fragment resolves to exactly one output audio stream.

use serde::Serialize;

use super::graph::{FilterFragment, StreamKind, StreamRef};
use crate::config::MixSection;

/// Index of the video input; its native audio is `0:a`.
pub const VIDEO_INPUT: usize = 0;

pub const AUDIO_OUTPUT_PAD: &str = "aout";
const VOICE_PAD: &str = "voice";
const BACKGROUND_PAD: &str = "bgm";

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AudioPresence {
    /// No source at all; a silent track is synthesised.
    Silent,
    /// The video's own audio, untouched.
    Native,
    NarrationOnly,
    MusicOnly,
    /// Native audio acts as foreground against music.
    NativeWithMusic,
    /// Narration supersedes native audio entirely.
    NarrationWithMusic,
}

impl AudioPresence {
    pub fn classify(has_original_audio: bool, narration: bool, music: bool) -> Self {
        match (has_original_audio, narration, music) {
            (false, false, false) => AudioPresence::Silent,
            (true, false, false) => AudioPresence::Native,
            (_, true, false) => AudioPresence::NarrationOnly,
            (false, false, true) => AudioPresence::MusicOnly,
            (true, false, true) => AudioPresence::NativeWithMusic,
            (_, true, true) => AudioPresence::NarrationWithMusic,
        }
    }

    pub fn is_mix(&self) -> bool {
        matches!(
            self,
            AudioPresence::NativeWithMusic | AudioPresence::NarrationWithMusic
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AudioPresence::Silent => "silent",
            AudioPresence::Native => "native",
            AudioPresence::NarrationOnly => "narration_only",
            AudioPresence::MusicOnly => "music_only",
            AudioPresence::NativeWithMusic => "native_with_music",
            AudioPresence::NarrationWithMusic => "narration_with_music",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AudioPlanFragment {
    pub presence: AudioPresence,
    pub fragments: Vec<FilterFragment>,
    /// The single audio stream mapped to the output.
    pub output: StreamRef,
    /// Raw input streams feeding `output`.
    pub sources: Vec<StreamRef>,
    /// Whether any filter touched the stream; copy is only legal when false.
    pub processed: bool,
}

#[derive(Debug, Clone)]
pub struct AudioMixBuilder {
    settings: MixSection,
}

impl AudioMixBuilder {
    pub fn new(settings: MixSection) -> Self {
        Self { settings }
    }

    /// `narration` and `music` are the plan input indices of the present
    /// sources.
    pub fn build(
        &self,
        has_original_audio: bool,
        narration: Option<usize>,
        music: Option<usize>,
    ) -> AudioPlanFragment {
        let native = StreamRef::input(VIDEO_INPUT, StreamKind::Audio);
        match (has_original_audio, narration, music) {
            (_, Some(narration), Some(music)) => self.mix(
                AudioPresence::NarrationWithMusic,
                StreamRef::input(narration, StreamKind::Audio),
                StreamRef::input(music, StreamKind::Audio),
            ),
            (true, None, Some(music)) => self.mix(
                AudioPresence::NativeWithMusic,
                native,
                StreamRef::input(music, StreamKind::Audio),
            ),
            (_, Some(narration), None) => Self::remap(AudioPresence::NarrationOnly, narration),
            (false, None, Some(music)) => Self::remap(AudioPresence::MusicOnly, music),
            (true, None, None) => AudioPlanFragment {
                presence: AudioPresence::Native,
                fragments: Vec::new(),
                output: native.clone(),
                sources: vec![native],
                processed: false,
            },
            (false, None, None) => AudioPlanFragment {
                presence: AudioPresence::Silent,
                fragments: vec![self.silence()],
                output: StreamRef::pad(AUDIO_OUTPUT_PAD),
                sources: Vec::new(),
                processed: true,
            },
        }
    }

    /// A single source is mapped straight from its input and re-encoded.
    fn remap(presence: AudioPresence, index: usize) -> AudioPlanFragment {
        let source = StreamRef::input(index, StreamKind::Audio);
        AudioPlanFragment {
            presence,
            fragments: Vec::new(),
            output: source.clone(),
            sources: vec![source],
            processed: true,
        }
    }

    fn normalize(&self) -> String {
        format!(
            "aformat=sample_fmts={}:sample_rates={}:channel_layouts={}",
            self.settings.sample_format, self.settings.sample_rate, self.settings.channel_layout
        )
    }

    fn silence(&self) -> FilterFragment {
        FilterFragment::new("silence")
            .filter(format!(
                "anullsrc=channel_layout={}:sample_rate={}",
                self.settings.channel_layout, self.settings.sample_rate
            ))
            .output(AUDIO_OUTPUT_PAD)
    }

    fn mix(
        &self,
        presence: AudioPresence,
        foreground: StreamRef,
        background: StreamRef,
    ) -> AudioPlanFragment {
        let voice = FilterFragment::new("voice")
            .input(foreground.clone())
            .filter(self.normalize())
            .filter(format!("volume={}", self.settings.foreground_gain))
            .output(VOICE_PAD);
        let bgm = FilterFragment::new("bgm")
            .input(background.clone())
            .filter(self.normalize())
            .filter(format!("volume={}", self.settings.background_gain))
            .output(BACKGROUND_PAD);
        let mix = FilterFragment::new("mix")
            .input(StreamRef::pad(VOICE_PAD))
            .input(StreamRef::pad(BACKGROUND_PAD))
            .filter(format!(
                "amix=inputs=2:duration=shortest:dropout_transition={}",
                self.settings.dropout_transition_seconds
            ))
            .output(AUDIO_OUTPUT_PAD);
        AudioPlanFragment {
            presence,
            fragments: vec![voice, bgm, mix],
            output: StreamRef::pad(AUDIO_OUTPUT_PAD),
            sources: vec![foreground, background],
            processed: true,
        }
    }
}

impl Default for AudioMixBuilder {
    fn default() -> Self {
        Self::new(MixSection::default())
    }
}
