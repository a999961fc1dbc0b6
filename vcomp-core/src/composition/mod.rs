//! Composition planning: turns the set of present inputs into one
//! [`EncodePlan`] for the encoding engine.

pub mod audio;
pub mod error;
pub mod fonts;
pub mod graph;
pub mod models;
pub mod overlay;
pub mod planner;

pub use audio::{AudioMixBuilder, AudioPlanFragment, AudioPresence};
pub use error::{PlanError, PlanResult};
pub use fonts::{DirectoryFontResolver, FontResolver, NoFontResolver, StaticFontResolver};
pub use graph::{
    AudioCodec, DurationDirective, EncodePlan, FilterFragment, FilterGraph, PadLabel, PlanInput,
    StreamKind, StreamMapping, StreamRef, VideoCodec,
};
pub use models::{
    validate_captions, validate_styles, Caption, CaptionPosition, CaptionStyle, FontWeight,
    StyleTable, DEFAULT_STYLE,
};
pub use overlay::{escape_text, CaptionOverlayBuilder, OverlayFragment};
pub use planner::{CompositionInputs, CompositionPlanner};
