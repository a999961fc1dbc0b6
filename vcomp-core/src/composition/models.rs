use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::{PlanError, PlanResult};

pub const DEFAULT_STYLE: &str = "default";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum CaptionPosition {
    Top,
    Center,
    #[default]
    Bottom,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum FontWeight {
    #[default]
    Regular,
    Bold,
    Black,
}

impl FontWeight {
    pub fn as_str(&self) -> &'static str {
        match self {
            FontWeight::Regular => "regular",
            FontWeight::Bold => "bold",
            FontWeight::Black => "black",
        }
    }
}

impl fmt::Display for FontWeight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A timed text overlay. Times are seconds from the start of the video.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Caption {
    pub text: String,
    pub start: f64,
    pub end: f64,
    #[serde(default = "default_style_name")]
    pub style: String,
    #[serde(default)]
    pub position: CaptionPosition,
}

fn default_style_name() -> String {
    DEFAULT_STYLE.to_string()
}

impl Caption {
    pub fn new(text: impl Into<String>, start: f64, end: f64) -> Self {
        Self {
            text: text.into(),
            start,
            end,
            style: default_style_name(),
            position: CaptionPosition::default(),
        }
    }

    pub fn with_style(mut self, style: impl Into<String>) -> Self {
        self.style = style.into();
        self
    }

    pub fn with_position(mut self, position: CaptionPosition) -> Self {
        self.position = position;
        self
    }

    pub fn validate(&self, index: usize) -> PlanResult<()> {
        let timing_ok = self.start.is_finite()
            && self.end.is_finite()
            && self.start >= 0.0
            && self.end > self.start;
        if timing_ok {
            Ok(())
        } else {
            Err(PlanError::InvalidCaptionTiming {
                index,
                start: self.start,
                end: self.end,
            })
        }
    }
}

pub fn validate_captions(captions: &[Caption]) -> PlanResult<()> {
    captions
        .iter()
        .enumerate()
        .try_for_each(|(index, caption)| caption.validate(index))
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CaptionStyle {
    pub weight: FontWeight,
    pub size: u32,
    pub color: String,
    pub outline_color: String,
    pub outline_width: u32,
    pub shadow: bool,
}

impl Default for CaptionStyle {
    fn default() -> Self {
        Self {
            weight: FontWeight::Bold,
            size: 48,
            color: "white".to_string(),
            outline_color: "black".to_string(),
            outline_width: 3,
            shadow: true,
        }
    }
}

impl CaptionStyle {
    /// Colours end up inside a filter graph, so only names, hex values and
    /// an optional `@alpha` suffix are accepted.
    pub fn validate(&self, name: &str) -> PlanResult<()> {
        let fields = [("color", &self.color), ("outline_color", &self.outline_color)];
        for (field, value) in fields {
            if !is_color(value) {
                return Err(PlanError::InvalidStyleColor {
                    style: name.to_string(),
                    field,
                    value: value.clone(),
                });
            }
        }
        Ok(())
    }
}

pub fn validate_styles(styles: &StyleTable) -> PlanResult<()> {
    styles
        .entries
        .iter()
        .try_for_each(|(name, style)| style.validate(name))
}

fn is_color(value: &str) -> bool {
    let (base, alpha) = match value.split_once('@') {
        Some((base, alpha)) => (base, Some(alpha)),
        None => (value, None),
    };
    let base_ok = if let Some(hex) = base.strip_prefix("0x").or_else(|| base.strip_prefix('#')) {
        is_hex(hex) && matches!(hex.len(), 6 | 8)
    } else {
        !base.is_empty() && base.chars().all(|c| c.is_ascii_alphabetic())
    };
    let alpha_ok = match alpha {
        None => true,
        Some(alpha) => match alpha.strip_prefix("0x") {
            Some(hex) => is_hex(hex) && hex.len() <= 2,
            None => {
                alpha.chars().all(|c| c.is_ascii_digit() || c == '.')
                    && alpha
                        .parse::<f64>()
                        .map(|a| (0.0..=1.0).contains(&a))
                        .unwrap_or(false)
            }
        },
    };
    base_ok && alpha_ok
}

fn is_hex(value: &str) -> bool {
    !value.is_empty() && value.chars().all(|c| c.is_ascii_hexdigit())
}

/// Named caption styles. Always holds a `default` entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(from = "BTreeMap<String, CaptionStyle>", into = "BTreeMap<String, CaptionStyle>")]
pub struct StyleTable {
    entries: BTreeMap<String, CaptionStyle>,
}

impl StyleTable {
    pub fn new() -> Self {
        Self::from(BTreeMap::new())
    }

    pub fn with_style(mut self, name: impl Into<String>, style: CaptionStyle) -> Self {
        self.insert(name, style);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, style: CaptionStyle) {
        self.entries.insert(name.into(), style);
    }

    pub fn get(&self, name: &str) -> Option<&CaptionStyle> {
        self.entries.get(name)
    }

    pub fn default_style(&self) -> &CaptionStyle {
        // `From` guarantees the entry exists.
        &self.entries[DEFAULT_STYLE]
    }

    /// Unknown names fall back to `default`; the flag reports whether the
    /// requested name was found.
    pub fn resolve(&self, name: &str) -> (&CaptionStyle, bool) {
        match self.entries.get(name) {
            Some(style) => (style, true),
            None => (self.default_style(), false),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

impl Default for StyleTable {
    fn default() -> Self {
        Self::new()
    }
}

impl From<BTreeMap<String, CaptionStyle>> for StyleTable {
    fn from(mut entries: BTreeMap<String, CaptionStyle>) -> Self {
        entries
            .entry(DEFAULT_STYLE.to_string())
            .or_insert_with(CaptionStyle::default);
        Self { entries }
    }
}

impl From<StyleTable> for BTreeMap<String, CaptionStyle> {
    fn from(table: StyleTable) -> Self {
        table.entries
    }
}
