use std::sync::Arc;

use serde::Serialize;
use tracing::warn;

use super::fonts::{FontResolver, NoFontResolver};
use super::graph::{FilterFragment, StreamRef};
use super::models::{Caption, CaptionPosition, CaptionStyle, StyleTable};
use crate::config::CaptionsSection;

pub const VIDEO_OUTPUT_PAD: &str = "vout";

/// Result of building caption overlays. An empty caption list yields the
/// identity: no fragment, and the source stream passes through unchanged.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverlayFragment {
    pub fragment: Option<FilterFragment>,
    pub output: StreamRef,
}

impl OverlayFragment {
    pub fn identity(source: StreamRef) -> Self {
        Self {
            fragment: None,
            output: source,
        }
    }

    pub fn is_identity(&self) -> bool {
        self.fragment.is_none()
    }

    pub fn draw_count(&self) -> usize {
        self.fragment
            .as_ref()
            .map(|fragment| fragment.filters.len())
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone)]
pub struct CaptionOverlayBuilder {
    resolver: Arc<dyn FontResolver>,
    settings: CaptionsSection,
}

impl CaptionOverlayBuilder {
    pub fn new(resolver: Arc<dyn FontResolver>, settings: CaptionsSection) -> Self {
        Self { resolver, settings }
    }

    /// One `drawtext` per caption, chained in list order, so later captions
    /// paint over earlier ones when their windows overlap.
    pub fn build_overlay(
        &self,
        source: StreamRef,
        captions: &[Caption],
        styles: &StyleTable,
    ) -> OverlayFragment {
        if captions.is_empty() {
            return OverlayFragment::identity(source);
        }
        let mut fragment = FilterFragment::new("captions").input(source);
        for caption in captions {
            let (style, found) = styles.resolve(&caption.style);
            if !found {
                warn!(style = %caption.style, "unknown caption style, using default");
            }
            fragment = fragment.filter(self.draw_text(caption, style));
        }
        OverlayFragment {
            fragment: Some(fragment.output(VIDEO_OUTPUT_PAD)),
            output: StreamRef::pad(VIDEO_OUTPUT_PAD),
        }
    }

    fn draw_text(&self, caption: &Caption, style: &CaptionStyle) -> String {
        let mut options = Vec::with_capacity(12);
        match self.resolver.resolve(style.weight) {
            Some(path) => options.push(format!(
                "fontfile={}",
                escape_text(&path.to_string_lossy())
            )),
            None => {
                warn!(
                    weight = %style.weight,
                    family = %self.settings.fallback_font_family,
                    "no font file for weight, requesting generic family"
                );
                options.push(format!(
                    "font={}",
                    escape_text(&self.settings.fallback_font_family)
                ));
            }
        }
        options.push(format!("text={}", escape_text(&caption.text)));
        options.push("expansion=none".to_string());
        options.push(format!("fontsize={}", style.size));
        options.push(format!("fontcolor={}", escape_text(&color(&style.color))));
        if style.outline_width > 0 {
            options.push(format!("borderw={}", style.outline_width));
            options.push(format!(
                "bordercolor={}",
                escape_text(&color(&style.outline_color))
            ));
        }
        if style.shadow {
            options.push("shadowx=2:shadowy=2:shadowcolor=black@0.6".to_string());
        }
        options.push("x=(w-text_w)/2".to_string());
        options.push(format!("y={}", self.vertical_offset(caption.position)));
        options.push(format!(
            "enable='gte(t,{})*lt(t,{})'",
            seconds(caption.start),
            seconds(caption.end)
        ));
        format!("drawtext={}", options.join(":"))
    }

    fn vertical_offset(&self, position: CaptionPosition) -> String {
        match position {
            CaptionPosition::Top => self.settings.top_margin.to_string(),
            CaptionPosition::Center => "(h-text_h)/2".to_string(),
            CaptionPosition::Bottom => format!("h-text_h-{}", self.settings.bottom_margin),
        }
    }
}

impl Default for CaptionOverlayBuilder {
    fn default() -> Self {
        Self::new(Arc::new(NoFontResolver), CaptionsSection::default())
    }
}

/// Escapes literal text for a filter option value inside a filter graph.
///
/// Two levels apply: the option parser (`\`, `'` and `:`) and then the graph
/// parser (`\`, `'`, `[`, `]`, `,` and `;`). No quoting is used.
pub fn escape_text(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len() * 2);
    for ch in text.chars() {
        match ch {
            '\\' => escaped.push_str(r"\\\\"),
            '\'' => escaped.push_str(r"\\\'"),
            ':' => escaped.push_str(r"\\:"),
            '[' | ']' | ',' | ';' => {
                escaped.push('\\');
                escaped.push(ch);
            }
            _ => escaped.push(ch),
        }
    }
    escaped
}

fn color(value: &str) -> String {
    match value.strip_prefix('#') {
        Some(hex) => format!("0x{hex}"),
        None => value.to_string(),
    }
}

fn seconds(value: f64) -> String {
    let formatted = format!("{value:.3}");
    let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composition::fonts::StaticFontResolver;
    use crate::composition::graph::StreamKind;
    use crate::composition::models::FontWeight;

    /// One parser level: a backslash makes the next character literal.
    fn unescape_once(value: &str) -> String {
        let mut out = String::new();
        let mut chars = value.chars();
        while let Some(ch) = chars.next() {
            if ch == '\\' {
                if let Some(next) = chars.next() {
                    out.push(next);
                }
            } else {
                out.push(ch);
            }
        }
        out
    }

    fn video() -> StreamRef {
        StreamRef::input(0, StreamKind::Video)
    }

    #[test]
    fn empty_caption_list_is_identity() {
        let overlay =
            CaptionOverlayBuilder::default().build_overlay(video(), &[], &StyleTable::new());
        assert!(overlay.is_identity());
        assert_eq!(overlay.output, video());
        assert_eq!(overlay.draw_count(), 0);
    }

    #[test]
    fn escapes_graph_delimiters() {
        let escaped = escape_text("Hello: [test]");
        assert_eq!(escaped, r"Hello\\: \[test\]");
        assert_eq!(unescape_once(&unescape_once(&escaped)), "Hello: [test]");

        for text in [r"C:\path", "it's", "a,b;c", r"\\'[:]"] {
            let escaped = escape_text(text);
            assert_eq!(unescape_once(&unescape_once(&escaped)), text, "{text}");
        }
    }

    #[test]
    fn renders_time_gated_draw_per_caption() {
        let resolver = StaticFontResolver::new().with_font(FontWeight::Bold, "/fonts/Sans-Bold.ttf");
        let builder = CaptionOverlayBuilder::new(Arc::new(resolver), CaptionsSection::default());
        let captions = vec![
            Caption::new("first", 0.0, 1.5),
            Caption::new("second", 1.0, 3.0).with_position(CaptionPosition::Top),
        ];
        let overlay = builder.build_overlay(video(), &captions, &StyleTable::new());
        assert_eq!(overlay.output, StreamRef::pad("vout"));
        assert_eq!(overlay.draw_count(), 2);
        let rendered = overlay.fragment.as_ref().unwrap().render();
        assert!(rendered.starts_with("[0:v]drawtext=fontfile=/fonts/Sans-Bold.ttf:text=first:"));
        assert!(rendered.ends_with("[vout]"));
        assert!(rendered.contains("y=h-text_h-50:enable='gte(t,0)*lt(t,1.5)'"));
        assert!(rendered.contains("text=second:"));
        assert!(rendered.contains("y=50:enable='gte(t,1)*lt(t,3)'"));
        assert!(rendered.contains("borderw=3:bordercolor=black"));
        assert!(rendered.contains("shadowcolor=black@0.6"));
        // Order is preserved: the later caption paints last.
        assert!(rendered.find("text=first").unwrap() < rendered.find("text=second").unwrap());
    }

    #[test]
    fn missing_font_and_style_degrade_gracefully() {
        let plain = CaptionStyle {
            weight: FontWeight::Regular,
            color: "#FFCC00".into(),
            outline_width: 0,
            shadow: false,
            ..CaptionStyle::default()
        };
        let styles = StyleTable::new().with_style("plain", plain);
        let captions = vec![
            Caption::new("styled", 0.0, 2.0)
                .with_style("plain")
                .with_position(CaptionPosition::Center),
            Caption::new("fallback", 2.0, 4.0).with_style("missing"),
        ];
        let overlay = CaptionOverlayBuilder::default().build_overlay(video(), &captions, &styles);
        let filters = &overlay.fragment.as_ref().unwrap().filters;
        assert!(filters[0].starts_with("drawtext=font=Sans:text=styled:"));
        assert!(filters[0].contains("fontcolor=0xFFCC00"));
        assert!(filters[0].contains("y=(h-text_h)/2"));
        assert!(!filters[0].contains("borderw"));
        assert!(!filters[0].contains("shadowx"));
        assert!(filters[1].contains("fontsize=48"));
        assert!(filters[1].contains("borderw=3"));
    }

    #[test]
    fn colors_cannot_add_options_or_filters() {
        let hostile = CaptionStyle {
            color: "white:text=INJECTED".into(),
            outline_color: "black,movie=x[v]".into(),
            ..CaptionStyle::default()
        };
        let styles = StyleTable::new().with_style("hostile", hostile);
        let captions = vec![Caption::new("hi", 0.0, 1.0).with_style("hostile")];
        let overlay = CaptionOverlayBuilder::default().build_overlay(video(), &captions, &styles);
        let filter = &overlay.fragment.as_ref().unwrap().filters[0];
        assert!(filter.contains(r"fontcolor=white\\:text=INJECTED"));
        assert!(filter.contains(r"bordercolor=black\,movie=x\[v\]"));
        assert_eq!(
            unescape_once(&unescape_once(r"white\\:text=INJECTED")),
            "white:text=INJECTED"
        );
    }

    #[test]
    fn seconds_are_trimmed() {
        assert_eq!(seconds(0.0), "0");
        assert_eq!(seconds(12.5), "12.5");
        assert_eq!(seconds(1.0 / 3.0), "0.333");
        assert_eq!(seconds(10.0), "10");
    }
}
