use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use super::models::FontWeight;

/// Locates a renderable font file for a weight class.
pub trait FontResolver: Send + Sync + fmt::Debug {
    fn resolve(&self, weight: FontWeight) -> Option<PathBuf>;
}

/// Resolver that never finds anything; overlays fall back to the family name.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoFontResolver;

impl FontResolver for NoFontResolver {
    fn resolve(&self, _weight: FontWeight) -> Option<PathBuf> {
        None
    }
}

/// Fixed weight-to-file table, mostly for tests and pinned deployments.
#[derive(Debug, Default, Clone)]
pub struct StaticFontResolver {
    fonts: HashMap<FontWeight, PathBuf>,
}

impl StaticFontResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_font(mut self, weight: FontWeight, path: impl Into<PathBuf>) -> Self {
        self.fonts.insert(weight, path.into());
        self
    }
}

impl FontResolver for StaticFontResolver {
    fn resolve(&self, weight: FontWeight) -> Option<PathBuf> {
        self.fonts.get(&weight).cloned()
    }
}

/// Scans font directories for `.ttf`/`.otf` files whose name carries the
/// weight keyword. Sans families win over others; ties break on path order.
/// The scan runs once at construction so lookups never touch the filesystem.
#[derive(Debug)]
pub struct DirectoryFontResolver {
    dirs: Vec<PathBuf>,
    fonts: HashMap<FontWeight, PathBuf>,
}

impl DirectoryFontResolver {
    pub fn new(dirs: Vec<PathBuf>) -> Self {
        let candidates = candidates(&dirs);
        let weights = [FontWeight::Regular, FontWeight::Bold, FontWeight::Black];
        let fonts: HashMap<FontWeight, PathBuf> = weights
            .into_iter()
            .filter_map(|weight| best_match(&candidates, weight).map(|path| (weight, path)))
            .collect();
        debug!(
            dirs = dirs.len(),
            candidates = candidates.len(),
            resolved = fonts.len(),
            "font directories scanned"
        );
        Self { dirs, fonts }
    }

    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }
}

impl FontResolver for DirectoryFontResolver {
    fn resolve(&self, weight: FontWeight) -> Option<PathBuf> {
        self.fonts.get(&weight).cloned()
    }
}

fn candidates(dirs: &[PathBuf]) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = dirs
        .iter()
        .filter(|dir| dir.is_dir())
        .flat_map(|dir| {
            WalkDir::new(dir)
                .follow_links(true)
                .into_iter()
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.file_type().is_file())
                .map(|entry| entry.into_path())
                .filter(|path| is_font_file(path))
        })
        .collect();
    files.sort();
    files
}

fn best_match(candidates: &[PathBuf], weight: FontWeight) -> Option<PathBuf> {
    let mut best: Option<(u8, &PathBuf)> = None;
    for path in candidates {
        let Some(stem) = path.file_stem().map(|s| s.to_string_lossy().to_lowercase()) else {
            continue;
        };
        if !matches_weight(&stem, weight) {
            continue;
        }
        let score = if stem.contains("sans") { 2 } else { 1 };
        if best.map_or(true, |(current, _)| score > current) {
            best = Some((score, path));
        }
    }
    best.map(|(_, path)| path.clone())
}

fn is_font_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("ttf") || ext.eq_ignore_ascii_case("otf"))
        .unwrap_or(false)
}

const WEIGHT_KEYWORDS: [&str; 7] = [
    "thin", "light", "medium", "semibold", "bold", "black", "heavy",
];

fn matches_weight(stem: &str, weight: FontWeight) -> bool {
    let italic = stem.contains("italic") || stem.contains("oblique");
    if italic {
        return false;
    }
    match weight {
        FontWeight::Bold => {
            stem.contains("bold") && !stem.contains("semibold") && !stem.contains("extrabold")
        }
        FontWeight::Black => stem.contains("black") || stem.contains("heavy"),
        FontWeight::Regular => {
            stem.contains("regular") || !WEIGHT_KEYWORDS.iter().any(|kw| stem.contains(kw))
        }
    }
}
