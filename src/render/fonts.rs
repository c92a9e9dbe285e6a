/// Runtime-loaded TrueType fonts for the text regions.
use std::path::Path;

use rusttype::Font;
use tracing::{info, warn};

use crate::config::FontPaths;

/// A missing font leaves its text blank; the rest of the region still draws
pub struct Fonts {
    pub title: Option<Font<'static>>,
    pub body: Option<Font<'static>>,
    pub clock: Option<Font<'static>>,
}

impl Fonts {
    pub fn load(paths: &FontPaths) -> Self {
        Self {
            title: load_font(&paths.title),
            body: load_font(&paths.body),
            clock: load_font(&paths.clock),
        }
    }

    /// No fonts at all; regions are filled but no glyphs drawn
    pub fn none() -> Self {
        Self {
            title: None,
            body: None,
            clock: None,
        }
    }
}

fn load_font(path: &Path) -> Option<Font<'static>> {
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(e) => {
            warn!("Cannot read font {}: {}", path.display(), e);
            return None;
        }
    };
    match Font::try_from_vec(data) {
        Some(font) => {
            info!("Loaded font {}", path.display());
            Some(font)
        }
        None => {
            warn!("{} is not a usable TrueType font", path.display());
            None
        }
    }
}
