/// Renderer: draws playback state into the fixed layout regions and blits
/// each region to the display sink as soon as it is drawn.
use std::io::{Seek, Write};

use chrono::{Local, NaiveDateTime, Timelike};
use image::imageops::FilterType;
use tiny_skia::ColorU8;
use tracing::{debug, warn};

use super::canvas::{line_height, Canvas};
use super::fonts::Fonts;
use super::layout::{Region, ARTWORK, CLOCK, METADATA, PROGRESS};
use super::sink::DisplaySink;
use crate::playback::model::PlaybackItem;

const BACKGROUND: ColorU8 = ColorU8::from_rgba(0, 0, 0, 255);
const FOREGROUND: ColorU8 = ColorU8::from_rgba(255, 255, 255, 255);
const SECONDARY: ColorU8 = ColorU8::from_rgba(170, 170, 170, 255);
const PROGRESS_BAR: ColorU8 = ColorU8::from_rgba(255, 0, 0, 255);

const CLOCK_SIZE: f32 = 32.0;
const DATE_SIZE: f32 = 20.0;
const TITLE_SIZE: f32 = 20.0;
const BODY_SIZE: f32 = 14.0;
const MARGIN: i32 = 6;

/// Characters per line for artist and album
pub const WRAP_COLUMNS: usize = 30;
/// Lines per wrapped field
pub const WRAP_LINES: usize = 6;

pub struct Renderer<W> {
    sink: DisplaySink<W>,
    fonts: Fonts,
}

impl<W: Write + Seek> Renderer<W> {
    pub fn new(sink: DisplaySink<W>, fonts: Fonts) -> Self {
        Self { sink, fonts }
    }

    pub fn sink(&self) -> &DisplaySink<W> {
        &self.sink
    }

    /// Paint the whole display with the background colour
    pub fn clear(&mut self) {
        let screen = Region::new("screen", 0, 0, self.sink.width(), self.sink.height());
        let Some(mut canvas) = Canvas::new(screen.width, screen.height) else {
            return;
        };
        canvas.fill(BACKGROUND);
        self.present(&screen, &canvas);
    }

    /// Redraw the clock from local time. Returns true if it was drawn.
    pub fn render_clock(&mut self, force: bool) -> bool {
        self.render_clock_at(Local::now().naive_local(), force)
    }

    /// Unforced redraws only happen on seconds 0, 15, 30 and 45
    pub fn render_clock_at(&mut self, now: NaiveDateTime, force: bool) -> bool {
        if !force && now.second() % 15 != 0 {
            return false;
        }
        let Some(mut canvas) = Canvas::new(CLOCK.width, CLOCK.height) else {
            return false;
        };
        canvas.fill(BACKGROUND);
        if let Some(font) = &self.fonts.clock {
            canvas.draw_text(
                font,
                CLOCK_SIZE,
                MARGIN,
                4,
                &now.format("%H:%M").to_string(),
                FOREGROUND,
            );
            canvas.draw_text(
                font,
                DATE_SIZE,
                120,
                12,
                &now.format("%a, %d %B %Y").to_string(),
                SECONDARY,
            );
        }
        self.present(&CLOCK, &canvas);
        true
    }

    /// Red bar proportional to `seek / duration`, both in seconds
    pub fn render_progress(&mut self, seek: f64, duration: f64) {
        let Some(mut canvas) = Canvas::new(PROGRESS.width, PROGRESS.height) else {
            return;
        };
        canvas.fill(BACKGROUND);
        let fill = progress_fill(seek, duration, PROGRESS.width);
        canvas.fill_rect(0, 0, fill, PROGRESS.height, PROGRESS_BAR);
        self.present(&PROGRESS, &canvas);
    }

    pub fn render_metadata(&mut self, item: &PlaybackItem) {
        let Some(mut canvas) = Canvas::new(METADATA.width, METADATA.height) else {
            return;
        };
        canvas.fill(BACKGROUND);

        let lines = MetadataLines::from_item(item);
        let mut y = MARGIN;
        if let Some(font) = &self.fonts.title {
            canvas.draw_text(font, TITLE_SIZE, MARGIN, y, &lines.title, FOREGROUND);
            y += line_height(font, TITLE_SIZE) as i32 + MARGIN;
        }
        if let Some(font) = &self.fonts.body {
            let step = line_height(font, BODY_SIZE) as i32;
            for line in &lines.artist {
                canvas.draw_text(font, BODY_SIZE, MARGIN, y, line, FOREGROUND);
                y += step;
            }
            y += MARGIN;
            for line in &lines.album {
                canvas.draw_text(font, BODY_SIZE, MARGIN, y, line, SECONDARY);
                y += step;
            }
        }
        self.present(&METADATA, &canvas);
    }

    /// Decode, scale and draw album art. Undecodable bytes leave the region as it was.
    pub fn render_artwork(&mut self, bytes: &[u8]) {
        let image = match image::load_from_memory(bytes) {
            Ok(image) => image,
            Err(e) => {
                warn!(region = ARTWORK.name, "Cannot decode artwork: {}", e);
                return;
            }
        };
        let scaled = image
            .resize_exact(ARTWORK.width, ARTWORK.height, FilterType::Triangle)
            .to_rgba8();
        let Some(mut canvas) = Canvas::new(ARTWORK.width, ARTWORK.height) else {
            return;
        };
        canvas.fill(BACKGROUND);
        canvas.draw_image(0, 0, &scaled);
        self.present(&ARTWORK, &canvas);
    }

    /// Blank the artwork region, for items without art or with art still loading
    pub fn clear_artwork(&mut self) {
        let Some(mut canvas) = Canvas::new(ARTWORK.width, ARTWORK.height) else {
            return;
        };
        canvas.fill(BACKGROUND);
        self.present(&ARTWORK, &canvas);
    }

    fn present(&mut self, region: &Region, canvas: &Canvas) {
        match self.sink.blit(region.x, region.y, canvas) {
            Ok(()) => debug!(region = region.name, "Region updated"),
            Err(e) => warn!(region = region.name, "Display write failed: {}", e),
        }
    }
}

/// Text of the metadata region, already wrapped
#[derive(Debug, PartialEq)]
pub struct MetadataLines {
    pub title: String,
    pub artist: Vec<String>,
    pub album: Vec<String>,
}

impl MetadataLines {
    pub fn from_item(item: &PlaybackItem) -> Self {
        Self {
            title: item.title.clone(),
            artist: wrap_field(&item.artist, WRAP_COLUMNS, WRAP_LINES),
            album: wrap_field(item.display_album(), WRAP_COLUMNS, WRAP_LINES),
        }
    }
}

/// Whole pixels of a `width`-wide bar covered at `seek` of `duration`
pub fn progress_fill(seek: f64, duration: f64, width: u32) -> u32 {
    if duration.is_nan() || duration <= 0.0 || seek.is_nan() {
        return 0;
    }
    let ratio = (seek / duration).clamp(0.0, 1.0);
    (ratio * width as f64) as u32
}

/// Greedy word wrap at `columns` characters. Words longer than a line are split.
pub fn wrap_text(text: &str, columns: usize) -> Vec<String> {
    let mut lines = Vec::new();
    if columns == 0 {
        return lines;
    }
    let mut current = String::new();
    let mut current_len = 0;

    for word in text.split_whitespace() {
        let mut chars: Vec<char> = word.chars().collect();
        while chars.len() > columns {
            if current_len > 0 {
                lines.push(std::mem::take(&mut current));
                current_len = 0;
            }
            let rest = chars.split_off(columns);
            lines.push(chars.into_iter().collect());
            chars = rest;
        }
        if chars.is_empty() {
            continue;
        }

        let needed = if current_len == 0 {
            chars.len()
        } else {
            current_len + 1 + chars.len()
        };
        if needed > columns {
            lines.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if current_len > 0 {
            current.push(' ');
            current_len += 1;
        }
        current_len += chars.len();
        current.extend(chars);
    }
    if current_len > 0 {
        lines.push(current);
    }
    lines
}

pub fn wrap_field(text: &str, columns: usize, max_lines: usize) -> Vec<String> {
    let mut lines = wrap_text(text, columns);
    lines.truncate(max_lines);
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::layout::{SCREEN_HEIGHT, SCREEN_WIDTH};
    use chrono::NaiveDate;
    use std::io::Cursor;

    fn renderer() -> Renderer<Cursor<Vec<u8>>> {
        let size = (SCREEN_WIDTH * SCREEN_HEIGHT * 4) as usize;
        let sink = DisplaySink::new(Cursor::new(vec![0u8; size]), SCREEN_WIDTH, SCREEN_HEIGHT);
        Renderer::new(sink, Fonts::none())
    }

    fn pixel(renderer: &Renderer<Cursor<Vec<u8>>>, x: u32, y: u32) -> [u8; 4] {
        let bytes = renderer.sink().device().get_ref();
        let i = (4 * (y * SCREEN_WIDTH + x)) as usize;
        [bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]
    }

    fn red_pixels_in_row(renderer: &Renderer<Cursor<Vec<u8>>>, y: u32) -> usize {
        (0..SCREEN_WIDTH)
            .filter(|x| pixel(renderer, *x, y) == [0, 0, 255, 255])
            .count()
    }

    fn region_untouched(renderer: &Renderer<Cursor<Vec<u8>>>, region: &Region) -> bool {
        (region.y..region.bottom())
            .all(|y| (region.x..region.right()).all(|x| pixel(renderer, x, y) == [0; 4]))
    }

    #[test]
    fn test_progress_fill() {
        assert_eq!(progress_fill(0.0, 0.0, 480), 0);
        assert_eq!(progress_fill(10.0, -1.0, 480), 0);
        assert_eq!(progress_fill(240.0, 480.0, 480), 240);
        assert_eq!(progress_fill(1.0, 3.0, 480), 160);
        assert_eq!(progress_fill(900.0, 480.0, 480), 480);
        assert_eq!(progress_fill(-5.0, 480.0, 480), 0);
    }

    #[test]
    fn test_render_progress_zero_duration_draws_no_bar() {
        let mut r = renderer();
        r.render_progress(0.0, 0.0);
        assert_eq!(red_pixels_in_row(&r, PROGRESS.y), 0);
        // region still repainted with the background
        assert_eq!(pixel(&r, 0, PROGRESS.y), [0, 0, 0, 255]);
    }

    #[test]
    fn test_render_progress_half() {
        let mut r = renderer();
        r.render_progress(240.0, 480.0);
        for y in PROGRESS.y..PROGRESS.bottom() {
            assert_eq!(red_pixels_in_row(&r, y), 240);
        }
        assert!(region_untouched(&r, &CLOCK));
        assert!(region_untouched(&r, &ARTWORK));
    }

    #[test]
    fn test_metadata_lines_for_item_without_album() {
        let item = PlaybackItem {
            title: "Song".into(),
            artist: "Band".into(),
            ..Default::default()
        };
        let lines = MetadataLines::from_item(&item);
        assert_eq!(lines.title, "Song");
        assert_eq!(lines.artist, vec!["Band"]);
        assert!(lines.album.is_empty());
    }

    #[test]
    fn test_metadata_lines_fall_back_to_subtitle() {
        let item = PlaybackItem {
            title: "Episode 12".into(),
            subtitle: Some("Morning Show".into()),
            ..Default::default()
        };
        assert_eq!(MetadataLines::from_item(&item).album, vec!["Morning Show"]);
    }

    #[test]
    fn test_render_metadata_only_touches_its_region() {
        let mut r = renderer();
        r.render_metadata(&PlaybackItem::default());
        assert_eq!(pixel(&r, METADATA.x, METADATA.y), [0, 0, 0, 255]);
        assert!(region_untouched(&r, &ARTWORK));
        assert!(region_untouched(&r, &PROGRESS));
    }

    #[test]
    fn test_wrap_text() {
        assert_eq!(
            wrap_text("The quick brown fox jumps over the lazy dog", 15),
            vec!["The quick brown", "fox jumps over", "the lazy dog"]
        );
        assert_eq!(wrap_text("abcdefgh", 3), vec!["abc", "def", "gh"]);
        assert!(wrap_text("   ", 10).is_empty());
    }

    #[test]
    fn test_wrap_field_limits_lines() {
        let text = "one two three four five six seven eight";
        assert_eq!(wrap_field(text, 5, 6).len(), 6);
        assert_eq!(wrap_field(text, 5, 6)[5], "six");
    }

    #[test]
    fn test_undecodable_artwork_leaves_region_untouched() {
        let mut r = renderer();
        r.render_artwork(b"definitely not an image");
        assert!(region_untouched(&r, &ARTWORK));
    }

    #[test]
    fn test_artwork_is_scaled_into_region() {
        let mut png = Cursor::new(Vec::new());
        image::RgbaImage::from_pixel(16, 16, image::Rgba([0, 255, 0, 255]))
            .write_to(&mut png, image::ImageFormat::Png)
            .unwrap();

        let mut r = renderer();
        r.render_artwork(png.get_ref());

        for (x, y) in [(ARTWORK.x, ARTWORK.y), (ARTWORK.right() - 1, ARTWORK.bottom() - 1)] {
            let [b, g, red, a] = pixel(&r, x, y);
            assert!(g > 200 && b < 50 && red < 50 && a == 255);
        }
        assert!(region_untouched(&r, &METADATA));
    }

    #[test]
    fn test_clock_is_throttled_unless_forced() {
        let mut r = renderer();
        let at = |s| {
            NaiveDate::from_ymd_opt(2026, 10, 17)
                .unwrap()
                .and_hms_opt(12, 0, s)
                .unwrap()
        };

        assert!(!r.render_clock_at(at(7), false));
        assert!(region_untouched(&r, &CLOCK));

        assert!(r.render_clock_at(at(30), false));
        assert_eq!(pixel(&r, 0, 0), [0, 0, 0, 255]);

        assert!(r.render_clock_at(at(7), true));
    }

    #[test]
    fn test_clear_paints_whole_screen() {
        let mut r = renderer();
        r.clear();
        assert_eq!(pixel(&r, 0, 0), [0, 0, 0, 255]);
        assert_eq!(pixel(&r, SCREEN_WIDTH - 1, SCREEN_HEIGHT - 1), [0, 0, 0, 255]);
    }
}
