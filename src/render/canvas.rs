/// Pixel canvas: an RGBA bitmap to draw one region into before it is blitted.
use image::RgbaImage;
use rusttype::{point, Font, Scale};
use tiny_skia::{Color, ColorU8, Paint, Pixmap, Rect, Transform};

pub struct Canvas {
    pixmap: Pixmap,
}

impl Canvas {
    /// `None` for a zero-sized canvas
    pub fn new(width: u32, height: u32) -> Option<Self> {
        Pixmap::new(width, height).map(|pixmap| Self { pixmap })
    }

    pub fn width(&self) -> u32 {
        self.pixmap.width()
    }

    pub fn height(&self) -> u32 {
        self.pixmap.height()
    }

    pub fn fill(&mut self, color: ColorU8) {
        self.pixmap.fill(Color::from_rgba8(
            color.red(),
            color.green(),
            color.blue(),
            color.alpha(),
        ));
    }

    /// Solid, pixel-aligned rectangle
    pub fn fill_rect(&mut self, x: u32, y: u32, width: u32, height: u32, color: ColorU8) {
        // tiny-skia accepts zero-area rects and still covers a pixel
        if width == 0 || height == 0 {
            return;
        }
        let Some(rect) = Rect::from_xywh(x as f32, y as f32, width as f32, height as f32) else {
            return;
        };
        let mut paint = Paint::default();
        paint.set_color_rgba8(color.red(), color.green(), color.blue(), color.alpha());
        paint.anti_alias = false;
        self.pixmap.fill_rect(rect, &paint, Transform::identity(), None);
    }

    /// Draw one line of text with its top-left corner at (x, y).
    /// Glyphs are clipped to the canvas.
    pub fn draw_text(
        &mut self,
        font: &Font<'_>,
        size: f32,
        x: i32,
        y: i32,
        text: &str,
        color: ColorU8,
    ) {
        if text.is_empty() {
            return;
        }
        let scale = Scale::uniform(size);
        let v_metrics = font.v_metrics(scale);
        let origin = point(x as f32, y as f32 + v_metrics.ascent);

        let tw = self.pixmap.width() as i32;
        let th = self.pixmap.height() as i32;
        let data = self.pixmap.data_mut();
        let color_alpha = color.alpha() as f32 / 255.0;

        for glyph in font.layout(text, scale, origin) {
            let Some(bb) = glyph.pixel_bounding_box() else {
                continue;
            };
            glyph.draw(|gx, gy, coverage| {
                let px = bb.min.x + gx as i32;
                let py = bb.min.y + gy as i32;
                if px < 0 || px >= tw || py < 0 || py >= th {
                    return;
                }
                let a = coverage.clamp(0.0, 1.0) * color_alpha;
                if a <= 0.0 {
                    return;
                }
                // premultiplied source-over
                let idx = ((py * tw + px) * 4) as usize;
                let src = [color.red(), color.green(), color.blue(), 255];
                for c in 0..4 {
                    let blended = src[c] as f32 * a + data[idx + c] as f32 * (1.0 - a);
                    data[idx + c] = blended.round().min(255.0) as u8;
                }
            });
        }
    }

    /// Copy an image into the canvas at (x, y), clipped to the canvas
    pub fn draw_image(&mut self, x: u32, y: u32, image: &RgbaImage) {
        let tw = self.pixmap.width();
        let th = self.pixmap.height();
        let data = self.pixmap.data_mut();
        for (ix, iy, pixel) in image.enumerate_pixels() {
            let (px, py) = (x + ix, y + iy);
            if px >= tw || py >= th {
                continue;
            }
            let idx = ((py * tw + px) * 4) as usize;
            // tiny-skia stores premultiplied alpha
            let a = pixel[3] as f32 / 255.0;
            data[idx] = (pixel[0] as f32 * a).round() as u8;
            data[idx + 1] = (pixel[1] as f32 * a).round() as u8;
            data[idx + 2] = (pixel[2] as f32 * a).round() as u8;
            data[idx + 3] = pixel[3];
        }
    }

    /// Straight (non-premultiplied) RGBA bytes, row-major
    pub fn to_rgba(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.pixmap.data().len());
        for pixel in self.pixmap.pixels() {
            let c = pixel.demultiply();
            out.extend_from_slice(&[c.red(), c.green(), c.blue(), c.alpha()]);
        }
        out
    }
}

/// Line advance for `font` at `size` pixels
pub fn line_height(font: &Font<'_>, size: f32) -> f32 {
    let v = font.v_metrics(Scale::uniform(size));
    (v.ascent - v.descent + v.line_gap).ceil()
}
