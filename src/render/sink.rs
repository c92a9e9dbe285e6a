/// Display sink: a raw byte-addressable framebuffer, 4 bytes per pixel,
/// written region by region.
use std::io::{self, Cursor, Seek, SeekFrom, Write};
use std::path::PathBuf;

use super::canvas::Canvas;

/// Framebuffer pixels are BGRA; canvases are RGBA
pub fn swap_red_blue(pixels: &mut [u8]) {
    for px in pixels.chunks_exact_mut(4) {
        px.swap(0, 2);
    }
}

pub struct DisplaySink<W> {
    device: W,
    width: u32,
    height: u32,
}

impl<W: Write + Seek> DisplaySink<W> {
    pub fn new(device: W, width: u32, height: u32) -> Self {
        Self {
            device,
            width,
            height,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn device(&self) -> &W {
        &self.device
    }

    /// Copy `canvas` to (x, y) row by row, skipping the framebuffer columns
    /// the canvas does not cover. Bounds are the device's business.
    pub fn blit(&mut self, x: u32, y: u32, canvas: &Canvas) -> io::Result<()> {
        let mut pixels = canvas.to_rgba();
        swap_red_blue(&mut pixels);

        let row_bytes = 4 * canvas.width() as usize;
        let skip = 4 * (self.width as i64 - canvas.width() as i64);
        let rows = canvas.height() as usize;

        self.device
            .seek(SeekFrom::Start(4 * (y as u64 * self.width as u64 + x as u64)))?;
        for (i, row) in pixels.chunks_exact(row_bytes).enumerate() {
            self.device.write_all(row)?;
            if i + 1 < rows && skip != 0 {
                self.device.seek(SeekFrom::Current(skip))?;
            }
        }
        self.device.flush()
    }
}

/// In-memory framebuffer that saves itself as a PNG on every flush.
/// Stands in for `/dev/fb0` when developing on a machine without one.
pub struct PngSnapshot {
    frame: Cursor<Vec<u8>>,
    width: u32,
    height: u32,
    path: PathBuf,
}

impl PngSnapshot {
    pub fn new(width: u32, height: u32, path: PathBuf) -> Self {
        Self {
            frame: Cursor::new(vec![0; (width * height * 4) as usize]),
            width,
            height,
            path,
        }
    }
}

impl Write for PngSnapshot {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let remaining = self
            .frame
            .get_ref()
            .len()
            .saturating_sub(self.frame.position() as usize);
        if remaining == 0 && !buf.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "write past end of framebuffer",
            ));
        }
        let n = buf.len().min(remaining);
        self.frame.write(&buf[..n])
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut rgba = self.frame.get_ref().clone();
        swap_red_blue(&mut rgba);
        let image = image::RgbaImage::from_raw(self.width, self.height, rgba)
            .ok_or_else(|| io::Error::other("framebuffer size mismatch"))?;
        image.save(&self.path).map_err(io::Error::other)
    }
}

impl Seek for PngSnapshot {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.frame.seek(pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tiny_skia::ColorU8;

    fn memory_sink(width: u32, height: u32) -> DisplaySink<Cursor<Vec<u8>>> {
        DisplaySink::new(
            Cursor::new(vec![0u8; (width * height * 4) as usize]),
            width,
            height,
        )
    }

    #[test]
    fn test_single_pixel_blit_swaps_channels_at_offset() {
        let mut sink = memory_sink(8, 4);
        let mut canvas = Canvas::new(1, 1).unwrap();
        canvas.fill(ColorU8::from_rgba(11, 22, 33, 255));

        sink.blit(3, 2, &canvas).unwrap();

        let bytes = sink.device().get_ref();
        let offset = 4 * (2 * 8 + 3);
        assert_eq!(&bytes[offset..offset + 4], &[33, 22, 11, 255]);
        let untouched = bytes
            .iter()
            .enumerate()
            .filter(|(i, _)| !(offset..offset + 4).contains(i))
            .all(|(_, b)| *b == 0);
        assert!(untouched);
    }

    #[test]
    fn test_blit_skips_unused_columns_between_rows() {
        let mut sink = memory_sink(5, 3);
        let mut canvas = Canvas::new(2, 2).unwrap();
        canvas.fill(ColorU8::from_rgba(255, 255, 255, 255));

        sink.blit(1, 1, &canvas).unwrap();

        let bytes = sink.device().get_ref();
        let lit: Vec<(u32, u32)> = bytes
            .chunks_exact(4)
            .enumerate()
            .filter(|(_, px)| px[3] == 255)
            .map(|(i, _)| (i as u32 % 5, i as u32 / 5))
            .collect();
        assert_eq!(lit, vec![(1, 1), (2, 1), (1, 2), (2, 2)]);
    }

    #[test]
    fn test_png_snapshot_rejects_overflow_and_saves() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.png");
        let mut sink = DisplaySink::new(PngSnapshot::new(2, 2, path.clone()), 2, 2);

        let mut canvas = Canvas::new(1, 1).unwrap();
        canvas.fill(ColorU8::from_rgba(200, 100, 50, 255));
        sink.blit(1, 1, &canvas).unwrap();

        let saved = image::open(&path).unwrap().to_rgba8();
        assert_eq!(saved.get_pixel(1, 1).0, [200, 100, 50, 255]);
        assert_eq!(saved.get_pixel(0, 0).0, [0, 0, 0, 0]);

        let mut big = Canvas::new(2, 2).unwrap();
        big.fill(ColorU8::from_rgba(1, 1, 1, 255));
        assert!(sink.blit(1, 1, &big).is_err());
    }
}
