/// Fixed screen layout for a 480x320 panel.
///
/// ```text
/// +--------------------------------------+
/// | clock / date                  480x44 |
/// +--------------------------------------+  progress 480x6
/// |                  |                   |
/// |  artwork 270x270 |  metadata 210x270 |
/// |                  |                   |
/// +------------------+-------------------+
/// ```

pub const SCREEN_WIDTH: u32 = 480;
pub const SCREEN_HEIGHT: u32 = 320;

/// A named rectangle in display coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub name: &'static str,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub const fn new(name: &'static str, x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            name,
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    pub fn overlaps(&self, other: &Region) -> bool {
        self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }

    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        self.right() <= width && self.bottom() <= height
    }
}

pub const CLOCK: Region = Region::new("clock", 0, 0, 480, 44);
pub const PROGRESS: Region = Region::new("progress", 0, 44, 480, 6);
pub const ARTWORK: Region = Region::new("artwork", 0, 50, 270, 270);
pub const METADATA: Region = Region::new("metadata", 270, 50, 210, 270);

pub const REGIONS: [Region; 4] = [CLOCK, PROGRESS, ARTWORK, METADATA];
