use std::path::PathBuf;

use crate::render::layout::{REGIONS, SCREEN_HEIGHT, SCREEN_WIDTH};

/// Top-level display configuration
#[derive(Debug, Clone)]
pub struct DisplayConfig {
    /// URL of the renderer's device description
    pub device_url: String,
    /// Services to subscribe to; `*` for all
    pub services: Vec<String>,
    pub framebuffer: PathBuf,
    pub width: u32,
    pub height: u32,
    pub output_mode: OutputMode,
    pub output_path: PathBuf,
    pub fonts: FontPaths,
}

#[derive(Debug, Clone)]
pub struct FontPaths {
    pub title: PathBuf,
    pub body: PathBuf,
    pub clock: PathBuf,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputMode {
    /// Write straight to the framebuffer device (production)
    #[default]
    Framebuffer,
    /// Keep the frame in memory and save a PNG after every update (development)
    Png,
}

impl std::str::FromStr for OutputMode {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "framebuffer" | "fb" => Ok(OutputMode::Framebuffer),
            "png" => Ok(OutputMode::Png),
            _ => Err(format!("Unknown output mode: {s}")),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("display {width}x{height} is smaller than the {min_width}x{min_height} layout")]
    DisplayTooSmall {
        width: u32,
        height: u32,
        min_width: u32,
        min_height: u32,
    },

    #[error("no services configured")]
    NoServices,
}

impl DisplayConfig {
    /// Reject configurations the fixed layout cannot be drawn on
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fits = REGIONS
            .iter()
            .all(|region| region.fits_within(self.width, self.height));
        if !fits {
            return Err(ConfigError::DisplayTooSmall {
                width: self.width,
                height: self.height,
                min_width: SCREEN_WIDTH,
                min_height: SCREEN_HEIGHT,
            });
        }
        if self.services.iter().all(|s| s.trim().is_empty()) {
            return Err(ConfigError::NoServices);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> DisplayConfig {
        DisplayConfig {
            device_url: "http://10.0.0.2:49152/description.xml".into(),
            services: vec!["AVTransport".into()],
            framebuffer: "/dev/fb0".into(),
            width: 480,
            height: 320,
            output_mode: OutputMode::Framebuffer,
            output_path: "frame.png".into(),
            fonts: FontPaths {
                title: "title.ttf".into(),
                body: "body.ttf".into(),
                clock: "clock.ttf".into(),
            },
        }
    }

    #[test]
    fn test_output_mode_parse() {
        assert_eq!("PNG".parse::<OutputMode>(), Ok(OutputMode::Png));
        assert_eq!("fb".parse::<OutputMode>(), Ok(OutputMode::Framebuffer));
        assert!("window".parse::<OutputMode>().is_err());
    }

    #[test]
    fn test_validate() {
        assert_eq!(config().validate(), Ok(()));

        let larger = DisplayConfig {
            width: 800,
            height: 480,
            ..config()
        };
        assert_eq!(larger.validate(), Ok(()));

        let small = DisplayConfig {
            height: 240,
            ..config()
        };
        assert!(matches!(
            small.validate(),
            Err(ConfigError::DisplayTooSmall { height: 240, .. })
        ));

        let none = DisplayConfig {
            services: Vec::new(),
            ..config()
        };
        assert_eq!(none.validate(), Err(ConfigError::NoServices));
    }
}
