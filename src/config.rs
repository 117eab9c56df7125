// src/config.rs

//! Runtime configuration.
//!
//! Loaded once from the JSON file named by `SCANOUT_CONFIG`, falling back to
//! defaults when the variable is unset or the file does not parse. Every
//! field has a default, so a partial file is fine.

use std::path::PathBuf;

use log::warn;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::framebuffer::PixelFormat;

/// Process-wide configuration, resolved at first use.
pub static CONFIG: Lazy<Config> = Lazy::new(Config::load_or_default);

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub device: DeviceConfig,
    pub surface: SurfaceConfig,
}

/// Which display device to drive.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub path: PathBuf,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/dev/dri/card0"),
        }
    }
}

/// What to put on screen while presenting.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SurfaceConfig {
    pub format: PixelFormat,
    /// Solid fill color as R, G, B.
    pub fill_color: [u8; 3],
    /// How often the Presenting hold checks the cancellation flag.
    pub poll_interval_ms: u64,
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            format: PixelFormat::Bgr888,
            fill_color: [0, 0, 0xff],
            poll_interval_ms: 50,
        }
    }
}

impl Config {
    fn load_or_default() -> Self {
        let Ok(path) = std::env::var("SCANOUT_CONFIG") else {
            return Self::default();
        };
        match std::fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str(&text) {
                Ok(config) => config,
                Err(e) => {
                    warn!("ignoring malformed config {}: {}", path, e);
                    Self::default()
                }
            },
            Err(e) => {
                warn!("ignoring unreadable config {}: {}", path, e);
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_log::test]
    fn defaults_match_the_classic_single_card_setup() {
        let config = Config::default();
        assert_eq!(config.device.path, PathBuf::from("/dev/dri/card0"));
        assert_eq!(config.surface.format, PixelFormat::Bgr888);
        assert_eq!(config.surface.fill_color, [0, 0, 0xff]);
    }

    #[test_log::test]
    fn partial_json_keeps_other_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"surface": {"format": "xrgb8888"}}"#).unwrap();
        assert_eq!(config.surface.format, PixelFormat::Xrgb8888);
        assert_eq!(config.surface.fill_color, [0, 0, 0xff]);
        assert_eq!(config.device.path, PathBuf::from("/dev/dri/card0"));
    }
}
