//! Immutable run configuration.
//!
//! A [`SlimConfig`] is built once by the front-end and handed to the
//! orchestrator; nothing in the pipeline reads settings from process state.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default longest edge, in pixels, for embedded images.
pub const DEFAULT_MAX_EDGE: u32 = 1600;

/// Default JPEG quality.
pub const DEFAULT_QUALITY: u8 = 80;

/// Recommended range for the longest edge.
pub const RECOMMENDED_MAX_EDGE: std::ops::RangeInclusive<u32> = 1400..=4000;

/// Recommended range for JPEG quality.
pub const RECOMMENDED_QUALITY: std::ops::RangeInclusive<u8> = 70..=100;

/// Folder created beside the source for multi-stage runs when no output
/// directory is configured.
pub const DEFAULT_OUTPUT_FOLDER: &str = "ExcelSlimmed";

/// Image re-encoding settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSettings {
    /// Longest allowed edge; larger images are downscaled to fit.
    pub max_edge: u32,
    /// JPEG quality, 1-100.
    pub quality: u8,
}

impl Default for ImageSettings {
    fn default() -> Self {
        Self {
            max_edge: DEFAULT_MAX_EDGE,
            quality: DEFAULT_QUALITY,
        }
    }
}

impl ImageSettings {
    /// Create settings, clamping values into their valid domain.
    pub fn new(max_edge: u32, quality: u8) -> Self {
        Self {
            max_edge: max_edge.max(1),
            quality: quality.clamp(1, 100),
        }
    }

    /// Whether both values are inside the recommended ranges.
    pub fn is_recommended(&self) -> bool {
        RECOMMENDED_MAX_EDGE.contains(&self.max_edge) && RECOMMENDED_QUALITY.contains(&self.quality)
    }
}

/// Rules for the defined-name cleaner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupRules {
    /// Regular expressions; a defined name matching any of them is removed.
    pub hidden_name_patterns: Vec<String>,
}

impl Default for CleanupRules {
    fn default() -> Self {
        Self {
            // Custom-view print and filter artifacts: Z_<GUID>_.wvu.PrintArea etc.
            hidden_name_patterns: vec![
                r"(?i)^Z_[0-9A-F]{8}_[0-9A-F]{4}_[0-9A-F]{4}_[0-9A-F]{4}_[0-9A-F]{12}_\.wvu\."
                    .to_string(),
            ],
        }
    }
}

/// Configuration for every run performed by one orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlimConfig {
    /// Where outputs go; `None` means beside the source (single stage) or an
    /// `ExcelSlimmed` folder beside the source (multi-stage).
    pub output_dir: Option<PathBuf>,
    /// Write per-stage checkpoint files during multi-stage runs.
    pub checkpoints: bool,
    pub image: ImageSettings,
    pub rules: CleanupRules,
}

impl Default for SlimConfig {
    fn default() -> Self {
        Self {
            output_dir: None,
            checkpoints: true,
            image: ImageSettings::default(),
            rules: CleanupRules::default(),
        }
    }
}

impl SlimConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    pub fn with_checkpoints(mut self, checkpoints: bool) -> Self {
        self.checkpoints = checkpoints;
        self
    }

    pub fn with_image(mut self, image: ImageSettings) -> Self {
        self.image = image;
        self
    }

    pub fn with_rules(mut self, rules: CleanupRules) -> Self {
        self.rules = rules;
        self
    }
}
