//! Platform encoding profiles.

use serde::{Deserialize, Serialize};

/// Default video codec (H.264)
pub const DEFAULT_VIDEO_CODEC: &str = "libx264";
/// Default audio codec
pub const DEFAULT_AUDIO_CODEC: &str = "aac";
/// Default encoding preset
pub const DEFAULT_PRESET: &str = "fast";
/// Default CRF (Constant Rate Factor)
pub const DEFAULT_CRF: u8 = 20;
/// Default audio bitrate
pub const DEFAULT_AUDIO_BITRATE: &str = "128k";

/// Thumbnail generation settings
pub const THUMBNAIL_SCALE_WIDTH: u32 = 480;
pub const THUMBNAIL_TIMESTAMP: &str = "00:00:01";

/// Crossfade duration between scenes, in seconds.
pub const TRANSITION_SECONDS: f64 = 0.5;

/// Platform the final video is formatted for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TargetPlatform {
    /// 9:16 vertical (stories, shorts, reels)
    #[default]
    Vertical,
    /// 1:1 square (feed posts)
    Square,
    /// 16:9 landscape (listing pages, showroom screens)
    Landscape,
}

impl TargetPlatform {
    /// Output dimensions for this platform.
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            TargetPlatform::Vertical => (1080, 1920),
            TargetPlatform::Square => (1080, 1080),
            TargetPlatform::Landscape => (1920, 1080),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TargetPlatform::Vertical => "vertical",
            TargetPlatform::Square => "square",
            TargetPlatform::Landscape => "landscape",
        }
    }
}

/// Encoding parameters handed to the media compiler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncodingProfile {
    /// Output width in pixels
    pub width: u32,
    /// Output height in pixels
    pub height: u32,
    /// Frames per second
    pub fps: u32,
    /// Video codec (e.g., "libx264")
    pub codec: String,
    /// Encoding preset (e.g., "fast", "medium")
    pub preset: String,
    /// Constant Rate Factor (quality, 0-51, lower is better)
    pub crf: u8,
    /// Audio codec
    pub audio_codec: String,
    /// Audio bitrate
    pub audio_bitrate: String,
}

impl EncodingProfile {
    /// Profile for a target platform with default codec settings.
    pub fn for_platform(platform: TargetPlatform) -> Self {
        let (width, height) = platform.dimensions();
        Self {
            width,
            height,
            fps: 30,
            codec: DEFAULT_VIDEO_CODEC.to_string(),
            preset: DEFAULT_PRESET.to_string(),
            crf: DEFAULT_CRF,
            audio_codec: DEFAULT_AUDIO_CODEC.to_string(),
            audio_bitrate: DEFAULT_AUDIO_BITRATE.to_string(),
        }
    }
}

impl Default for EncodingProfile {
    fn default() -> Self {
        Self::for_platform(TargetPlatform::default())
    }
}
