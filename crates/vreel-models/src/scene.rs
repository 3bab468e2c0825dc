//! Scene briefs and generated scene descriptions.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::encoding::TargetPlatform;

/// Number of scenes every marketing video is built from.
pub const SCENE_COUNT: usize = 3;

/// Allowed per-scene duration range in seconds.
pub const MIN_SCENE_SECONDS: u32 = 5;
pub const MAX_SCENE_SECONDS: u32 = 15;

/// Vehicle record the description service writes scenes about.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VehicleRecord {
    pub make: String,
    pub model: String,
    pub year: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trim: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mileage: Option<u32>,
}

impl fmt::Display for VehicleRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.year, self.make, self.model)
    }
}

/// Caller request to produce one marketing video.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRequest {
    /// Vehicle the video is about
    pub vehicle: VehicleRecord,
    /// Free-text marketing idea
    pub idea: String,
    /// Source still images, one or more; scenes reference these by index
    pub image_urls: Vec<String>,
    /// Target platform (drives encoding profile)
    #[serde(default)]
    pub platform: TargetPlatform,
}

/// Camera movement tag attached to a scene description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraMovement {
    Static,
    PanLeft,
    PanRight,
    ZoomIn,
    ZoomOut,
    Orbit,
    Dolly,
}

/// Mood tag attached to a scene description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mood {
    Energetic,
    Luxurious,
    Rugged,
    Family,
    Minimal,
    Dramatic,
}

impl fmt::Display for Mood {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Mood::Energetic => "energetic",
            Mood::Luxurious => "luxurious",
            Mood::Rugged => "rugged",
            Mood::Family => "family",
            Mood::Minimal => "minimal",
            Mood::Dramatic => "dramatic",
        };
        write!(f, "{s}")
    }
}

/// One structured scene description from the description service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneDescription {
    /// Scene position in the final video (0-based)
    pub index: usize,
    /// Prose description fed to the video generation service
    pub description: String,
    /// Camera movement tag
    pub camera: CameraMovement,
    /// Mood tag (also drives the music theme)
    pub mood: Mood,
    /// Scene duration in seconds, within [5, 15]
    pub duration_seconds: u32,
    /// Which source image this scene animates (index into the request's
    /// image list)
    #[serde(default)]
    pub source_image_index: usize,
}

/// Validation failure for a scene description set.
#[derive(Debug, Error)]
pub enum SceneValidationError {
    #[error("expected exactly {SCENE_COUNT} scenes, got {0}")]
    WrongSceneCount(usize),

    #[error("scene {index} duration {seconds}s outside [{MIN_SCENE_SECONDS}, {MAX_SCENE_SECONDS}]")]
    DurationOutOfRange { index: usize, seconds: u32 },

    #[error("scene {0} has an empty description")]
    EmptyDescription(usize),

    #[error("scene index {0} out of range or repeated; indices must cover 0..{SCENE_COUNT}")]
    BadIndex(usize),
}

/// Validate a description-service response.
///
/// Exactly [`SCENE_COUNT`] scenes whose indices cover `0..SCENE_COUNT`
/// once each, with in-range durations and non-empty text; anything else
/// is caller-input error, not a transient failure.
pub fn validate_scenes(scenes: &[SceneDescription]) -> Result<(), SceneValidationError> {
    if scenes.len() != SCENE_COUNT {
        return Err(SceneValidationError::WrongSceneCount(scenes.len()));
    }
    let mut seen = [false; SCENE_COUNT];
    for scene in scenes {
        match seen.get_mut(scene.index) {
            Some(slot) if !*slot => *slot = true,
            _ => return Err(SceneValidationError::BadIndex(scene.index)),
        }
        if scene.description.trim().is_empty() {
            return Err(SceneValidationError::EmptyDescription(scene.index));
        }
        if scene.duration_seconds < MIN_SCENE_SECONDS || scene.duration_seconds > MAX_SCENE_SECONDS
        {
            return Err(SceneValidationError::DurationOutOfRange {
                index: scene.index,
                seconds: scene.duration_seconds,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scene(index: usize, seconds: u32) -> SceneDescription {
        SceneDescription {
            index,
            description: format!("scene {index}"),
            camera: CameraMovement::ZoomIn,
            mood: Mood::Energetic,
            duration_seconds: seconds,
            source_image_index: 0,
        }
    }

    #[test]
    fn accepts_three_valid_scenes() {
        let scenes = vec![scene(0, 5), scene(1, 10), scene(2, 15)];
        assert!(validate_scenes(&scenes).is_ok());
    }

    #[test]
    fn rejects_wrong_count() {
        let two = vec![scene(0, 8), scene(1, 8)];
        assert!(matches!(
            validate_scenes(&two),
            Err(SceneValidationError::WrongSceneCount(2))
        ));

        let four = vec![scene(0, 8), scene(1, 8), scene(2, 8), scene(3, 8)];
        assert!(matches!(
            validate_scenes(&four),
            Err(SceneValidationError::WrongSceneCount(4))
        ));
    }

    #[test]
    fn rejects_one_based_indices() {
        let scenes = vec![scene(1, 8), scene(2, 8), scene(3, 8)];
        assert!(matches!(
            validate_scenes(&scenes),
            Err(SceneValidationError::BadIndex(3))
        ));
    }

    #[test]
    fn rejects_duplicate_indices() {
        let scenes = vec![scene(0, 8), scene(0, 8), scene(2, 8)];
        assert!(matches!(
            validate_scenes(&scenes),
            Err(SceneValidationError::BadIndex(0))
        ));
    }

    #[test]
    fn rejects_out_of_range_duration() {
        let scenes = vec![scene(0, 8), scene(1, 4), scene(2, 8)];
        assert!(matches!(
            validate_scenes(&scenes),
            Err(SceneValidationError::DurationOutOfRange { index: 1, .. })
        ));

        let scenes = vec![scene(0, 8), scene(1, 8), scene(2, 16)];
        assert!(validate_scenes(&scenes).is_err());
    }

    #[test]
    fn rejects_empty_description() {
        let mut scenes = vec![scene(0, 8), scene(1, 8), scene(2, 8)];
        scenes[1].description = "   ".to_string();
        assert!(matches!(
            validate_scenes(&scenes),
            Err(SceneValidationError::EmptyDescription(1))
        ));
    }

    #[test]
    fn scene_serde_roundtrip() {
        let s = scene(2, 12);
        let json = serde_json::to_string(&s).expect("serialize scene");
        assert!(json.contains("\"zoom_in\""));
        let decoded: SceneDescription = serde_json::from_str(&json).expect("deserialize scene");
        assert_eq!(decoded.index, 2);
        assert_eq!(decoded.duration_seconds, 12);
        assert_eq!(decoded.camera, CameraMovement::ZoomIn);
    }
}
