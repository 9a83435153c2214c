// Data models for pose estimation: model variants, keypoints, poses and detection frames

use serde::{Deserialize, Serialize};
use std::fmt;

// ==============================================================================
// Model Variant
// ==============================================================================

/// MoveNet model configuration trading accuracy, latency and pose count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Variant {
    /// Single pose, high accuracy
    SingleposeThunder,
    /// Single pose, low latency
    #[default]
    SingleposeLightning,
    /// Up to six poses per frame
    MultiposeLightning,
}

impl Variant {
    pub const ALL: [Variant; 3] = [
        Variant::SingleposeThunder,
        Variant::SingleposeLightning,
        Variant::MultiposeLightning,
    ];

    /// Identifier used in exports and configuration
    pub fn id(&self) -> &'static str {
        match self {
            Variant::SingleposeThunder => "SINGLEPOSE_THUNDER",
            Variant::SingleposeLightning => "SINGLEPOSE_LIGHTNING",
            Variant::MultiposeLightning => "MULTIPOSE_LIGHTNING",
        }
    }

    /// Identifier understood by the inference backend (`variant` query parameter)
    pub fn api_id(&self) -> &'static str {
        match self {
            Variant::SingleposeThunder => "singlepose_thunder",
            Variant::SingleposeLightning => "singlepose_lightning",
            Variant::MultiposeLightning => "multipose_lightning",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Variant::SingleposeThunder => "SinglePose Thunder",
            Variant::SingleposeLightning => "SinglePose Lightning",
            Variant::MultiposeLightning => "MultiPose Lightning",
        }
    }

    /// Most poses a single inference can return
    pub fn max_poses(&self) -> usize {
        match self {
            Variant::MultiposeLightning => 6,
            _ => 1,
        }
    }

    pub fn is_multipose(&self) -> bool {
        matches!(self, Variant::MultiposeLightning)
    }

    /// Parse either the export id (`SINGLEPOSE_THUNDER`) or the backend id (`singlepose_thunder`)
    pub fn from_string(s: &str) -> PoseResult<Self> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        Variant::ALL
            .into_iter()
            .find(|v| v.api_id() == normalized)
            .ok_or_else(|| PoseError::InvalidConfig(format!("Unknown variant: {}", s)))
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id())
    }
}

impl std::str::FromStr for Variant {
    type Err = PoseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Variant::from_string(s)
    }
}

// ==============================================================================
// Keypoints and Poses
// ==============================================================================

/// A 2D keypoint in frame pixel coordinates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Keypoint {
    pub name: String,
    pub x: f32,
    pub y: f32,
    pub score: f32, // Detection confidence [0, 1]
}

impl Keypoint {
    pub fn new(name: impl Into<String>, x: f32, y: f32, score: f32) -> Self {
        Self {
            name: name.into(),
            x,
            y,
            score,
        }
    }

    pub fn is_visible(&self, threshold: f32) -> bool {
        self.score > threshold
    }
}

/// One detected body instance
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub keypoints: Vec<Keypoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
}

impl Pose {
    pub fn new(keypoints: Vec<Keypoint>) -> Self {
        Self {
            keypoints,
            score: None,
        }
    }

    pub fn with_score(mut self, score: f32) -> Self {
        self.score = Some(score);
        self
    }

    pub fn keypoint(&self, name: &str) -> Option<&Keypoint> {
        self.keypoints.iter().find(|k| k.name == name)
    }

    pub fn visible_keypoints(&self, threshold: f32) -> impl Iterator<Item = &Keypoint> {
        self.keypoints.iter().filter(move |k| k.is_visible(threshold))
    }
}

// ==============================================================================
// Detection Frame (Transcript Entry)
// ==============================================================================

/// Result of one detection step, immutable once recorded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionFrame {
    pub timestamp: i64, // Epoch milliseconds
    pub variant: Variant,
    pub poses: Vec<Pose>,
    pub frame_latency_ms: f64,
}

// ==============================================================================
// Estimator Options
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimatorOptions {
    pub enable_smoothing: bool,
    pub multipose_max_dimension: u32, // Longest input side for multi-pose, multiple of 32
    pub min_pose_score: f32,          // Poses scoring below are dropped (multi-pose)
}

impl Default for EstimatorOptions {
    fn default() -> Self {
        Self {
            enable_smoothing: true,
            multipose_max_dimension: 256,
            min_pose_score: 0.15,
        }
    }
}

// ==============================================================================
// Error Types
// ==============================================================================

#[derive(Debug, thiserror::Error)]
pub enum PoseError {
    #[error("Pose estimator not initialized")]
    NotInitialized,

    #[error("Model loading failed: {0}")]
    ModelLoadFailed(String),

    #[error("Inference failed: {0}")]
    InferenceFailed(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Estimator disposal failed: {0}")]
    DisposeFailed(String),
}

pub type PoseResult<T> = Result<T, PoseError>;
