// Data structures for visual input sources

use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Kind of visual input currently bound to the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Webcam,
    StaticImage,
    VideoFile,
}

impl SourceKind {
    /// Continuous sources keep supplying frames; static images are detected once
    pub fn is_continuous(&self) -> bool {
        !matches!(self, SourceKind::StaticImage)
    }

    pub fn to_string(&self) -> &'static str {
        match self {
            SourceKind::Webcam => "webcam",
            SourceKind::StaticImage => "static_image",
            SourceKind::VideoFile => "video_file",
        }
    }
}

/// Description of an acquired source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceInfo {
    pub kind: SourceKind,
    pub width: u32,
    pub height: u32,
}

/// A frame sampled from the active source
#[derive(Debug, Clone)]
pub struct Frame {
    pub timestamp: i64, // Epoch milliseconds at capture
    pub image: Arc<RgbaImage>,
}

impl Frame {
    pub fn new(image: Arc<RgbaImage>) -> Self {
        Self {
            timestamp: chrono::Utc::now().timestamp_millis(),
            image,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Error types for source acquisition and decoding
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Device failed: {0}")]
    DeviceFailed(String),

    #[error("Source not ready: {0}")]
    NotReady(String),

    #[error("Decoding failed: {0}")]
    DecodeFailed(String),

    #[error("Unsupported media: {0}")]
    Unsupported(String),

    #[error("Source ended")]
    Ended,
}

pub type SourceResult<T> = Result<T, SourceError>;
