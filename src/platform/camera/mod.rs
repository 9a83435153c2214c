// Camera collaborator interface
// Hardware bindings implement these traits; the synthetic camera ships for headless runs and tests

pub mod synthetic;

use crate::models::capture::SourceResult;
use async_trait::async_trait;
use image::RgbaImage;
use std::sync::Arc;

pub use synthetic::SyntheticCamera;

/// Grants access to a camera device
#[async_trait]
pub trait CameraProvider: Send + Sync {
    /// Device name for logs and status
    fn name(&self) -> &str;

    /// Ask for camera access. Resolves once the user or OS has answered.
    async fn request_access(&self) -> SourceResult<Box<dyn CameraStream>>;
}

/// A granted, open camera stream
#[async_trait]
pub trait CameraStream: Send {
    /// Wait until the stream has produced a frame with known dimensions
    async fn first_frame(&mut self) -> SourceResult<(u32, u32)>;

    /// Most recent frame, or None once the stream has stopped
    fn grab(&mut self) -> Option<Arc<RgbaImage>>;

    /// Stop all tracks. Must be safe to call more than once.
    fn stop(&mut self);

    fn is_live(&self) -> bool;
}
