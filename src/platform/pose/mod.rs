// Pose estimation collaborator interface
// Provides the estimator/factory traits, MoveNet output decoding and the backend-hosted estimator

pub mod movenet;
pub mod remote;

use crate::models::capture::Frame;
use crate::models::pose::{EstimatorOptions, Pose, PoseResult, Variant};
use async_trait::async_trait;

pub use remote::{RemoteEstimator, RemoteEstimatorFactory};

/// A live estimator instance bound to exactly one variant.
///
/// Owns backend compute resources until `dispose` is called.
#[async_trait]
pub trait PoseEstimator: Send {
    /// Variant this instance was created for
    fn variant(&self) -> Variant;

    /// Run inference on a frame
    async fn estimate(&mut self, frame: &Frame) -> PoseResult<Vec<Pose>>;

    /// Release backend resources
    async fn dispose(self: Box<Self>) -> PoseResult<()>;
}

/// Creates estimator instances for a variant
#[async_trait]
pub trait EstimatorFactory: Send + Sync {
    /// Backend identifier for logs
    fn name(&self) -> &str;

    async fn create(
        &self,
        variant: Variant,
        options: &EstimatorOptions,
    ) -> PoseResult<Box<dyn PoseEstimator>>;

    /// Backend used by estimators created from now on. Local factories ignore it.
    fn set_base_url(&self, _base_url: Option<&str>) {}
}
