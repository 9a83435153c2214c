// Backend-hosted MoveNet estimator
//
// Frames are posted to the inference backend with `store=false` and the raw
// model output is decoded locally.

use super::movenet::{decode_response, KeypointSmoother, PredictResponse};
use super::{EstimatorFactory, PoseEstimator};
use crate::models::capture::Frame;
use crate::core::submitter::normalize_base_url;
use crate::models::pose::{EstimatorOptions, Pose, PoseError, PoseResult, Variant};
use crate::platform::media::encode_jpeg;
use async_trait::async_trait;
use image::imageops::{self, FilterType};
use image::RgbaImage;
use reqwest::multipart::{Form, Part};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, info};

const JPEG_QUALITY: u8 = 90;
const SMOOTHING_ALPHA: f32 = 0.5;

/// Creates estimators that run inference on the remote backend
#[derive(Debug)]
pub struct RemoteEstimatorFactory {
    base_url: RwLock<Option<String>>,
    timeout: Duration,
}

impl RemoteEstimatorFactory {
    pub fn new(base_url: Option<String>, timeout: Duration) -> Self {
        Self {
            base_url: RwLock::new(base_url.as_deref().and_then(normalize_base_url)),
            timeout,
        }
    }

    pub fn base_url(&self) -> Option<String> {
        self.base_url
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl EstimatorFactory for RemoteEstimatorFactory {
    fn name(&self) -> &str {
        "remote-movenet"
    }

    async fn create(
        &self,
        variant: Variant,
        options: &EstimatorOptions,
    ) -> PoseResult<Box<dyn PoseEstimator>> {
        let base_url = self.base_url().ok_or_else(|| {
            PoseError::ModelLoadFailed("no backend URL configured for inference".to_string())
        })?;
        reqwest::Url::parse(&base_url)
            .map_err(|e| PoseError::ModelLoadFailed(format!("Invalid backend URL {}: {}", base_url, e)))?;

        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| PoseError::ModelLoadFailed(e.to_string()))?;

        let smoother = (options.enable_smoothing && !variant.is_multipose())
            .then(|| KeypointSmoother::new(SMOOTHING_ALPHA));

        info!(variant = %variant, backend = %base_url, "Created remote estimator");
        Ok(Box::new(RemoteEstimator {
            client,
            base_url,
            variant,
            options: options.clone(),
            smoother,
        }))
    }

    fn set_base_url(&self, base_url: Option<&str>) {
        let normalized = base_url.and_then(normalize_base_url);
        debug!(backend = ?normalized, "Estimator backend updated");
        *self.base_url.write().unwrap_or_else(PoisonError::into_inner) = normalized;
    }
}

/// Estimator bound to one variant on the remote backend
pub struct RemoteEstimator {
    client: reqwest::Client,
    base_url: String,
    variant: Variant,
    options: EstimatorOptions,
    smoother: Option<KeypointSmoother>,
}

impl RemoteEstimator {
    /// Multi-pose input shrunk so its longest side fits `multipose_max_dimension`.
    /// Keypoints come back normalized, so the original frame size still applies.
    fn downscaled(&self, image: &RgbaImage) -> Option<RgbaImage> {
        let limit = self.options.multipose_max_dimension;
        let longest = image.width().max(image.height());
        if !self.variant.is_multipose() || limit == 0 || longest <= limit {
            return None;
        }
        let scale = limit as f32 / longest as f32;
        let width = ((image.width() as f32 * scale).round() as u32).max(1);
        let height = ((image.height() as f32 * scale).round() as u32).max(1);
        Some(imageops::resize(image, width, height, FilterType::Triangle))
    }

    fn predict_url(&self) -> String {
        format!(
            "{}/predict?variant={}&store=false",
            self.base_url,
            self.variant.api_id()
        )
    }
}

#[async_trait]
impl PoseEstimator for RemoteEstimator {
    fn variant(&self) -> Variant {
        self.variant
    }

    async fn estimate(&mut self, frame: &Frame) -> PoseResult<Vec<Pose>> {
        let jpeg = match self.downscaled(&frame.image) {
            Some(small) => encode_jpeg(&small, JPEG_QUALITY),
            None => encode_jpeg(&frame.image, JPEG_QUALITY),
        }
        .map_err(|e| PoseError::InferenceFailed(format!("Failed to encode frame: {}", e)))?;

        let part = Part::bytes(jpeg)
            .file_name("frame.jpg")
            .mime_str("image/jpeg")
            .map_err(|e| PoseError::InferenceFailed(e.to_string()))?;
        let form = Form::new().part("file", part);

        let response = self
            .client
            .post(self.predict_url())
            .multipart(form)
            .send()
            .await
            .map_err(|e| PoseError::InferenceFailed(format!("Backend request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PoseError::InferenceFailed(format!(
                "Backend returned HTTP {}: {}",
                status.as_u16(),
                body
            )));
        }

        let prediction: PredictResponse = response
            .json()
            .await
            .map_err(|e| PoseError::InferenceFailed(format!("Malformed backend response: {}", e)))?;

        let mut poses = decode_response(
            &prediction,
            frame.width(),
            frame.height(),
            self.options.min_pose_score,
        )?;
        poses.truncate(self.variant.max_poses());

        if let Some(smoother) = self.smoother.as_mut() {
            match poses.first_mut() {
                Some(pose) => smoother.smooth(pose),
                None => smoother.reset(),
            }
        }

        debug!(variant = %self.variant, poses = poses.len(), "Remote inference complete");
        Ok(poses)
    }

    async fn dispose(self: Box<Self>) -> PoseResult<()> {
        info!(variant = %self.variant, "Disposed remote estimator");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::pose::movenet::NUM_KEYPOINTS;
    use crate::testing::StubBackend;
    use std::sync::Arc;

    fn singlepose_body() -> String {
        let rows = vec![[0.5f32, 0.5f32, 0.9f32]; NUM_KEYPOINTS];
        serde_json::json!({ "keypoints": [rows], "model_variant": "singlepose_lightning" })
            .to_string()
    }

    fn test_frame() -> Frame {
        Frame::new(Arc::new(RgbaImage::from_pixel(40, 20, image::Rgba([9, 9, 9, 255]))))
    }

    #[tokio::test]
    async fn test_create_requires_backend_url() {
        let factory = RemoteEstimatorFactory::new(None, Duration::from_secs(1));
        let result = factory
            .create(Variant::SingleposeLightning, &EstimatorOptions::default())
            .await;
        assert!(matches!(result, Err(PoseError::ModelLoadFailed(_))));
    }

    #[tokio::test]
    async fn test_estimate_against_stub_backend() {
        let backend = StubBackend::start(200, singlepose_body()).await;
        let factory = RemoteEstimatorFactory::new(
            Some(format!("{}/", backend.base_url())),
            Duration::from_secs(5),
        );
        let mut estimator = factory
            .create(Variant::SingleposeThunder, &EstimatorOptions::default())
            .await
            .unwrap();

        let poses = estimator.estimate(&test_frame()).await.unwrap();
        assert_eq!(poses.len(), 1);
        assert_eq!(poses[0].keypoints[0].x, 20.0);
        assert_eq!(poses[0].keypoints[0].y, 10.0);

        let request_line = backend.request_lines().await.remove(0);
        assert!(request_line.starts_with("POST /predict?variant=singlepose_thunder&store=false"));

        estimator.dispose().await.unwrap();
    }

    #[tokio::test]
    async fn test_multipose_input_is_downscaled() {
        let factory = RemoteEstimatorFactory::new(
            Some("http://127.0.0.1:9".to_string()),
            Duration::from_secs(1),
        );
        let options = EstimatorOptions {
            multipose_max_dimension: 64,
            ..EstimatorOptions::default()
        };
        let estimator = RemoteEstimator {
            client: reqwest::Client::new(),
            base_url: "http://127.0.0.1:9".to_string(),
            variant: Variant::MultiposeLightning,
            options: options.clone(),
            smoother: None,
        };
        let large = RgbaImage::new(256, 128);
        assert_eq!(estimator.downscaled(&large).unwrap().dimensions(), (64, 32));
        assert!(estimator.downscaled(&RgbaImage::new(64, 10)).is_none());

        let single = factory.create(Variant::SingleposeThunder, &options).await.unwrap();
        assert_eq!(single.variant(), Variant::SingleposeThunder);
    }

    #[tokio::test]
    async fn test_multipose_result_capped_at_six() {
        let mut row = vec![0.5f32; NUM_KEYPOINTS * 3];
        row.extend([0.1, 0.1, 0.9, 0.9, 0.8]);
        let body = serde_json::json!({ "raw_output_0": [vec![row; 7]] }).to_string();
        let backend = StubBackend::start(200, body).await;
        let factory =
            RemoteEstimatorFactory::new(Some(backend.base_url()), Duration::from_secs(5));
        let mut estimator = factory
            .create(Variant::MultiposeLightning, &EstimatorOptions::default())
            .await
            .unwrap();

        let poses = estimator.estimate(&test_frame()).await.unwrap();
        assert_eq!(poses.len(), Variant::MultiposeLightning.max_poses());
    }

    #[tokio::test]
    async fn test_estimators_follow_updated_backend() {
        let backend = StubBackend::start(200, singlepose_body()).await;
        let factory = RemoteEstimatorFactory::new(None, Duration::from_secs(5));
        factory.set_base_url(Some(&format!(" {}/ ", backend.base_url())));
        assert_eq!(factory.base_url(), Some(backend.base_url()));

        let mut estimator = factory
            .create(Variant::SingleposeLightning, &EstimatorOptions::default())
            .await
            .unwrap();
        estimator.estimate(&test_frame()).await.unwrap();
        assert_eq!(backend.request_lines().await.len(), 1);

        factory.set_base_url(None);
        let result = factory
            .create(Variant::SingleposeLightning, &EstimatorOptions::default())
            .await;
        assert!(matches!(result, Err(PoseError::ModelLoadFailed(_))));
    }

    #[tokio::test]
    async fn test_backend_error_is_inference_failure() {
        let backend = StubBackend::start(500, "model exploded".to_string()).await;
        let factory =
            RemoteEstimatorFactory::new(Some(backend.base_url()), Duration::from_secs(5));
        let mut estimator = factory
            .create(Variant::SingleposeLightning, &EstimatorOptions::default())
            .await
            .unwrap();

        match estimator.estimate(&test_frame()).await {
            Err(PoseError::InferenceFailed(message)) => assert!(message.contains("model exploded")),
            other => panic!("unexpected result: {:?}", other.map(|p| p.len())),
        }
    }
}
