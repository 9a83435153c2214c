// MoveNet output decoding
//
// The backend returns raw model tensors with normalized (y, x, score) keypoints.
// These helpers turn them into poses in frame pixel coordinates.

use crate::models::pose::{Keypoint, Pose, PoseError, PoseResult};
use serde::Deserialize;

pub const NUM_KEYPOINTS: usize = 17;

/// Values per multi-pose row: 17 keypoint triples, a box and a pose score
pub const MULTIPOSE_ROW_LEN: usize = NUM_KEYPOINTS * 3 + 5;

/// COCO keypoint names in model output order
pub const KEYPOINT_NAMES: [&str; NUM_KEYPOINTS] = [
    "nose",
    "left_eye",
    "right_eye",
    "left_ear",
    "right_ear",
    "left_shoulder",
    "right_shoulder",
    "left_elbow",
    "right_elbow",
    "left_wrist",
    "right_wrist",
    "left_hip",
    "right_hip",
    "left_knee",
    "right_knee",
    "left_ankle",
    "right_ankle",
];

/// JSON body returned by `POST /predict`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PredictResponse {
    /// Single-pose output, shape [1, 17, 3]
    #[serde(default)]
    pub keypoints: Option<Vec<Vec<[f32; 3]>>>,
    /// Multi-pose output, shape [1, 6, 56]
    #[serde(default)]
    pub raw_output_0: Option<Vec<Vec<Vec<f32>>>>,
    #[serde(default)]
    pub model_variant: Option<String>,
    #[serde(default)]
    pub stored_at: Option<String>,
}

/// Decode one single-pose tensor row set into a pose scaled to `width`x`height`
pub fn decode_singlepose(rows: &[[f32; 3]], width: u32, height: u32) -> PoseResult<Pose> {
    if rows.len() != NUM_KEYPOINTS {
        return Err(PoseError::InferenceFailed(format!(
            "expected {} keypoints, got {}",
            NUM_KEYPOINTS,
            rows.len()
        )));
    }

    let keypoints: Vec<Keypoint> = rows
        .iter()
        .zip(KEYPOINT_NAMES)
        .map(|([y, x, score], name)| {
            Keypoint::new(name, x * width as f32, y * height as f32, *score)
        })
        .collect();
    let score = keypoints.iter().map(|k| k.score).sum::<f32>() / NUM_KEYPOINTS as f32;

    Ok(Pose::new(keypoints).with_score(score))
}

/// Decode multi-pose rows, dropping poses scoring below `min_pose_score`
pub fn decode_multipose(
    rows: &[Vec<f32>],
    width: u32,
    height: u32,
    min_pose_score: f32,
) -> PoseResult<Vec<Pose>> {
    let mut poses = Vec::new();

    for row in rows {
        if row.len() < MULTIPOSE_ROW_LEN {
            return Err(PoseError::InferenceFailed(format!(
                "multi-pose row has {} values, expected {}",
                row.len(),
                MULTIPOSE_ROW_LEN
            )));
        }

        let score = row[MULTIPOSE_ROW_LEN - 1];
        if score < min_pose_score {
            continue;
        }

        let keypoints = row[..NUM_KEYPOINTS * 3]
            .chunks_exact(3)
            .zip(KEYPOINT_NAMES)
            .map(|(triple, name)| {
                Keypoint::new(name, triple[1] * width as f32, triple[0] * height as f32, triple[2])
            })
            .collect();
        poses.push(Pose::new(keypoints).with_score(score));
    }

    Ok(poses)
}

/// Decode a backend response for a frame of the given size
pub fn decode_response(
    response: &PredictResponse,
    width: u32,
    height: u32,
    min_pose_score: f32,
) -> PoseResult<Vec<Pose>> {
    if let Some(batches) = &response.raw_output_0 {
        let rows = batches.first().map(Vec::as_slice).unwrap_or_default();
        return decode_multipose(rows, width, height, min_pose_score);
    }
    if let Some(batches) = &response.keypoints {
        return match batches.first() {
            Some(rows) => Ok(vec![decode_singlepose(rows, width, height)?]),
            None => Ok(vec![]),
        };
    }
    Err(PoseError::InferenceFailed(
        "backend response contains no keypoints".to_string(),
    ))
}

/// Exponential moving average over single-pose keypoint positions
#[derive(Debug, Clone)]
pub struct KeypointSmoother {
    alpha: f32,
    previous: Option<Vec<(f32, f32)>>,
}

impl KeypointSmoother {
    pub fn new(alpha: f32) -> Self {
        Self {
            alpha: alpha.clamp(0.0, 1.0),
            previous: None,
        }
    }

    pub fn smooth(&mut self, pose: &mut Pose) {
        let current: Vec<(f32, f32)> = pose.keypoints.iter().map(|k| (k.x, k.y)).collect();

        if let Some(previous) = &self.previous {
            if previous.len() == current.len() {
                for (keypoint, (px, py)) in pose.keypoints.iter_mut().zip(previous) {
                    keypoint.x = self.alpha * keypoint.x + (1.0 - self.alpha) * px;
                    keypoint.y = self.alpha * keypoint.y + (1.0 - self.alpha) * py;
                }
            }
        }

        self.previous = Some(pose.keypoints.iter().map(|k| (k.x, k.y)).collect());
    }

    pub fn reset(&mut self) {
        self.previous = None;
    }
}
