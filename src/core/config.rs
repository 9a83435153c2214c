use crate::core::transcript::Retention;
use crate::models::pose::{EstimatorOptions, Variant};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Synthetic camera capture size
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct CameraConfig {
    pub width: u32,
    pub height: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Model variant activated at startup
    pub variant: Variant,
    /// Inference backend base URL, e.g. "http://localhost:8000"
    pub backend_url: Option<String>,
    /// Submit the rendered frame every 5 seconds while detecting
    pub auto_submit: bool,
    /// Ask the backend to persist submitted frames
    pub store_on_submit: bool,
    /// Per-request timeout for submissions in seconds
    pub submit_timeout_secs: u64,
    /// Refresh interval driving detection ticks in milliseconds
    pub frame_interval_ms: u64,
    /// How long to wait for a webcam's first frame in milliseconds
    pub first_frame_timeout_ms: u64,
    /// Keypoints scoring at or below this are not drawn (0.0-1.0)
    pub keypoint_score_threshold: f32,
    /// Restart video clips when playback reaches the end
    pub loop_video: bool,
    /// How many detection frames the session transcript keeps
    pub transcript_retention: Retention,
    /// Default transcript export file
    pub export_path: PathBuf,
    /// Options passed to every estimator instance
    pub estimator: EstimatorOptions,
    pub camera: CameraConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            variant: Variant::default(),
            backend_url: None,
            auto_submit: false,
            store_on_submit: true,
            submit_timeout_secs: 10,
            frame_interval_ms: 16, // ~60 Hz display refresh
            first_frame_timeout_ms: 5000,
            keypoint_score_threshold: 0.3,
            loop_video: false,
            transcript_retention: Retention::Unbounded,
            export_path: PathBuf::from("detections.json"),
            estimator: EstimatorOptions::default(),
            camera: CameraConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file, creating with defaults if it doesn't exist
    pub fn load() -> ConfigResult<Self> {
        Self::load_from(&Self::get_config_path()?)
    }

    /// Load configuration from an explicit path, creating it with defaults if missing
    pub fn load_from(path: &Path) -> ConfigResult<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&contents)?;
            config.validate()?;
            Ok(config)
        } else {
            let config = Self::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> ConfigResult<()> {
        self.save_to(&Self::get_config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> ConfigResult<()> {
        self.validate()?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(url) = &self.backend_url {
            let parsed = reqwest::Url::parse(url.trim())
                .map_err(|e| ConfigError::Invalid(format!("Invalid backend URL {}: {}", url, e)))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(ConfigError::Invalid(format!(
                    "Invalid backend URL scheme: {}. Must be http or https",
                    parsed.scheme()
                )));
            }
        }

        if self.submit_timeout_secs == 0 || self.submit_timeout_secs > 300 {
            return Err(ConfigError::Invalid(format!(
                "Invalid submit timeout: {}. Must be between 1 and 300 seconds",
                self.submit_timeout_secs
            )));
        }

        if self.frame_interval_ms == 0 || self.frame_interval_ms > 1000 {
            return Err(ConfigError::Invalid(format!(
                "Invalid frame interval: {}. Must be between 1 and 1000 ms",
                self.frame_interval_ms
            )));
        }

        if self.first_frame_timeout_ms == 0 || self.first_frame_timeout_ms > 60_000 {
            return Err(ConfigError::Invalid(format!(
                "Invalid first frame timeout: {}. Must be between 1 and 60000 ms",
                self.first_frame_timeout_ms
            )));
        }

        if !(0.0..=1.0).contains(&self.keypoint_score_threshold) {
            return Err(ConfigError::Invalid(format!(
                "Invalid keypoint score threshold: {}. Must be between 0.0 and 1.0",
                self.keypoint_score_threshold
            )));
        }

        if !(0.0..=1.0).contains(&self.estimator.min_pose_score) {
            return Err(ConfigError::Invalid(format!(
                "Invalid minimum pose score: {}. Must be between 0.0 and 1.0",
                self.estimator.min_pose_score
            )));
        }

        let dimension = self.estimator.multipose_max_dimension;
        if dimension == 0 || dimension % 32 != 0 {
            return Err(ConfigError::Invalid(format!(
                "Invalid multi-pose max dimension: {}. Must be a positive multiple of 32",
                dimension
            )));
        }

        if let Retention::Capped(0) = self.transcript_retention {
            return Err(ConfigError::Invalid(
                "Transcript retention cap must be at least 1".to_string(),
            ));
        }

        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "Invalid camera size: {}x{}",
                self.camera.width, self.camera.height
            )));
        }

        Ok(())
    }

    /// Reset to default configuration
    pub fn reset() -> ConfigResult<Self> {
        let config = Self::default();
        config.save()?;
        Ok(config)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }

    pub fn first_frame_timeout(&self) -> Duration {
        Duration::from_millis(self.first_frame_timeout_ms)
    }

    pub fn submit_timeout(&self) -> Duration {
        Duration::from_secs(self.submit_timeout_secs)
    }

    /// Get the configuration file path
    fn get_config_path() -> ConfigResult<PathBuf> {
        let home = std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .map_err(|_| ConfigError::NoHomeDirectory)?;

        let mut path = PathBuf::from(home);
        path.push(".posewatch");
        path.push("config");
        path.push("settings.json");

        Ok(path)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not determine home directory")]
    NoHomeDirectory,

    #[error("Config file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config format error: {0}")]
    Format(#[from] serde_json::Error),

    #[error("{0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.variant, Variant::SingleposeLightning);
        assert_eq!(config.backend_url, None);
        assert!(!config.auto_submit);
        assert!(config.store_on_submit);
        assert_eq!(config.submit_timeout_secs, 10);
        assert_eq!(config.frame_interval_ms, 16);
        assert_eq!(config.first_frame_timeout_ms, 5000);
        assert_eq!(config.keypoint_score_threshold, 0.3);
        assert_eq!(config.transcript_retention, Retention::Unbounded);
        assert_eq!(config.export_path, PathBuf::from("detections.json"));
        assert_eq!(config.camera, CameraConfig { width: 640, height: 480 });
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.backend_url = Some("not a url".to_string());
        assert!(config.validate().is_err());
        config.backend_url = Some("ftp://example.com".to_string());
        assert!(config.validate().is_err());
        config.backend_url = Some("https://example.com:8000/".to_string());
        assert!(config.validate().is_ok());

        config.frame_interval_ms = 0;
        assert!(config.validate().is_err());
        config.frame_interval_ms = 16;

        config.keypoint_score_threshold = 1.5;
        assert!(config.validate().is_err());
        config.keypoint_score_threshold = 0.3;

        config.estimator.multipose_max_dimension = 250;
        assert!(config.validate().is_err());
        config.estimator.multipose_max_dimension = 256;

        config.transcript_retention = Retention::Capped(0);
        assert!(config.validate().is_err());
        config.transcript_retention = Retention::Capped(100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization() {
        let mut config = Config::default();
        config.variant = Variant::MultiposeLightning;
        config.transcript_retention = Retention::Capped(50);
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(config, deserialized);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"variant": "SINGLEPOSE_THUNDER", "auto_submit": true}"#)
                .unwrap();
        assert_eq!(config.variant, Variant::SingleposeThunder);
        assert!(config.auto_submit);
        assert_eq!(config.frame_interval_ms, 16);
    }

    #[test]
    fn test_load_creates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config").join("settings.json");

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config, Config::default());
        assert!(path.exists());

        let mut changed = config.clone();
        changed.loop_video = true;
        changed.save_to(&path).unwrap();
        assert_eq!(Config::load_from(&path).unwrap(), changed);
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"frame_interval_ms": 0}"#).unwrap();

        assert!(matches!(Config::load_from(&path), Err(ConfigError::Invalid(_))));
    }
}
