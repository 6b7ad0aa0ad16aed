// Runtime configuration

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{PipelineError, Result};

/// Application configuration for the detection pipeline and chat client.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Capture device index (the next index is tried as a fallback)
    pub camera_index: u32,
    /// Requested capture width
    pub camera_width: u32,
    /// Requested capture height
    pub camera_height: u32,
    /// Requested capture rate, also the detection loop cadence
    pub camera_fps: u32,
    /// Face Mesh landmark model
    pub landmark_model: PathBuf,
    /// Emotion classification model
    pub emotion_model: PathBuf,
    /// Minimum face presence score for a landmark set to count as a face
    pub face_threshold: f32,
    /// Chat backend endpoint
    pub chat_endpoint: String,
    /// Chat request timeout
    pub chat_timeout: Duration,
    /// Log file written by the binary
    pub log_file: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            camera_index: 0,
            camera_width: 640,
            camera_height: 480,
            camera_fps: 30,
            landmark_model: PathBuf::from("assets/models/face_landmark.onnx"),
            emotion_model: PathBuf::from("assets/models/emotion.onnx"),
            face_threshold: 0.5,
            chat_endpoint: "http://localhost:3000/api/chat".to_string(),
            chat_timeout: Duration::from_secs(30),
            log_file: PathBuf::from("innerlight.log"),
        }
    }
}

impl AppConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create config from an arbitrary key lookup. Missing or unparseable values keep
    /// their defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            camera_index: parse_var(&lookup, "INNERLIGHT_CAMERA_INDEX")
                .unwrap_or(defaults.camera_index),
            camera_width: parse_var(&lookup, "INNERLIGHT_CAMERA_WIDTH")
                .unwrap_or(defaults.camera_width),
            camera_height: parse_var(&lookup, "INNERLIGHT_CAMERA_HEIGHT")
                .unwrap_or(defaults.camera_height),
            camera_fps: parse_var(&lookup, "INNERLIGHT_CAMERA_FPS").unwrap_or(defaults.camera_fps),
            landmark_model: lookup("INNERLIGHT_LANDMARK_MODEL")
                .map(PathBuf::from)
                .unwrap_or(defaults.landmark_model),
            emotion_model: lookup("INNERLIGHT_EMOTION_MODEL")
                .map(PathBuf::from)
                .unwrap_or(defaults.emotion_model),
            face_threshold: parse_var(&lookup, "INNERLIGHT_FACE_THRESHOLD")
                .unwrap_or(defaults.face_threshold),
            chat_endpoint: lookup("INNERLIGHT_CHAT_ENDPOINT").unwrap_or(defaults.chat_endpoint),
            chat_timeout: parse_var(&lookup, "INNERLIGHT_CHAT_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.chat_timeout),
            log_file: lookup("INNERLIGHT_LOG_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.log_file),
        }
    }

    /// Rejects values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.camera_width == 0 || self.camera_height == 0 {
            return Err(PipelineError::Config(format!(
                "camera resolution must be non-zero, got {}x{}",
                self.camera_width, self.camera_height
            )));
        }
        if self.camera_fps == 0 {
            return Err(PipelineError::Config("camera fps must be non-zero".to_string()));
        }
        if !(0.0..=1.0).contains(&self.face_threshold) {
            return Err(PipelineError::Config(format!(
                "face threshold must be within [0, 1], got {}",
                self.face_threshold
            )));
        }
        if reqwest::Url::parse(&self.chat_endpoint).is_err() {
            return Err(PipelineError::Config(format!(
                "chat endpoint is not a valid URL: {}",
                self.chat_endpoint
            )));
        }
        Ok(())
    }

    /// Interval between detection cycles.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.camera_fps.max(1) as f64)
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(key).and_then(|s| s.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.frame_interval(), Duration::from_secs_f64(1.0 / 30.0));
    }

    #[test]
    fn lookup_overrides_defaults() {
        let config = AppConfig::from_lookup(lookup_from(&[
            ("INNERLIGHT_CAMERA_INDEX", "2"),
            ("INNERLIGHT_CAMERA_FPS", " 60 "),
            ("INNERLIGHT_EMOTION_MODEL", "/opt/models/fer.onnx"),
            ("INNERLIGHT_CHAT_TIMEOUT_SECS", "5"),
        ]));
        assert_eq!(config.camera_index, 2);
        assert_eq!(config.camera_fps, 60);
        assert_eq!(config.emotion_model, PathBuf::from("/opt/models/fer.onnx"));
        assert_eq!(config.chat_timeout, Duration::from_secs(5));
        assert_eq!(config.camera_width, 640);
    }

    #[test]
    fn unparseable_values_fall_back() {
        let config = AppConfig::from_lookup(lookup_from(&[
            ("INNERLIGHT_CAMERA_WIDTH", "wide"),
            ("INNERLIGHT_FACE_THRESHOLD", "high"),
        ]));
        assert_eq!(config.camera_width, 640);
        assert_eq!(config.face_threshold, 0.5);
    }

    #[test]
    fn validate_rejects_bad_values() {
        let config = AppConfig {
            camera_fps: 0,
            ..AppConfig::default()
        };
        assert!(matches!(config.validate(), Err(PipelineError::Config(_))));

        let config = AppConfig {
            face_threshold: 1.5,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());

        let config = AppConfig {
            chat_endpoint: "not a url".to_string(),
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
