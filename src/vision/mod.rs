//! Camera and face detector capabilities plus the polling sampler that ties them together.
//!
//! The core never talks to a real device or model directly: it consumes the
//! [`CameraDevice`] and [`FaceDetector`] traits, holds the camera through a
//! scoped [`CameraLease`], and samples detections at a fixed interval with at
//! most one detection in flight.

mod camera;
mod replay;
mod sampler;

use crate::config::BiometricConfig;
use crate::signal::{average_ear, EyePoints};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub use camera::{CameraDevice, CameraError, CameraLease, CameraSlot, StreamId, SyntheticCamera};
pub use replay::ReplayDetector;
pub use sampler::{
    CancelToken, DetectMode, FrameSampler, SampleExit, SampleRun, SamplerError, SamplerMetrics,
    SharedDetector, TickConsumer, TickInput,
};

/// Requested capture geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CameraConstraints {
    pub width: u32,
    pub height: u32,
}

impl From<&BiometricConfig> for CameraConstraints {
    fn from(cfg: &BiometricConfig) -> Self {
        Self {
            width: cfg.camera_width,
            height: cfg.camera_height,
        }
    }
}

/// One captured video frame. `image` is an opaque encoded blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub seq: u64,
    pub width: u32,
    pub height: u32,
    pub captured_at_ms: u64,
    pub image: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Eye landmarks used for the EAR signal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceLandmarks {
    pub left_eye: EyePoints,
    pub right_eye: EyePoints,
}

/// Result of detecting a single face in a frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    #[serde(default)]
    pub bbox: BoundingBox,
    pub landmarks: FaceLandmarks,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl Detection {
    /// Average EAR of both eyes, `None` on degenerate landmarks.
    pub fn average_ear(&self) -> Option<f32> {
        average_ear(&self.landmarks.left_eye, &self.landmarks.right_eye)
    }

    pub fn without_embedding(mut self) -> Self {
        self.embedding = None;
        self
    }
}

/// Face detection/recognition capability.
///
/// Models are loaded once through [`FaceDetector::load_models`] before the
/// first detection call. Detection calls return `Ok(None)` when no face is
/// present; errors are reserved for detector failures.
pub trait FaceDetector: Send {
    fn load_models(&mut self, model_dir: Option<&Path>) -> Result<()>;
    fn models_loaded(&self) -> bool;
    fn detect_one(&mut self, frame: &Frame) -> Result<Option<Detection>>;
    fn detect_with_embedding(&mut self, frame: &Frame) -> Result<Option<Detection>>;
    fn name(&self) -> &'static str {
        "unknown_detector"
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn detection_average_ear_uses_both_eyes() {
        let det = face_with_ear(0.3);
        assert!((det.average_ear().unwrap() - 0.3).abs() < 1e-5);
    }

    #[test]
    fn detection_parses_from_trace_json() {
        let line = r#"{"landmarks":{"left_eye":[[0,0],[1,-1],[2,-1],[3,0],[2,1],[1,1]],
            "right_eye":[[0,0],[1,-1],[2,-1],[3,0],[2,1],[1,1]]},"embedding":[0.5,0.25]}"#;
        let det: Detection = serde_json::from_str(line).expect("trace line parses");
        assert_eq!(det.embedding.as_deref(), Some(&[0.5f32, 0.25][..]));
        assert_eq!(det.bbox, BoundingBox::default());
        assert!(det.average_ear().is_some());
    }

    #[test]
    fn constraints_follow_biometric_config() {
        let cfg = BiometricConfig::default();
        let constraints = CameraConstraints::from(&cfg);
        assert_eq!(constraints, CameraConstraints { width: 640, height: 480 });
    }
}
