// src/config.rs
use serde::{Deserialize, Serialize};

use crate::keypoints::KeypointName;

/// Construction-time configuration for a capture session.
///
/// `model_complexity` and the detection/tracking confidences are forwarded
/// opaquely to the native estimator; they do not affect the pipeline itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// 0 = lite, 1 = full, 2 = heavy.
    pub model_complexity: u8,
    pub min_detection_confidence: f64,
    pub min_tracking_confidence: f64,
    /// Keypoints scoring below this are dropped before broadcast.
    pub min_confidence: f64,
    /// Fewer surviving keypoints than this broadcasts `None` instead of a
    /// partial pose.
    pub min_keypoints: usize,
    /// The keypoint the VBT analytics follow (bar-path proxy).
    pub tracking_point: KeypointName,
    pub load_kg: f64,
    pub fatigue_rate: f64,
    pub simulation_fps: f64,
    /// `Some(true)` forces the simulator, `Some(false)` forces the native
    /// estimator, `None` prefers native with simulator fallback.
    pub use_simulation: Option<bool>,
    /// Uniform per-coordinate simulator jitter; 0 disables.
    pub noise_amplitude: f64,
    /// Seed for the simulator noise source; `None` seeds from entropy.
    pub noise_seed: Option<u64>,
    pub camera_index: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            model_complexity: 1,
            min_detection_confidence: 0.5,
            min_tracking_confidence: 0.5,
            min_confidence: 0.6,
            min_keypoints: 4,
            tracking_point: KeypointName::LeftHip,
            load_kg: 0.0,
            fatigue_rate: 0.05,
            simulation_fps: 30.0,
            use_simulation: None,
            noise_amplitude: 0.01,
            noise_seed: None,
            camera_index: 0,
        }
    }
}
