// src/estimator.rs - native pose-estimation capability boundary
use image::DynamicImage;
use serde_json::Value;

use crate::config::CaptureConfig;
use crate::detector::DetectorError;

/// Options forwarded opaquely to a native estimator at startup.
#[derive(Debug, Clone)]
pub struct EstimatorOptions {
    /// 0 = lite, 1 = full, 2 = heavy.
    pub model_complexity: u8,
    pub min_detection_confidence: f64,
    pub min_tracking_confidence: f64,
}

impl From<&CaptureConfig> for EstimatorOptions {
    fn from(config: &CaptureConfig) -> Self {
        Self {
            model_complexity: config.model_complexity,
            min_detection_confidence: config.min_detection_confidence,
            min_tracking_confidence: config.min_tracking_confidence,
        }
    }
}

/// An on-device landmark inference engine.
///
/// Implementations wrap whatever platform capability exists (a MediaPipe
/// graph, an ONNX session, ...). The capture layer feeds camera frames in and
/// routes the loosely-typed result through the result unwrapper, so
/// `process_frame` may return any of the shapes `RawFrame` understands.
pub trait PoseEstimator: Send {
    fn initialize(&mut self, options: &EstimatorOptions) -> Result<(), DetectorError>;

    /// Run inference on one frame. Errors are per-frame faults (logged and
    /// skipped), not session failures.
    fn process_frame(&mut self, frame: &DynamicImage) -> anyhow::Result<Value>;
}
