// src/normalize.rs - result unwrapping and landmark normalization
use serde_json::Value;

use crate::keypoints::{ProcessedKeypoint, RawLandmark, VbtPoseData, DEFAULT_SCORE, LANDMARK_INDEX_MAP};

/// The closed set of result shapes produced by external pose libraries.
///
/// Probing order is fixed: `poseLandmarks` field, `landmarks` field, bare
/// array, `pose` field. Anything else is `Unrecognized` and treated as "no
/// landmarks", not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum RawFrame {
    PoseLandmarks(Vec<RawLandmark>),
    Landmarks(Vec<RawLandmark>),
    Bare(Vec<RawLandmark>),
    Pose(Vec<RawLandmark>),
    Unrecognized,
}

impl RawFrame {
    pub fn from_value(value: &Value) -> RawFrame {
        if let Some(landmarks) = value.get("poseLandmarks").and_then(parse_landmarks) {
            return RawFrame::PoseLandmarks(landmarks);
        }
        if let Some(landmarks) = value.get("landmarks").and_then(parse_landmarks) {
            return RawFrame::Landmarks(landmarks);
        }
        if value.is_array() {
            if let Some(landmarks) = parse_landmarks(value) {
                return RawFrame::Bare(landmarks);
            }
        }
        if let Some(landmarks) = value.get("pose").and_then(parse_landmarks) {
            return RawFrame::Pose(landmarks);
        }
        RawFrame::Unrecognized
    }

    /// The extracted landmark array, or `None` for unrecognized input.
    pub fn landmarks(&self) -> Option<&[RawLandmark]> {
        match self {
            RawFrame::PoseLandmarks(l)
            | RawFrame::Landmarks(l)
            | RawFrame::Bare(l)
            | RawFrame::Pose(l) => Some(l),
            RawFrame::Unrecognized => None,
        }
    }
}

fn parse_landmarks(value: &Value) -> Option<Vec<RawLandmark>> {
    if !value.is_array() {
        return None;
    }
    serde_json::from_value(value.clone()).ok()
}

/// Convert a raw landmark array into the canonical pose record.
///
/// Pure and total: indices beyond the input length are skipped, undersized or
/// empty input yields an empty keypoints list, and landmarks without a
/// visibility field default to a score of 0.5. Output order follows the
/// index map.
pub fn normalize(raw: &[RawLandmark], timestamp: u64) -> VbtPoseData {
    let mut keypoints = Vec::with_capacity(LANDMARK_INDEX_MAP.len());
    for (index, name) in LANDMARK_INDEX_MAP {
        if let Some(landmark) = raw.get(index) {
            keypoints.push(ProcessedKeypoint {
                name,
                x: landmark.x,
                y: landmark.y,
                score: landmark.visibility.unwrap_or(DEFAULT_SCORE),
            });
        }
    }
    VbtPoseData { keypoints, timestamp }
}
