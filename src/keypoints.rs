// src/keypoints.rs - canonical keypoint schema shared by every pose source
use serde::{Deserialize, Serialize};

/// Score assigned to a landmark whose source provides no visibility field.
pub const DEFAULT_SCORE: f64 = 0.5;

/// The 17 canonical keypoint names, in COCO order.
///
/// The set is closed and versioned: renaming or reordering a variant is a
/// breaking schema change for every downstream consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeypointName {
    Nose,
    LeftEye,
    RightEye,
    LeftEar,
    RightEar,
    LeftShoulder,
    RightShoulder,
    LeftElbow,
    RightElbow,
    LeftWrist,
    RightWrist,
    LeftHip,
    RightHip,
    LeftKnee,
    RightKnee,
    LeftAnkle,
    RightAnkle,
}

impl KeypointName {
    pub const COUNT: usize = 17;

    pub const ALL: [KeypointName; Self::COUNT] = [
        KeypointName::Nose,
        KeypointName::LeftEye,
        KeypointName::RightEye,
        KeypointName::LeftEar,
        KeypointName::RightEar,
        KeypointName::LeftShoulder,
        KeypointName::RightShoulder,
        KeypointName::LeftElbow,
        KeypointName::RightElbow,
        KeypointName::LeftWrist,
        KeypointName::RightWrist,
        KeypointName::LeftHip,
        KeypointName::RightHip,
        KeypointName::LeftKnee,
        KeypointName::RightKnee,
        KeypointName::LeftAnkle,
        KeypointName::RightAnkle,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            KeypointName::Nose => "nose",
            KeypointName::LeftEye => "left_eye",
            KeypointName::RightEye => "right_eye",
            KeypointName::LeftEar => "left_ear",
            KeypointName::RightEar => "right_ear",
            KeypointName::LeftShoulder => "left_shoulder",
            KeypointName::RightShoulder => "right_shoulder",
            KeypointName::LeftElbow => "left_elbow",
            KeypointName::RightElbow => "right_elbow",
            KeypointName::LeftWrist => "left_wrist",
            KeypointName::RightWrist => "right_wrist",
            KeypointName::LeftHip => "left_hip",
            KeypointName::RightHip => "right_hip",
            KeypointName::LeftKnee => "left_knee",
            KeypointName::RightKnee => "right_knee",
            KeypointName::LeftAnkle => "left_ankle",
            KeypointName::RightAnkle => "right_ankle",
        }
    }
}

/// Mapping from the 33-point full-body landmark model onto the canonical
/// names. Indices absent from this table are discarded, never invented, and
/// the iteration order here fixes the keypoint order of every normalized
/// pose.
pub const LANDMARK_INDEX_MAP: [(usize, KeypointName); KeypointName::COUNT] = [
    (0, KeypointName::Nose),
    (2, KeypointName::LeftEye),
    (5, KeypointName::RightEye),
    (7, KeypointName::LeftEar),
    (8, KeypointName::RightEar),
    (11, KeypointName::LeftShoulder),
    (12, KeypointName::RightShoulder),
    (13, KeypointName::LeftElbow),
    (14, KeypointName::RightElbow),
    (15, KeypointName::LeftWrist),
    (16, KeypointName::RightWrist),
    (23, KeypointName::LeftHip),
    (24, KeypointName::RightHip),
    (25, KeypointName::LeftKnee),
    (26, KeypointName::RightKnee),
    (27, KeypointName::LeftAnkle),
    (28, KeypointName::RightAnkle),
];

/// One landmark as delivered by an external estimator.
///
/// x and y are normalized image-space coordinates in [0, 1]; z is relative
/// depth whose sign is only meaningful for ordering.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawLandmark {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub z: f64,
    #[serde(default)]
    pub visibility: Option<f64>,
}

/// A named, confidence-scored keypoint in normalized image space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProcessedKeypoint {
    pub name: KeypointName,
    pub x: f64,
    pub y: f64,
    pub score: f64,
}

/// One normalized pose frame handed to subscribers.
///
/// Keypoints may number fewer than 17 - landmarks missing from the source are
/// omitted, never null-padded. Timestamps are monotonic milliseconds and
/// non-decreasing within a detector instance. Consumers must treat this as an
/// immutable snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VbtPoseData {
    pub keypoints: Vec<ProcessedKeypoint>,
    pub timestamp: u64,
}

impl VbtPoseData {
    pub fn keypoint(&self, name: KeypointName) -> Option<&ProcessedKeypoint> {
        self.keypoints.iter().find(|k| k.name == name)
    }
}
