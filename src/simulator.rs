// src/simulator.rs - deterministic repetition generator used when no native estimator is available
use std::collections::HashMap;
use std::time::Instant;

use nalgebra::Vector2;
use once_cell::sync::Lazy;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::CaptureConfig;
use crate::keypoints::{KeypointName, ProcessedKeypoint, VbtPoseData};

const DEFAULT_CYCLE_MS: f64 = 2500.0;
const ECCENTRIC_END: f64 = 0.4;
const BOTTOM_PAUSE_END: f64 = 0.5;
const CONCENTRIC_END: f64 = 0.85;
const TOP_POSITION: f64 = 0.35;
const BOTTOM_POSITION: f64 = 0.65;
/// Fatigue drift never pushes the baseline past this.
const DRIFT_CEILING: f64 = 0.7;
const TRACKING_SCORE_FLOOR: f64 = 0.9;

struct BodyPoint {
    /// Offset from the hip baseline at image center.
    offset: Vector2<f64>,
    /// Region confidence: torso tracks best, legs worst.
    confidence: f64,
}

impl BodyPoint {
    fn new(dx: f64, dy: f64, confidence: f64) -> Self {
        Self { offset: Vector2::new(dx, dy), confidence }
    }
}

static BODY_POINTS: Lazy<HashMap<KeypointName, BodyPoint>> = Lazy::new(|| {
    let mut map = HashMap::with_capacity(KeypointName::COUNT);
    map.insert(KeypointName::Nose, BodyPoint::new(0.0, -0.38, 0.9));
    map.insert(KeypointName::LeftEye, BodyPoint::new(-0.03, -0.40, 0.85));
    map.insert(KeypointName::RightEye, BodyPoint::new(0.03, -0.40, 0.85));
    map.insert(KeypointName::LeftEar, BodyPoint::new(-0.06, -0.39, 0.8));
    map.insert(KeypointName::RightEar, BodyPoint::new(0.06, -0.39, 0.8));
    map.insert(KeypointName::LeftShoulder, BodyPoint::new(-0.12, -0.28, 0.95));
    map.insert(KeypointName::RightShoulder, BodyPoint::new(0.12, -0.28, 0.95));
    map.insert(KeypointName::LeftElbow, BodyPoint::new(-0.17, -0.16, 0.85));
    map.insert(KeypointName::RightElbow, BodyPoint::new(0.17, -0.16, 0.85));
    map.insert(KeypointName::LeftWrist, BodyPoint::new(-0.19, -0.05, 0.9));
    map.insert(KeypointName::RightWrist, BodyPoint::new(0.19, -0.05, 0.9));
    map.insert(KeypointName::LeftHip, BodyPoint::new(-0.08, 0.0, 0.95));
    map.insert(KeypointName::RightHip, BodyPoint::new(0.08, 0.0, 0.95));
    map.insert(KeypointName::LeftKnee, BodyPoint::new(-0.09, 0.18, 0.85));
    map.insert(KeypointName::RightKnee, BodyPoint::new(0.09, 0.18, 0.85));
    map.insert(KeypointName::LeftAnkle, BodyPoint::new(-0.10, 0.34, 0.8));
    map.insert(KeypointName::RightAnkle, BodyPoint::new(0.10, 0.34, 0.8));
    map
});

/// Synthetic landmark generator modeling repetition cycles of a loaded lift:
/// eccentric descent, bottom pause, concentric drive, top pause. A fatigue
/// term drifts the baseline downward across reps, clamped at a ceiling;
/// heavier loads stretch the cycle.
pub struct RepSimulator {
    origin: Instant,
    cycle_ms: f64,
    fatigue_rate: f64,
    tracking_point: KeypointName,
    noise_amplitude: f64,
    rng: StdRng,
}

impl RepSimulator {
    pub fn new(config: &CaptureConfig) -> Self {
        let rng = match config.noise_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            origin: Instant::now(),
            cycle_ms: DEFAULT_CYCLE_MS * (1.0 + config.load_kg.max(0.0) / 200.0),
            fatigue_rate: config.fatigue_rate,
            tracking_point: config.tracking_point,
            noise_amplitude: config.noise_amplitude,
            rng,
        }
    }

    /// Realized cycle duration in milliseconds, after load scaling.
    pub fn cycle_ms(&self) -> f64 {
        self.cycle_ms
    }

    /// Rezero the clock origin (and thereby the rep counter) so cycles start
    /// at the eccentric phase whenever detection (re)starts.
    pub fn reset(&mut self) {
        self.origin = Instant::now();
    }

    /// Next pose from the wall clock.
    pub fn next_pose(&mut self) -> VbtPoseData {
        let elapsed = self.origin.elapsed().as_millis() as u64;
        self.pose_at(elapsed)
    }

    /// Pose at an explicit elapsed time. Exposed so tests can drive the
    /// simulator with a controlled clock.
    pub fn pose_at(&mut self, elapsed_ms: u64) -> VbtPoseData {
        let rep_index = (elapsed_ms as f64 / self.cycle_ms).floor();
        let phase = (elapsed_ms as f64 % self.cycle_ms) / self.cycle_ms;

        let base = base_position(phase);
        let scaled = (base * (1.0 + rep_index * self.fatigue_rate * 0.1)).min(DRIFT_CEILING);

        let mut keypoints = Vec::with_capacity(KeypointName::COUNT);
        for name in KeypointName::ALL {
            let point = &BODY_POINTS[&name];
            let position = Vector2::new(0.5, scaled) + point.offset
                + Vector2::new(self.noise(), self.noise());
            let score = if name == self.tracking_point {
                point.confidence.max(TRACKING_SCORE_FLOOR)
            } else {
                point.confidence
            };
            keypoints.push(ProcessedKeypoint {
                name,
                x: position.x.clamp(0.0, 1.0),
                y: position.y.clamp(0.0, 1.0),
                score,
            });
        }
        VbtPoseData { keypoints, timestamp: elapsed_ms }
    }

    fn noise(&mut self) -> f64 {
        if self.noise_amplitude <= 0.0 {
            return 0.0;
        }
        self.rng.gen_range(-self.noise_amplitude..=self.noise_amplitude)
    }
}

/// Piecewise-linear hip height over one normalized cycle.
fn base_position(phase: f64) -> f64 {
    if phase < ECCENTRIC_END {
        TOP_POSITION + (BOTTOM_POSITION - TOP_POSITION) * (phase / ECCENTRIC_END)
    } else if phase < BOTTOM_PAUSE_END {
        BOTTOM_POSITION
    } else if phase < CONCENTRIC_END {
        BOTTOM_POSITION
            + (TOP_POSITION - BOTTOM_POSITION) * ((phase - BOTTOM_PAUSE_END) / (CONCENTRIC_END - BOTTOM_PAUSE_END))
    } else {
        TOP_POSITION
    }
}
