// src/detector.rs - lifecycle state machine, throughput accounting, subscriber fan-out
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, Weak};
use std::time::Instant;

use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::CaptureConfig;
use crate::keypoints::VbtPoseData;
use crate::normalize::{normalize, RawFrame};

const FPS_WINDOW_MS: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorState {
    Uninitialized,
    Loading,
    Ready,
    Error,
    NotAvailable,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DetectorError {
    /// No landmark-producing capability exists on this platform. Terminal for
    /// the instance; recover by requesting simulation or creating a new one.
    #[error("no pose source available on this platform")]
    PlatformUnsupported,
    /// The capability exists but failed to start. Recoverable by calling
    /// `initialize` again.
    #[error("pose source failed to start: {0}")]
    InitFailed(String),
}

type SubscriberFn = Arc<dyn Fn(Option<&VbtPoseData>) + Send + Sync>;

struct DetectorInner {
    state: DetectorState,
    last_error: Option<String>,
    last_pose: Option<VbtPoseData>,
    subscribers: Vec<(Uuid, SubscriberFn)>,
    epoch: Instant,
    last_timestamp: u64,
    window_start: Option<u64>,
    frames_in_window: u32,
    current_fps: u32,
    total_frames: u64,
    min_confidence: f64,
    min_keypoints: usize,
}

impl DetectorInner {
    /// Clamp to the monotonic floor so consumers never observe time running
    /// backwards within one instance.
    fn effective_timestamp(&mut self, declared: Option<u64>) -> u64 {
        let raw = declared.unwrap_or_else(|| self.epoch.elapsed().as_millis() as u64);
        let ts = raw.max(self.last_timestamp);
        self.last_timestamp = ts;
        ts
    }

    /// Drop keypoints below the confidence threshold. A pose with fewer
    /// survivors than `min_keypoints` becomes `None`: "nothing usable
    /// detected" rather than a partial pose.
    fn filter_pose(&self, pose: VbtPoseData) -> Option<VbtPoseData> {
        let timestamp = pose.timestamp;
        let kept: Vec<_> = pose
            .keypoints
            .into_iter()
            .filter(|k| k.score >= self.min_confidence)
            .collect();
        if kept.len() < self.min_keypoints {
            return None;
        }
        Some(VbtPoseData { keypoints: kept, timestamp })
    }

    /// Per-frame bookkeeping shared by both ingestion paths: a 1-second
    /// sliding FPS window (snapshot, not smoothed) and the last-known pose.
    fn commit(
        &mut self,
        pose: Option<VbtPoseData>,
        ts: u64,
    ) -> (Option<VbtPoseData>, Vec<(Uuid, SubscriberFn)>) {
        let broadcast = pose.and_then(|p| self.filter_pose(p));

        match self.window_start {
            None => self.window_start = Some(ts),
            Some(start) if ts.saturating_sub(start) >= FPS_WINDOW_MS => {
                self.current_fps = self.frames_in_window;
                self.frames_in_window = 0;
                self.window_start = Some(ts);
            }
            Some(_) => {}
        }
        self.frames_in_window += 1;
        self.total_frames += 1;

        if let Some(pose) = &broadcast {
            self.last_pose = Some(pose.clone());
        }
        (broadcast, self.subscribers.clone())
    }
}

/// Reactive state holder for one capture session.
///
/// Cheap to clone; all clones share the same mutex-guarded state, so native
/// callbacks arriving on a different thread than the consumers are
/// serialized. Only the driving source adapter should call the ingestion
/// methods.
#[derive(Clone)]
pub struct PoseDetector {
    inner: Arc<Mutex<DetectorInner>>,
}

/// Token returned by `subscribe`. Deregisters exactly once; repeated
/// `unsubscribe` calls are no-ops. Dropping the token does not deregister.
pub struct Subscription {
    id: Uuid,
    inner: Weak<Mutex<DetectorInner>>,
}

impl Subscription {
    pub fn unsubscribe(&self) {
        if let Some(inner) = self.inner.upgrade() {
            let mut inner = inner.lock().unwrap();
            inner.subscribers.retain(|(id, _)| *id != self.id);
        }
    }
}

impl PoseDetector {
    pub fn new(config: &CaptureConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(DetectorInner {
                state: DetectorState::Uninitialized,
                last_error: None,
                last_pose: None,
                subscribers: Vec::new(),
                epoch: Instant::now(),
                last_timestamp: 0,
                window_start: None,
                frames_in_window: 0,
                current_fps: 0,
                total_frames: 0,
                min_confidence: config.min_confidence,
                min_keypoints: config.min_keypoints,
            })),
        }
    }

    /// Run the source-specific startup work and track it through the
    /// lifecycle: `Uninitialized -> Loading -> Ready`, or `Error` /
    /// `NotAvailable` on failure. Calling this while already `Ready` is a
    /// no-op returning success.
    pub fn initialize<F>(&self, init: F) -> Result<(), DetectorError>
    where
        F: FnOnce() -> Result<(), DetectorError>,
    {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.state == DetectorState::Ready {
                debug!("detector already ready, initialize is a no-op");
                return Ok(());
            }
            inner.state = DetectorState::Loading;
            inner.last_error = None;
        }

        // Startup work may block (camera open, model load); run it unlocked.
        let result = init();

        let mut inner = self.inner.lock().unwrap();
        match &result {
            Ok(()) => {
                inner.state = DetectorState::Ready;
                inner.epoch = Instant::now();
                inner.last_timestamp = 0;
                debug!("detector ready");
            }
            Err(err) => {
                inner.state = match err {
                    DetectorError::PlatformUnsupported => DetectorState::NotAvailable,
                    DetectorError::InitFailed(_) => DetectorState::Error,
                };
                inner.last_error = Some(err.to_string());
                warn!("detector initialization failed: {err}");
            }
        }
        result
    }

    /// Feed one raw estimator result through unwrap, normalization, the
    /// confidence filter and subscriber fan-out. Returns the broadcast
    /// value. Ignored unless the detector is `Ready`.
    pub fn ingest(&self, raw: &Value, declared_timestamp: Option<u64>) -> Option<VbtPoseData> {
        let frame = RawFrame::from_value(raw);
        let (broadcast, subscribers) = {
            let mut inner = self.inner.lock().unwrap();
            if inner.state != DetectorState::Ready {
                debug!("ingest ignored: detector not ready");
                return None;
            }
            let ts = inner.effective_timestamp(declared_timestamp);
            let pose = frame.landmarks().map(|landmarks| normalize(landmarks, ts));
            inner.commit(pose, ts)
        };
        fan_out(&subscribers, broadcast.as_ref());
        broadcast
    }

    /// Ingest-equivalent path for already-normalized poses (the simulator
    /// driver). Same filter, accounting and fan-out as `ingest`.
    pub fn ingest_pose(&self, pose: VbtPoseData) -> Option<VbtPoseData> {
        let (broadcast, subscribers) = {
            let mut inner = self.inner.lock().unwrap();
            if inner.state != DetectorState::Ready {
                debug!("ingest_pose ignored: detector not ready");
                return None;
            }
            let ts = inner.effective_timestamp(Some(pose.timestamp));
            let pose = VbtPoseData { keypoints: pose.keypoints, timestamp: ts };
            inner.commit(Some(pose), ts)
        };
        fan_out(&subscribers, broadcast.as_ref());
        broadcast
    }

    /// Register a pose subscriber. Fan-out is synchronous, in registration
    /// order, with `None` delivered whenever a frame produced no usable
    /// landmarks.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(Option<&VbtPoseData>) + Send + Sync + 'static,
    {
        let id = Uuid::new_v4();
        let mut inner = self.inner.lock().unwrap();
        inner.subscribers.push((id, Arc::new(callback)));
        Subscription { id, inner: Arc::downgrade(&self.inner) }
    }

    pub fn status(&self) -> DetectorState {
        self.inner.lock().unwrap().state
    }

    pub fn error(&self) -> Option<String> {
        self.inner.lock().unwrap().last_error.clone()
    }

    /// Most recent 1-second throughput sample.
    pub fn fps(&self) -> u32 {
        self.inner.lock().unwrap().current_fps
    }

    pub fn last_pose(&self) -> Option<VbtPoseData> {
        self.inner.lock().unwrap().last_pose.clone()
    }

    pub fn total_frames(&self) -> u64 {
        self.inner.lock().unwrap().total_frames
    }

    /// Forget recent data (last pose, throughput counters) without touching
    /// the lifecycle state.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.last_pose = None;
        inner.window_start = None;
        inner.frames_in_window = 0;
        inner.current_fps = 0;
        inner.total_frames = 0;
    }

    /// Tear the instance down: all subscribers cleared, state back to
    /// `Uninitialized`. Ingestion becomes a no-op until a fresh
    /// `initialize`.
    pub fn destroy(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.subscribers.clear();
        inner.last_pose = None;
        inner.window_start = None;
        inner.frames_in_window = 0;
        inner.current_fps = 0;
        inner.state = DetectorState::Uninitialized;
        inner.last_error = None;
    }
}

/// Delivery happens outside the state lock, and panics are contained
/// per-subscriber: a faulty callback cannot stop delivery to the rest or
/// corrupt detector state.
fn fan_out(subscribers: &[(Uuid, SubscriberFn)], pose: Option<&VbtPoseData>) {
    for (id, callback) in subscribers {
        let outcome = catch_unwind(AssertUnwindSafe(|| callback(pose)));
        if outcome.is_err() {
            warn!(subscriber = %id, "pose subscriber panicked; continuing fan-out");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keypoints::{KeypointName, ProcessedKeypoint};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ready_detector() -> PoseDetector {
        let detector = PoseDetector::new(&CaptureConfig::default());
        detector.initialize(|| Ok(())).unwrap();
        detector
    }

    fn body_json(visibility: f64) -> Value {
        let landmarks: Vec<Value> = (0..33)
            .map(|i| json!({"x": i as f64 / 33.0, "y": 0.5, "z": 0.0, "visibility": visibility}))
            .collect();
        json!({ "poseLandmarks": landmarks })
    }

    #[test]
    fn test_initialize_reaches_ready_and_is_idempotent() {
        let detector = PoseDetector::new(&CaptureConfig::default());
        assert_eq!(detector.status(), DetectorState::Uninitialized);

        detector.initialize(|| Ok(())).unwrap();
        assert_eq!(detector.status(), DetectorState::Ready);

        // Second call must not re-run startup work.
        detector
            .initialize(|| panic!("startup work re-ran while ready"))
            .unwrap();
        assert_eq!(detector.status(), DetectorState::Ready);
    }

    #[test]
    fn test_initialize_failure_states() {
        let detector = PoseDetector::new(&CaptureConfig::default());
        let err = detector
            .initialize(|| Err(DetectorError::InitFailed("model load".into())))
            .unwrap_err();
        assert_eq!(err, DetectorError::InitFailed("model load".into()));
        assert_eq!(detector.status(), DetectorState::Error);
        assert!(detector.error().unwrap().contains("model load"));

        // InitFailed is recoverable by initializing again.
        detector.initialize(|| Ok(())).unwrap();
        assert_eq!(detector.status(), DetectorState::Ready);
        assert_eq!(detector.error(), None);

        let detector = PoseDetector::new(&CaptureConfig::default());
        let err = detector
            .initialize(|| Err(DetectorError::PlatformUnsupported))
            .unwrap_err();
        assert_eq!(err, DetectorError::PlatformUnsupported);
        assert_eq!(detector.status(), DetectorState::NotAvailable);
    }

    #[test]
    fn test_ingest_requires_ready() {
        let detector = PoseDetector::new(&CaptureConfig::default());
        assert_eq!(detector.ingest(&body_json(0.9), Some(0)), None);
        assert_eq!(detector.total_frames(), 0);
    }

    #[test]
    fn test_ingest_broadcasts_full_pose() {
        let detector = ready_detector();
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        let _sub = detector.subscribe(move |pose| {
            sink.lock().unwrap().push(pose.map(|p| p.keypoints.len()));
        });

        let pose = detector.ingest(&body_json(0.9), Some(10)).unwrap();
        assert_eq!(pose.keypoints.len(), KeypointName::COUNT);
        assert!(pose.keypoints.iter().all(|k| (k.score - 0.9).abs() < 1e-9));
        assert_eq!(received.lock().unwrap().as_slice(), &[Some(17)]);
        assert_eq!(detector.last_pose().unwrap(), pose);
    }

    #[test]
    fn test_unrecognized_input_broadcasts_none() {
        let detector = ready_detector();
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        let _sub = detector.subscribe(move |pose| {
            sink.lock().unwrap().push(pose.is_some());
        });

        assert_eq!(detector.ingest(&json!({}), Some(0)), None);
        assert_eq!(received.lock().unwrap().as_slice(), &[false]);
        assert_eq!(detector.last_pose(), None);
    }

    #[test]
    fn test_low_confidence_broadcasts_none_but_keeps_filter_out_of_normalize() {
        let detector = ready_detector();

        // Only three mapped indices clear the 0.6 threshold.
        let mut landmarks: Vec<Value> = (0..33)
            .map(|i| json!({"x": i as f64 / 33.0, "y": 0.5, "visibility": 0.2}))
            .collect();
        for index in [11, 12, 23] {
            landmarks[index] = json!({"x": 0.5, "y": 0.5, "visibility": 0.9});
        }
        let raw = json!({ "poseLandmarks": landmarks });

        assert_eq!(detector.ingest(&raw, Some(0)), None);

        // The normalizer itself does not filter.
        let frame = RawFrame::from_value(&raw);
        let pose = normalize(frame.landmarks().unwrap(), 0);
        assert_eq!(pose.keypoints.len(), KeypointName::COUNT);
    }

    #[test]
    fn test_partial_pose_above_functional_threshold_survives() {
        let detector = ready_detector();
        let mut landmarks: Vec<Value> = (0..33)
            .map(|i| json!({"x": i as f64 / 33.0, "y": 0.5, "visibility": 0.2}))
            .collect();
        for index in [11, 12, 23, 24, 25] {
            landmarks[index] = json!({"x": 0.5, "y": 0.5, "visibility": 0.9});
        }
        let pose = detector
            .ingest(&json!({ "poseLandmarks": landmarks }), Some(0))
            .unwrap();
        assert_eq!(pose.keypoints.len(), 5);
    }

    #[test]
    fn test_fps_window_snapshot() {
        let detector = ready_detector();
        for i in 0..5u64 {
            detector.ingest(&body_json(0.9), Some(i * 100));
        }
        // Still inside the first window.
        assert_eq!(detector.fps(), 0);

        detector.ingest(&body_json(0.9), Some(1001));
        assert_eq!(detector.fps(), 5);

        // The triggering frame opens the next window.
        detector.ingest(&body_json(0.9), Some(2002));
        assert_eq!(detector.fps(), 1);
    }

    #[test]
    fn test_timestamps_never_decrease() {
        let detector = ready_detector();
        detector.ingest(&body_json(0.9), Some(500));
        let pose = detector.ingest(&body_json(0.9), Some(300)).unwrap();
        assert_eq!(pose.timestamp, 500);
    }

    #[test]
    fn test_subscribers_notified_in_registration_order() {
        let detector = ready_detector();
        let order = Arc::new(Mutex::new(Vec::new()));
        let first = order.clone();
        let second = order.clone();
        let _a = detector.subscribe(move |_| first.lock().unwrap().push("a"));
        let _b = detector.subscribe(move |_| second.lock().unwrap().push("b"));

        detector.ingest(&body_json(0.9), Some(0));
        assert_eq!(order.lock().unwrap().as_slice(), &["a", "b"]);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let detector = ready_detector();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let sub = detector.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        detector.ingest(&body_json(0.9), Some(0));
        sub.unsubscribe();
        sub.unsubscribe();
        detector.ingest(&body_json(0.9), Some(1));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_subscriber_does_not_stop_fan_out() {
        let detector = ready_detector();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let _bad = detector.subscribe(|_| panic!("subscriber bug"));
        let _good = detector.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        detector.ingest(&body_json(0.9), Some(0));
        detector.ingest(&body_json(0.9), Some(1));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        // Detector state survived the panics.
        assert_eq!(detector.status(), DetectorState::Ready);
        assert_eq!(detector.total_frames(), 2);
    }

    #[test]
    fn test_reset_clears_data_but_not_state() {
        let detector = ready_detector();
        detector.ingest(&body_json(0.9), Some(0));
        detector.ingest(&body_json(0.9), Some(1001));
        assert!(detector.last_pose().is_some());
        assert!(detector.fps() > 0);

        detector.reset();
        assert_eq!(detector.last_pose(), None);
        assert_eq!(detector.fps(), 0);
        assert_eq!(detector.status(), DetectorState::Ready);
    }

    #[test]
    fn test_destroy_is_terminal() {
        let detector = ready_detector();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let _sub = detector.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        detector.destroy();
        assert_eq!(detector.status(), DetectorState::Uninitialized);
        assert_eq!(detector.ingest(&body_json(0.9), Some(0)), None);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_ingest_pose_uses_same_filter() {
        let detector = ready_detector();
        let weak = VbtPoseData {
            keypoints: vec![ProcessedKeypoint {
                name: KeypointName::LeftHip,
                x: 0.5,
                y: 0.5,
                score: 0.3,
            }],
            timestamp: 0,
        };
        assert_eq!(detector.ingest_pose(weak), None);
        assert_eq!(detector.total_frames(), 1);
    }
}
