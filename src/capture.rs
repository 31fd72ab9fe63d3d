// src/capture.rs - source selection and the frame drivers feeding the detector
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use image::DynamicImage;
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{ApiBackend, CameraIndex, RequestedFormat, RequestedFormatType};
use nokhwa::Camera;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::CaptureConfig;
use crate::detector::{DetectorError, DetectorState, PoseDetector};
use crate::estimator::{EstimatorOptions, PoseEstimator};
use crate::simulator::RepSimulator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoseSourceKind {
    Native,
    Simulated,
}

/// Owns one capture session: selects the pose source, drives frames into the
/// detector, and guarantees the drivers die with it.
///
/// Subscribers cannot tell the sources apart - both deliver the same
/// normalized pose shape through the same detector path.
pub struct PoseCapture {
    config: CaptureConfig,
    detector: PoseDetector,
    estimator: Option<Box<dyn PoseEstimator>>,
    running: Arc<AtomicBool>,
    camera_ready: Arc<AtomicBool>,
    driver: Option<JoinHandle<()>>,
    source: Option<PoseSourceKind>,
}

impl PoseCapture {
    pub fn new(config: CaptureConfig, estimator: Option<Box<dyn PoseEstimator>>) -> Self {
        let detector = PoseDetector::new(&config);
        Self {
            config,
            detector,
            estimator,
            running: Arc::new(AtomicBool::new(false)),
            camera_ready: Arc::new(AtomicBool::new(false)),
            driver: None,
            source: None,
        }
    }

    /// Shared handle to the detector for subscriptions and status queries.
    pub fn detector(&self) -> PoseDetector {
        self.detector.clone()
    }

    pub fn source(&self) -> Option<PoseSourceKind> {
        self.source
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn is_camera_ready(&self) -> bool {
        self.camera_ready.load(Ordering::SeqCst)
    }

    /// Inject (or replace) the native estimator before starting. The
    /// estimator is consumed by a native session, so restarting in native
    /// mode needs a fresh one.
    pub fn set_estimator(&mut self, estimator: Box<dyn PoseEstimator>) {
        self.estimator = Some(estimator);
    }

    /// Which source `start` would bind, honoring the `use_simulation`
    /// override: forced simulation, forced native (failing when the platform
    /// has no capability), or native-preferred with simulator fallback.
    pub fn select_source(&self) -> Result<PoseSourceKind, DetectorError> {
        let native_available = self.estimator.is_some() && camera_present();
        match self.config.use_simulation {
            Some(true) => Ok(PoseSourceKind::Simulated),
            Some(false) => {
                if native_available {
                    Ok(PoseSourceKind::Native)
                } else {
                    Err(DetectorError::PlatformUnsupported)
                }
            }
            None => {
                if native_available {
                    Ok(PoseSourceKind::Native)
                } else {
                    debug!("no native capability, falling back to simulator");
                    Ok(PoseSourceKind::Simulated)
                }
            }
        }
    }

    /// Initialize the detector and spawn the frame driver. Idempotent while
    /// running. Must be called within a tokio runtime.
    pub fn start(&mut self) -> Result<(), DetectorError> {
        if self.running.load(Ordering::SeqCst) {
            debug!("capture already running, start is a no-op");
            return Ok(());
        }

        let detector = self.detector.clone();
        let source = match self.select_source() {
            Ok(source) => source,
            Err(err) => {
                let reported = err.clone();
                let _ = detector.initialize(move || Err(reported));
                return Err(err);
            }
        };

        match source {
            PoseSourceKind::Simulated => {
                detector.initialize(|| Ok(()))?;
                self.running.store(true, Ordering::SeqCst);
                self.spawn_simulated_driver();
            }
            PoseSourceKind::Native => {
                let options = EstimatorOptions::from(&self.config);
                let camera_index = self.config.camera_index;
                let mut estimator = match self.estimator.take() {
                    Some(estimator) => estimator,
                    None => return Err(DetectorError::PlatformUnsupported),
                };
                let mut camera_slot = None;
                let mut run_init = || {
                    estimator.initialize(&options)?;
                    let camera = open_camera(camera_index)
                        .map_err(|e| DetectorError::InitFailed(e.to_string()))?;
                    camera_slot = Some(camera);
                    Ok(())
                };
                // A restart after stop() finds the detector still ready, and
                // initialize would skip the startup closure; run it directly.
                let init_result = if detector.status() == DetectorState::Ready {
                    run_init()
                } else {
                    detector.initialize(run_init)
                };
                if let Err(err) = init_result {
                    // Keep the estimator so a re-initialize can retry.
                    self.estimator = Some(estimator);
                    return Err(err);
                }
                let camera = match camera_slot {
                    Some(camera) => camera,
                    None => {
                        self.estimator = Some(estimator);
                        return Err(DetectorError::InitFailed("camera was not opened".into()));
                    }
                };
                self.camera_ready.store(true, Ordering::SeqCst);
                self.running.store(true, Ordering::SeqCst);
                self.spawn_native_driver(camera, estimator);
            }
        }

        self.source = Some(source);
        info!(?source, "capture started");
        Ok(())
    }

    /// Stop driving frames. No pose is delivered after this returns: the
    /// liveness flag is cleared before the driver is aborted, and both
    /// drivers re-check it immediately before forwarding.
    pub fn stop(&mut self) {
        let was_running = self.running.swap(false, Ordering::SeqCst);
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
        self.camera_ready.store(false, Ordering::SeqCst);
        self.source = None;
        if was_running {
            info!("capture stopped");
        }
    }

    /// Stop and tear the detector down (subscribers cleared, state back to
    /// uninitialized).
    pub fn destroy(&mut self) {
        self.stop();
        self.detector.destroy();
    }

    fn spawn_simulated_driver(&mut self) {
        let detector = self.detector.clone();
        let running = self.running.clone();
        let camera_ready = self.camera_ready.clone();
        let mut simulator = RepSimulator::new(&self.config);
        let period = Duration::from_secs_f64(1.0 / self.config.simulation_fps.max(1.0));

        self.driver = Some(tokio::spawn(async move {
            // The synthetic feed has no warm-up.
            camera_ready.store(true, Ordering::SeqCst);
            simulator.reset();
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                let pose = simulator.next_pose();
                detector.ingest_pose(pose);
            }
        }));
    }

    fn spawn_native_driver(&mut self, mut camera: Camera, mut estimator: Box<dyn PoseEstimator>) {
        let detector = self.detector.clone();
        let running = self.running.clone();

        self.driver = Some(tokio::task::spawn_blocking(move || {
            while running.load(Ordering::SeqCst) {
                let frame = match camera.frame() {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!("frame grab failed: {e}");
                        continue;
                    }
                };
                let decoded = match frame.decode_image::<RgbFormat>() {
                    Ok(buffer) => DynamicImage::ImageRgb8(buffer),
                    Err(e) => {
                        warn!("frame decode failed: {e}");
                        continue;
                    }
                };
                match estimator.process_frame(&decoded) {
                    Ok(result) => {
                        if running.load(Ordering::SeqCst) {
                            detector.ingest(&result, None);
                        }
                    }
                    Err(e) => debug!("estimator produced no result: {e}"),
                }
            }
            let _ = camera.stop_stream();
        }));
    }
}

impl Drop for PoseCapture {
    fn drop(&mut self) {
        // Drivers must never outlive their session.
        self.stop();
    }
}

fn camera_present() -> bool {
    match nokhwa::query(ApiBackend::Auto) {
        Ok(cameras) => !cameras.is_empty(),
        Err(e) => {
            debug!("camera query failed: {e}");
            false
        }
    }
}

fn open_camera(index: u32) -> Result<Camera> {
    let format = RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate);
    let mut camera =
        Camera::new(CameraIndex::Index(index), format).context("failed to open camera")?;
    camera.open_stream().context("failed to open camera stream")?;
    Ok(camera)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keypoints::KeypointName;
    use std::sync::Mutex;

    fn sim_config(fps: f64) -> CaptureConfig {
        CaptureConfig {
            use_simulation: Some(true),
            simulation_fps: fps,
            noise_seed: Some(3),
            ..CaptureConfig::default()
        }
    }

    #[test]
    fn test_forced_native_without_capability_is_unsupported() {
        // No estimator injected, so the native path short-circuits before
        // any camera probing.
        let config = CaptureConfig { use_simulation: Some(false), ..CaptureConfig::default() };
        let capture = PoseCapture::new(config, None);
        assert_eq!(capture.select_source(), Err(DetectorError::PlatformUnsupported));
    }

    #[tokio::test]
    async fn test_start_without_capability_marks_not_available() {
        let config = CaptureConfig { use_simulation: Some(false), ..CaptureConfig::default() };
        let mut capture = PoseCapture::new(config, None);
        assert_eq!(capture.start(), Err(DetectorError::PlatformUnsupported));
        assert_eq!(capture.detector().status(), DetectorState::NotAvailable);
        assert!(!capture.is_running());
    }

    #[tokio::test]
    async fn test_auto_mode_falls_back_to_simulator() {
        let mut capture = PoseCapture::new(CaptureConfig::default(), None);
        assert_eq!(capture.select_source(), Ok(PoseSourceKind::Simulated));
        capture.start().unwrap();
        assert_eq!(capture.source(), Some(PoseSourceKind::Simulated));
        capture.stop();
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let mut capture = PoseCapture::new(sim_config(60.0), None);
        capture.start().unwrap();
        assert!(capture.is_running());
        capture.start().unwrap();
        assert!(capture.is_running());
        assert_eq!(capture.detector().status(), DetectorState::Ready);
        capture.stop();
        assert!(!capture.is_running());
    }

    #[tokio::test]
    async fn test_simulated_session_delivers_poses_and_stop_is_final() {
        let mut capture = PoseCapture::new(sim_config(120.0), None);
        let detector = capture.detector();

        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        let _sub = detector.subscribe(move |pose| {
            if let Some(pose) = pose {
                sink.lock().unwrap().push(pose.clone());
            }
        });

        capture.start().unwrap();
        assert!(capture.is_camera_ready());
        tokio::time::sleep(Duration::from_millis(300)).await;
        capture.stop();

        // Allow any frame that was mid-broadcast during stop() to drain.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let count_at_stop = received.lock().unwrap().len();
        assert!(count_at_stop >= 2, "expected frames, got {count_at_stop}");

        // Nothing more arrives after stop.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(received.lock().unwrap().len(), count_at_stop);
        assert!(!capture.is_camera_ready());

        // Simulated poses look exactly like native ones to subscribers.
        let poses = received.lock().unwrap();
        let mut last_ts = 0;
        for pose in poses.iter() {
            assert_eq!(pose.keypoints.len(), KeypointName::COUNT);
            assert!(pose.timestamp >= last_ts);
            last_ts = pose.timestamp;
            let hip = pose.keypoint(KeypointName::LeftHip).unwrap();
            assert!(hip.score >= 0.9);
        }
    }

    #[tokio::test]
    async fn test_destroy_tears_down_detector() {
        let mut capture = PoseCapture::new(sim_config(60.0), None);
        let detector = capture.detector();
        capture.start().unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        capture.destroy();
        assert_eq!(detector.status(), DetectorState::Uninitialized);
        assert!(!capture.is_running());
    }
}
