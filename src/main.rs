// src/main.rs
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use vbt_tracker::capture::PoseCapture;
use vbt_tracker::config::CaptureConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    // List cameras so users can see what the native path would bind to
    println!("=== Camera Detection ===");
    match nokhwa::query(nokhwa::utils::ApiBackend::Auto) {
        Ok(cameras) => {
            println!("Found {} camera(s):", cameras.len());
            for (i, camera) in cameras.iter().enumerate() {
                println!("  [{}] {}", i, camera.human_name());
            }
        }
        Err(e) => {
            println!("Failed to query cameras: {}", e);
        }
    }
    println!("========================\n");

    // No estimator is injected here, so the capture session runs the
    // simulator regardless of camera availability.
    let config = CaptureConfig { use_simulation: Some(true), ..Default::default() };
    let tracking_point = config.tracking_point;
    let mut capture = PoseCapture::new(config, None);
    let detector = capture.detector();

    let delivered = Arc::new(AtomicU64::new(0));
    let counter = delivered.clone();
    let _subscription = detector.subscribe(move |pose| {
        let n = counter.fetch_add(1, Ordering::Relaxed);
        if let Some(pose) = pose {
            if n % 30 == 0 {
                if let Some(kp) = pose.keypoint(tracking_point) {
                    println!(
                        "t={:>6}ms  {:<12} y={:.3}  score={:.2}",
                        pose.timestamp,
                        kp.name.as_str(),
                        kp.y,
                        kp.score
                    );
                }
            }
        }
    });

    capture.start()?;
    println!("✓ Simulated capture running for 10 seconds...\n");
    tokio::time::sleep(Duration::from_secs(10)).await;
    capture.stop();

    println!("\nframes delivered: {}", delivered.load(Ordering::Relaxed));
    println!("last fps sample:  {}", detector.fps());
    Ok(())
}
