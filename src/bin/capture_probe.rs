// src/bin/capture_probe.rs - report which pose source a capture session would bind
use nokhwa::utils::ApiBackend;

use vbt_tracker::capture::{PoseCapture, PoseSourceKind};
use vbt_tracker::config::CaptureConfig;

fn main() {
    println!("Probing pose capture capability...\n");

    match nokhwa::query(ApiBackend::Auto) {
        Ok(cameras) if !cameras.is_empty() => {
            println!("✓ {} camera(s) found:", cameras.len());
            for (i, camera) in cameras.iter().enumerate() {
                println!("  [{}] {}", i, camera.human_name());
            }
        }
        Ok(_) => println!("✗ No cameras found"),
        Err(e) => println!("✗ Camera query failed: {}", e),
    }
    println!();

    // No estimator is injected by this probe, so the native path can never
    // be selected; the report shows what each override would do.
    for (label, use_simulation) in [
        ("auto           ", None),
        ("force simulated", Some(true)),
        ("force native   ", Some(false)),
    ] {
        let config = CaptureConfig { use_simulation, ..CaptureConfig::default() };
        let capture = PoseCapture::new(config, None);
        match capture.select_source() {
            Ok(PoseSourceKind::Native) => println!("{label} -> native estimator"),
            Ok(PoseSourceKind::Simulated) => println!("{label} -> simulator"),
            Err(e) => println!("{label} -> unavailable ({e})"),
        }
    }
}
