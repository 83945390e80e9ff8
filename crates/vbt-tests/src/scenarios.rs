//! End-to-end lift scenarios.
//!
//! Each test drives a synthetic video through the full pipeline (or the
//! kinematics stage directly) and checks the numbers a lifter would see.

use crate::synthetic::{self, FixedScale, PLATE_DIAMETER_MM, PLATE_RADIUS};
use std::sync::Arc;
use vbt_ai::{AiServices, CalibrationMethod, CalibrationResolver, ScaleEstimate};
use vbt_analysis::{AnalysisPipeline, KinematicsCalculator, RunEvent};
use vbt_core::{ErrorKind, FrameRate, KinematicsConfig};
use vbt_tracking::PathPoint;

// ── Helpers ─────────────────────────────────────────────────────

fn path_point(frame_index: u32, x: f32, y: f32) -> PathPoint {
    PathPoint {
        frame_index,
        x,
        y,
        timestamp_ms: frame_index as f64 * 1000.0 / 15.0,
    }
}

fn frames_strictly_increase(path: &[PathPoint]) -> bool {
    path.windows(2).all(|w| w[0].frame_index < w[1].frame_index)
}

// ── Calibrated lift ─────────────────────────────────────────────

#[test]
fn plate_calibrated_lift_reports_concentric_rise() {
    let pipeline = AnalysisPipeline::new(synthetic::plate_config()).unwrap();
    let result = pipeline.analyze(Box::new(synthetic::standard_lift())).unwrap();

    assert_eq!(result.frames_analyzed, 90);
    assert_eq!(result.calibration.method(), CalibrationMethod::Plate);
    let expected_ppm = 2.0 * PLATE_RADIUS as f64 / PLATE_DIAMETER_MM;
    let ppm = result.calibration.pixels_per_mm();
    assert!((ppm - expected_ppm).abs() < 0.04, "ppm {ppm}");

    let phase = result.concentric.expect("rise should be detected");
    assert!(phase.start_frame <= 2, "{phase:?}");
    assert!((42..=47).contains(&phase.end_frame), "{phase:?}");

    // 300 px over 45 frames at 15 fps and ~0.22 px/mm.
    assert!((0.3..0.6).contains(&result.mean_velocity), "mean {}", result.mean_velocity);
    assert!(result.peak_velocity >= result.mean_velocity);
    assert!((110.0..160.0).contains(&result.range_of_motion_cm), "{}", result.range_of_motion_cm);
    assert!(result.path_deviation_cm < 2.0, "{}", result.path_deviation_cm);
    assert_eq!(
        result.power_zone,
        pipeline.config().kinematics.power_zones.classify(result.mean_velocity)
    );
    assert!(frames_strictly_increase(&result.path));
    assert!(!result.ai_assisted);
}

#[test]
fn plate_detector_measures_rim() {
    let config = synthetic::plate_config();
    let frame = synthetic::still((120.0, 200.0));
    let outcome = CalibrationResolver::new(&config.calibration, &config.ai)
        .resolve(&frame)
        .unwrap();
    let result = outcome.result();
    assert_eq!(result.method(), CalibrationMethod::Plate);
    assert!(result.pixels_per_mm() > 0.0);
    assert!(result.is_plausible());
    assert!(!outcome.ai_assisted());
}

#[test]
fn single_step_speed() {
    // 50 px at 10 px/mm is 5 mm in one frame at 15 fps.
    let calc = KinematicsCalculator::new(KinematicsConfig::default(), FrameRate::ANALYSIS);
    let path = [path_point(0, 100.0, 200.0), path_point(1, 100.0, 150.0)];
    let v = calc.instant_velocities(&path, 10.0);
    assert_eq!(v[0], 0.0);
    assert!((v[1] - 0.075).abs() < 1e-9, "{}", v[1]);
}

#[test]
fn manual_scale_matches_pixel_motion() {
    // 1 px/mm: 300 px in 45 frames is 100 mm/s.
    let pipeline = AnalysisPipeline::new(synthetic::manual_config(1.0)).unwrap();
    let result = pipeline.analyze(Box::new(synthetic::standard_lift())).unwrap();
    assert_eq!(result.calibration.method(), CalibrationMethod::Manual);
    assert!((result.mean_velocity - 0.1).abs() < 0.03, "{}", result.mean_velocity);
    assert!((result.range_of_motion_cm - 30.0).abs() < 5.0, "{}", result.range_of_motion_cm);
}

// ── AI calibration ──────────────────────────────────────────────

fn scale_services(confidence: f64) -> AiServices {
    AiServices {
        scale: Some(Arc::new(FixedScale(ScaleEstimate {
            found: true,
            pixels_per_mm: Some(0.5),
            confidence: Some(confidence),
            description: Some("plate".to_string()),
        }))),
        ..AiServices::none()
    }
}

#[test]
fn low_confidence_ai_scale_falls_back_to_plate() {
    let mut config = synthetic::plate_config();
    config.ai.enabled = true;
    let pipeline = AnalysisPipeline::new(config).unwrap().with_services(scale_services(0.3));
    let result = pipeline.analyze(Box::new(synthetic::standard_lift())).unwrap();

    assert_eq!(result.calibration.method(), CalibrationMethod::Plate);
    assert!((result.calibration.pixels_per_mm() - 0.5).abs() > 0.1);
    assert!(!result.ai_assisted);
}

#[test]
fn confident_ai_scale_is_used() {
    let mut config = synthetic::plate_config();
    config.ai.enabled = true;
    let pipeline = AnalysisPipeline::new(config).unwrap().with_services(scale_services(0.9));
    let result = pipeline.analyze(Box::new(synthetic::standard_lift())).unwrap();

    assert_eq!(result.calibration.method(), CalibrationMethod::Ai);
    assert!((result.calibration.pixels_per_mm() - 0.5).abs() < 1e-9);
    assert!(result.ai_assisted);
}

#[test]
fn ai_scale_ignored_when_disabled() {
    let pipeline = AnalysisPipeline::new(synthetic::plate_config())
        .unwrap()
        .with_services(scale_services(0.9));
    let result = pipeline.analyze(Box::new(synthetic::standard_lift())).unwrap();
    assert_eq!(result.calibration.method(), CalibrationMethod::Plate);
}

// ── Lost tracking ───────────────────────────────────────────────

#[test]
fn lost_bar_reports_fault_and_keeps_early_path() {
    let rise = synthetic::rise_then_hold(45);
    let source = synthetic::video(90, Some(6.0), &move |i| if i < 10 { rise(i) } else { None });
    let pipeline = AnalysisPipeline::new(synthetic::manual_config(1.0)).unwrap();

    let mut errors = Vec::new();
    let result = pipeline
        .start(Box::new(source))
        .run_with_progress(|p| errors.extend(p.error.clone()))
        .unwrap();

    assert!(result.tracking_faults >= 1);
    assert!(errors.iter().any(|e| e.contains("lost")), "{errors:?}");
    assert!(!result.path.is_empty());
    assert!(result.path.iter().all(|p| p.frame_index < 10));
    assert!(frames_strictly_increase(&result.path));
    assert!(result.mean_velocity > 0.0);
}

#[test]
fn empty_video_fails_decode() {
    let source = synthetic::video(0, None, &synthetic::rise_then_hold(45));
    let err = AnalysisPipeline::new(synthetic::manual_config(1.0))
        .unwrap()
        .analyze(Box::new(source))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Decode);
}

// ── Untrusted duration ──────────────────────────────────────────

#[test]
fn zero_reported_duration_still_samples_every_frame() {
    let source = synthetic::video(30, Some(0.0), &synthetic::rise_then_hold(20));
    let pipeline = AnalysisPipeline::new(synthetic::manual_config(1.0)).unwrap();
    let result = pipeline.analyze(Box::new(source)).unwrap();
    assert_eq!(result.frames_analyzed, 30);
    assert!(result.concentric.is_some());
}

#[test]
fn progress_events_precede_single_result() {
    let pipeline = AnalysisPipeline::new(synthetic::manual_config(1.0)).unwrap();
    let events: Vec<RunEvent> = pipeline
        .start(Box::new(synthetic::video(20, None, &synthetic::rise_then_hold(15))))
        .collect::<vbt_core::Result<_>>()
        .unwrap();

    let finished = events
        .iter()
        .filter(|e| matches!(e, RunEvent::Finished(_)))
        .count();
    assert_eq!(finished, 1);
    assert!(matches!(events.last(), Some(RunEvent::Finished(_))));

    let frames: Vec<u32> = events
        .iter()
        .filter_map(|e| match e {
            RunEvent::Progress(p) => p.frame_index,
            RunEvent::Finished(_) => None,
        })
        .collect();
    assert_eq!(frames, (0..20).collect::<Vec<u32>>());
}
