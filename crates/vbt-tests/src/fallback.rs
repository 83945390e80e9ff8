//! AI degradation tests.
//!
//! Enabling AI must never turn a lift that analyses without it into a
//! failure, whatever the services do.

use crate::synthetic::{self, FixedBox};
use std::sync::Arc;
use vbt_ai::{AiServices, CalibrationMethod, RegionOutcome};
use vbt_analysis::{AnalysisPipeline, AnalysisResult};
use vbt_core::{AnalysisConfig, ErrorKind, Rect, Result, Vec2};
use vbt_media::MemorySource;

// ── Helpers ─────────────────────────────────────────────────────

fn run(
    mut config: AnalysisConfig,
    services: Option<AiServices>,
    source: MemorySource,
) -> Result<AnalysisResult> {
    config.ai.enabled = services.is_some();
    AnalysisPipeline::new(config)?
        .with_services(services.unwrap_or_default())
        .analyze(Box::new(source))
}

fn detector(region: Rect) -> AiServices {
    AiServices {
        detector: Some(Arc::new(FixedBox(region))),
        ..AiServices::none()
    }
}

fn service_variants() -> Vec<(&'static str, AiServices)> {
    vec![
        ("empty", AiServices::none()),
        ("offline", synthetic::offline_services()),
        ("broken", synthetic::broken_services()),
    ]
}

// ── Success is preserved ────────────────────────────────────────

#[test]
fn failing_services_keep_successful_lift() {
    let baseline = run(synthetic::plate_config(), None, synthetic::standard_lift()).unwrap();
    for (name, services) in service_variants() {
        let result = run(synthetic::plate_config(), Some(services), synthetic::standard_lift())
            .unwrap_or_else(|err| panic!("{name} services failed the run: {err}"));
        assert_eq!(result.calibration.method(), CalibrationMethod::Plate, "{name}");
        assert_eq!(result.region, RegionOutcome::None, "{name}");
        assert!(!result.ai_assisted, "{name}");
        assert_eq!(result.mean_velocity, baseline.mean_velocity, "{name}");
    }
}

#[test]
fn failing_services_keep_failure_class() {
    let blank = || {
        MemorySource::generate(synthetic::WIDTH, synthetic::HEIGHT, synthetic::FPS, 8, None, |_, px| {
            px.fill(120)
        })
    };
    let baseline = run(synthetic::manual_config(1.0), None, blank()).unwrap_err().kind();
    assert_eq!(baseline, ErrorKind::Tracking);
    for (name, services) in service_variants() {
        let err = run(synthetic::manual_config(1.0), Some(services), blank()).unwrap_err();
        assert_eq!(err.kind(), baseline, "{name}");
    }
}

#[test]
fn failing_services_keep_decode_failure() {
    for (name, services) in service_variants() {
        let err = run(synthetic::plate_config(), Some(services), MemorySource::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Decode, "{name}");
    }
}

// ── Region localization ─────────────────────────────────────────

#[test]
fn detector_box_narrows_tracking() {
    let plate = FixedBox::plate().0;
    let result = run(synthetic::plate_config(), Some(detector(plate)), synthetic::standard_lift()).unwrap();

    let RegionOutcome::DetectorResolved { region, confidence } = result.region else {
        panic!("expected detector region, got {:?}", result.region);
    };
    assert_eq!(confidence, Some(0.9));
    // Reported as detected; the tracker adds its own margin when seeding.
    assert!((region.x - plate.x).abs() < 1e-3 && (region.y - plate.y).abs() < 1e-3, "{region:?}");
    assert!((region.width - plate.width).abs() < 1e-3, "{region:?}");
    assert!((region.height - plate.height).abs() < 1e-3, "{region:?}");
    assert!(region.contains(Vec2::new(120.0, 360.0)));
    assert!(result.ai_assisted);
    assert_eq!(result.calibration.method(), CalibrationMethod::Plate);
    assert!(result.concentric.is_some());
}

#[test]
fn detector_box_on_background_keeps_successful_lift() {
    let baseline = run(synthetic::plate_config(), None, synthetic::standard_lift()).unwrap();
    let baseline_phase = baseline.concentric.expect("baseline rise");
    for region in [Rect::new(220.0, 0.0, 20.0, 20.0), Rect::new(0.0, 0.0, 40.0, 40.0)] {
        let result = run(synthetic::plate_config(), Some(detector(region)), synthetic::standard_lift())
            .unwrap_or_else(|err| panic!("box {region:?} failed the run: {err}"));
        assert!(matches!(result.region, RegionOutcome::DetectorResolved { .. }), "{region:?}");
        assert_eq!(result.path.first().map(|p| p.frame_index), Some(0), "{region:?}");
        let phase = result.concentric.expect("rise should be detected");
        assert_eq!(phase.start_frame, baseline_phase.start_frame, "{region:?}");
        assert!(
            (result.mean_velocity - baseline.mean_velocity).abs() < 0.02,
            "{region:?}: {} vs {}",
            result.mean_velocity,
            baseline.mean_velocity
        );
    }
}

#[test]
fn disabled_ai_never_calls_services() {
    let pipeline = AnalysisPipeline::new(synthetic::plate_config())
        .unwrap()
        .with_services(synthetic::broken_services());
    let result = pipeline.analyze(Box::new(synthetic::standard_lift())).unwrap();
    assert!(!result.ai_assisted);
    assert_eq!(result.region, RegionOutcome::None);
}
