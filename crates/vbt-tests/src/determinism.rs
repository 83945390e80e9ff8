//! Repeat runs over identical input produce identical results.

use crate::synthetic;
use vbt_analysis::AnalysisPipeline;

#[test]
fn repeated_runs_match_except_run_id() {
    let pipeline = AnalysisPipeline::new(synthetic::plate_config()).unwrap();
    let first = pipeline.analyze(Box::new(synthetic::standard_lift())).unwrap();
    let mut second = pipeline.analyze(Box::new(synthetic::standard_lift())).unwrap();

    assert_ne!(first.run_id, second.run_id);
    second.run_id = first.run_id;
    assert_eq!(first, second);
}

#[test]
fn results_are_well_formed() {
    let pipeline = AnalysisPipeline::new(synthetic::plate_config()).unwrap();
    let result = pipeline.analyze(Box::new(synthetic::standard_lift())).unwrap();

    assert!(result.calibration.pixels_per_mm() > 0.0);
    assert!(result.path.windows(2).all(|w| w[0].frame_index < w[1].frame_index));
    assert_eq!(result.velocity.instant.len(), result.path.len());
    assert!(result.velocity.instant.iter().all(|v| v.is_finite() && *v >= 0.0));
    assert!(result.mean_velocity <= result.peak_velocity);

    let json = result.to_json_pretty().unwrap();
    assert!(json.contains("\"meanVelocity\""));
    assert!(json.contains("\"calibration\""));
}
