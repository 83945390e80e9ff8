//! Run orchestration.
//!
//! An [`AnalysisRun`] is an iterator: every call to `next` performs one
//! step (sampling, calibration and localization, one tracked frame, or the
//! final metrics) and yields the progress record for it. The host can stop
//! between any two steps; dropping the run releases everything. The last
//! item of a successful run is [`RunEvent::Finished`]; a failed run yields
//! exactly one error and then ends.

use crate::kinematics::KinematicsCalculator;
use crate::progress::{milestone, tracking_percent, Progress};
use crate::result::{AnalysisResult, Provenance};
use crossbeam_channel::Receiver;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, info_span, warn, Span};
use uuid::Uuid;
use vbt_ai::{AiServices, CalibrationOutcome, CalibrationResolver, RegionLocalizer, RegionOutcome};
use vbt_core::{AnalysisConfig, Result, VbtError};
use vbt_media::{FrameSampler, FrameSource, SampledVideo};
use vbt_tracking::{reconstruct, PathReconstructor, PointTracker, TrackingFault};

/// Something a run reports to its host.
#[derive(Debug, Clone)]
pub enum RunEvent {
    Progress(Progress),
    Finished(Box<AnalysisResult>),
}

/// Cooperative cancellation shared between a run and its host.
#[derive(Debug, Clone, Default)]
pub struct AnalysisCancel(Arc<AtomicBool>);

impl AnalysisCancel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Configured entry point. Holds no per-run state.
#[derive(Debug, Clone)]
pub struct AnalysisPipeline {
    config: AnalysisConfig,
    services: AiServices,
}

impl AnalysisPipeline {
    pub fn new(config: AnalysisConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            services: AiServices::none(),
        })
    }

    pub fn with_services(mut self, services: AiServices) -> Self {
        self.services = services;
        self
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Begin a run over `source`. Nothing is decoded until the first `next`.
    pub fn start<'a>(&self, source: Box<dyn FrameSource + 'a>) -> AnalysisRun<'a> {
        let run_id = Uuid::new_v4();
        let span = info_span!("analysis", run = %run_id);
        AnalysisRun {
            config: self.config.clone(),
            services: self.services.clone(),
            run_id,
            span,
            cancel: AnalysisCancel::new(),
            stage: Stage::Sample,
            pending: VecDeque::new(),
            source: Some(source),
            video: None,
            calibration: None,
            region: None,
            tracker: None,
            faults: None,
            fault_log: Vec::new(),
            streaming: None,
            next_frame: 0,
        }
    }

    /// Run to completion, discarding progress.
    pub fn analyze<'a>(&self, source: Box<dyn FrameSource + 'a>) -> Result<AnalysisResult> {
        self.start(source).run_to_completion()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Sample,
    Locate,
    Track,
    Finish,
    Done,
}

/// One analysis run, driven by iteration.
pub struct AnalysisRun<'a> {
    config: AnalysisConfig,
    services: AiServices,
    run_id: Uuid,
    span: Span,
    cancel: AnalysisCancel,
    stage: Stage,
    pending: VecDeque<RunEvent>,
    source: Option<Box<dyn FrameSource + 'a>>,
    video: Option<SampledVideo>,
    calibration: Option<CalibrationOutcome>,
    region: Option<RegionOutcome>,
    tracker: Option<PointTracker>,
    faults: Option<Receiver<TrackingFault>>,
    fault_log: Vec<TrackingFault>,
    streaming: Option<PathReconstructor>,
    next_frame: usize,
}

impl AnalysisRun<'_> {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Handle the host can use to stop the run between steps.
    pub fn cancel_handle(&self) -> AnalysisCancel {
        self.cancel.clone()
    }

    /// Drive the run, handing each progress record to `on_progress`.
    pub fn run_with_progress(self, mut on_progress: impl FnMut(&Progress)) -> Result<AnalysisResult> {
        for event in self {
            match event? {
                RunEvent::Progress(progress) => on_progress(&progress),
                RunEvent::Finished(result) => return Ok(*result),
            }
        }
        Err(VbtError::Cancelled)
    }

    pub fn run_to_completion(self) -> Result<AnalysisResult> {
        self.run_with_progress(|_| {})
    }

    fn step(&mut self) -> Result<()> {
        match self.stage {
            Stage::Sample => self.sample(),
            Stage::Locate => self.locate(),
            Stage::Track => self.track_next(),
            Stage::Finish => self.finish(),
            Stage::Done => Ok(()),
        }
    }

    fn progress(&mut self, progress: Progress) {
        self.pending.push_back(RunEvent::Progress(progress));
    }

    fn video(&self) -> Result<&SampledVideo> {
        self.video
            .as_ref()
            .ok_or_else(|| VbtError::Decode("no sampled video".to_string()))
    }

    fn sample(&mut self) -> Result<()> {
        let mut source = self
            .source
            .take()
            .ok_or_else(|| VbtError::Decode("video source already consumed".to_string()))?;
        let sampler = FrameSampler::new(self.config.sampling.clone());
        let video = sampler.sample(source.as_mut())?;
        drop(source);

        let (sw, sh) = video.source_size;
        info!(
            frames = video.len(),
            duration_s = video.sampled_duration(),
            source_width = sw,
            source_height = sh,
            truncated = video.truncated,
            "Video sampled"
        );
        self.progress(Progress::new(
            milestone::SAMPLED,
            format!("Extracted {} frames at {}", video.len(), video.rate),
        ));
        self.video = Some(video);
        self.stage = Stage::Locate;
        Ok(())
    }

    /// Calibration and region localization only read the first frame, so
    /// they run side by side.
    fn locate(&mut self) -> Result<()> {
        let video = self.video()?;
        let frame = video.frames.first().ok_or_else(|| {
            VbtError::Decode("no frames could be decoded from the video".to_string())
        })?;
        let config = &self.config;
        let services = &self.services;

        let (calibration, region) = rayon::join(
            || {
                CalibrationResolver::new(&config.calibration, &config.ai)
                    .with_estimator(services.scale.as_deref())
                    .with_source_scale(video.source_scale)
                    .resolve(frame)
            },
            || {
                RegionLocalizer::new(&config.ai)
                    .with_detector(services.detector.as_deref())
                    .with_pose(services.pose.as_deref())
                    .localize(frame)
            },
        );
        let calibration = calibration?;

        let (tracker, faults) = PointTracker::new(self.config.tracker.clone(), region.region());
        let total = self.video()?.len();
        self.progress(Progress::new(milestone::CALIBRATED, calibration.status()));
        self.progress(Progress::new(milestone::REGION, region.status()));
        self.progress(Progress::new(
            milestone::TRACKING_START,
            format!("Tracking bar across {total} frames"),
        ));

        self.calibration = Some(calibration);
        self.region = Some(region);
        self.tracker = Some(tracker);
        self.faults = Some(faults);
        self.streaming = Some(PathReconstructor::new(self.config.reconstruction.clone()));
        self.stage = Stage::Track;
        Ok(())
    }

    fn track_next(&mut self) -> Result<()> {
        let (Some(video), Some(tracker), Some(streaming)) =
            (self.video.as_ref(), self.tracker.as_mut(), self.streaming.as_mut())
        else {
            return Err(VbtError::Tracking("tracking started before setup".to_string()));
        };
        let total = video.len();
        let Some(frame) = video.frames.get(self.next_frame) else {
            self.stage = Stage::Finish;
            return Ok(());
        };

        let stats = tracker.process_frame(frame)?;
        let mut error = None;
        if let Some(rx) = &self.faults {
            for fault in rx.try_iter() {
                warn!(frame = fault.frame_index(), "Tracking fault: {fault}");
                error = Some(fault.to_string());
                self.fault_log.push(fault);
            }
        }

        let mut preliminary = None;
        if streaming.push_frame(tracker.last_frame_points()).is_some() {
            let path = streaming.path();
            if let (Some(calibration), [.., a, b]) = (&self.calibration, path) {
                let calculator =
                    KinematicsCalculator::new(self.config.kinematics.clone(), video.rate);
                let pair = [*a, *b];
                preliminary = calculator
                    .instant_velocities(&pair, calibration.result().pixels_per_mm())
                    .last()
                    .copied();
            }
        }

        self.next_frame += 1;
        let mut progress = Progress::new(
            tracking_percent(self.next_frame, total),
            format!("Tracking frame {}/{} ({} points)", self.next_frame, total, stats.live),
        )
        .with_frame(stats.frame_index, preliminary);
        if let Some(error) = error {
            progress = progress.with_error(error);
        }
        self.progress(progress);
        if self.next_frame >= total {
            self.stage = Stage::Finish;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        let mut tracker = self
            .tracker
            .take()
            .ok_or_else(|| VbtError::Tracking("tracker was never created".to_string()))?;
        let points = tracker.finish();
        drop(tracker);
        if let Some(rx) = self.faults.take() {
            self.fault_log.extend(rx.try_iter());
        }

        if points.is_empty() {
            let reason = self
                .fault_log
                .first()
                .map(ToString::to_string)
                .unwrap_or_else(|| "no trackable features".to_string());
            return Err(VbtError::Tracking(format!(
                "no points were tracked in any frame ({reason})"
            )));
        }

        let path = reconstruct(&points, &self.config.reconstruction);
        if path.is_empty() {
            return Err(VbtError::NoTrackingPoints(
                "no bar path could be reconstructed".to_string(),
            ));
        }
        self.progress(Progress::new(milestone::METRICS, "Calculating metrics"));

        let video = self.video()?;
        let (calibration, region) = match (&self.calibration, self.region) {
            (Some(c), Some(r)) => (c.clone(), r),
            _ => {
                return Err(VbtError::Calibration(
                    "calibration did not complete".to_string(),
                ))
            }
        };
        let scale = calibration.result();
        let report = KinematicsCalculator::new(self.config.kinematics.clone(), video.rate)
            .compute(&path, scale.pixels_per_mm());

        let provenance = Provenance {
            calibration: scale,
            calibration_ai: calibration.ai_assisted(),
            calibration_status: calibration.status(),
            region,
            frames_analyzed: video.len(),
            tracked_points: points.len(),
            tracking_faults: self.fault_log.len(),
        };
        let result = AnalysisResult::from_report(self.run_id, report, path, provenance);
        info!(
            mean_velocity = result.mean_velocity,
            peak_velocity = result.peak_velocity,
            path_points = result.path.len(),
            zone = result.power_zone.label(),
            ai_assisted = result.ai_assisted,
            "Analysis complete"
        );

        self.progress(Progress::new(milestone::DONE, "Analysis complete"));
        self.pending
            .push_back(RunEvent::Finished(Box::new(result)));
        self.video = None;
        self.streaming = None;
        self.stage = Stage::Done;
        Ok(())
    }
}

impl Iterator for AnalysisRun<'_> {
    type Item = Result<RunEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(Ok(event));
            }
            if self.stage == Stage::Done {
                return None;
            }
            if self.cancel.is_cancelled() {
                info!(run = %self.run_id, "Analysis cancelled");
                self.stage = Stage::Done;
                return Some(Err(VbtError::Cancelled));
            }

            let span = self.span.clone();
            let _guard = span.enter();
            if let Err(err) = self.step() {
                warn!(kind = ?err.kind(), "Analysis failed: {err}");
                self.stage = Stage::Done;
                self.pending.clear();
                return Some(Err(err));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vbt_core::ErrorKind;
    use vbt_media::MemorySource;

    /// A bright square moving up 4 px per frame on a dark background.
    fn rising_square(frames: usize) -> MemorySource {
        MemorySource::generate(160, 120, 15.0, frames, None, |i, px| {
            let top = 80 - (i as i32 * 4).min(60);
            for y in 0..120i32 {
                for x in 0..160i32 {
                    let inside = (60..90).contains(&x) && (top..top + 20).contains(&y);
                    let v = if inside { 230 } else { 20 };
                    let o = ((y * 160 + x) * 4) as usize;
                    px[o..o + 4].copy_from_slice(&[v, v, v, 255]);
                }
            }
        })
    }

    fn manual_config() -> AnalysisConfig {
        let mut config = AnalysisConfig::default();
        config.calibration.source = vbt_core::CalibrationSource::Manual { pixels_per_mm: 1.0 };
        config
    }

    #[test]
    fn test_progress_is_monotonic_and_ends_with_result() {
        let pipeline = AnalysisPipeline::new(manual_config()).unwrap();
        let events: Vec<RunEvent> = pipeline
            .start(Box::new(rising_square(12)))
            .collect::<Result<_>>()
            .unwrap();

        let percents: Vec<f64> = events
            .iter()
            .filter_map(|e| match e {
                RunEvent::Progress(p) => Some(p.progress_percent),
                RunEvent::Finished(_) => None,
            })
            .collect();
        assert!(percents.windows(2).all(|w| w[0] <= w[1]), "{percents:?}");
        assert_eq!(percents.last(), Some(&100.0));
        assert!(matches!(events.last(), Some(RunEvent::Finished(_))));
    }

    #[test]
    fn test_result_reports_upward_motion() {
        let pipeline = AnalysisPipeline::new(manual_config()).unwrap();
        let result = pipeline.analyze(Box::new(rising_square(12))).unwrap();
        assert_eq!(result.frames_analyzed, 12);
        assert!(!result.ai_assisted);
        assert_eq!(result.region, RegionOutcome::None);
        // 4 px per frame at 1 px/mm and 15 fps is 0.06 m/s.
        assert!((result.peak_velocity - 0.06).abs() < 0.02, "{}", result.peak_velocity);
        assert!(result.concentric.is_some());
    }

    #[test]
    fn test_empty_source_is_a_decode_error() {
        let pipeline = AnalysisPipeline::new(AnalysisConfig::default()).unwrap();
        let err = pipeline
            .analyze(Box::new(MemorySource::new(Vec::new(), None)))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Decode);
    }

    #[test]
    fn test_featureless_video_fails_tracking() {
        let blank = MemorySource::generate(64, 48, 15.0, 6, None, |_, px| px.fill(90));
        let pipeline = AnalysisPipeline::new(manual_config()).unwrap();
        let err = pipeline.analyze(Box::new(blank)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Tracking);
        assert!(err.hint().is_some());
    }

    #[test]
    fn test_cancel_between_frames() {
        let pipeline = AnalysisPipeline::new(manual_config()).unwrap();
        let mut run = pipeline.start(Box::new(rising_square(12)));
        let cancel = run.cancel_handle();
        let mut seen = 0;
        let outcome = loop {
            match run.next() {
                Some(Ok(RunEvent::Progress(p))) => {
                    seen += 1;
                    if p.frame_index.is_some() {
                        cancel.cancel();
                    }
                }
                Some(Ok(RunEvent::Finished(_))) => break None,
                Some(Err(err)) => break Some(err),
                None => break None,
            }
        };
        assert!(matches!(outcome, Some(VbtError::Cancelled)));
        assert!(seen >= 5);
        assert!(run.next().is_none());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = AnalysisConfig::default();
        config.tracker.max_corners = 0;
        assert_eq!(
            AnalysisPipeline::new(config).unwrap_err().kind(),
            ErrorKind::InvalidParameter
        );
    }
}
