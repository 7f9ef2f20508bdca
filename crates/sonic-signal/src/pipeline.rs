//! Per-tick processing pipeline.
//!
//! Integrates smoothing, gesture classification, breath estimation, history
//! and logging into a single synchronous step. The [`SamplingDriver`] owns one
//! [`Pipeline`] on its worker task and calls [`Pipeline::tick`] once per
//! sampling period.
//!
//! [`SamplingDriver`]: crate::driver::SamplingDriver

use std::path::{Path, PathBuf};

use sonic_core::{
    BreathResult, CalibrationParams, Gesture, GestureDebug, PipelineMode, Result, Snapshot,
    Timestamp,
};

use crate::breath::BreathEstimator;
use crate::buffer::HistoryBuffer;
use crate::config::SonicConfig;
use crate::filtering::{classifier_velocity, FilterState};
use crate::gesture::GestureClassifier;
use crate::recorder::{LogRecord, LogRecorder};

/// The distance-stream processing pipeline
pub struct Pipeline {
    config: SonicConfig,
    mode: PipelineMode,
    filter: FilterState,
    classifier: GestureClassifier,
    breath: BreathEstimator,
    history: HistoryBuffer,
    recorder: LogRecorder,
    last: Snapshot,
}

impl Pipeline {
    /// `config` is expected to have passed [`SonicConfig::validate`]
    pub fn new(config: SonicConfig) -> Self {
        let classifier =
            GestureClassifier::new(config.velocity_window_len(), config.gesture.clone());
        let breath = BreathEstimator::new(
            config.breath_window_len(),
            config.sampling.interval_secs,
            config.breath.clone(),
        );
        let history = HistoryBuffer::new(config.buffers.history_capacity);
        let recorder = LogRecorder::new(
            config.buffers.log_capacity,
            config.buffers.logging_enabled,
        );

        Self {
            config,
            mode: PipelineMode::default(),
            filter: FilterState::default(),
            classifier,
            breath,
            history,
            recorder,
            last: Snapshot::idle(),
        }
    }

    /// Process one raw distance sample.
    ///
    /// `calibration` is read by the caller from the settings store right
    /// before the tick so edits take effect on the next sample.
    /// A non-finite `raw` is dropped: state is left untouched and the
    /// previous snapshot is returned.
    pub fn tick(&mut self, raw: f64, calibration: &CalibrationParams, now: Timestamp) -> Snapshot {
        if !raw.is_finite() {
            tracing::debug!("Dropping non-finite distance {}", raw);
            return self.last.clone();
        }

        let (filter, out) = self.filter.step(raw, &self.config.smoothing);
        self.filter = filter;

        self.history.push(out.velocity);
        let signed = classifier_velocity(out.velocity, calibration.invert_gesture);

        let (label, breath, debug) = match self.mode {
            PipelineMode::Gesture => {
                let label = self.classifier.classify(signed, calibration);
                (label, BreathResult::none(), self.classifier.debug())
            }
            PipelineMode::Breath => {
                let breath = self.breath.push(out.distance);
                (self.classifier.label(), breath, GestureDebug::default())
            }
        };

        self.recorder.record(LogRecord {
            timestamp: now,
            distance: out.distance,
            velocity: signed,
            gesture: label.label(),
            breath_mode: self.mode.is_breath(),
            breath_rate: breath.rate_bpm,
        });

        let snapshot = Snapshot {
            timestamp: now,
            mode: self.mode,
            distance: out.distance,
            gesture_label: label.label().to_string(),
            breath_rate: breath.rate_bpm,
            breath_quality: breath.quality,
            is_running: true,
            debug,
        };
        self.last = snapshot.clone();
        snapshot
    }

    /// Switch the active mode. Returns `false` if `mode` was already active.
    ///
    /// A switch discards all smoothing and window state, so the first sample
    /// after it seeds the filters afresh and the gesture machine restarts at
    /// `Stable`.
    pub fn set_mode(&mut self, mode: PipelineMode) -> bool {
        if mode == self.mode {
            return false;
        }

        self.mode = mode;
        self.filter = FilterState::default();
        self.classifier.reset();
        self.breath.reset();

        self.last.mode = mode;
        self.last.gesture_label = Gesture::Stable.label().to_string();
        self.last.breath_rate = 0.0;
        self.last.breath_quality = 0.0;
        self.last.debug = GestureDebug::default();

        tracing::info!("Pipeline mode switched to {:?}", mode);
        true
    }

    pub fn mode(&self) -> PipelineMode {
        self.mode
    }

    pub fn filter_state(&self) -> FilterState {
        self.filter
    }

    /// Smoothed velocity history, oldest first
    pub fn history(&self) -> Vec<f64> {
        self.history.to_vec()
    }

    pub fn set_logging(&mut self, enabled: bool) {
        self.recorder.set_enabled(enabled);
    }

    pub fn clear_log(&mut self) {
        self.recorder.clear();
    }

    pub fn recorder(&self) -> &LogRecorder {
        &self.recorder
    }

    /// Export the log into `dir`, returning the written file
    pub fn export_log(&self, dir: &Path) -> Result<PathBuf> {
        self.recorder.export(dir)
    }

    /// Output of the most recent tick (or the idle snapshot)
    pub fn last_snapshot(&self) -> &Snapshot {
        &self.last
    }

    pub fn config(&self) -> &SonicConfig {
        &self.config
    }

    /// Reset all processing state, keeping the mode and the log
    pub fn reset(&mut self) {
        self.filter = FilterState::default();
        self.classifier.reset();
        self.breath.reset();
        self.history.clear();
        self.last = Snapshot {
            mode: self.mode,
            ..Snapshot::idle()
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn ts(i: usize) -> Timestamp {
        Timestamp::from_secs_f64(1_700_000_000.0 + i as f64 * 0.02)
    }

    /// Constant warm-up, linear recession, then a plateau
    fn ramp() -> Vec<f64> {
        let mut samples = vec![0.5; 100];
        samples.extend((1..=50).map(|i| 0.5 + i as f64 * 0.002));
        samples.extend(std::iter::repeat(0.6).take(200));
        samples
    }

    fn distinct_labels(pipeline: &mut Pipeline, samples: &[f64], calibration: &CalibrationParams) -> Vec<String> {
        let mut labels: Vec<String> = Vec::new();
        for (i, &x) in samples.iter().enumerate() {
            let snap = pipeline.tick(x, calibration, ts(i));
            if labels.last() != Some(&snap.gesture_label) {
                labels.push(snap.gesture_label);
            }
        }
        labels
    }

    #[test]
    fn test_ramp_moves_away_then_settles() {
        let mut pipeline = Pipeline::new(SonicConfig::default());
        let labels = distinct_labels(&mut pipeline, &ramp(), &CalibrationParams::default());
        assert_eq!(labels, vec!["Stable", "Moving Away", "Stable"]);
    }

    #[test]
    fn test_inversion_only_affects_classifier() {
        let calibration = CalibrationParams {
            invert_gesture: true,
            ..Default::default()
        };
        let mut pipeline = Pipeline::new(SonicConfig::default());
        pipeline.set_logging(true);

        let samples = ramp();
        let labels = distinct_labels(&mut pipeline, &samples[..130], &calibration);
        assert_eq!(labels, vec!["Stable", "Moving Closer"]);

        // history keeps the physical sign, the log the classifier's
        let latest = *pipeline.history().last().unwrap();
        assert!(latest > 0.0);
        let logged = pipeline.recorder().records().last().unwrap().velocity;
        assert_eq!(logged, -latest);
        assert!(pipeline.last_snapshot().debug.velocity < 0.0);
    }

    #[test]
    fn test_first_tick_seeds_filter() {
        let mut pipeline = Pipeline::new(SonicConfig::default());
        assert!(!pipeline.filter_state().is_seeded());

        let snap = pipeline.tick(0.37, &CalibrationParams::default(), ts(0));
        assert_eq!(snap.distance, 0.37);
        assert_eq!(snap.debug.velocity, 0.0);
        assert_eq!(snap.gesture_label, "Stable");
        assert!(snap.is_running);
    }

    #[test]
    fn test_non_finite_tick_leaves_state_alone() {
        let calibration = CalibrationParams::default();
        let mut pipeline = Pipeline::new(SonicConfig::default());
        let first = pipeline.tick(0.4, &calibration, ts(0));
        let state = pipeline.filter_state();

        for raw in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            assert_eq!(pipeline.tick(raw, &calibration, ts(1)), first);
        }
        assert_eq!(pipeline.filter_state(), state);
        assert_eq!(pipeline.history().len(), 1);

        let next = pipeline.tick(0.4, &calibration, ts(2));
        assert_eq!(next.distance, 0.4);
        assert_eq!(next.debug.velocity, 0.0);
    }

    #[test]
    fn test_mode_switch_resets_state() {
        let calibration = CalibrationParams::default();
        let mut pipeline = Pipeline::new(SonicConfig::default());
        for (i, &x) in ramp()[..120].iter().enumerate() {
            pipeline.tick(x, &calibration, ts(i));
        }
        assert_eq!(pipeline.last_snapshot().gesture_label, "Moving Away");

        assert!(pipeline.set_mode(PipelineMode::Breath));
        assert!(!pipeline.set_mode(PipelineMode::Breath));
        assert!(!pipeline.filter_state().is_seeded());
        assert_eq!(pipeline.last_snapshot().gesture_label, "Stable");
        assert_eq!(pipeline.last_snapshot().breath_quality, 0.0);

        // fresh seed: the first post-switch sample passes through untouched
        let snap = pipeline.tick(0.9, &calibration, ts(200));
        assert_eq!(snap.distance, 0.9);
        assert_eq!(snap.mode, PipelineMode::Breath);
        assert_eq!(snap.breath_rate, 0.0);
    }

    #[test]
    fn test_history_populated_in_both_modes() {
        let calibration = CalibrationParams::default();
        let mut pipeline = Pipeline::new(SonicConfig::default());
        for i in 0..100 {
            pipeline.tick(0.5, &calibration, ts(i));
        }
        pipeline.set_mode(PipelineMode::Breath);
        for i in 100..200 {
            pipeline.tick(0.5, &calibration, ts(i));
        }
        assert_eq!(pipeline.history().len(), 150);
    }

    #[test]
    fn test_breath_mode_reports_rate() {
        let calibration = CalibrationParams::default();
        let mut pipeline = Pipeline::new(SonicConfig::default());
        pipeline.set_mode(PipelineMode::Breath);

        let mut snap = Snapshot::idle();
        for i in 0..1000 {
            let t = i as f64 * 0.02;
            let x = 0.5 + 0.004 * (2.0 * PI * 0.25 * t).sin();
            snap = pipeline.tick(x, &calibration, ts(i));
            if i < 99 {
                assert_eq!(snap.breath_rate, 0.0);
            }
        }
        assert!((snap.breath_rate - 15.0).abs() <= 1.0, "rate {}", snap.breath_rate);
        assert!(snap.breath_quality > 0.05);
        assert_eq!(snap.gesture_label, "Stable");
    }

    #[test]
    fn test_log_capacity_and_toggle() {
        let calibration = CalibrationParams::default();
        let mut pipeline = Pipeline::new(SonicConfig::default());
        pipeline.tick(0.5, &calibration, ts(0));
        assert!(pipeline.recorder().is_empty());

        pipeline.set_logging(true);
        for i in 0..5100 {
            pipeline.tick(0.5, &calibration, ts(i));
        }
        assert_eq!(pipeline.recorder().len(), 5000);

        let first = pipeline.recorder().records().next().unwrap();
        assert_eq!(first.timestamp, ts(100));
        assert!(!first.breath_mode);

        pipeline.clear_log();
        assert!(pipeline.recorder().is_empty());
    }

    #[test]
    fn test_reset_keeps_mode() {
        let calibration = CalibrationParams::default();
        let mut pipeline = Pipeline::new(SonicConfig::default());
        pipeline.set_mode(PipelineMode::Breath);
        pipeline.tick(0.5, &calibration, ts(0));
        pipeline.reset();
        assert_eq!(pipeline.mode(), PipelineMode::Breath);
        assert!(pipeline.history().is_empty());
        assert_eq!(pipeline.last_snapshot().mode, PipelineMode::Breath);
    }
}
