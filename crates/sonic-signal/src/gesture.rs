//! Hand-gesture classification from the smoothed velocity.
//!
//! The classifier keeps a one-second window of velocity magnitudes and
//! derives its thresholds from their median, so the trigger level follows the
//! ambient jitter of the current device and room:
//!
//! ```text
//! base = max(base_sensitivity, median_multiplier * median(|v|))
//! high = 1.2 * base      (enter Closer/Away)
//! low  = 0.9 * base      (stay in Closer/Away)
//! ```
//!
//! A moving state falls back to `Stable` only once the velocity drops below
//! `low / 2`. Between `low / 2` and `low` the state is held and the published
//! label is left untouched.

use sonic_core::{CalibrationParams, Gesture, GestureDebug};

use crate::buffer::BoundedBuffer;
use crate::config::GestureConfig;

/// Median of `values`; mean of the two middle values for even counts, 0 when
/// empty. `scratch` is reused to avoid a per-tick allocation.
pub fn median_with(values: impl Iterator<Item = f64>, scratch: &mut Vec<f64>) -> f64 {
    scratch.clear();
    scratch.extend(values);
    if scratch.is_empty() {
        return 0.0;
    }

    scratch.sort_by(|a, b| a.total_cmp(b));
    let mid = scratch.len() / 2;
    if scratch.len() % 2 == 0 {
        (scratch[mid - 1] + scratch[mid]) / 2.0
    } else {
        scratch[mid]
    }
}

pub fn median(values: &[f64]) -> f64 {
    median_with(values.iter().copied(), &mut Vec::with_capacity(values.len()))
}

/// Adaptive enter/exit thresholds for one tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub base: f64,
    pub high: f64,
    pub low: f64,
}

impl Thresholds {
    pub fn from_median(median: f64, calibration: &CalibrationParams, config: &GestureConfig) -> Self {
        let base = calibration
            .base_sensitivity
            .max(calibration.median_multiplier * median);
        Self {
            base,
            high: config.high_ratio * base,
            low: config.low_ratio * base,
        }
    }
}

/// Next `(state, label)` for velocity `v`. A `None` label leaves the
/// published label as it was.
fn transition(state: Gesture, v: f64, th: &Thresholds) -> (Gesture, Option<Gesture>) {
    match state {
        Gesture::Stable => {
            if v > th.high {
                (Gesture::Away, Some(Gesture::Away))
            } else if v < -th.high {
                (Gesture::Closer, Some(Gesture::Closer))
            } else {
                (Gesture::Stable, Some(Gesture::Stable))
            }
        }
        Gesture::Closer => {
            if v < -th.low {
                (Gesture::Closer, Some(Gesture::Closer))
            } else if v > -th.low / 2.0 {
                (Gesture::Stable, Some(Gesture::Stable))
            } else {
                (Gesture::Closer, None)
            }
        }
        Gesture::Away => {
            if v > th.low {
                (Gesture::Away, Some(Gesture::Away))
            } else if v < th.low / 2.0 {
                (Gesture::Stable, Some(Gesture::Stable))
            } else {
                (Gesture::Away, None)
            }
        }
    }
}

/// Adaptive-threshold hysteresis classifier
#[derive(Debug, Clone)]
pub struct GestureClassifier {
    config: GestureConfig,
    window: BoundedBuffer<f64>,
    scratch: Vec<f64>,
    state: Gesture,
    label: Gesture,
    debug: GestureDebug,
}

impl GestureClassifier {
    /// `window_len` is the number of ticks spanning the median window
    pub fn new(window_len: usize, config: GestureConfig) -> Self {
        Self {
            config,
            window: BoundedBuffer::new(window_len),
            scratch: Vec::with_capacity(window_len),
            state: Gesture::Stable,
            label: Gesture::Stable,
            debug: GestureDebug::default(),
        }
    }

    /// Classify one tick.
    ///
    /// `velocity` is the smoothed velocity as the classifier should see it,
    /// i.e. already sign-flipped when calibration asks for inversion.
    /// Returns the published label.
    pub fn classify(&mut self, velocity: f64, calibration: &CalibrationParams) -> Gesture {
        self.window.push(velocity.abs());
        let median = median_with(self.window.iter().copied(), &mut self.scratch);
        let th = Thresholds::from_median(median, calibration, &self.config);

        let previous = self.state;
        let (state, label) = transition(previous, velocity, &th);
        self.state = state;
        if let Some(label) = label {
            self.label = label;
        }

        if state != previous {
            tracing::debug!(
                "gesture {:?} -> {:?} (v={:.6}, high={:.6}, low={:.6})",
                previous,
                state,
                velocity,
                th.high,
                th.low
            );
        }

        self.debug = GestureDebug {
            velocity,
            high: th.high,
            low: th.low,
        };
        self.label
    }

    pub fn state(&self) -> Gesture {
        self.state
    }

    pub fn label(&self) -> Gesture {
        self.label
    }

    pub fn debug(&self) -> GestureDebug {
        self.debug
    }

    pub fn window_len(&self) -> usize {
        self.window.len()
    }

    /// Forget the velocity window and return to `Stable`
    pub fn reset(&mut self) {
        self.window.clear();
        self.state = Gesture::Stable;
        self.label = Gesture::Stable;
        self.debug = GestureDebug::default();
    }
}
