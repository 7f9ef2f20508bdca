//! Exponential smoothing of the distance stream and its velocity.

use crate::config::SmoothingConfig;

/// One EMA step. An absent previous value seeds the filter with `x`.
#[inline]
pub fn ema_step(prev: Option<f64>, x: f64, alpha: f64) -> f64 {
    match prev {
        Some(prev) => (1.0 - alpha) * prev + alpha * x,
        None => x,
    }
}

/// Stateful [`ema_step`] for a single scalar stream, such as tick cost
#[derive(Debug, Clone)]
pub struct ExponentialFilter {
    alpha: f64,
    average: Option<f64>,
}

impl ExponentialFilter {
    /// `alpha` is clamped into `[0, 1]`; 1 tracks the input exactly.
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha: alpha.clamp(0.0, 1.0),
            average: None,
        }
    }

    /// Fold `x` into the average and return it
    pub fn filter(&mut self, x: f64) -> f64 {
        let average = ema_step(self.average, x, self.alpha);
        self.average = Some(average);
        average
    }
}

/// Smoothed distance and velocity carried between ticks.
///
/// Both fields are `None` until the first sample arrives and `Some` forever
/// after (until an explicit reset).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FilterState {
    pub smoothed_distance: Option<f64>,
    pub smoothed_velocity: Option<f64>,
}

/// Result of pushing one raw sample through the filters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterOutput {
    pub distance: f64,
    /// Smoothed velocity, never sign-flipped
    pub velocity: f64,
}

impl FilterState {
    pub fn is_seeded(&self) -> bool {
        self.smoothed_distance.is_some()
    }

    /// Advance the distance filter and velocity estimator by one sample.
    ///
    /// The velocity is the first difference of the filtered distance (the
    /// tick period is constant, so no dt division) smoothed by a second EMA.
    /// The first sample yields a raw velocity of zero.
    pub fn step(self, sample: f64, smoothing: &SmoothingConfig) -> (FilterState, FilterOutput) {
        let distance = ema_step(self.smoothed_distance, sample, smoothing.distance_alpha);
        let raw_velocity = self
            .smoothed_distance
            .map(|prev| distance - prev)
            .unwrap_or(0.0);
        let velocity = ema_step(self.smoothed_velocity, raw_velocity, smoothing.velocity_alpha);

        let next = FilterState {
            smoothed_distance: Some(distance),
            smoothed_velocity: Some(velocity),
        };
        (next, FilterOutput { distance, velocity })
    }
}

/// Sign convention handed to the gesture classifier.
///
/// Only the classifier sees the flipped value; history and breath paths keep
/// the raw sign.
#[inline]
pub fn classifier_velocity(velocity: f64, invert: bool) -> f64 {
    if invert {
        -velocity
    } else {
        velocity
    }
}
