//! Breathing-rate estimation from the filtered distance.
//!
//! Chest motion modulates the measured distance by a few millimetres with a
//! period of roughly 2-7 seconds. The estimator keeps a 20 s sliding window,
//! removes its mean and searches the autocorrelation for the strongest lag
//! inside the plausible breathing band (8-35 breaths/min by default).
//!
//! ## Cost
//!
//! The direct lag scan costs O(N x L) multiply-adds per evaluation, about
//! 290k at 50 Hz with a full window. [`BreathMethod::Fft`] computes the same
//! correlation in O(N log N), and `eval_stride` re-evaluates only every Nth
//! tick when the tick budget is tight.

use std::sync::Arc;

use num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use sonic_core::BreathResult;

use crate::buffer::BoundedBuffer;
use crate::config::{BreathConfig, BreathMethod};

/// Guard against division by a vanishing signal energy
const ENERGY_EPSILON: f64 = 1e-12;

/// Inclusive `(min_lag, max_lag)` search range for a window of `len`
/// samples, or `None` when the range is empty.
pub fn lag_bounds(len: usize, sample_interval: f64, config: &BreathConfig) -> Option<(usize, usize)> {
    // 1e-9 keeps exact periods from flooring one lag short
    let min_lag = ((60.0 / config.max_bpm) / sample_interval + 1e-9).floor() as usize;
    let max_lag = ((60.0 / config.min_bpm) / sample_interval + 1e-9).floor() as usize;
    let max_lag = max_lag.min(len.saturating_sub(1));
    if max_lag <= min_lag {
        None
    } else {
        Some((min_lag, max_lag))
    }
}

/// Subtract the mean of `samples`, writing into `out`; returns the energy.
fn detrend(samples: &[f64], out: &mut Vec<f64>) -> f64 {
    let mean = samples.iter().sum::<f64>() / samples.len() as f64;
    out.clear();
    out.extend(samples.iter().map(|x| x - mean));
    out.iter().map(|x| x * x).sum::<f64>().max(ENERGY_EPSILON)
}

/// Turn the winning lag and its normalized correlation into a result
fn finish(best_lag: usize, best_corr: f64, sample_interval: f64, config: &BreathConfig) -> BreathResult {
    let quality = best_corr.clamp(0.0, 1.0);
    if quality > config.quality_floor && best_lag > 0 {
        BreathResult {
            rate_bpm: 60.0 / (best_lag as f64 * sample_interval),
            quality,
        }
    } else {
        BreathResult {
            rate_bpm: 0.0,
            quality,
        }
    }
}

/// Scan `(min_lag..=max_lag)` ascending, keeping the strict maximum so ties
/// resolve to the shortest lag.
fn peak_lag(lags: std::ops::RangeInclusive<usize>, corr: impl Fn(usize) -> f64) -> (usize, f64) {
    let mut best_lag = *lags.start();
    let mut best = f64::NEG_INFINITY;
    for lag in lags {
        let c = corr(lag);
        if c > best {
            best = c;
            best_lag = lag;
        }
    }
    (best_lag, best)
}

/// Time-domain autocorrelation estimate over `samples`
pub fn estimate_direct(samples: &[f64], sample_interval: f64, config: &BreathConfig) -> BreathResult {
    if samples.len() < config.min_samples {
        return BreathResult::none();
    }
    let Some((min_lag, max_lag)) = lag_bounds(samples.len(), sample_interval, config) else {
        return BreathResult::none();
    };

    let mut d = Vec::with_capacity(samples.len());
    let energy = detrend(samples, &mut d);
    let n = d.len();

    let (best_lag, best) = peak_lag(min_lag..=max_lag, |lag| {
        d[..n - lag]
            .iter()
            .zip(&d[lag..])
            .map(|(a, b)| a * b)
            .sum::<f64>()
            / energy
    });
    finish(best_lag, best, sample_interval, config)
}

/// Zero-padded transform length for a window of `len` samples; at least 2N
/// so the circular correlation equals the linear one.
fn fft_size(len: usize) -> usize {
    (2 * len).next_power_of_two()
}

/// Forward/inverse transforms planned for one padded length
struct FftPlans {
    size: usize,
    forward: Arc<dyn Fft<f64>>,
    inverse: Arc<dyn Fft<f64>>,
}

impl FftPlans {
    fn new(size: usize, planner: &mut FftPlanner<f64>) -> Self {
        Self {
            size,
            forward: planner.plan_fft_forward(size),
            inverse: planner.plan_fft_inverse(size),
        }
    }
}

/// FFT autocorrelation estimate; matches [`estimate_direct`] up to rounding
pub fn estimate_fft(
    samples: &[f64],
    sample_interval: f64,
    config: &BreathConfig,
    planner: &mut FftPlanner<f64>,
) -> BreathResult {
    let plans = FftPlans::new(fft_size(samples.len()), planner);
    estimate_with_plans(samples, sample_interval, config, &plans)
}

fn estimate_with_plans(
    samples: &[f64],
    sample_interval: f64,
    config: &BreathConfig,
    plans: &FftPlans,
) -> BreathResult {
    if samples.len() < config.min_samples {
        return BreathResult::none();
    }
    let Some((min_lag, max_lag)) = lag_bounds(samples.len(), sample_interval, config) else {
        return BreathResult::none();
    };

    let mut d = Vec::with_capacity(samples.len());
    let energy = detrend(samples, &mut d);

    let size = plans.size;
    let mut buf: Vec<Complex<f64>> = d
        .iter()
        .map(|&x| Complex::new(x, 0.0))
        .chain(std::iter::repeat(Complex::new(0.0, 0.0)))
        .take(size)
        .collect();

    plans.forward.process(&mut buf);
    for x in buf.iter_mut() {
        *x = Complex::new(x.norm_sqr(), 0.0);
    }
    plans.inverse.process(&mut buf);

    let scale = size as f64 * energy;
    let (best_lag, best) = peak_lag(min_lag..=max_lag, |lag| buf[lag].re / scale);
    finish(best_lag, best, sample_interval, config)
}

/// Sliding-window breathing-rate estimator
pub struct BreathEstimator {
    config: BreathConfig,
    sample_interval: f64,
    window: BoundedBuffer<f64>,
    /// Cached for the current window length (FFT method only)
    plans: Option<FftPlans>,
    /// Ticks since the last correlation run, modulo `eval_stride`
    phase: usize,
    last: BreathResult,
}

impl BreathEstimator {
    pub fn new(window_len: usize, sample_interval: f64, config: BreathConfig) -> Self {
        Self {
            config,
            sample_interval,
            window: BoundedBuffer::new(window_len),
            plans: None,
            phase: 0,
            last: BreathResult::none(),
        }
    }

    /// Append one filtered distance and return the current estimate
    pub fn push(&mut self, distance: f64) -> BreathResult {
        self.window.push(distance);

        if self.window.len() < self.config.min_samples {
            self.phase = 0;
            self.last = BreathResult::none();
            return self.last;
        }

        if self.phase == 0 {
            self.last = self.evaluate();
        }
        self.phase = (self.phase + 1) % self.config.eval_stride.max(1);
        self.last
    }

    fn evaluate(&mut self) -> BreathResult {
        let samples = self.window.as_slice();
        match self.config.method {
            BreathMethod::Direct => estimate_direct(samples, self.sample_interval, &self.config),
            BreathMethod::Fft => {
                let size = fft_size(samples.len());
                let plans = match self.plans.take() {
                    Some(plans) if plans.size == size => plans,
                    _ => FftPlans::new(size, &mut FftPlanner::new()),
                };
                let result = estimate_with_plans(samples, self.sample_interval, &self.config, &plans);
                self.plans = Some(plans);
                result
            }
        }
    }

    pub fn last(&self) -> BreathResult {
        self.last
    }

    pub fn window_len(&self) -> usize {
        self.window.len()
    }

    pub fn reset(&mut self) {
        self.window.clear();
        self.phase = 0;
        self.last = BreathResult::none();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    const DT: f64 = 0.02;

    fn breathing(bpm: f64, n: usize) -> Vec<f64> {
        let freq = bpm / 60.0;
        (0..n)
            .map(|i| 0.5 + 0.004 * (2.0 * PI * freq * i as f64 * DT).sin())
            .collect()
    }

    fn estimator(config: BreathConfig) -> BreathEstimator {
        BreathEstimator::new(1000, DT, config)
    }

    #[test]
    fn test_lag_bounds_default() {
        let config = BreathConfig::default();
        assert_eq!(lag_bounds(1000, DT, &config), Some((85, 375)));
        assert_eq!(lag_bounds(100, DT, &config), Some((85, 99)));
        assert_eq!(lag_bounds(80, DT, &config), None);
    }

    #[test]
    fn test_insufficient_samples_yield_zero() {
        let mut est = estimator(BreathConfig::default());
        for x in breathing(15.0, 99) {
            assert_eq!(est.push(x), BreathResult::none());
        }
        assert_eq!(est.window_len(), 99);
    }

    #[test]
    fn test_detects_fifteen_bpm() {
        let mut est = estimator(BreathConfig::default());
        let mut result = BreathResult::none();
        for x in breathing(15.0, 1000) {
            result = est.push(x);
        }
        assert!((result.rate_bpm - 15.0).abs() <= 1.0, "rate {}", result.rate_bpm);
        assert!(result.quality > 0.05);
    }

    #[test]
    fn test_detects_across_band() {
        for bpm in [10.0, 12.0, 20.0, 30.0] {
            let result = estimate_direct(&breathing(bpm, 1000), DT, &BreathConfig::default());
            assert!(
                (result.rate_bpm - bpm).abs() <= 1.0,
                "expected {} got {}",
                bpm,
                result.rate_bpm
            );
            assert!(result.quality > 0.05);
        }
    }

    #[test]
    fn test_flat_signal_has_no_rate() {
        let result = estimate_direct(&vec![0.3; 500], DT, &BreathConfig::default());
        assert_eq!(result.rate_bpm, 0.0);
        assert_eq!(result.quality, 0.0);
    }

    #[test]
    fn test_empty_lag_range_yields_zero() {
        let config = BreathConfig {
            min_samples: 10,
            ..Default::default()
        };
        let result = estimate_direct(&breathing(15.0, 50), DT, &config);
        assert_eq!(result, BreathResult::none());
    }

    #[test]
    fn test_fft_matches_direct() {
        let config = BreathConfig::default();
        let signal: Vec<f64> = breathing(18.0, 1000)
            .iter()
            .enumerate()
            .map(|(i, x)| x + 0.001 * (2.0 * PI * 1.3 * i as f64 * DT).sin())
            .collect();

        let direct = estimate_direct(&signal, DT, &config);
        let fft = estimate_fft(&signal, DT, &config, &mut FftPlanner::new());
        assert_eq!(direct.rate_bpm, fft.rate_bpm);
        assert!((direct.quality - fft.quality).abs() < 1e-9);
    }

    #[test]
    fn test_estimator_fft_method() {
        let mut direct = estimator(BreathConfig::default());
        let mut fft = estimator(BreathConfig {
            method: BreathMethod::Fft,
            ..Default::default()
        });
        for x in breathing(24.0, 1200) {
            direct.push(x);
            fft.push(x);
        }
        assert_eq!(direct.last().rate_bpm, fft.last().rate_bpm);
        assert!((fft.last().rate_bpm - 24.0).abs() <= 1.0);
    }

    #[test]
    fn test_window_is_bounded() {
        let mut est = estimator(BreathConfig::default());
        for x in breathing(15.0, 1500) {
            est.push(x);
        }
        assert_eq!(est.window_len(), 1000);
    }

    #[test]
    fn test_eval_stride_holds_result_between_runs() {
        let config = BreathConfig {
            eval_stride: 10,
            ..Default::default()
        };
        let mut est = estimator(config);
        let signal = breathing(15.0, 400);
        for &x in &signal[..100] {
            est.push(x);
        }
        // Evaluated on the 100th sample, then held for nine ticks
        let first = est.last();
        for &x in &signal[100..109] {
            assert_eq!(est.push(x), first);
        }
    }

    #[test]
    fn test_reset_clears_window() {
        let mut est = estimator(BreathConfig::default());
        for x in breathing(15.0, 300) {
            est.push(x);
        }
        est.reset();
        assert_eq!(est.window_len(), 0);
        assert_eq!(est.last(), BreathResult::none());
    }
}
