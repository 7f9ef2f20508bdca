//! Pipeline configuration.

use serde::{Deserialize, Serialize};
use sonic_core::{Error, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Complete pipeline configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SonicConfig {
    /// Tick cadence
    pub sampling: SamplingConfig,

    /// Distance / velocity smoothing
    pub smoothing: SmoothingConfig,

    /// Gesture classifier shape (calibration knobs live in the settings store)
    pub gesture: GestureConfig,

    /// Breath estimator
    pub breath: BreathConfig,

    /// History buffer and log recorder
    pub buffers: BufferConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Tick period (seconds)
    pub interval_secs: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmoothingConfig {
    /// EMA factor for the raw distance
    pub distance_alpha: f64,
    /// EMA factor for the finite-difference velocity
    pub velocity_alpha: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GestureConfig {
    /// Span of the velocity-magnitude window (seconds)
    pub window_secs: f64,
    /// Enter threshold as a multiple of the adaptive base
    pub high_ratio: f64,
    /// Exit threshold as a multiple of the adaptive base
    pub low_ratio: f64,
}

/// Autocorrelation strategy for the breath estimator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BreathMethod {
    /// Time-domain O(N x L) lag scan
    #[default]
    Direct,
    /// Zero-padded FFT autocorrelation
    Fft,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreathConfig {
    /// Sliding window span (seconds)
    pub window_secs: f64,
    /// Samples required before any estimate is produced
    pub min_samples: usize,
    /// Slowest plausible breathing rate (breaths/min)
    pub min_bpm: f64,
    /// Fastest plausible breathing rate (breaths/min)
    pub max_bpm: f64,
    /// Normalized correlation a peak must exceed to report a rate
    pub quality_floor: f64,
    pub method: BreathMethod,
    /// Re-run the correlation every N ticks (1 = every tick)
    pub eval_stride: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Smoothed-velocity history kept for visualization
    pub history_capacity: usize,
    /// Maximum number of log records
    pub log_capacity: usize,
    /// Record a log row every tick from startup
    pub logging_enabled: bool,
    /// Directory receiving exported logs
    pub export_dir: PathBuf,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self { interval_secs: 0.02 }
    }
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            distance_alpha: 0.12,
            velocity_alpha: 0.5,
        }
    }
}

impl Default for GestureConfig {
    fn default() -> Self {
        Self {
            window_secs: 1.0,
            high_ratio: 1.2,
            low_ratio: 0.9,
        }
    }
}

impl Default for BreathConfig {
    fn default() -> Self {
        Self {
            window_secs: 20.0,
            min_samples: 100,
            min_bpm: 8.0,
            max_bpm: 35.0,
            quality_floor: 0.05,
            method: BreathMethod::Direct,
            eval_stride: 1,
        }
    }
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            history_capacity: 150,
            log_capacity: 5000,
            logging_enabled: false,
            export_dir: PathBuf::from("logs"),
        }
    }
}

impl SamplingConfig {
    pub fn period(&self) -> Duration {
        Duration::from_secs_f64(self.interval_secs)
    }

    /// Number of ticks covering `secs`, at least one
    pub fn ticks_for(&self, secs: f64) -> usize {
        ((secs / self.interval_secs).round() as usize).max(1)
    }
}

impl SonicConfig {
    /// Load configuration from file, with `SONIC_` environment overrides
    pub fn from_file(path: &str) -> Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::with_name(path))
            .add_source(
                ::config::Environment::with_prefix("SONIC")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .map_err(|e| Error::Config(e.to_string()))?;

        let config: Self = settings
            .try_deserialize()
            .map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(
                ::config::Environment::with_prefix("SONIC")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .map_err(|e| Error::Config(e.to_string()))?;

        let config: Self = settings
            .try_deserialize()
            .map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Capacity of the gesture classifier's velocity window
    pub fn velocity_window_len(&self) -> usize {
        self.sampling.ticks_for(self.gesture.window_secs)
    }

    /// Capacity of the breath estimator's distance window
    pub fn breath_window_len(&self) -> usize {
        self.sampling.ticks_for(self.breath.window_secs)
    }

    pub fn validate(&self) -> Result<()> {
        let interval = self.sampling.interval_secs;
        if !(interval.is_finite() && interval > 0.0) {
            return Err(Error::Config(format!(
                "sampling.interval_secs must be positive, got {}",
                interval
            )));
        }

        for (name, alpha) in [
            ("smoothing.distance_alpha", self.smoothing.distance_alpha),
            ("smoothing.velocity_alpha", self.smoothing.velocity_alpha),
        ] {
            if !(alpha > 0.0 && alpha <= 1.0) {
                return Err(Error::Config(format!("{} must be in (0, 1], got {}", name, alpha)));
            }
        }

        if self.gesture.window_secs <= 0.0 {
            return Err(Error::Config("gesture.window_secs must be positive".into()));
        }
        if self.gesture.low_ratio <= 0.0 || self.gesture.low_ratio > self.gesture.high_ratio {
            return Err(Error::Config(
                "gesture.low_ratio must be positive and not exceed gesture.high_ratio".into(),
            ));
        }

        let breath = &self.breath;
        if !(breath.min_bpm > 0.0 && breath.min_bpm < breath.max_bpm) {
            return Err(Error::Config(format!(
                "breath band [{}, {}] bpm is empty",
                breath.min_bpm, breath.max_bpm
            )));
        }
        if breath.window_secs <= 0.0 || breath.min_samples < 2 || breath.eval_stride == 0 {
            return Err(Error::Config(
                "breath.window_secs, breath.min_samples and breath.eval_stride must be positive"
                    .into(),
            ));
        }

        if self.buffers.history_capacity == 0 || self.buffers.log_capacity == 0 {
            return Err(Error::Config("buffer capacities must be non-zero".into()));
        }

        Ok(())
    }
}
