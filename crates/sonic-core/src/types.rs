//! Fundamental types for the Sonic Sense system.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Timestamp wrapper with nanosecond precision
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn now() -> Self {
        Self(Utc::now().timestamp_nanos_opt().unwrap_or(0))
    }

    pub fn from_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    pub fn from_secs_f64(secs: f64) -> Self {
        Self((secs * 1_000_000_000.0).round() as i64)
    }

    pub fn as_nanos(&self) -> i64 {
        self.0
    }

    /// Seconds since the Unix epoch
    pub fn as_secs_f64(&self) -> f64 {
        self.0 as f64 / 1_000_000_000.0
    }

    pub fn to_datetime(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_nanos(self.0)
    }
}

/// Persistent mode of the gesture state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Gesture {
    #[default]
    Stable,
    /// Hand approaching the sensor
    Closer,
    /// Hand receding from the sensor
    Away,
}

impl Gesture {
    /// Human readable label published to observers
    pub fn label(&self) -> &'static str {
        match self {
            Gesture::Stable => "Stable",
            Gesture::Closer => "Moving Closer",
            Gesture::Away => "Moving Away",
        }
    }
}

impl std::fmt::Display for Gesture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Which interpretation of the distance stream is active
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineMode {
    #[default]
    Gesture,
    Breath,
}

impl PipelineMode {
    pub fn is_breath(&self) -> bool {
        matches!(self, PipelineMode::Breath)
    }
}

/// User-tunable knobs for the gesture classifier.
///
/// Owned by the settings store and sampled fresh on every tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationParams {
    /// Lower bound on the adaptive threshold
    pub base_sensitivity: f64,
    /// Scale applied to the median of recent velocity magnitudes
    pub median_multiplier: f64,
    /// Flip the velocity sign before classification
    pub invert_gesture: bool,
}

impl CalibrationParams {
    pub const DEFAULT_BASE_SENSITIVITY: f64 = 0.001;
    pub const DEFAULT_MEDIAN_MULTIPLIER: f64 = 1.0;
}

impl Default for CalibrationParams {
    fn default() -> Self {
        Self {
            base_sensitivity: Self::DEFAULT_BASE_SENSITIVITY,
            median_multiplier: Self::DEFAULT_MEDIAN_MULTIPLIER,
            invert_gesture: false,
        }
    }
}

/// Breathing-rate estimate
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BreathResult {
    /// Breaths per minute, 0 when no periodicity was found
    pub rate_bpm: f64,
    /// Normalized autocorrelation peak [0, 1]
    pub quality: f64,
}

impl BreathResult {
    pub fn none() -> Self {
        Self::default()
    }
}

/// Classifier telemetry for tuning. Not part of the decision contract.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GestureDebug {
    /// Velocity seen by the classifier (after optional inversion)
    pub velocity: f64,
    /// Enter threshold
    pub high: f64,
    /// Exit threshold
    pub low: f64,
}

/// Immutable view of the pipeline outputs, published once per tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub timestamp: Timestamp,
    pub mode: PipelineMode,
    /// Smoothed distance, in ranging-engine units
    pub distance: f64,
    pub gesture_label: String,
    pub breath_rate: f64,
    pub breath_quality: f64,
    pub is_running: bool,
    pub debug: GestureDebug,
}

impl Snapshot {
    /// Output before any sample has been processed
    pub fn idle() -> Self {
        Self {
            timestamp: Timestamp(0),
            mode: PipelineMode::Gesture,
            distance: 0.0,
            gesture_label: Gesture::Stable.label().to_string(),
            breath_rate: 0.0,
            breath_quality: 0.0,
            is_running: false,
            debug: GestureDebug::default(),
        }
    }
}

impl Default for Snapshot {
    fn default() -> Self {
        Self::idle()
    }
}
