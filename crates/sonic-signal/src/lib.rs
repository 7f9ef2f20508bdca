//! # Sonic-Signal
//!
//! Signal processing for ultrasonic ranging: turns a stream of raw distances
//! into hand-gesture labels or a breathing-rate estimate.
//!
//! ## Pipeline Stages
//!
//! 1. **Ranging**: the engine publishes its newest distance into a lock-free slot
//! 2. **Smoothing**: EMA on distance, then EMA on its first difference (velocity)
//! 3. **Gesture**: median-adaptive hysteresis on the smoothed velocity
//! 4. **Breath**: detrended autocorrelation over a 20 s distance window
//! 5. **Output**: one [`Snapshot`](sonic_core::Snapshot) per tick, plus the
//!    velocity history and an exportable CSV log
//!
//! Only one of gesture or breath runs at a time, selected by
//! [`PipelineMode`](sonic_core::PipelineMode).

pub mod breath;
pub mod buffer;
pub mod config;
pub mod driver;
pub mod filtering;
pub mod gesture;
pub mod pipeline;
pub mod ranging;
pub mod recorder;
pub mod settings;

pub use breath::{estimate_direct, estimate_fft, BreathEstimator};
pub use buffer::{BoundedBuffer, HistoryBuffer};
pub use self::config::*;
pub use driver::SamplingDriver;
pub use filtering::{ExponentialFilter, FilterOutput, FilterState};
pub use gesture::{GestureClassifier, Thresholds};
pub use pipeline::Pipeline;
pub use ranging::*;
pub use recorder::{LogRecord, LogRecorder, EXPORT_HEADER};
pub use settings::{InMemorySettings, SettingValue, SettingsStore};
