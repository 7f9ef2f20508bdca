//! Ranging engine interfaces.
//!
//! The ranging engine emits an ultrasonic probe, demodulates the echoes and
//! exposes the most recent distance. It runs on its own clock (usually the
//! audio I/O thread), so the hand-off to the sampling worker goes through a
//! lock-free [`DistanceSlot`] that always holds the newest value.

use std::f64::consts::PI;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;

use sonic_core::{Error, Result};

/// Bit pattern marking an empty slot (a NaN no producer publishes)
const EMPTY_SLOT: u64 = u64::MAX;

/// Single-producer latest-value cell for raw distances
#[derive(Debug, Clone)]
pub struct DistanceSlot {
    bits: Arc<AtomicU64>,
}

impl DistanceSlot {
    pub fn new() -> Self {
        Self {
            bits: Arc::new(AtomicU64::new(EMPTY_SLOT)),
        }
    }

    /// Overwrite the slot. Non-finite readings are dropped.
    pub fn publish(&self, distance: f64) {
        if distance.is_finite() {
            self.bits.store(distance.to_bits(), Ordering::Release);
        }
    }

    pub fn latest(&self) -> Option<f64> {
        match self.bits.load(Ordering::Acquire) {
            EMPTY_SLOT => None,
            bits => Some(f64::from_bits(bits)),
        }
    }

    pub fn clear(&self) {
        self.bits.store(EMPTY_SLOT, Ordering::Release);
    }
}

impl Default for DistanceSlot {
    fn default() -> Self {
        Self::new()
    }
}

/// Trait for ranging backends
#[async_trait]
pub trait RangingEngine: Send + Sync {
    /// Start probing
    async fn start(&mut self) -> Result<()>;

    /// Stop probing
    async fn stop(&mut self) -> Result<()>;

    /// Check if the engine is active
    fn is_running(&self) -> bool;

    /// Most recent raw distance, `None` before the first measurement
    fn latest_distance(&self) -> Option<f64>;
}

/// Engine fed by a host-owned producer.
///
/// The host keeps a clone of [`slot`](Self::slot) and publishes into it from
/// its audio callback; `start`/`stop` only gate whether readings are exposed.
#[derive(Debug, Default)]
pub struct ExternalRangingEngine {
    slot: DistanceSlot,
    is_running: bool,
}

impl ExternalRangingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slot(&self) -> DistanceSlot {
        self.slot.clone()
    }
}

#[async_trait]
impl RangingEngine for ExternalRangingEngine {
    async fn start(&mut self) -> Result<()> {
        self.is_running = true;
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        self.is_running = false;
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.is_running
    }

    fn latest_distance(&self) -> Option<f64> {
        if self.is_running {
            self.slot.latest()
        } else {
            None
        }
    }
}

/// Synthetic target motion for [`SimulatedRangingEngine`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MotionProfile {
    /// Motionless target
    Static { distance: f64 },
    /// Hand moving back and forth
    HandWave {
        distance: f64,
        amplitude: f64,
        period_secs: f64,
    },
    /// Chest displacement of a breathing subject
    Breathing {
        distance: f64,
        amplitude: f64,
        bpm: f64,
    },
}

impl MotionProfile {
    /// Noise-free distance at `t` seconds
    pub fn distance_at(&self, t: f64) -> f64 {
        match *self {
            MotionProfile::Static { distance } => distance,
            MotionProfile::HandWave {
                distance,
                amplitude,
                period_secs,
            } => distance + amplitude * (2.0 * PI * t / period_secs).sin(),
            MotionProfile::Breathing {
                distance,
                amplitude,
                bpm,
            } => distance + amplitude * (2.0 * PI * bpm / 60.0 * t).sin(),
        }
    }
}

/// Deterministic jitter in [-1, 1] (splitmix64)
fn jitter(seq: u64) -> f64 {
    let mut z = seq.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^= z >> 31;
    (z >> 11) as f64 / (1u64 << 53) as f64 * 2.0 - 1.0
}

/// Ranging engine that synthesizes distances on its own producer task
pub struct SimulatedRangingEngine {
    profile: MotionProfile,
    /// Producer cadence, independent of the sampling tick
    update_interval: Duration,
    /// Peak uniform measurement noise
    noise: f64,
    slot: DistanceSlot,
    task: Option<JoinHandle<()>>,
    /// Status code returned by `start`, for exercising failure paths
    start_status: i32,
}

impl SimulatedRangingEngine {
    pub fn new(profile: MotionProfile) -> Self {
        Self {
            profile,
            update_interval: Duration::from_millis(10),
            noise: 0.0,
            slot: DistanceSlot::new(),
            task: None,
            start_status: 0,
        }
    }

    pub fn with_noise(mut self, noise: f64) -> Self {
        self.noise = noise.abs();
        self
    }

    /// Make `start` fail with the given native status code
    pub fn failing_with(mut self, status: i32) -> Self {
        self.start_status = status;
        self
    }

    pub fn profile(&self) -> MotionProfile {
        self.profile
    }
}

#[async_trait]
impl RangingEngine for SimulatedRangingEngine {
    async fn start(&mut self) -> Result<()> {
        if self.task.is_some() {
            return Ok(());
        }
        sonic_core::error::check_status(self.start_status)?;

        let profile = self.profile;
        let noise = self.noise;
        let slot = self.slot.clone();
        let interval = self.update_interval;

        // Publish one reading before returning so the first tick has data
        slot.publish(profile.distance_at(0.0) + noise * jitter(0));

        self.task = Some(tokio::spawn(async move {
            let started = tokio::time::Instant::now();
            let mut ticker = tokio::time::interval(interval);
            let mut seq = 1u64;
            loop {
                ticker.tick().await;
                let t = started.elapsed().as_secs_f64();
                slot.publish(profile.distance_at(t) + noise * jitter(seq));
                seq = seq.wrapping_add(1);
            }
        }));

        tracing::info!("Simulated ranging engine started ({:?})", self.profile);
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(task) = self.task.take() {
            task.abort();
            // An aborted task resolves to a cancellation error
            match task.await {
                Ok(()) => {}
                Err(e) if e.is_cancelled() => {}
                Err(e) => return Err(Error::WorkerFailed(e.to_string())),
            }
        }
        self.slot.clear();
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.task.is_some()
    }

    fn latest_distance(&self) -> Option<f64> {
        self.slot.latest()
    }
}

impl Drop for SimulatedRangingEngine {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
