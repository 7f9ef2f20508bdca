//! `sonic` binary: runs the sampling pipeline against a simulated ranging
//! engine and prints the published snapshots as JSON lines.
//!
//! # Usage
//!
//! ```bash
//! sonic --profile wave --seconds 5
//! sonic --profile breathing --bpm 14 --mode breath --seconds 30 --export logs
//! ```
//!
//! A bare `--export` writes into `buffers.export_dir` from the configuration.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

use sonic_core::{Error, PipelineMode, Snapshot};
use sonic_signal::config::SonicConfig;
use sonic_signal::driver::SamplingDriver;
use sonic_signal::ranging::{MotionProfile, SimulatedRangingEngine};
use sonic_signal::settings::InMemorySettings;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Profile {
    /// Motionless target
    Static,
    /// Hand waving towards and away from the sensor
    Wave,
    /// Breathing chest
    Breathing,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    Gesture,
    Breath,
}

impl From<Mode> for PipelineMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Gesture => PipelineMode::Gesture,
            Mode::Breath => PipelineMode::Breath,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "sonic",
    version,
    about = "Ultrasonic gesture and breathing pipeline demo",
    long_about = None
)]
struct Args {
    /// Configuration file (any format supported by the `config` crate).
    ///
    /// `SONIC_` environment variables override file values.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// How long to sample, in seconds.
    #[arg(short, long, default_value_t = 10.0)]
    seconds: f64,

    /// Simulated target motion.
    #[arg(short, long, value_enum, default_value = "wave")]
    profile: Profile,

    /// Pipeline mode.
    #[arg(short, long, value_enum, default_value = "gesture")]
    mode: Mode,

    /// Nominal target distance.
    #[arg(long, default_value_t = 0.3)]
    distance: f64,

    /// Breathing rate of the `breathing` profile (breaths/min).
    #[arg(long, default_value_t = 15.0)]
    bpm: f64,

    /// Peak measurement noise added by the simulated engine.
    #[arg(long, default_value_t = 0.0002)]
    noise: f64,

    /// Flip the gesture direction.
    #[arg(long, default_value_t = false)]
    invert: bool,

    /// Print only every Nth snapshot.
    #[arg(long, default_value_t = 5)]
    every: usize,

    /// Record the log and export it on exit, into DIR or the configured
    /// export directory.
    #[arg(long, value_name = "DIR", num_args = 0..=1)]
    export: Option<Option<PathBuf>>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let log_level_filter = args
        .log_level
        .parse::<tracing_subscriber::filter::LevelFilter>()
        .unwrap_or(tracing_subscriber::filter::LevelFilter::INFO);

    tracing_subscriber::fmt()
        .with_max_level(log_level_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = match args.config.as_deref() {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            match SonicConfig::from_file(&path.to_string_lossy()) {
                Ok(config) => config,
                Err(e) => {
                    error!("Failed to load configuration: {e}");
                    std::process::exit(1);
                }
            }
        }
        None => match SonicConfig::from_env() {
            Ok(config) => config,
            Err(e) => {
                error!("Invalid environment configuration: {e}");
                std::process::exit(1);
            }
        },
    };

    if let Err(e) = run(args, config).await {
        error!("{e}");
        std::process::exit(1);
    }
}

async fn run(args: Args, config: SonicConfig) -> sonic_core::Result<()> {
    let profile = match args.profile {
        Profile::Static => MotionProfile::Static {
            distance: args.distance,
        },
        Profile::Wave => MotionProfile::HandWave {
            distance: args.distance,
            amplitude: 0.08,
            period_secs: 2.0,
        },
        Profile::Breathing => MotionProfile::Breathing {
            distance: args.distance,
            amplitude: 0.004,
            bpm: args.bpm,
        },
    };
    let engine = SimulatedRangingEngine::new(profile).with_noise(args.noise);
    let run_for = run_duration(args.seconds)?;
    let export_dir = export_target(args.export.clone(), &config.buffers.export_dir);
    let logging = export_dir.is_some() || config.buffers.logging_enabled;

    let settings = Arc::new(InMemorySettings::new());
    let mut driver = SamplingDriver::new(engine, config, settings)?;

    let mut calibration = driver.calibration();
    calibration.invert_gesture = args.invert;
    driver.set_calibration(&calibration);

    driver.set_mode(args.mode.into()).await?;
    driver.set_logging(logging).await?;

    let mut snapshots = driver.subscribe();
    driver.start().await?;

    let deadline = tokio::time::sleep(run_for);
    tokio::pin!(deadline);
    let every = args.every.max(1);
    let mut count = 0usize;

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            received = snapshots.recv() => match received {
                Ok(snapshot) => {
                    if count % every == 0 {
                        print_snapshot(&snapshot)?;
                    }
                    count += 1;
                }
                Err(RecvError::Lagged(n)) => warn!("Dropped {} snapshots", n),
                Err(RecvError::Closed) => break,
            },
        }
    }

    driver.stop().await?;
    info!("Processed {} ticks", count);

    if let Some(dir) = export_dir {
        std::fs::create_dir_all(&dir)?;
        if let Some(path) = driver.export_log(&dir).await {
            info!("Log written to {}", path.display());
        }
    }
    Ok(())
}

fn run_duration(seconds: f64) -> sonic_core::Result<Duration> {
    Duration::try_from_secs_f64(seconds)
        .map_err(|e| Error::InvalidInput(format!("--seconds {}: {}", seconds, e)))
}

/// Where `--export` writes, if anywhere
fn export_target(arg: Option<Option<PathBuf>>, configured: &Path) -> Option<PathBuf> {
    arg.map(|dir| dir.unwrap_or_else(|| configured.to_path_buf()))
}

fn print_snapshot(snapshot: &Snapshot) -> sonic_core::Result<()> {
    println!("{}", serde_json::to_string(snapshot)?);
    Ok(())
}
