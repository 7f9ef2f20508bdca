//! Fixed-cadence sampling driver.
//!
//! A single worker task owns the [`Pipeline`] and the ranging engine while
//! the driver runs. Every tick it pulls the newest distance from the engine,
//! reads calibration from the settings store, advances the pipeline and
//! publishes a [`Snapshot`]. Control operations reach the worker as commands
//! and are applied between ticks; while stopped they are applied directly to
//! the idle pipeline.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use sonic_core::{CalibrationParams, Error, PipelineMode, Result, Snapshot, Timestamp};

use crate::config::SonicConfig;
use crate::filtering::ExponentialFilter;
use crate::pipeline::Pipeline;
use crate::ranging::RangingEngine;
use crate::settings::{load_calibration, store_calibration, SettingsStore};

/// Snapshots buffered per subscriber before it starts lagging
pub const SNAPSHOT_CHANNEL_CAPACITY: usize = 64;

const COMMAND_CHANNEL_CAPACITY: usize = 32;

/// Smoothing factor of the per-tick cost average
const TICK_COST_ALPHA: f64 = 0.1;

/// Control messages handled by the worker between ticks
enum Command {
    SetMode(PipelineMode),
    SetLogging(bool),
    ClearLog,
    History(oneshot::Sender<Vec<f64>>),
    Export {
        dir: PathBuf,
        reply: oneshot::Sender<Result<PathBuf>>,
    },
    Stop,
}

enum DriverState<E> {
    Idle {
        pipeline: Pipeline,
        engine: E,
    },
    Running {
        commands: mpsc::Sender<Command>,
        worker: JoinHandle<(Pipeline, E)>,
        /// `Stop` has been delivered; the worker is winding down
        stopping: bool,
    },
    /// The worker died and took the pipeline with it
    Faulted,
}

/// Everything the worker shares with the driver handle
#[derive(Clone)]
struct Outputs {
    settings: Arc<dyn SettingsStore>,
    snapshots: broadcast::Sender<Snapshot>,
    latest: Arc<RwLock<Snapshot>>,
}

impl Outputs {
    fn publish(&self, snapshot: Snapshot) {
        *self.latest.write() = snapshot.clone();
        // No subscribers is fine
        let _ = self.snapshots.send(snapshot);
    }
}

/// Drives a [`Pipeline`] from a [`RangingEngine`] at a fixed cadence
pub struct SamplingDriver<E: RangingEngine + 'static> {
    period: Duration,
    mode: PipelineMode,
    state: DriverState<E>,
    outputs: Outputs,
}

impl<E: RangingEngine + 'static> SamplingDriver<E> {
    pub fn new(engine: E, config: SonicConfig, settings: Arc<dyn SettingsStore>) -> Result<Self> {
        config.validate()?;
        let (snapshots, _) = broadcast::channel(SNAPSHOT_CHANNEL_CAPACITY);

        Ok(Self {
            period: config.sampling.period(),
            mode: PipelineMode::default(),
            state: DriverState::Idle {
                pipeline: Pipeline::new(config),
                engine,
            },
            outputs: Outputs {
                settings,
                snapshots,
                latest: Arc::new(RwLock::new(Snapshot::idle())),
            },
        })
    }

    /// Receive every snapshot published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<Snapshot> {
        self.outputs.snapshots.subscribe()
    }

    /// Most recently published snapshot
    pub fn latest(&self) -> Snapshot {
        self.outputs.latest.read().clone()
    }

    pub fn is_running(&self) -> bool {
        matches!(
            self.state,
            DriverState::Running {
                stopping: false,
                ..
            }
        )
    }

    pub fn mode(&self) -> PipelineMode {
        self.mode
    }

    pub fn settings(&self) -> Arc<dyn SettingsStore> {
        self.outputs.settings.clone()
    }

    /// Calibration as the next tick will see it
    pub fn calibration(&self) -> CalibrationParams {
        load_calibration(self.outputs.settings.as_ref())
    }

    pub fn set_calibration(&self, calibration: &CalibrationParams) {
        store_calibration(self.outputs.settings.as_ref(), calibration);
    }

    /// Start the ranging engine and the sampling worker. No-op when running.
    pub async fn start(&mut self) -> Result<()> {
        self.settle().await?;
        match &mut self.state {
            DriverState::Running { .. } => return Ok(()),
            DriverState::Faulted => return Err(faulted()),
            DriverState::Idle { engine, .. } => engine.start().await?,
        }

        let (pipeline, engine) = match std::mem::replace(&mut self.state, DriverState::Faulted) {
            DriverState::Idle { pipeline, engine } => (pipeline, engine),
            other => {
                self.state = other;
                return Ok(());
            }
        };

        let (commands, rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        self.outputs.latest.write().is_running = true;
        let worker = tokio::spawn(run_worker(
            pipeline,
            engine,
            rx,
            self.period,
            self.outputs.clone(),
        ));
        self.state = DriverState::Running {
            commands,
            worker,
            stopping: false,
        };

        tracing::info!("Sampling started ({:?} period, {:?} mode)", self.period, self.mode);
        Ok(())
    }

    /// Stop sampling and the ranging engine. No-op when already stopped.
    ///
    /// Returns once the worker has exited; nothing is published afterwards.
    /// Dropping the returned future part-way leaves the driver stopping, and
    /// the next call on it finishes the job.
    pub async fn stop(&mut self) -> Result<()> {
        let DriverState::Running {
            commands,
            worker,
            stopping,
        } = &mut self.state
        else {
            return Ok(());
        };

        if !*stopping {
            // A closed channel means the worker is already on its way out
            let _ = commands.send(Command::Stop).await;
            *stopping = true;
        }

        let (pipeline, engine) = match worker.await {
            Ok(parts) => parts,
            Err(e) => {
                tracing::error!("Sampling worker terminated abnormally: {}", e);
                self.state = DriverState::Faulted;
                self.outputs.latest.write().is_running = false;
                return Err(Error::WorkerFailed(e.to_string()));
            }
        };

        let mut last = pipeline.last_snapshot().clone();
        last.is_running = false;
        self.outputs.publish(last);
        self.state = DriverState::Idle { pipeline, engine };
        tracing::info!("Sampling stopped");

        match &mut self.state {
            DriverState::Idle { engine, .. } => engine.stop().await,
            _ => Ok(()),
        }
    }

    /// Finish a stop whose caller went away before the worker was joined
    async fn settle(&mut self) -> Result<()> {
        if matches!(self.state, DriverState::Running { stopping: true, .. }) {
            self.stop().await?;
        }
        Ok(())
    }

    pub async fn set_mode(&mut self, mode: PipelineMode) -> Result<()> {
        self.settle().await?;
        match &mut self.state {
            DriverState::Idle { pipeline, .. } => {
                if pipeline.set_mode(mode) {
                    let mut last = pipeline.last_snapshot().clone();
                    last.is_running = false;
                    self.outputs.publish(last);
                }
            }
            DriverState::Running { commands, .. } => send(commands, Command::SetMode(mode)).await?,
            DriverState::Faulted => return Err(faulted()),
        }
        self.mode = mode;
        Ok(())
    }

    pub async fn set_logging(&mut self, enabled: bool) -> Result<()> {
        self.settle().await?;
        match &mut self.state {
            DriverState::Idle { pipeline, .. } => pipeline.set_logging(enabled),
            DriverState::Running { commands, .. } => {
                send(commands, Command::SetLogging(enabled)).await?
            }
            DriverState::Faulted => return Err(faulted()),
        }
        Ok(())
    }

    pub async fn clear_log(&mut self) -> Result<()> {
        self.settle().await?;
        match &mut self.state {
            DriverState::Idle { pipeline, .. } => pipeline.clear_log(),
            DriverState::Running { commands, .. } => send(commands, Command::ClearLog).await?,
            DriverState::Faulted => return Err(faulted()),
        }
        Ok(())
    }

    /// Smoothed velocity history, oldest first
    pub async fn history(&mut self) -> Result<Vec<f64>> {
        self.settle().await?;
        match &self.state {
            DriverState::Idle { pipeline, .. } => Ok(pipeline.history()),
            DriverState::Running { commands, .. } => {
                let (reply, rx) = oneshot::channel();
                send(commands, Command::History(reply)).await?;
                rx.await.map_err(|_| Error::ChannelClosed)
            }
            DriverState::Faulted => Err(faulted()),
        }
    }

    /// Export the log into `dir`
    pub async fn try_export_log(&mut self, dir: &Path) -> Result<PathBuf> {
        self.settle().await?;
        match &self.state {
            DriverState::Idle { pipeline, .. } => {
                let recorder = pipeline.recorder().clone();
                let dir = dir.to_path_buf();
                tokio::task::spawn_blocking(move || recorder.export(&dir))
                    .await
                    .map_err(|e| Error::WorkerFailed(e.to_string()))?
            }
            DriverState::Running { commands, .. } => {
                let (reply, rx) = oneshot::channel();
                send(
                    commands,
                    Command::Export {
                        dir: dir.to_path_buf(),
                        reply,
                    },
                )
                .await?;
                rx.await.map_err(|_| Error::ChannelClosed)?
            }
            DriverState::Faulted => Err(faulted()),
        }
    }

    /// Export the log into `dir`; `None` (and a warning) on failure
    pub async fn export_log(&mut self, dir: &Path) -> Option<PathBuf> {
        match self.try_export_log(dir).await {
            Ok(path) => Some(path),
            Err(e) => {
                tracing::warn!("Log export to {} failed: {}", dir.display(), e);
                None
            }
        }
    }
}

fn faulted() -> Error {
    Error::WorkerFailed("sampling worker has terminated".into())
}

async fn send(commands: &mpsc::Sender<Command>, command: Command) -> Result<()> {
    commands.send(command).await.map_err(|_| Error::ChannelClosed)
}

/// Worker loop; hands the pipeline and engine back when told to stop
async fn run_worker<E: RangingEngine>(
    mut pipeline: Pipeline,
    engine: E,
    mut commands: mpsc::Receiver<Command>,
    period: Duration,
    outputs: Outputs,
) -> (Pipeline, E) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut tick_cost = ExponentialFilter::new(TICK_COST_ALPHA);

    loop {
        tokio::select! {
            biased;

            command = commands.recv() => match command {
                Some(Command::Stop) | None => break,
                Some(command) => apply(&mut pipeline, command, &outputs),
            },

            _ = ticker.tick() => {
                let Some(raw) = engine.latest_distance() else {
                    tracing::debug!("No distance sample yet, skipping tick");
                    continue;
                };
                if !raw.is_finite() {
                    tracing::debug!("Non-finite distance {}, skipping tick", raw);
                    continue;
                }

                let started = Instant::now();
                let calibration = load_calibration(outputs.settings.as_ref());
                let snapshot = pipeline.tick(raw, &calibration, Timestamp::now());
                outputs.publish(snapshot);

                let elapsed = started.elapsed();
                let average = tick_cost.filter(elapsed.as_secs_f64());
                if elapsed > period {
                    tracing::warn!(
                        "Tick took {:?}, over the {:?} period (average {:.3} ms)",
                        elapsed,
                        period,
                        average * 1e3
                    );
                }
            }
        }
    }

    (pipeline, engine)
}

fn apply(pipeline: &mut Pipeline, command: Command, outputs: &Outputs) {
    match command {
        Command::SetMode(mode) => {
            if pipeline.set_mode(mode) {
                let mut last = pipeline.last_snapshot().clone();
                last.is_running = true;
                outputs.publish(last);
            }
        }
        Command::SetLogging(enabled) => pipeline.set_logging(enabled),
        Command::ClearLog => pipeline.clear_log(),
        Command::History(reply) => {
            let _ = reply.send(pipeline.history());
        }
        Command::Export { dir, reply } => {
            // File I/O off the worker so ticks keep their cadence
            let recorder = pipeline.recorder().clone();
            tokio::task::spawn_blocking(move || {
                let _ = reply.send(recorder.export(&dir));
            });
        }
        Command::Stop => {}
    }
}
