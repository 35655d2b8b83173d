//! Worker lifecycle supervision
//!
//! The supervisor owns the single worker process. It drives startup
//! (spawn, readiness polling), runs the periodic health check while the
//! worker is up, reacts to unexpected exits and terminates the worker on
//! `stop()`. State lives behind one mutex; every transition and the event
//! it produces happen under that lock, so events arrive in transition order.

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tether_config::{EngineConfig, RuntimeMode};
use tether_resilience::{ManagedProcess, ProcessShutdownManager};
use tokio::process::Child;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, sleep_until, timeout, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::error::EngineError;
use crate::events::{EventBus, ServerEvent};
use crate::launcher::{LaunchSpec, WorkerPaths};
use crate::output::{OutputCapture, OutputStream};
use crate::preflight::DependencyPreflight;
use crate::probe::{HealthProbe, HttpHealthProber, ProbeError};

/// Bound on reading the last worker output after exit
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Lifecycle state of the worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    NotStarted,
    Starting,
    Ready,
    Degraded,
    Stopping,
    Stopped,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EngineState::NotStarted => "not_started",
            EngineState::Starting => "starting",
            EngineState::Ready => "ready",
            EngineState::Degraded => "degraded",
            EngineState::Stopping => "stopping",
            EngineState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Whether requests may be sent to the worker
pub trait ReadinessGate: Send + Sync {
    fn is_ready(&self) -> bool;
}

/// Snapshot of the supervisor for status queries
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub state: EngineState,
    pub is_ready: bool,
    pub has_process: bool,
    pub pid: Option<u32>,
    pub server_url: String,
    pub executable: PathBuf,
    pub entry_script: Option<PathBuf>,
    pub mode: RuntimeMode,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy)]
struct Exit {
    code: Option<i32>,
}

/// Handle to the running worker, owned by the monitor task
#[derive(Clone)]
struct WorkerHandle {
    pid: Option<u32>,
    kill_tx: mpsc::UnboundedSender<()>,
    exit_rx: watch::Receiver<Option<Exit>>,
}

#[async_trait::async_trait]
impl ManagedProcess for WorkerHandle {
    fn id(&self) -> Option<u32> {
        if self.exit_rx.borrow().is_some() {
            None
        } else {
            self.pid
        }
    }

    async fn force_kill(&mut self) -> io::Result<()> {
        self.kill_tx
            .send(())
            .map_err(|_| io::Error::new(io::ErrorKind::NotFound, "worker monitor has finished"))
    }

    async fn wait_exit(&mut self) -> io::Result<Option<i32>> {
        let mut rx = self.exit_rx.clone();
        let exit = rx
            .wait_for(|exit| exit.is_some())
            .await
            .map(|exit| exit.and_then(|e| e.code))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "worker monitor dropped"))?;
        Ok(exit)
    }
}

struct ProcessSlot {
    generation: u64,
    handle: WorkerHandle,
}

struct Inner {
    state: EngineState,
    process: Option<ProcessSlot>,
    /// Incremented per start attempt; stale callbacks compare against it
    generation: u64,
    health_task: Option<JoinHandle<()>>,
    /// Dropping the sender cancels readiness polling
    startup_cancel: Option<oneshot::Sender<()>>,
    /// Set while the startup path itself terminates the worker
    terminating: bool,
    last_error: Option<EngineError>,
    preflight_done: bool,
}

struct Shared {
    config: EngineConfig,
    launch: LaunchSpec,
    entry_script: Option<PathBuf>,
    probe: Arc<dyn HealthProbe>,
    preflight: Option<DependencyPreflight>,
    events: EventBus,
    inner: Mutex<Inner>,
}

enum StartupOutcome {
    Ready,
    Exhausted,
    TimedOut,
    Cancelled,
    Exited(Option<i32>),
}

/// Builder for [`Supervisor`]
pub struct SupervisorBuilder {
    config: EngineConfig,
    launch: Option<LaunchSpec>,
    entry_script: Option<PathBuf>,
    probe: Option<Arc<dyn HealthProbe>>,
    preflight: Option<DependencyPreflight>,
    events: Option<EventBus>,
}

impl SupervisorBuilder {
    /// Launch the resolved interpreter and entry script
    pub fn worker(mut self, paths: &WorkerPaths) -> Self {
        self.launch = Some(paths.launch_spec());
        self.entry_script = Some(paths.entry_script.clone());
        self
    }

    /// Launch an arbitrary command
    pub fn launch(mut self, launch: LaunchSpec) -> Self {
        self.launch = Some(launch);
        self
    }

    pub fn probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn preflight(mut self, preflight: DependencyPreflight) -> Self {
        self.preflight = Some(preflight);
        self
    }

    pub fn events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn build(self) -> Result<Supervisor, EngineError> {
        let launch = self
            .launch
            .ok_or_else(|| EngineError::Config("no worker launch command configured".into()))?;

        let probe = match self.probe {
            Some(probe) => probe,
            None => Arc::new(HttpHealthProber::new(
                &self.config.server_url(),
                self.config.probe_timeout,
            )?),
        };

        Ok(Supervisor {
            shared: Arc::new(Shared {
                config: self.config,
                launch,
                entry_script: self.entry_script,
                probe,
                preflight: self.preflight,
                events: self.events.unwrap_or_default(),
                inner: Mutex::new(Inner {
                    state: EngineState::NotStarted,
                    process: None,
                    generation: 0,
                    health_task: None,
                    startup_cancel: None,
                    terminating: false,
                    last_error: None,
                    preflight_done: false,
                }),
            }),
        })
    }
}

/// Cloneable handle to the worker supervisor
#[derive(Clone)]
pub struct Supervisor {
    shared: Arc<Shared>,
}

impl Supervisor {
    pub fn builder(config: EngineConfig) -> SupervisorBuilder {
        SupervisorBuilder {
            config,
            launch: None,
            entry_script: None,
            probe: None,
            preflight: None,
            events: None,
        }
    }

    /// Subscribe to lifecycle events
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<ServerEvent> {
        self.shared.events.subscribe()
    }

    pub fn events(&self) -> &EventBus {
        &self.shared.events
    }

    pub fn state(&self) -> EngineState {
        self.shared.inner.lock().state
    }

    pub fn server_url(&self) -> String {
        self.shared.config.server_url()
    }

    /// Ready and holding a live process; Degraded does not count
    pub fn is_ready(&self) -> bool {
        let inner = self.shared.inner.lock();
        inner.state == EngineState::Ready && inner.process.is_some()
    }

    pub fn status(&self) -> EngineStatus {
        let inner = self.shared.inner.lock();
        EngineStatus {
            state: inner.state,
            is_ready: inner.state == EngineState::Ready && inner.process.is_some(),
            has_process: inner.process.is_some(),
            pid: inner.process.as_ref().and_then(|slot| slot.handle.pid),
            server_url: self.shared.config.server_url(),
            executable: self.shared.launch.program.clone(),
            entry_script: self.shared.entry_script.clone(),
            mode: self.shared.config.mode,
            last_error: inner.last_error.as_ref().map(|e| e.to_string()),
        }
    }

    /// Start the worker and wait until it answers the health probe.
    ///
    /// A no-op returning `Ok` while a process exists or a start is underway.
    /// Startup runs on its own task, so dropping the returned future leaves
    /// it running to completion.
    pub async fn start(&self) -> Result<(), EngineError> {
        let (generation, cancel_rx, run_preflight) = {
            let mut inner = self.shared.inner.lock();
            if inner.process.is_some()
                || matches!(
                    inner.state,
                    EngineState::Starting
                        | EngineState::Ready
                        | EngineState::Degraded
                        | EngineState::Stopping
                )
            {
                debug!(state = %inner.state, "Worker already running, start is a no-op");
                return Ok(());
            }

            inner.generation += 1;
            inner.state = EngineState::Starting;
            inner.terminating = false;
            inner.last_error = None;

            let (cancel_tx, cancel_rx) = oneshot::channel();
            inner.startup_cancel = Some(cancel_tx);

            let run_preflight = !inner.preflight_done && self.shared.preflight.is_some();
            inner.preflight_done = true;

            info!("Starting worker process");
            self.shared.events.emit(ServerEvent::Starting);
            (inner.generation, cancel_rx, run_preflight)
        };

        let startup = tokio::spawn(Arc::clone(&self.shared).run_startup(
            generation,
            cancel_rx,
            run_preflight,
        ));

        match startup.await {
            Ok(result) => result,
            Err(e) => {
                error!("Worker startup task failed: {}", e);
                self.stop().await;
                Err(EngineError::SpawnFailed(format!("startup task failed: {}", e)))
            }
        }
    }

    /// Stop the worker: graceful termination, forced after the grace period.
    /// Always completes.
    pub async fn stop(&self) {
        let (generation, handle) = {
            let mut inner = self.shared.inner.lock();
            inner.startup_cancel = None;
            if let Some(task) = inner.health_task.take() {
                task.abort();
            }

            let slot = inner
                .process
                .as_ref()
                .map(|slot| (slot.generation, slot.handle.clone()));

            match slot {
                Some(slot) => {
                    inner.state = EngineState::Stopping;
                    slot
                }
                None => {
                    if matches!(
                        inner.state,
                        EngineState::Starting | EngineState::Ready | EngineState::Degraded
                    ) {
                        inner.state = EngineState::Stopped;
                    }
                    debug!("No worker process to stop");
                    return;
                }
            }
        };

        info!(pid = ?handle.pid, "Stopping worker process");
        let mut handle = handle;
        let outcome = ProcessShutdownManager::shutdown_process(
            &mut handle,
            self.shared.config.shutdown_grace_period,
        )
        .await;

        let mut inner = self.shared.inner.lock();
        if inner
            .process
            .as_ref()
            .is_some_and(|slot| slot.generation == generation)
        {
            inner.process = None;
        }
        if inner.state == EngineState::Stopping {
            inner.state = EngineState::Stopped;
        }
        info!(?outcome, "Worker process stopped");
    }
}

impl ReadinessGate for Supervisor {
    fn is_ready(&self) -> bool {
        Supervisor::is_ready(self)
    }
}

impl Shared {
    /// Preflight, spawn and readiness polling for one start attempt
    async fn run_startup(
        self: Arc<Self>,
        generation: u64,
        cancel_rx: oneshot::Receiver<()>,
        run_preflight: bool,
    ) -> Result<(), EngineError> {
        if run_preflight {
            if let Some(preflight) = &self.preflight {
                let outcome = preflight.run().await;
                debug!(?outcome, "Dependency preflight finished");
            }
        }

        let exit_rx = self.spawn_worker(generation)?;
        let attempts = AtomicU32::new(0);
        let outcome = self.await_ready(cancel_rx, exit_rx, &attempts).await;
        self.finish_startup(generation, outcome, attempts.load(Ordering::Relaxed))
            .await
    }

    fn spawn_worker(self: &Arc<Self>, generation: u64) -> Result<watch::Receiver<Option<Exit>>, EngineError> {
        let mut inner = self.inner.lock();
        if inner.generation != generation || inner.state != EngineState::Starting {
            return Err(EngineError::StartupCancelled);
        }

        let mut child = match self.launch.to_command().spawn() {
            Ok(child) => child,
            Err(e) => {
                let err = EngineError::SpawnFailed(format!(
                    "{}: {}",
                    self.launch.program.display(),
                    e
                ));
                error!("{}", err);
                inner.state = EngineState::Stopped;
                inner.startup_cancel = None;
                inner.last_error = Some(err.clone());
                self.events.emit(ServerEvent::Error {
                    message: err.to_string(),
                });
                return Err(err);
            }
        };

        let pid = child.id();
        let capture = OutputCapture::new(self.config.output_capture_lines);
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(capture.attach(stdout, OutputStream::Stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(capture.attach(stderr, OutputStream::Stderr));
        }

        let (kill_tx, kill_rx) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = watch::channel(None);

        inner.process = Some(ProcessSlot {
            generation,
            handle: WorkerHandle {
                pid,
                kill_tx,
                exit_rx: exit_rx.clone(),
            },
        });
        info!(?pid, "Worker process spawned");

        tokio::spawn(monitor(
            Arc::clone(self),
            generation,
            child,
            kill_rx,
            exit_tx,
            capture,
            readers,
        ));

        Ok(exit_rx)
    }

    async fn await_ready(
        &self,
        cancel_rx: oneshot::Receiver<()>,
        mut exit_rx: watch::Receiver<Option<Exit>>,
        attempts: &AtomicU32,
    ) -> StartupOutcome {
        let config = &self.config;
        let max_polls = config.max_readiness_polls();
        let deadline = Instant::now() + config.effective_startup_timeout();
        let probe = Arc::clone(&self.probe);

        let polling = async {
            sleep(config.initial_probe_delay).await;
            loop {
                let attempt = attempts.fetch_add(1, Ordering::Relaxed) + 1;
                match probe.probe().await {
                    Ok(()) => {
                        debug!(attempt, "Worker answered readiness probe");
                        return true;
                    }
                    Err(e) => debug!(attempt, max_polls, "Worker not ready yet: {}", e),
                }
                if attempt >= max_polls {
                    return false;
                }
                sleep(config.health_check_interval).await;
            }
        };

        let exited = async {
            exit_rx
                .wait_for(|exit| exit.is_some())
                .await
                .ok()
                .and_then(|exit| exit.and_then(|e| e.code))
        };

        tokio::select! {
            biased;
            code = exited => StartupOutcome::Exited(code),
            _ = cancel_rx => StartupOutcome::Cancelled,
            ready = polling => {
                if ready { StartupOutcome::Ready } else { StartupOutcome::Exhausted }
            }
            _ = sleep_until(deadline) => StartupOutcome::TimedOut,
        }
    }

    async fn finish_startup(
        self: &Arc<Self>,
        generation: u64,
        outcome: StartupOutcome,
        attempts: u32,
    ) -> Result<(), EngineError> {
        match outcome {
            StartupOutcome::Ready => {
                let mut inner = self.inner.lock();
                let current = inner.generation == generation
                    && inner.state == EngineState::Starting
                    && inner.process.is_some();
                if !current {
                    return Err(inner
                        .last_error
                        .clone()
                        .unwrap_or(EngineError::StartupCancelled));
                }

                inner.startup_cancel = None;
                inner.state = EngineState::Ready;
                info!(attempts, "Worker is ready at {}", self.config.server_url());
                self.events.emit(ServerEvent::Ready);
                Shared::arm_health_timer(self, &mut inner, generation);
                Ok(())
            }
            StartupOutcome::Exited(code) => {
                let mut inner = self.inner.lock();
                if inner.generation != generation {
                    return Err(EngineError::StartupCancelled);
                }
                // stop() takes the cancel sender before terminating the worker
                let stopped = inner.startup_cancel.take().is_none();
                match &inner.last_error {
                    Some(err @ EngineError::ProcessExit { .. }) => Err(err.clone()),
                    _ if stopped => Err(EngineError::StartupCancelled),
                    _ => Err(EngineError::ProcessExit {
                        code,
                        output: String::new(),
                    }),
                }
            }
            StartupOutcome::Cancelled => {
                debug!("Worker startup cancelled");
                Err(EngineError::StartupCancelled)
            }
            StartupOutcome::Exhausted | StartupOutcome::TimedOut => {
                let err = EngineError::StartupTimeout {
                    timeout: self.config.effective_startup_timeout(),
                    attempts,
                };
                self.abandon_startup(generation, err).await
            }
        }
    }

    /// Terminate a worker that never became ready
    async fn abandon_startup(&self, generation: u64, err: EngineError) -> Result<(), EngineError> {
        warn!("{}", err);

        let handle = {
            let mut inner = self.inner.lock();
            if inner.generation != generation {
                return Err(err);
            }
            inner.startup_cancel = None;
            inner.terminating = true;
            inner.process.as_ref().map(|slot| slot.handle.clone())
        };

        if let Some(mut handle) = handle {
            let outcome = ProcessShutdownManager::shutdown_process(
                &mut handle,
                self.config.shutdown_grace_period,
            )
            .await;
            debug!(?outcome, "Terminated worker that failed to start");
        }

        let mut inner = self.inner.lock();
        if inner.generation == generation {
            inner.terminating = false;
            inner.process = None;
            if inner.state == EngineState::Starting {
                inner.state = EngineState::Stopped;
                inner.last_error = Some(err.clone());
                self.events.emit(ServerEvent::Error {
                    message: err.to_string(),
                });
            }
        }

        Err(err)
    }

    /// Arm the periodic health check, replacing any existing timer
    fn arm_health_timer(self: &Arc<Self>, inner: &mut Inner, generation: u64) {
        if let Some(task) = inner.health_task.take() {
            task.abort();
        }

        let shared = Arc::clone(self);
        let period = self.config.health_check_interval;
        inner.health_task = Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let result = shared.probe.probe().await;
                if !shared.on_health_result(generation, result) {
                    break;
                }
            }
        }));
    }

    /// Apply one health check result; `false` ends the timer
    fn on_health_result(&self, generation: u64, result: Result<(), ProbeError>) -> bool {
        let mut inner = self.inner.lock();
        if inner.generation != generation || inner.process.is_none() {
            return false;
        }

        match (inner.state, result) {
            (EngineState::Ready, Ok(())) => {}
            (EngineState::Degraded, Ok(())) => {
                info!("Worker health check recovered");
                inner.state = EngineState::Ready;
                self.events.emit(ServerEvent::Ready);
            }
            (EngineState::Ready, Err(e)) => {
                warn!("Worker health check failed: {}", e);
                inner.state = EngineState::Degraded;
                self.events.emit(ServerEvent::Error {
                    message: format!("Health check failed: {}", e),
                });
            }
            (EngineState::Degraded, Err(e)) => {
                warn!("Worker still unhealthy: {}", e);
            }
            _ => return false,
        }
        true
    }

    /// Exit observer for the current worker
    fn on_exit(&self, generation: u64, code: Option<i32>, output: String) {
        let mut inner = self.inner.lock();
        let current = inner
            .process
            .as_ref()
            .is_some_and(|slot| slot.generation == generation);
        if !current {
            debug!(?code, "Ignoring exit of a superseded worker");
            return;
        }

        inner.process = None;
        if let Some(task) = inner.health_task.take() {
            task.abort();
        }

        if inner.terminating || inner.state == EngineState::Stopping {
            info!(?code, "Worker exited after termination request");
            return;
        }

        // Any exit before readiness is a failure, whatever the code
        let during_startup = inner.state == EngineState::Starting;
        inner.state = EngineState::Stopped;
        match code {
            Some(0) | None if !during_startup => info!(?code, "Worker process exited"),
            _ => {
                let err = EngineError::ProcessExit { code, output };
                error!("{}", err.diagnostic());
                self.events.emit(ServerEvent::Error {
                    message: err.diagnostic(),
                });
                inner.last_error = Some(err);
            }
        }
    }
}

/// Owns the child: waits for exit, serves kill requests, reports the exit
async fn monitor(
    shared: Arc<Shared>,
    generation: u64,
    mut child: Child,
    mut kill_rx: mpsc::UnboundedReceiver<()>,
    exit_tx: watch::Sender<Option<Exit>>,
    capture: OutputCapture,
    readers: Vec<JoinHandle<()>>,
) {
    let status = loop {
        tokio::select! {
            status = child.wait() => break status,
            Some(()) = kill_rx.recv() => {
                if let Err(e) = child.start_kill() {
                    warn!("Failed to kill worker process: {}", e);
                }
            }
        }
    };

    for reader in readers {
        let _ = timeout(OUTPUT_DRAIN_TIMEOUT, reader).await;
    }

    let code = match status {
        Ok(status) => status.code(),
        Err(e) => {
            warn!("Failed to wait for worker process: {}", e);
            None
        }
    };

    shared.on_exit(generation, code, capture.snapshot());
    let _ = exit_tx.send(Some(Exit { code }));
}
