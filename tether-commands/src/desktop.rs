//! The composed desktop core: supervisor, bridge, job tracking and the
//! shutdown sequence.

use std::sync::Arc;

use parking_lot::Mutex;
use tether_config::TetherConfig;
use tether_engine::{
    DependencyPreflight, EngineError, RequestBridge, ServerEvent, Supervisor, WorkerLauncher,
};
use tether_resilience::{ShutdownCoordinator, ShutdownDecision};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::audit::AuditLog;
use crate::handlers::CommandHandlers;
use crate::jobs::JobTracker;

/// How a `shutdown()` call was handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReport {
    /// Sweeper stopped, worker stopped, jobs cleared
    CleanedUp,
    /// An update owns the teardown
    SkippedForUpdate,
    /// Another shutdown already ran
    AlreadyShutDown,
}

pub struct DesktopCore {
    config: TetherConfig,
    supervisor: Supervisor,
    handlers: CommandHandlers,
    jobs: JobTracker,
    shutdown: Arc<ShutdownCoordinator>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl DesktopCore {
    /// Resolve the worker for this platform and wire up the core.
    ///
    /// Fails on an unsupported platform or a missing entry script.
    pub fn new(config: TetherConfig) -> Result<Self, EngineError> {
        let paths = WorkerLauncher::new(config.engine.clone())?.resolve()?;
        info!(
            mode = %paths.mode,
            executable = %paths.executable.display(),
            entry_script = %paths.entry_script.display(),
            "Resolved worker paths"
        );

        let supervisor = Supervisor::builder(config.engine.clone())
            .worker(&paths)
            .preflight(DependencyPreflight::new(config.preflight.clone(), &paths))
            .build()?;

        Self::with_supervisor(config, supervisor)
    }

    /// Wire up the core around an existing supervisor
    pub fn with_supervisor(config: TetherConfig, supervisor: Supervisor) -> Result<Self, EngineError> {
        let bridge = RequestBridge::from_config(
            &supervisor.server_url(),
            Arc::new(supervisor.clone()),
            &config.http,
            config.engine.mode,
        )?;
        Self::with_parts(config, supervisor, bridge)
    }

    /// Wire up the core around an existing supervisor and bridge
    pub fn with_parts(
        config: TetherConfig,
        supervisor: Supervisor,
        bridge: RequestBridge,
    ) -> Result<Self, EngineError> {
        let jobs = JobTracker::new();
        let audit = Arc::new(AuditLog::new(config.jobs.audit_capacity));
        let handlers = CommandHandlers::new(
            supervisor.clone(),
            Arc::new(bridge),
            jobs.clone(),
            audit,
            config.jobs.expiry,
        );

        Ok(Self {
            config,
            supervisor,
            handlers,
            jobs,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            sweeper: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &TetherConfig {
        &self.config
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    pub fn handlers(&self) -> &CommandHandlers {
        &self.handlers
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.supervisor.subscribe()
    }

    pub fn shutdown_coordinator(&self) -> Arc<ShutdownCoordinator> {
        Arc::clone(&self.shutdown)
    }

    /// Start the job sweeper and the worker
    pub async fn start(&self) -> Result<(), EngineError> {
        self.start_sweeper();
        self.supervisor.start().await
    }

    fn start_sweeper(&self) {
        let Some(interval) = self.config.jobs.sweep_interval else {
            return;
        };

        let mut sweeper = self.sweeper.lock();
        if sweeper.is_none() {
            debug!(?interval, "Starting job sweeper");
            *sweeper = Some(self.jobs.spawn_sweeper(interval, self.config.jobs.expiry));
        }
    }

    /// Record that a self-update will replace the application
    pub fn begin_update(&self) {
        self.shutdown.mark_updating();
    }

    /// Tear the core down unless an update is in progress
    pub async fn shutdown(&self) -> ShutdownReport {
        match self.shutdown.begin_shutdown() {
            Err(_) => {
                debug!("Shutdown already handled");
                ShutdownReport::AlreadyShutDown
            }
            Ok(ShutdownDecision::SkipCleanup) => {
                info!("Update in progress, skipping shutdown cleanup");
                ShutdownReport::SkippedForUpdate
            }
            Ok(ShutdownDecision::Proceed) => {
                if let Some(sweeper) = self.sweeper.lock().take() {
                    sweeper.abort();
                }
                self.supervisor.stop().await;
                self.jobs.clear();
                info!("Shutdown complete");
                ShutdownReport::CleanedUp
            }
        }
    }
}
