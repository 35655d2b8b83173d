//! Graceful shutdown coordination
//!
//! Two concerns live here: the application-wide shutdown decision (which
//! honours an in-progress self-update), and termination of an external
//! process with escalation from a graceful request to a forced kill.

use log::{debug, error, info, warn};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::timeout;

/// Bound on the wait after a forced kill
const FORCED_EXIT_WAIT: Duration = Duration::from_secs(5);

/// Signals broadcast to shutdown subscribers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// Regular quit: release resources
    Graceful,
    /// Quit for an update: the installer owns the teardown
    UpdateHandover,
}

impl std::fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownSignal::Graceful => write!(f, "graceful"),
            ShutdownSignal::UpdateHandover => write!(f, "update-handover"),
        }
    }
}

/// What the caller of `begin_shutdown` should do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownDecision {
    /// Run the normal cleanup sequence
    Proceed,
    /// An update is in progress; leave everything as is
    SkipCleanup,
}

/// Application shutdown coordinator
pub struct ShutdownCoordinator {
    sender: broadcast::Sender<ShutdownSignal>,
    shutting_down: AtomicBool,
    updating: AtomicBool,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(16);

        Self {
            sender,
            shutting_down: AtomicBool::new(false),
            updating: AtomicBool::new(false),
        }
    }

    /// Subscribe to shutdown signals
    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownSignal> {
        self.sender.subscribe()
    }

    /// Check if shutdown is in progress
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Record that an application update has started
    pub fn mark_updating(&self) {
        info!("Application update in progress; shutdown cleanup will be skipped");
        self.updating.store(true, Ordering::SeqCst);
    }

    pub fn is_updating(&self) -> bool {
        self.updating.load(Ordering::SeqCst)
    }

    /// Start shutting down. Only the first call succeeds.
    pub fn begin_shutdown(&self) -> Result<ShutdownDecision, ShutdownError> {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return Err(ShutdownError::AlreadyShuttingDown);
        }

        let (signal, decision) = if self.is_updating() {
            (ShutdownSignal::UpdateHandover, ShutdownDecision::SkipCleanup)
        } else {
            (ShutdownSignal::Graceful, ShutdownDecision::Proceed)
        };

        info!("Starting {} shutdown", signal);
        if self.sender.send(signal).is_err() {
            debug!("No shutdown subscribers");
        }

        Ok(decision)
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Shutdown error types
#[derive(Debug, thiserror::Error)]
pub enum ShutdownError {
    /// Shutdown already in progress
    #[error("Shutdown already in progress")]
    AlreadyShuttingDown,
}

/// How a process ended after a shutdown request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Nothing to terminate
    AlreadyExited,
    /// Exited within the grace period
    Graceful { code: Option<i32> },
    /// Force-killed after the grace period
    Forced { code: Option<i32> },
}

/// A process that can be asked to terminate
#[async_trait::async_trait]
pub trait ManagedProcess: Send {
    /// OS process id, `None` once the process is gone
    fn id(&self) -> Option<u32>;

    /// Ask the process to exit (SIGTERM on Unix)
    async fn signal_graceful(&mut self) -> io::Result<()> {
        match self.id() {
            Some(pid) => send_terminate(pid),
            None => Ok(()),
        }
    }

    /// Kill the process unconditionally
    async fn force_kill(&mut self) -> io::Result<()>;

    /// Wait for the process to exit, yielding its exit code
    async fn wait_exit(&mut self) -> io::Result<Option<i32>>;
}

/// Send a termination request to a process id
#[cfg(unix)]
pub fn send_terminate(pid: u32) -> io::Result<()> {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    let raw = i32::try_from(pid)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
    signal::kill(Pid::from_raw(raw), Signal::SIGTERM).map_err(io::Error::from)
}

/// Send a termination request to a process id
#[cfg(not(unix))]
pub fn send_terminate(_pid: u32) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "graceful termination is not available on this platform",
    ))
}

#[async_trait::async_trait]
impl ManagedProcess for tokio::process::Child {
    fn id(&self) -> Option<u32> {
        tokio::process::Child::id(self)
    }

    async fn force_kill(&mut self) -> io::Result<()> {
        self.start_kill()
    }

    async fn wait_exit(&mut self) -> io::Result<Option<i32>> {
        self.wait().await.map(|status| status.code())
    }
}

/// Process shutdown manager for external processes
pub struct ProcessShutdownManager;

impl ProcessShutdownManager {
    /// Terminate a process: graceful request, then a forced kill after
    /// `grace_period`. Never fails; problems are logged.
    pub async fn shutdown_process<P>(process: &mut P, grace_period: Duration) -> ShutdownOutcome
    where
        P: ManagedProcess + ?Sized,
    {
        let Some(id) = process.id() else {
            debug!("Process already exited, nothing to shut down");
            return ShutdownOutcome::AlreadyExited;
        };

        info!("Initiating graceful shutdown for process {}", id);
        let graceful_sent = match process.signal_graceful().await {
            Ok(()) => true,
            Err(e) if e.kind() == io::ErrorKind::Unsupported => {
                debug!("No graceful termination for process {}: {}", id, e);
                false
            }
            Err(e) => {
                warn!("Failed to request termination of process {}: {}", id, e);
                true
            }
        };

        if graceful_sent {
            match timeout(grace_period, process.wait_exit()).await {
                Ok(Ok(code)) => {
                    info!("Process {} terminated gracefully (code {:?})", id, code);
                    return ShutdownOutcome::Graceful { code };
                }
                Ok(Err(e)) => error!("Error waiting for process {}: {}", id, e),
                Err(_) => warn!(
                    "Process {} did not terminate within {:?}",
                    id, grace_period
                ),
            }
        }

        info!("Forcing termination of process {}", id);
        if let Err(e) = process.force_kill().await {
            error!("Failed to kill process {}: {}", id, e);
        }

        match timeout(FORCED_EXIT_WAIT, process.wait_exit()).await {
            Ok(Ok(code)) => {
                info!("Process {} terminated forcefully (code {:?})", id, code);
                ShutdownOutcome::Forced { code }
            }
            Ok(Err(e)) => {
                error!("Error waiting for killed process {}: {}", id, e);
                ShutdownOutcome::Forced { code: None }
            }
            Err(_) => {
                error!("Process {} did not terminate even after force kill", id);
                ShutdownOutcome::Forced { code: None }
            }
        }
    }
}
