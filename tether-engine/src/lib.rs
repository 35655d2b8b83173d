//! Worker engine for Tether
//!
//! Resolves and launches the local worker process, supervises its
//! lifecycle through health probing, and bridges requests to its HTTP
//! interface once it is ready.
//!
//! ```no_run
//! use tether_config::TetherConfig;
//! use tether_engine::{Supervisor, WorkerLauncher};
//!
//! # async fn run() -> Result<(), tether_engine::EngineError> {
//! let config = TetherConfig::default();
//! let paths = WorkerLauncher::new(config.engine.clone())?.resolve()?;
//! let supervisor = Supervisor::builder(config.engine).worker(&paths).build()?;
//! supervisor.start().await?;
//! supervisor.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod bridge;
pub mod error;
pub mod events;
pub mod launcher;
pub mod output;
pub mod preflight;
pub mod probe;
pub mod supervisor;

pub use bridge::{BridgeResponse, RequestBridge, RequestOptions, RequestRetryPolicy};
pub use error::EngineError;
pub use events::{EventBus, ServerEvent};
pub use launcher::{Arch, LaunchSpec, Os, Platform, RuntimeLayout, WorkerLauncher, WorkerPaths};
pub use output::{OutputCapture, OutputStream};
pub use preflight::{DependencyPreflight, PreflightOutcome};
pub use probe::{HealthProbe, HttpHealthProber, ProbeError};
pub use supervisor::{EngineState, EngineStatus, ReadinessGate, Supervisor, SupervisorBuilder};
