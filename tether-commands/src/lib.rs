//! Command layer for Tether
//!
//! Tracks in-flight jobs, keeps a small audit trail and exposes the UI
//! commands on top of the worker engine. [`DesktopCore`] composes the
//! pieces and owns the shutdown sequence.

pub mod audit;
pub mod desktop;
pub mod envelope;
pub mod error;
pub mod handlers;
pub mod jobs;

pub use audit::{AuditEntry, AuditLog, AuditOperation, AuditStats};
pub use desktop::{DesktopCore, ShutdownReport};
pub use envelope::{codes, CommandResponse, ErrorBody};
pub use error::{CommandError, CommandResult};
pub use handlers::{
    commands, endpoints, AudioDownloadRequest, CombinedDownloadRequest, CommandHandlers,
    DownloadResult, JobIdRequest, SystemHealth, TimeRange, TimeValue, VideoInfoRequest,
};
pub use jobs::{new_job_id, JobKind, JobMeta, JobRecord, JobStatus, JobTracker};
