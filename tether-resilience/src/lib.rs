//! Resilience patterns for Tether
//!
//! Retry policies with linear backoff for calls into the worker, and
//! shutdown coordination for the worker process and the desktop core.

pub mod backoff;
pub mod retry;
pub mod shutdown;

pub use backoff::BackoffCalculator;
pub use retry::{RetryError, RetryExecutor, RetryPolicy, Retryable};
pub use shutdown::{
    send_terminate, ManagedProcess, ProcessShutdownManager, ShutdownCoordinator,
    ShutdownDecision, ShutdownError, ShutdownOutcome, ShutdownSignal,
};
