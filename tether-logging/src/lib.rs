//! Logging initialisation for Tether
//!
//! Library crates emit through `tracing` (or the `log` facade); binaries call
//! one of the initialisers here once at startup.

pub mod init;

pub use init::{build_env_filter, init_logging, init_simple_tracing};
