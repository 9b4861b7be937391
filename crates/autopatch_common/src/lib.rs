//! autopatch common - shared types for the unattended update runner.
//!
//! Data model, configuration, error taxonomy, the process lock and the
//! last-run timestamp store.

pub mod config;
pub mod error;
pub mod lock;
pub mod report;
pub mod timestamp;
pub mod types;

pub use config::{ConfigError, DownloadPolicy, EmitterKind, RebootPolicy, RunConfig};
pub use error::ErrorKind;
pub use lock::{LockError, LockHandle, LockHolder, ProcessLock};
pub use report::Report;
pub use timestamp::{is_due, StateError, TimestampStore};
pub use types::*;
