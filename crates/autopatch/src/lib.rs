//! autopatch - unattended package update runner.
//!
//! Checks installed packages against repository metadata, optionally
//! downloads and applies the updates, and reports the outcome.

pub mod backend;
pub mod cancel;
pub mod cli;
pub mod emitters;
pub mod error;
pub mod orchestrator;
pub mod stages;

pub use cancel::{cancel_pair, CancelHandle, CancelToken};
pub use error::RunError;
pub use orchestrator::{Orchestrator, RunState};
