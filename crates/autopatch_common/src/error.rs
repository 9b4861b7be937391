//! Error taxonomy shared by every stage of a run.
//!
//! Typed errors live next to the code that raises them (`LockError`,
//! `StateError`, `ConfigError`, ...). `ErrorKind` is the flat
//! classification recorded in a `RunResult` and used to pick exit codes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Classification of everything that can go wrong during a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Another run holds the process lock
    LockContention,
    /// Last run is too recent
    IntervalNotElapsed,
    /// Every configured repository failed to refresh
    MetadataUnavailable,
    /// Some repositories failed to refresh
    PartialMetadataDegradation,
    /// One candidate failed to download or verify
    DownloadFailure,
    /// The transaction executor rejected the batch
    TransactionRejected,
    /// The transaction was abandoned while the package manager may still
    /// be installing; what is installed is unknown
    TransactionStateUnknown,
    /// One emitter failed to deliver the report
    EmitterFailure,
    /// The last-run marker could not be written
    TimestampPersistenceFailure,
    /// The run was cancelled by a signal
    Interrupted,
    /// A collaborator failed in a way no other kind covers
    Collaborator,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::LockContention => "lock_contention",
            ErrorKind::IntervalNotElapsed => "interval_not_elapsed",
            ErrorKind::MetadataUnavailable => "metadata_unavailable",
            ErrorKind::PartialMetadataDegradation => "partial_metadata_degradation",
            ErrorKind::DownloadFailure => "download_failure",
            ErrorKind::TransactionRejected => "transaction_rejected",
            ErrorKind::TransactionStateUnknown => "transaction_state_unknown",
            ErrorKind::EmitterFailure => "emitter_failure",
            ErrorKind::TimestampPersistenceFailure => "timestamp_persistence_failure",
            ErrorKind::Interrupted => "interrupted",
            ErrorKind::Collaborator => "collaborator",
        }
    }

    /// Whether this kind stops the remaining pipeline
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ErrorKind::LockContention
                | ErrorKind::MetadataUnavailable
                | ErrorKind::TransactionRejected
                | ErrorKind::TransactionStateUnknown
                | ErrorKind::Interrupted
                | ErrorKind::Collaborator
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
